//! Expiry gate: boards stop answering once their lifetime is over.

use std::sync::Arc;

use tracing::debug;

use crate::board::Board;
use crate::clock::WallClock;
use crate::error::GuardError;

/// Compares a board's expiry against the wall clock.
#[derive(Debug, Clone)]
pub struct ExpiryGate {
    clock: Arc<dyn WallClock>,
}

impl ExpiryGate {
    /// Gate reading `clock`.
    pub fn new<C: WallClock + 'static>(clock: C) -> Self {
        Self { clock: Arc::new(clock) }
    }

    /// Gate around an already shared clock.
    pub fn with_shared_clock(clock: Arc<dyn WallClock>) -> Self {
        Self { clock }
    }

    /// Live up to and including the expiry instant.
    pub fn is_live(&self, board: &Board) -> bool {
        board.is_live_at(self.clock.now_utc())
    }

    /// `Err(Expired)` once the board is past its expiry.
    pub fn check(&self, board: &Board) -> Result<(), GuardError> {
        if self.is_live(board) {
            Ok(())
        } else {
            debug!(target: "kanbin_guard::expiry", board = %board.id, expired_at = %board.expires_at, "board expired");
            Err(GuardError::Expired { expired_at: board.expires_at })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    #[test]
    fn boundary_is_inclusive() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::starting_at(start);
        let gate = ExpiryGate::new(clock.clone());
        let board = Board::new("b", start, Duration::from_secs(7 * 24 * 3600));

        clock.set_utc(board.expires_at);
        assert!(gate.check(&board).is_ok());

        clock.set_utc(board.expires_at + chrono::Duration::nanoseconds(1));
        assert_eq!(gate.check(&board), Err(GuardError::Expired { expired_at: board.expires_at }));
    }

    #[test]
    fn advancing_past_ttl_expires() {
        let clock = ManualClock::default();
        let gate = ExpiryGate::new(clock.clone());
        let board = Board::new("b", clock.now_utc(), Duration::from_secs(60));
        assert!(gate.is_live(&board));
        clock.advance(Duration::from_secs(61));
        assert!(!gate.is_live(&board));
    }
}
