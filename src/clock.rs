//! Clock abstractions used by token buckets, the client registry and the expiry gate.
//!
//! Two notions of time are kept apart: a monotonic [`Clock`] drives refill and
//! inactivity accounting, while a [`WallClock`] answers calendar questions such as
//! "has this board passed its expiry date".

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Monotonic clock so refill and staleness can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Nanoseconds elapsed since an arbitrary, fixed origin.
    fn now_nanos(&self) -> u64;
}

/// Calendar clock used for board lifetimes.
pub trait WallClock: Send + Sync + std::fmt::Debug {
    /// Current instant in UTC.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Monotonic clock backed by `Instant::now()`.
///
/// Resets when the process restarts, which is fine: rate-limit state is never persisted.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Wall clock backed by `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share state, so a test can hand one clone to the registry and keep another
/// to move time forward. Advancing moves both the monotonic and the wall reading.
#[derive(Debug, Clone)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
    wall: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Start at monotonic zero and the given wall time.
    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self { nanos: Arc::new(AtomicU64::new(0)), wall: Arc::new(Mutex::new(wall)) }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let step = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(step, Ordering::SeqCst);
        let mut wall = self.wall.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(delta) = chrono::Duration::from_std(by) {
            *wall += delta;
        }
    }

    /// Jump the wall clock without touching the monotonic reading.
    pub fn set_utc(&self, at: DateTime<Utc>) {
        *self.wall.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_at(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

impl WallClock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.wall.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
