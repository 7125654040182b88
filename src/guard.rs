//! Request-admission façade.
//!
//! [`Guard`] wires the registry, the capability check, the expiry gate and the
//! fingerprint together in the order an inbound operation needs them:
//!
//! 1. admission against the caller's bucket for the operation's class,
//! 2. for task mutations, the capability check,
//! 3. the expiry gate,
//! 4. for board reads, the conditional-read fingerprint.
//!
//! ```rust
//! use kanbin_guard::{Board, BoardRead, Guard, GuardConfig, InMemoryBoardStore, Task};
//! use chrono::Utc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryBoardStore::new();
//! let board = Board::new("Launch", Utc::now(), Duration::from_secs(3600));
//! store.insert_task(Task::new(board.id, "Ship it", 0, board.created_at));
//! store.insert_board(board.clone());
//!
//! let guard = Guard::new(GuardConfig::default(), store)?;
//! guard.admit("203.0.113.7", "boardGet")?;
//!
//! let etag = match guard.read_board(board.key.expose(), None).await? {
//!     BoardRead::Fresh { tasks, etag, .. } => {
//!         assert_eq!(tasks.len(), 1);
//!         etag
//!     }
//!     BoardRead::NotModified { .. } => unreachable!(),
//! };
//! let again = guard.read_board(board.key.expose(), Some(etag.as_str())).await?;
//! assert!(matches!(again, BoardRead::NotModified { .. }));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{debug, warn};

use crate::board::{Board, BoardKey, Task, TaskId};
use crate::capability::{CapabilityCheck, Grant};
use crate::clock::{Clock, MonotonicClock, SystemWallClock, WallClock};
use crate::config::{ConfigError, GuardConfig};
use crate::error::{status, GuardError, Signal, ETAG};
use crate::expiry::ExpiryGate;
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::rate_limit::{ClientRegistry, Decision, Reaper, TrafficClass};
use crate::store::{BoardStore, StoreError};

/// Outcome of a board read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardRead {
    /// The caller's copy is stale, or it has none.
    Fresh {
        /// The board.
        board: Board,
        /// Its tasks, in store order.
        tasks: Vec<Task>,
        /// Fingerprint of this state.
        etag: Fingerprint,
    },
    /// The caller's `If-None-Match` equals the current fingerprint.
    NotModified {
        /// Current fingerprint.
        etag: Fingerprint,
    },
}

impl BoardRead {
    /// Current fingerprint.
    pub fn etag(&self) -> &Fingerprint {
        match self {
            BoardRead::Fresh { etag, .. } | BoardRead::NotModified { etag } => etag,
        }
    }

    /// Status and headers for this outcome. `Fresh` carries no body here; rendering
    /// the board is the transport's job.
    pub fn signal(&self) -> Signal {
        match self {
            BoardRead::Fresh { etag, .. } => Signal::empty(200).with_header(ETAG, etag.as_str()),
            BoardRead::NotModified { etag } => {
                Signal::empty(status::NOT_MODIFIED).with_header(ETAG, etag.as_str())
            }
        }
    }
}

/// Admission and access control for one board service.
///
/// Construct once and share; the registry inside is the only mutable state.
#[derive(Debug)]
pub struct Guard<S> {
    store: Arc<S>,
    registry: Arc<ClientRegistry>,
    capability: CapabilityCheck<Arc<S>>,
    wall: Arc<dyn WallClock>,
    expiry: ExpiryGate,
    config: GuardConfig,
}

impl<S: BoardStore> Guard<S> {
    /// Guard on the system clocks.
    pub fn new(config: GuardConfig, store: S) -> Result<Self, ConfigError> {
        Self::with_clocks(config, store, MonotonicClock::default(), SystemWallClock)
    }

    /// Guard with explicit clocks, for tests and simulations.
    pub fn with_clocks<C, W>(config: GuardConfig, store: S, clock: C, wall: W) -> Result<Self, ConfigError>
    where
        C: Clock + 'static,
        W: WallClock + 'static,
    {
        config.validate()?;
        let store = Arc::new(store);
        let registry = ClientRegistry::new(config.limits.clone(), clock)
            .with_retry_after(config.retry_after);
        let wall: Arc<dyn WallClock> = Arc::new(wall);
        Ok(Self {
            capability: CapabilityCheck::new(store.clone()),
            store,
            registry: Arc::new(registry),
            expiry: ExpiryGate::with_shared_clock(wall.clone()),
            wall,
            config,
        })
    }

    /// A fresh board created now, expiring `board_ttl` later.
    ///
    /// The board is not persisted; hand it to the store.
    pub fn new_board(&self, title: impl Into<String>) -> Board {
        let board = Board::new(title, self.wall.now_utc(), self.config.board_ttl);
        debug!(target: "kanbin_guard::guard", board = %board.id, expires_at = %board.expires_at, "board created");
        board
    }

    /// Charge one request from `identity` to the class named `class`.
    ///
    /// Unrecognized class names are charged to the global class.
    pub fn admit(&self, identity: &str, class: &str) -> Result<(), GuardError> {
        self.admit_class(identity, TrafficClass::from_name(class))
    }

    /// Charge one request from `identity` to `class`.
    pub fn admit_class(&self, identity: &str, class: TrafficClass) -> Result<(), GuardError> {
        match self.registry.check(identity, class) {
            Decision::Admitted { .. } => Ok(()),
            Decision::Rejected { class, retry_after } => {
                Err(GuardError::RateLimited { class, retry_after })
            }
        }
    }

    /// Read a board by key, short-circuiting when `if_none_match` is current.
    pub async fn read_board(&self, key: &str, if_none_match: Option<&str>) -> Result<BoardRead, GuardError> {
        let board = self.open_board(key).await?;
        let tasks = self.store.tasks_for_board(board.id).await.map_err(store_failed)?;
        let etag = fingerprint(board.created_at, tasks.iter().map(|t| t.updated_at));

        if etag.matches(if_none_match) {
            Ok(BoardRead::NotModified { etag })
        } else {
            Ok(BoardRead::Fresh { board, tasks, etag })
        }
    }

    /// Resolve a live board by key: presence, lookup, expiry.
    ///
    /// An empty key is malformed. Any other key that is not a well-formed board key
    /// cannot name a board, so it answers like a lookup miss.
    pub async fn open_board(&self, key: &str) -> Result<Board, GuardError> {
        if key.is_empty() {
            return Err(GuardError::Malformed("Board key is required"));
        }
        let key = BoardKey::parse(key).map_err(|_| GuardError::NotFound)?;
        let board = self.store.board_by_key(&key).await.map_err(store_failed)?.ok_or(GuardError::NotFound)?;
        self.expiry.check(&board)?;
        Ok(board)
    }

    /// Resolve a live board that still has room for one more task.
    pub async fn open_board_for_new_task(&self, key: &str) -> Result<Board, GuardError> {
        let board = self.open_board(key).await?;
        let count = self.store.tasks_for_board(board.id).await.map_err(store_failed)?.len();
        let limit = self.config.max_tasks_per_board;
        if count >= limit {
            return Err(GuardError::TaskLimitReached { limit });
        }
        Ok(board)
    }

    /// Authorize a mutation of `task_id` with the key presented in the request.
    ///
    /// The capability check runs before the expiry gate, so only key holders ever
    /// learn that a board has expired.
    pub async fn authorize_task(&self, task_id: &str, presented: Option<&str>) -> Result<Grant, GuardError> {
        let task_id = TaskId::parse(task_id)?;
        let grant = self.capability.authorize(task_id, presented).await?;
        self.expiry.check(&grant.board)?;
        Ok(grant)
    }

    /// A reaper bound to this guard's registry and configured cadence.
    pub fn reaper(&self) -> Reaper {
        Reaper::new(self.registry.clone(), self.config.reaper)
    }

    /// The shared client registry.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Active configuration.
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

fn store_failed(err: StoreError) -> GuardError {
    warn!(target: "kanbin_guard::guard", error = %err, "store lookup failed");
    GuardError::Store(err)
}
