#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]
#![warn(missing_docs)]

//! # kanbin-guard
//!
//! Request admission and access control for shared kanban boards.
//!
//! ## Features
//!
//! - **Per-client token buckets**, one per traffic class, with exact integer refill
//! - **Client registry** shared by `Arc`, with a scheduled **reaper** for idle clients
//! - **Capability keys**: possession of a board's key is the only credential,
//!   compared in constant time
//! - **Board expiry** with an inclusive deadline
//! - **Conditional reads** through a SHA-256 fingerprint surfaced as an `ETag`
//! - **Tower middleware** that refuses over-budget requests before the handler runs
//!
//! ## Quick Start
//!
//! ```rust
//! use kanbin_guard::{Guard, GuardConfig, InMemoryBoardStore};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let guard = Guard::new(GuardConfig::default(), InMemoryBoardStore::new()).unwrap();
//! let reaper = guard.reaper().spawn();
//!
//! match guard.admit("198.51.100.20", "boardPost") {
//!     Ok(()) => { /* run the handler */ }
//!     Err(e) => {
//!         let signal = e.signal();
//!         assert_eq!(signal.status, 429);
//!     }
//! }
//!
//! reaper.stop().await;
//! # }
//! ```

pub mod adaptive;
pub mod board;
pub mod capability;
pub mod clock;
pub mod config;
pub mod error;
pub mod expiry;
pub mod fingerprint;
pub mod guard;
pub mod prelude;
pub mod rate_limit;
pub mod store;
pub mod telemetry;

// Re-exports
pub use board::{Board, BoardId, BoardKey, Task, TaskId, TaskStatus};
pub use capability::{keys_match, CapabilityCheck, DenyReason, Grant};
pub use clock::{Clock, ManualClock, MonotonicClock, SystemWallClock, WallClock};
pub use config::{BucketConfig, ClassLimits, ConfigError, GuardConfig, ReaperConfig};
pub use error::{AdmissionError, GuardError, Signal};
pub use expiry::ExpiryGate;
pub use fingerprint::{fingerprint, strip_quotes, Fingerprint};
pub use guard::{BoardRead, Guard};
pub use rate_limit::{
    Admissible, AdmissionLayer, ClientRegistry, Decision, Reaper, ReaperHandle, TokenBucket,
    TrafficClass,
};
pub use store::{BoardStore, InMemoryBoardStore, StoreError};
