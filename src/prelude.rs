//! Convenient re-exports for common kanbin-guard types.
pub use crate::{
    board::{Board, BoardKey, Task, TaskId},
    capability::{CapabilityCheck, DenyReason, Grant},
    config::{BucketConfig, ClassLimits, GuardConfig, ReaperConfig},
    error::{AdmissionError, GuardError, Signal},
    fingerprint::Fingerprint,
    guard::{BoardRead, Guard},
    rate_limit::{Admissible, AdmissionLayer, ClientRegistry, Decision, TrafficClass},
    store::{BoardStore, InMemoryBoardStore, StoreError},
};
