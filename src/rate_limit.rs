//! Per-client admission control.
//!
//! This module provides the building blocks for rate limiting:
//! - [`TokenBucket`]: a single bucket with a burst capacity and a refill pace.
//! - [`ClientRegistry`]: one bundle of buckets per client identity, one bucket per
//!   [`TrafficClass`].
//! - [`Reaper`]: a scheduled sweep that evicts idle clients.
//! - [`AdmissionLayer`]: Tower middleware that asks the registry before a handler runs.
//!
//! # Architecture
//!
//! - **Middleware**: `AdmissionLayer` wraps your service. It only needs the request to
//!   say who sent it and which class it belongs to (see [`Admissible`]).
//! - **Logic**: `TokenBucket` handles the math with exact integer credit.
//! - **State**: `ClientRegistry` is the only shared mutable structure; it is constructed
//!   explicitly and shared by `Arc` with every handler and with the reaper.

use std::fmt;
use std::time::Duration;

pub mod bucket;
pub mod middleware;
pub mod reaper;
pub mod registry;

pub use bucket::TokenBucket;
pub use middleware::{Admissible, AdmissionLayer, AdmissionService};
pub use reaper::{Reaper, ReaperHandle, SweepReport};
pub use registry::{ClientEntry, ClientRegistry};

/// Named category of operation with its own independent budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrafficClass {
    /// Every request; also the fallback for unrecognized class names.
    Global,
    /// Reading a board.
    BoardRead,
    /// Creating a board.
    BoardWrite,
}

impl TrafficClass {
    /// All classes, in a stable order.
    pub const ALL: [TrafficClass; 3] =
        [TrafficClass::Global, TrafficClass::BoardRead, TrafficClass::BoardWrite];

    /// Resolve a class name supplied by the routing layer.
    ///
    /// Unknown names map to [`TrafficClass::Global`], the most restrictive class, so a
    /// typo in a route table can never bypass limiting.
    pub fn from_name(name: &str) -> Self {
        match name {
            "board_read" | "board-read" | "boardGet" => TrafficClass::BoardRead,
            "board_write" | "board-write" | "boardPost" => TrafficClass::BoardWrite,
            _ => TrafficClass::Global,
        }
    }

    /// Canonical name.
    pub fn as_str(self) -> &'static str {
        match self {
            TrafficClass::Global => "global",
            TrafficClass::BoardRead => "board_read",
            TrafficClass::BoardWrite => "board_write",
        }
    }
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decision returned by an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Admitted {
        /// Whole tokens left in the bucket after this admission.
        remaining: u32,
    },
    /// The request is refused.
    Rejected {
        /// Class whose bucket was empty.
        class: TrafficClass,
        /// How long the caller is told to wait. Useful for `Retry-After` headers.
        retry_after: Duration,
    },
}

impl Decision {
    /// Helper to check if admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }
}
