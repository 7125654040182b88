//! Structured events emitted by the admission middleware and the reaper.
//!
//! Events flow through `TelemetrySink` implementations which can log, aggregate, or
//! forward them elsewhere. A sink is a `tower::Service<GuardEvent>`, so the usual tower
//! combinators apply.
//!
//! ```rust
//! use kanbin_guard::rate_limit::TrafficClass;
//! use kanbin_guard::telemetry::{AdmissionEvent, GuardEvent, MemorySink};
//! use tower::Service;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sink = MemorySink::new();
//! let event = GuardEvent::Admission(AdmissionEvent::Rejected {
//!     identity: "203.0.113.9".into(),
//!     class: TrafficClass::BoardRead,
//! });
//! sink.call(event.clone()).await.unwrap();
//! assert_eq!(sink.events(), vec![event]);
//! # }
//! ```

use std::convert::Infallible;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tower::Service;

use crate::rate_limit::TrafficClass;

/// A telemetry sink that consumes guard events.
pub trait TelemetrySink:
    tower::Service<GuardEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
///
/// Admission sits on the request hot path: if a sink is not ready or fails, the event
/// is dropped.
pub async fn emit_best_effort<S>(sink: S, event: GuardEvent)
where
    S: tower::Service<GuardEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Events emitted by the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEvent {
    /// Admission middleware events.
    Admission(AdmissionEvent),
    /// Reaper lifecycle and sweep events.
    Reaper(ReaperEvent),
}

/// Events emitted on the admission path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// A request was refused because its bucket was empty.
    Rejected {
        /// Client identity as supplied by the routing layer.
        identity: String,
        /// Class whose bucket was empty.
        class: TrafficClass,
    },
}

/// Events emitted by the reaper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaperEvent {
    /// The scheduled loop started.
    Started {
        /// Time between sweeps.
        period: Duration,
    },
    /// One sweep completed.
    Swept {
        /// Entries removed.
        evicted: usize,
        /// Entries left in the registry.
        retained: usize,
    },
    /// The scheduled loop stopped.
    Stopped,
}

impl fmt::Display for GuardEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardEvent::Admission(AdmissionEvent::Rejected { identity, class }) => {
                write!(f, "Admission::Rejected(identity={}, class={})", identity, class)
            }
            GuardEvent::Reaper(ReaperEvent::Started { period }) => {
                write!(f, "Reaper::Started(period={:?})", period)
            }
            GuardEvent::Reaper(ReaperEvent::Swept { evicted, retained }) => {
                write!(f, "Reaper::Swept(evicted={}, retained={})", evicted, retained)
            }
            GuardEvent::Reaper(ReaperEvent::Stopped) => write!(f, "Reaper::Stopped"),
        }
    }
}

type SinkFuture = Pin<Box<dyn std::future::Future<Output = Result<(), Infallible>> + Send>>;

/// A sink that discards every event.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<GuardEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: GuardEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// A sink that logs events with `tracing` at INFO.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<GuardEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GuardEvent) -> Self::Future {
        tracing::info!(target: "kanbin_guard::telemetry", event = %event, "guard_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// A bounded in-memory sink, mostly for tests.
///
/// The oldest event is evicted once capacity is reached.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<GuardEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Bounded sink holding up to 10,000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Bounded sink with explicit capacity (at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot of stored events.
    pub fn events(&self) -> Vec<GuardEvent> {
        self.lock().clone()
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Events dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<GuardEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<GuardEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GuardEvent) -> Self::Future {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
