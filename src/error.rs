//! Error taxonomy and the transport-neutral signals it maps to.
//!
//! Every decision made by the guard is final: a rejected request is not retried under
//! another class and a denied key is not retried with alternates. Callers only ever see
//! the [`Signal`] for an error, never internal state.
use chrono::{DateTime, Utc};
use serde_json::json;
use std::fmt;
use std::time::Duration;

use crate::capability::DenyReason;
use crate::rate_limit::TrafficClass;
use crate::store::StoreError;

/// Status codes used by [`Signal`].
pub mod status {
    /// Conditional read matched; no body.
    pub const NOT_MODIFIED: u16 = 304;
    /// Malformed key or identifier.
    pub const BAD_REQUEST: u16 = 400;
    /// Capability check failed, or the target does not exist.
    pub const FORBIDDEN: u16 = 403;
    /// Board lookup by key found nothing.
    pub const NOT_FOUND: u16 = 404;
    /// Board is past its expiry.
    pub const GONE: u16 = 410;
    /// Board already holds its maximum number of tasks.
    pub const UNPROCESSABLE_ENTITY: u16 = 422;
    /// Admission rejected.
    pub const TOO_MANY_REQUESTS: u16 = 429;
    /// Storage collaborator failed.
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
}

/// Header carrying the retry hint on rejections.
pub const RETRY_AFTER: &str = "Retry-After";
/// Header carrying a board fingerprint.
pub const ETAG: &str = "ETag";

/// Errors produced by admission and access checks.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GuardError {
    /// The client's bucket for this class is empty.
    #[error("rate limited ({class}); retry after {retry_after:?}")]
    RateLimited {
        /// Class whose bucket was empty.
        class: TrafficClass,
        /// Hint returned to the caller.
        retry_after: Duration,
    },
    /// Capability check failed. The reason is for logs only.
    #[error("forbidden")]
    Forbidden(DenyReason),
    /// The board is past its expiry.
    #[error("board expired at {expired_at}")]
    Expired {
        /// When the board expired.
        expired_at: DateTime<Utc>,
    },
    /// No board under the presented key.
    #[error("board not found")]
    NotFound,
    /// The board already holds `limit` tasks.
    #[error("task limit reached ({limit})")]
    TaskLimitReached {
        /// Configured per-board maximum.
        limit: usize,
    },
    /// A key or identifier failed format validation.
    #[error("malformed input: {0}")]
    Malformed(&'static str),
    /// The storage collaborator failed.
    #[error("storage: {0}")]
    Store(#[from] StoreError),
}

impl GuardError {
    /// Check if this error is an admission rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Check if this error is a capability denial.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden(_))
    }

    /// Check if this error is an expiry.
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired { .. })
    }

    /// The signal a transport should send for this error.
    pub fn signal(&self) -> Signal {
        match self {
            Self::RateLimited { retry_after, .. } => rate_limited_signal(*retry_after),
            Self::Forbidden(_) => Signal::error(status::FORBIDDEN, "Forbidden"),
            Self::Expired { .. } => Signal::error(status::GONE, "Board has expired"),
            Self::NotFound => Signal::error(status::NOT_FOUND, "Board not found"),
            Self::TaskLimitReached { limit } => Signal::error(
                status::UNPROCESSABLE_ENTITY,
                &format!("Task limit reached ({})", limit),
            ),
            Self::Malformed(msg) => Signal::error(status::BAD_REQUEST, msg),
            Self::Store(_) => Signal::error(status::INTERNAL_SERVER_ERROR, "Internal error"),
        }
    }
}

fn rate_limited_signal(retry_after: Duration) -> Signal {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    Signal::error(status::TOO_MANY_REQUESTS, "Rate limit exceeded, try again later")
        .with_header(RETRY_AFTER, secs.to_string())
}

/// Transport-neutral description of a response: status, headers, optional JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// HTTP-style status code.
    pub status: u16,
    /// Response headers in insertion order.
    pub headers: Vec<(&'static str, String)>,
    /// JSON body, if any.
    pub body: Option<serde_json::Value>,
}

impl Signal {
    /// Error signal with the conventional `{"error": message}` body.
    pub fn error(status: u16, message: &str) -> Self {
        Self { status, headers: Vec::new(), body: Some(json!({ "error": message })) }
    }

    /// Signal without a body.
    pub fn empty(status: u16) -> Self {
        Self { status, headers: Vec::new(), body: None }
    }

    /// Append a header.
    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Error returned by [`AdmissionService`](crate::rate_limit::AdmissionService).
#[derive(Debug, Clone)]
pub enum AdmissionError<E> {
    /// The request was refused before reaching the inner service.
    RateLimited {
        /// Class whose bucket was empty.
        class: TrafficClass,
        /// Hint returned to the caller.
        retry_after: Duration,
    },
    /// The inner service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for AdmissionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { class, retry_after } => {
                write!(f, "rate limited ({}); retry after {:?}", class, retry_after)
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AdmissionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RateLimited { .. } => None,
        }
    }
}

impl<E> AdmissionError<E> {
    /// Check if this error is an admission rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Retry hint, if this is a rejection.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            Self::Inner(_) => None,
        }
    }

    /// Get the inner error if this is an Inner variant.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RateLimited { .. } => None,
        }
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RateLimited { .. } => None,
        }
    }

    /// Signal for a rejection; `None` for inner errors, which the caller maps itself.
    pub fn signal(&self) -> Option<Signal> {
        self.retry_after().map(rate_limited_signal)
    }
}
