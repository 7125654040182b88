//! Conditional-read fingerprints.
//!
//! A fingerprint is a short quoted digest over a board's timestamps. It changes when
//! any task is modified, added or removed, and lets a reader skip the payload when
//! nothing moved. It is a change detector, not a secret.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

const PREFIX_HEX_CHARS: usize = 16;

/// A quoted entity tag such as `"3f2a9c0d1b7e4a55"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Quoted form, as sent in the `ETag` header.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Byte-for-byte comparison with a caller's `If-None-Match` value. An absent or
    /// empty header never matches.
    pub fn matches(&self, if_none_match: Option<&str>) -> bool {
        matches!(if_none_match, Some(candidate) if !candidate.is_empty() && candidate == self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Digest `reference` then each of `dependents`, in the order given.
///
/// Each time is hashed as RFC 3339 UTC with nine fractional digits, e.g.
/// `2024-01-02T03:04:05.000000006Z`. Order matters: callers must pass dependents in a
/// stable order.
pub fn fingerprint<I>(reference: DateTime<Utc>, dependents: I) -> Fingerprint
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let mut hasher = Sha256::new();
    hasher.update(render(reference));
    for time in dependents {
        hasher.update(render(time));
    }
    let digest = hex::encode(hasher.finalize());
    Fingerprint(format!("\"{}\"", &digest[..PREFIX_HEX_CHARS]))
}

fn render(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Remove one pair of surrounding double quotes, if present.
pub fn strip_quotes(raw: &str) -> &str {
    raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(raw)
}
