//! Boards, their tasks, and the capability key that guards them.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GuardError;

/// Identifier of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoardId(Uuid);

impl BoardId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BoardId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a task id taken from a request path.
    pub fn parse(raw: &str) -> Result<Self, GuardError> {
        Uuid::parse_str(raw).map(Self).map_err(|_| GuardError::Malformed("Invalid task ID format"))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

const KEY_BYTES: usize = 16;
const KEY_MIN_LEN: usize = 8;
const KEY_MAX_LEN: usize = 64;

/// Secret capability for one board. Holding it grants full access to the board.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BoardKey(String);

impl BoardKey {
    /// New key: 16 random bytes as 32 lowercase hex characters.
    pub fn generate() -> Self {
        Self(hex::encode(rand::random::<[u8; KEY_BYTES]>()))
    }

    /// Accept a presented key if it is 8 to 64 lowercase hex characters.
    pub fn parse(raw: &str) -> Result<Self, GuardError> {
        let well_formed = (KEY_MIN_LEN..=KEY_MAX_LEN).contains(&raw.len())
            && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if well_formed {
            Ok(Self(raw.to_owned()))
        } else {
            Err(GuardError::Malformed("Invalid board key format"))
        }
    }

    /// Raw key material.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BoardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BoardKey(..)")
    }
}

/// A shared board. Its key is the only credential; its lifetime is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    /// Board id.
    pub id: BoardId,
    /// Capability key.
    pub key: BoardKey,
    /// Display title.
    pub title: String,
    /// Creation time; also the fingerprint's reference time.
    pub created_at: DateTime<Utc>,
    /// Last instant at which the board is still live.
    pub expires_at: DateTime<Utc>,
}

impl Board {
    /// New board with a fresh key that lives for `ttl` from `now`.
    pub fn new(title: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: BoardId::new(),
            key: BoardKey::generate(),
            title: title.into(),
            created_at: now,
            expires_at,
        }
    }

    /// Live up to and including the expiry instant.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

/// Workflow state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Not started.
    #[default]
    Todo,
    /// Being worked on.
    InProgress,
    /// Finished.
    Done,
}

/// An item on a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Task id.
    pub id: TaskId,
    /// Owning board.
    #[serde(skip)]
    pub board_id: BoardId,
    /// Title.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Workflow state.
    pub status: TaskStatus,
    /// Sort position within the board.
    pub position: i32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time; feeds the board fingerprint.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// New `Todo` task on `board`.
    pub fn new(board: BoardId, title: impl Into<String>, position: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            board_id: board,
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Todo,
            position,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a modification at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
