//! Capability check for task-level operations.
//!
//! A task is reachable only through the key of the board that owns it. Every failure
//! (no key, no task, orphaned task, wrong key) surfaces as the same
//! [`GuardError::Forbidden`] so callers cannot probe which tasks exist. The precise
//! [`DenyReason`] goes to the logs.

use std::fmt;

use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::board::{Board, BoardKey, Task, TaskId};
use crate::error::GuardError;
use crate::store::BoardStore;

/// Compare a presented key with the board's key without early exit on content.
pub fn keys_match(presented: &str, actual: &BoardKey) -> bool {
    presented.as_bytes().ct_eq(actual.expose().as_bytes()).into()
}

/// Why a capability check failed. Never shown to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    /// No key was presented.
    MissingKey,
    /// The task does not exist.
    UnknownTask,
    /// The task exists but its board does not.
    OwnerMissing,
    /// The key belongs to some other board, or to none.
    KeyMismatch,
}

impl DenyReason {
    /// Short name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::MissingKey => "missing_key",
            DenyReason::UnknownTask => "unknown_task",
            DenyReason::OwnerMissing => "owner_missing",
            DenyReason::KeyMismatch => "key_mismatch",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successful check: the task and the board it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// Owning board.
    pub board: Board,
    /// The task the key was checked against.
    pub task: Task,
}

/// Resolves a task to its owning board and verifies the presented key.
#[derive(Debug, Clone)]
pub struct CapabilityCheck<S> {
    store: S,
}

impl<S: BoardStore> CapabilityCheck<S> {
    /// Check against `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Authorize an operation on `task_id` with the key from the request, if any.
    pub async fn authorize(&self, task_id: TaskId, presented: Option<&str>) -> Result<Grant, GuardError> {
        let presented = match presented {
            Some(key) if !key.is_empty() => key,
            _ => return Err(deny(task_id, DenyReason::MissingKey)),
        };

        let task = match self.store.task_by_id(task_id).await.map_err(|e| store_failed(task_id, e))? {
            Some(task) => task,
            None => return Err(deny(task_id, DenyReason::UnknownTask)),
        };

        let board =
            match self.store.board_by_id(task.board_id).await.map_err(|e| store_failed(task_id, e))? {
                Some(board) => board,
                None => return Err(deny(task_id, DenyReason::OwnerMissing)),
            };

        if !keys_match(presented, &board.key) {
            return Err(deny(task_id, DenyReason::KeyMismatch));
        }

        Ok(Grant { board, task })
    }

    /// The store this check reads.
    pub fn store(&self) -> &S {
        &self.store
    }
}

fn deny(task_id: TaskId, reason: DenyReason) -> GuardError {
    debug!(target: "kanbin_guard::capability", task = %task_id, reason = %reason, "capability denied");
    GuardError::Forbidden(reason)
}

fn store_failed(task_id: TaskId, err: crate::store::StoreError) -> GuardError {
    warn!(target: "kanbin_guard::capability", task = %task_id, error = %err, "store lookup failed");
    GuardError::Store(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardId;
    use crate::store::InMemoryBoardStore;
    use chrono::Utc;
    use std::time::Duration;

    fn seeded() -> (InMemoryBoardStore, Board, Task) {
        let store = InMemoryBoardStore::new();
        let board = Board::new("b", Utc::now(), Duration::from_secs(3600));
        let task = Task::new(board.id, "t", 0, board.created_at);
        store.insert_board(board.clone());
        store.insert_task(task.clone());
        (store, board, task)
    }

    #[test]
    fn keys_match_is_exact() {
        let key = BoardKey::parse("0123456789abcdef").unwrap();
        assert!(keys_match("0123456789abcdef", &key));
        assert!(!keys_match("0123456789abcdee", &key));
        assert!(!keys_match("0123456789abcde", &key));
        assert!(!keys_match("", &key));
    }

    #[tokio::test]
    async fn correct_key_is_granted() {
        let (store, board, task) = seeded();
        let grant = CapabilityCheck::new(store).authorize(task.id, Some(board.key.expose())).await;
        assert_eq!(grant, Ok(Grant { board, task }));
    }

    #[tokio::test]
    async fn each_failure_has_its_own_hidden_reason() {
        let (store, board, task) = seeded();
        let other = Board::new("other", Utc::now(), Duration::from_secs(3600));
        store.insert_board(other.clone());
        let orphan = Task::new(BoardId::new(), "orphan", 0, Utc::now());
        store.insert_task(orphan.clone());
        let check = CapabilityCheck::new(store);

        let cases = [
            (task.id, None, DenyReason::MissingKey),
            (task.id, Some(""), DenyReason::MissingKey),
            (TaskId::new(), Some(board.key.expose()), DenyReason::UnknownTask),
            (orphan.id, Some(board.key.expose()), DenyReason::OwnerMissing),
            (task.id, Some(other.key.expose()), DenyReason::KeyMismatch),
        ];
        for (id, key, reason) in cases {
            assert_eq!(check.authorize(id, key).await, Err(GuardError::Forbidden(reason)));
        }
    }
}
