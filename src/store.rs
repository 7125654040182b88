//! Data-access contract used by the access checks.
//!
//! The guard only reads. Writes on [`InMemoryBoardStore`] exist so tests and embedders
//! can seed state.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::board::{Board, BoardId, BoardKey, Task, TaskId};

/// Errors raised by a storage backend.
///
/// "Not found" is never an error; lookups return `Ok(None)` for that.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The backend answered with a failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Read access to boards and tasks.
#[async_trait]
pub trait BoardStore: Send + Sync {
    /// Board whose capability key equals `key`.
    async fn board_by_key(&self, key: &BoardKey) -> Result<Option<Board>, StoreError>;

    /// Board by id.
    async fn board_by_id(&self, id: BoardId) -> Result<Option<Board>, StoreError>;

    /// Task by id.
    async fn task_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Tasks of a board, ordered by position then creation time.
    async fn tasks_for_board(&self, id: BoardId) -> Result<Vec<Task>, StoreError>;
}

#[async_trait]
impl<S: BoardStore + ?Sized> BoardStore for Arc<S> {
    async fn board_by_key(&self, key: &BoardKey) -> Result<Option<Board>, StoreError> {
        (**self).board_by_key(key).await
    }

    async fn board_by_id(&self, id: BoardId) -> Result<Option<Board>, StoreError> {
        (**self).board_by_id(id).await
    }

    async fn task_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        (**self).task_by_id(id).await
    }

    async fn tasks_for_board(&self, id: BoardId) -> Result<Vec<Task>, StoreError> {
        (**self).tasks_for_board(id).await
    }
}

#[derive(Debug, Default)]
struct Tables {
    boards: HashMap<BoardId, Board>,
    keys: HashMap<BoardKey, BoardId>,
    tasks: HashMap<TaskId, Task>,
}

/// Simple in-memory board store. Clones share the same tables.
#[derive(Default, Clone, Debug)]
pub struct InMemoryBoardStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryBoardStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a board.
    pub fn insert_board(&self, board: Board) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = tables.boards.get(&board.id).map(|b| b.key.clone()) {
            tables.keys.remove(&old);
        }
        tables.keys.insert(board.key.clone(), board.id);
        tables.boards.insert(board.id, board);
    }

    /// Remove a board. Its tasks stay, orphaned.
    pub fn remove_board(&self, id: BoardId) -> Option<Board> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let board = tables.boards.remove(&id)?;
        tables.keys.remove(&board.key);
        Some(board)
    }

    /// Insert or replace a task.
    pub fn insert_task(&self, task: Task) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.tasks.insert(task.id, task);
    }

    /// Replace an existing task; returns `false` if it is unknown.
    pub fn update_task(&self, task: Task) -> bool {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        match tables.tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task;
                true
            }
            None => false,
        }
    }

    /// Remove a task.
    pub fn remove_task(&self, id: TaskId) -> Option<Task> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner).tasks.remove(&id)
    }
}

#[async_trait]
impl BoardStore for InMemoryBoardStore {
    async fn board_by_key(&self, key: &BoardKey) -> Result<Option<Board>, StoreError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.keys.get(key).and_then(|id| tables.boards.get(id)).cloned())
    }

    async fn board_by_id(&self, id: BoardId) -> Result<Option<Board>, StoreError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.boards.get(&id).cloned())
    }

    async fn task_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.tasks.get(&id).cloned())
    }

    async fn tasks_for_board(&self, id: BoardId) -> Result<Vec<Task>, StoreError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut tasks: Vec<Task> =
            tables.tasks.values().filter(|t| t.board_id == id).cloned().collect();
        tasks.sort_by(|a, b| a.position.cmp(&b.position).then(a.created_at.cmp(&b.created_at)));
        Ok(tasks)
    }
}
