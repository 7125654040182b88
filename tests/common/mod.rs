#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use kanbin_guard::{Board, Guard, GuardConfig, InMemoryBoardStore, ManualClock, Task};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

pub const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A guard over an in-memory store with one seeded board, all driven by a manual clock.
pub struct Fixture {
    pub clock: ManualClock,
    pub store: InMemoryBoardStore,
    pub board: Board,
    pub guard: Guard<InMemoryBoardStore>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(GuardConfig::default())
    }

    pub fn with_config(config: GuardConfig) -> Self {
        let clock = ManualClock::starting_at(Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap());
        let store = InMemoryBoardStore::new();
        let board = Board::new("Roadmap", clock_now(&clock), WEEK);
        store.insert_board(board.clone());
        let guard = Guard::with_clocks(config, store.clone(), clock.clone(), clock.clone())
            .expect("valid config");
        Self { clock, store, board, guard }
    }

    /// Add a board that shares the store and the clock.
    pub fn add_board(&self, title: &str) -> Board {
        let board = Board::new(title, clock_now(&self.clock), WEEK);
        self.store.insert_board(board.clone());
        board
    }

    /// Add a task at the next position on `board`.
    pub fn add_task(&self, board: &Board, title: &str, position: i32) -> Task {
        let task = Task::new(board.id, title, position, clock_now(&self.clock));
        self.store.insert_task(task.clone());
        task
    }
}

pub fn clock_now(clock: &ManualClock) -> chrono::DateTime<Utc> {
    use kanbin_guard::WallClock;
    clock.now_utc()
}

/// Captures formatted `tracing` output for assertions.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Install as the thread-default subscriber for the lifetime of the returned guard.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(self.clone()))
            .with_max_level(tracing::Level::TRACE)
            .with_target(true)
            .without_time()
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureGuard;
    fn make_writer(&'a self) -> Self::Writer {
        CaptureGuard(self.0.clone())
    }
}

pub struct CaptureGuard(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CaptureGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
