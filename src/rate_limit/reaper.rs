//! Scheduled eviction of idle clients.
//!
//! The reaper bounds the registry's memory: every `period` it removes the entries whose
//! last admission check is older than `stale_after`. A single tokio task drives the
//! loop, so one sweep always finishes before the next begins. Tests call
//! [`Reaper::sweep`] directly instead of racing the timer.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::ClientRegistry;
use crate::config::ReaperConfig;
use crate::telemetry::{emit_best_effort, GuardEvent, NullSink, ReaperEvent, TelemetrySink};

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Entries removed.
    pub evicted: usize,
    /// Entries left in the registry.
    pub retained: usize,
}

/// Evicts registry entries idle for longer than the configured threshold.
#[derive(Debug, Clone)]
pub struct Reaper<S = NullSink> {
    registry: Arc<ClientRegistry>,
    config: ReaperConfig,
    sink: S,
}

impl Reaper<NullSink> {
    /// Create a reaper over `registry`.
    pub fn new(registry: Arc<ClientRegistry>, config: ReaperConfig) -> Self {
        Self { registry, config, sink: NullSink }
    }
}

impl<S> Reaper<S> {
    /// Report sweeps to a telemetry sink.
    pub fn with_sink<T: TelemetrySink>(self, sink: T) -> Reaper<T> {
        Reaper { registry: self.registry, config: self.config, sink }
    }

    /// Configured cadence and threshold.
    pub fn config(&self) -> ReaperConfig {
        self.config
    }

    /// Run one sweep now.
    ///
    /// Entries idle for exactly `stale_after` are kept; only strictly older ones go.
    pub fn sweep(&self) -> SweepReport {
        let now = self.registry.clock().now_nanos();
        let stale_after = self.config.stale_after;
        let evicted = self.registry.remove_if(|_, entry| entry.idle_for(now) > stale_after);
        let retained = self.registry.len();
        debug!(target: "kanbin_guard::reaper", evicted, retained, "sweep complete");
        SweepReport { evicted, retained }
    }
}

impl<S> Reaper<S>
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    /// Start the scheduled loop on the current tokio runtime.
    ///
    /// The first sweep runs one `period` after start. Sweeps that fall behind are
    /// delayed rather than bunched. The loop ends when [`ReaperHandle::stop`] is called
    /// or the handle is dropped.
    pub fn spawn(self) -> ReaperHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let period = self.config.period;

        let task = tokio::spawn(async move {
            info!(target: "kanbin_guard::reaper", ?period, stale_after = ?self.config.stale_after, "reaper started");
            emit_best_effort(self.sink.clone(), GuardEvent::Reaper(ReaperEvent::Started { period }))
                .await;

            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let SweepReport { evicted, retained } = self.sweep();
                        emit_best_effort(
                            self.sink.clone(),
                            GuardEvent::Reaper(ReaperEvent::Swept { evicted, retained }),
                        )
                        .await;
                    }
                }
            }

            emit_best_effort(self.sink.clone(), GuardEvent::Reaper(ReaperEvent::Stopped)).await;
            info!(target: "kanbin_guard::reaper", "reaper stopped");
        });

        ReaperHandle { stop: Some(stop_tx), task }
    }
}

/// Control handle for a running reaper loop.
///
/// Dropping the handle also stops the loop.
#[derive(Debug)]
pub struct ReaperHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the loop to stop and wait for it to finish. An in-progress sweep completes.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = self.task.await;
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ClassLimits;
    use crate::rate_limit::TrafficClass;
    use crate::telemetry::MemorySink;
    use std::time::Duration;

    fn setup() -> (ManualClock, Arc<ClientRegistry>) {
        let clock = ManualClock::default();
        let registry = Arc::new(ClientRegistry::new(ClassLimits::default(), clock.clone()));
        (clock, registry)
    }

    #[test]
    fn sweep_evicts_only_stale_entries() {
        let (clock, registry) = setup();
        let reaper = Reaper::new(registry.clone(), ReaperConfig::default());

        registry.check("idle", TrafficClass::Global);
        clock.advance(Duration::from_secs(4 * 60));
        registry.check("busy", TrafficClass::Global);
        clock.advance(Duration::from_secs(2 * 60));

        assert_eq!(reaper.sweep(), SweepReport { evicted: 1, retained: 1 });
        assert!(!registry.contains("idle"));
        assert!(registry.contains("busy"));
    }

    #[test]
    fn idle_exactly_at_threshold_is_kept() {
        let (clock, registry) = setup();
        let reaper = Reaper::new(registry.clone(), ReaperConfig::default());

        registry.check("edge", TrafficClass::Global);
        clock.advance(Duration::from_secs(5 * 60));
        assert_eq!(reaper.sweep().evicted, 0);

        clock.advance(Duration::from_nanos(1));
        assert_eq!(reaper.sweep().evicted, 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn evicted_client_starts_over_with_a_full_bucket() {
        let (clock, registry) = setup();
        let reaper = Reaper::new(registry.clone(), ReaperConfig::default());
        for _ in 0..10 {
            registry.check("x", TrafficClass::BoardWrite);
        }
        assert!(!registry.check("x", TrafficClass::BoardWrite).is_admitted());

        clock.advance(Duration::from_secs(6 * 60));
        reaper.sweep();
        assert!(!registry.contains("x"));
        for _ in 0..10 {
            assert!(registry.check("x", TrafficClass::BoardWrite).is_admitted());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_loop_sweeps_on_schedule_and_stops_cleanly() {
        let (clock, registry) = setup();
        let sink = MemorySink::new();
        let config =
            ReaperConfig { period: Duration::from_secs(60), stale_after: Duration::from_secs(30) };

        registry.check("gone-soon", TrafficClass::Global);
        clock.advance(Duration::from_secs(31));

        let handle = Reaper::new(registry.clone(), config).with_sink(sink.clone()).spawn();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(registry.contains("gone-soon"), "no sweep before the first period elapses");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!registry.contains("gone-soon"));

        handle.stop().await;
        assert_eq!(
            sink.events(),
            vec![
                GuardEvent::Reaper(ReaperEvent::Started { period: Duration::from_secs(60) }),
                GuardEvent::Reaper(ReaperEvent::Swept { evicted: 1, retained: 0 }),
                GuardEvent::Reaper(ReaperEvent::Stopped),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_the_loop() {
        let (_clock, registry) = setup();
        let sink = MemorySink::new();
        let handle = Reaper::new(registry, ReaperConfig::default()).with_sink(sink.clone()).spawn();
        drop(handle);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.events().last(), Some(&GuardEvent::Reaper(ReaperEvent::Stopped)));
    }
}
