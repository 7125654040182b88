//! Registry of per-client bucket bundles.
//!
//! The registry is the single source of truth for rate-limit state. It is built once,
//! shared by `Arc` with every request handler and the [`Reaper`](super::Reaper), and
//! never reset wholesale: idle entries are reclaimed one by one.
//!
//! Locking: the map sits behind an `RwLock` and each entry behind its own `Mutex`.
//! An admission check holds the map's read lock for its whole duration, so the reaper,
//! which takes the write lock, can never evict an entry while a check on it is in
//! flight. Two calls for the same identity serialize on the entry mutex, which covers
//! the full refill-and-spend of the bucket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, trace};

use super::{Decision, TokenBucket, TrafficClass};
use crate::adaptive::DynamicConfig;
use crate::clock::Clock;
use crate::config::ClassLimits;

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Rate-limit state for one client identity.
#[derive(Debug)]
pub struct ClientEntry {
    buckets: HashMap<TrafficClass, TokenBucket>,
    last_seen_nanos: u64,
}

impl ClientEntry {
    fn new(now_nanos: u64) -> Self {
        Self { buckets: HashMap::new(), last_seen_nanos: now_nanos }
    }

    /// Monotonic reading of the last admission check against this entry.
    pub fn last_seen_nanos(&self) -> u64 {
        self.last_seen_nanos
    }

    /// Bucket for `class`, if one has been used yet.
    pub fn bucket(&self, class: TrafficClass) -> Option<&TokenBucket> {
        self.buckets.get(&class)
    }

    /// How long this entry has been idle at `now_nanos`.
    pub fn idle_for(&self, now_nanos: u64) -> Duration {
        Duration::from_nanos(now_nanos.saturating_sub(self.last_seen_nanos))
    }
}

/// Concurrent map from client identity to its [`ClientEntry`].
#[derive(Debug)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Mutex<ClientEntry>>>,
    limits: DynamicConfig<ClassLimits>,
    clock: Arc<dyn Clock>,
    retry_after: Duration,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new<C: Clock + 'static>(limits: ClassLimits, clock: C) -> Self {
        Self::with_shared_clock(limits, Arc::new(clock))
    }

    /// Create an empty registry around an already shared clock.
    pub fn with_shared_clock(limits: ClassLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            limits: DynamicConfig::new(limits),
            clock,
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    /// Override the retry hint attached to rejections (60s by default).
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Run an admission check for `identity` against the bucket for `class`.
    ///
    /// Creates the client entry and the class bucket on first use and refreshes the
    /// entry's last-seen time. Classes are independent: draining one bucket never
    /// affects another.
    pub fn check(&self, identity: &str, class: TrafficClass) -> Decision {
        let limits = self.limits.get();
        let admitted = self.with_entry(identity, |entry, now| {
            entry.last_seen_nanos = entry.last_seen_nanos.max(now);
            let bucket = entry
                .buckets
                .entry(class)
                .or_insert_with(|| TokenBucket::new(limits.for_class(class), now));
            bucket.allow(now).then(|| bucket.available())
        });

        match admitted {
            Some(remaining) => {
                trace!(target: "kanbin_guard::rate_limit", identity, class = %class, remaining, "admitted");
                Decision::Admitted { remaining }
            }
            None => {
                debug!(target: "kanbin_guard::rate_limit", identity, class = %class, "rate limited");
                Decision::Rejected { class, retry_after: self.retry_after }
            }
        }
    }

    /// Lock the entry for `identity`, creating it if needed, and run `f` on it.
    ///
    /// The common path only takes the map's read lock. Creation upgrades to the write
    /// lock and uses `entry().or_insert_with`, so two racing first requests still end
    /// up sharing one entry.
    fn with_entry<R>(&self, identity: &str, f: impl FnOnce(&mut ClientEntry, u64) -> R) -> R {
        {
            let clients = self.read_clients();
            if let Some(entry) = clients.get(identity) {
                let mut entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
                let now = self.clock.now_nanos();
                return f(&mut entry, now);
            }
        }

        let mut clients = self.write_clients();
        let now = self.clock.now_nanos();
        let entry = clients
            .entry(identity.to_owned())
            .or_insert_with(|| Mutex::new(ClientEntry::new(now)));
        let entry = entry.get_mut().unwrap_or_else(PoisonError::into_inner);
        f(entry, now)
    }

    /// Whether an entry exists. Does not refresh last-seen.
    pub fn contains(&self, identity: &str) -> bool {
        self.read_clients().contains_key(identity)
    }

    /// Last-seen reading for `identity`, if present.
    pub fn last_seen_nanos(&self, identity: &str) -> Option<u64> {
        self.read_clients().get(identity).map(|entry| {
            entry.lock().unwrap_or_else(PoisonError::into_inner).last_seen_nanos
        })
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.read_clients().len()
    }

    /// True when no clients are tracked.
    pub fn is_empty(&self) -> bool {
        self.read_clients().is_empty()
    }

    /// Tracked identities, sorted.
    pub fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read_clients().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Visit every entry under the read lock.
    pub fn for_each(&self, mut f: impl FnMut(&str, &ClientEntry)) {
        let clients = self.read_clients();
        for (identity, entry) in clients.iter() {
            let entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
            f(identity.as_str(), &*entry);
        }
    }

    /// Remove every entry for which `predicate` returns true; returns how many went.
    ///
    /// Holds the write lock for the whole pass, which excludes every admission check,
    /// so an entry cannot be touched between the predicate and its removal.
    pub fn remove_if(&self, mut predicate: impl FnMut(&str, &ClientEntry) -> bool) -> usize {
        let mut clients = self.write_clients();
        let before = clients.len();
        clients.retain(|identity, entry| {
            let entry = entry.get_mut().unwrap_or_else(PoisonError::into_inner);
            !predicate(identity, entry)
        });
        before - clients.len()
    }

    /// Current class limits.
    pub fn limits(&self) -> Arc<ClassLimits> {
        self.limits.get()
    }

    /// Retune the class limits. Applies to buckets created from now on.
    pub fn set_limits(&self, limits: ClassLimits) {
        self.limits.set(limits);
    }

    /// Retry hint attached to rejections.
    pub fn retry_after(&self) -> Duration {
        self.retry_after
    }

    /// The monotonic clock this registry reads.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn read_clients(&self) -> RwLockReadGuard<'_, HashMap<String, Mutex<ClientEntry>>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_clients(&self) -> RwLockWriteGuard<'_, HashMap<String, Mutex<ClientEntry>>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::BucketConfig;

    fn registry(clock: &ManualClock) -> ClientRegistry {
        let limits = ClassLimits::default()
            .with_class(TrafficClass::BoardRead, BucketConfig::new(2, Duration::from_secs(1)))
            .with_class(TrafficClass::BoardWrite, BucketConfig::new(1, Duration::from_secs(10)));
        ClientRegistry::new(limits, clock.clone())
    }

    #[test]
    fn entries_are_created_lazily() {
        let clock = ManualClock::default();
        let reg = registry(&clock);
        assert!(reg.is_empty());
        assert!(!reg.contains("10.0.0.1"));

        assert!(reg.check("10.0.0.1", TrafficClass::BoardRead).is_admitted());
        assert!(reg.contains("10.0.0.1"));
        assert_eq!(reg.len(), 1);

        let mut seen = Vec::new();
        reg.for_each(|id, entry| {
            seen.push(id.to_owned());
            assert!(entry.bucket(TrafficClass::BoardRead).is_some());
            assert!(entry.bucket(TrafficClass::BoardWrite).is_none());
        });
        assert_eq!(seen, vec!["10.0.0.1".to_owned()]);
    }

    #[test]
    fn classes_do_not_share_budget() {
        let clock = ManualClock::default();
        let reg = registry(&clock);
        assert!(reg.check("a", TrafficClass::BoardWrite).is_admitted());
        assert!(!reg.check("a", TrafficClass::BoardWrite).is_admitted());

        assert!(reg.check("a", TrafficClass::BoardRead).is_admitted());
        assert!(reg.check("a", TrafficClass::Global).is_admitted());
    }

    #[test]
    fn clients_do_not_share_budget() {
        let clock = ManualClock::default();
        let reg = registry(&clock);
        assert!(reg.check("a", TrafficClass::BoardWrite).is_admitted());
        assert!(!reg.check("a", TrafficClass::BoardWrite).is_admitted());
        assert!(reg.check("b", TrafficClass::BoardWrite).is_admitted());
    }

    #[test]
    fn rejection_carries_class_and_flat_retry_hint() {
        let clock = ManualClock::default();
        let reg = registry(&clock);
        reg.check("a", TrafficClass::BoardWrite);
        assert_eq!(
            reg.check("a", TrafficClass::BoardWrite),
            Decision::Rejected {
                class: TrafficClass::BoardWrite,
                retry_after: Duration::from_secs(60)
            }
        );
    }

    #[test]
    fn check_refreshes_last_seen_but_probe_does_not() {
        let clock = ManualClock::default();
        let reg = registry(&clock);
        reg.check("a", TrafficClass::Global);
        assert_eq!(reg.last_seen_nanos("a"), Some(0));

        clock.advance(Duration::from_secs(30));
        assert!(reg.contains("a"));
        assert_eq!(reg.last_seen_nanos("a"), Some(0));

        reg.check("a", TrafficClass::Global);
        assert_eq!(reg.last_seen_nanos("a"), Some(30_000_000_000));
    }

    #[test]
    fn rejected_checks_still_count_as_activity() {
        let clock = ManualClock::default();
        let reg = registry(&clock);
        reg.check("a", TrafficClass::BoardWrite);
        clock.advance(Duration::from_secs(1));
        assert!(!reg.check("a", TrafficClass::BoardWrite).is_admitted());
        assert_eq!(reg.last_seen_nanos("a"), Some(1_000_000_000));
    }

    #[test]
    fn remove_if_reports_count() {
        let clock = ManualClock::default();
        let reg = registry(&clock);
        for id in ["a", "b", "c"] {
            reg.check(id, TrafficClass::Global);
        }
        let removed = reg.remove_if(|id, _| id != "b");
        assert_eq!(removed, 2);
        assert_eq!(reg.identities(), vec!["b".to_owned()]);
    }

    #[test]
    fn new_limits_apply_to_new_buckets_only() {
        let clock = ManualClock::default();
        let reg = registry(&clock);
        reg.check("old", TrafficClass::BoardWrite);

        let tighter = (*reg.limits())
            .clone()
            .with_class(TrafficClass::BoardWrite, BucketConfig::new(3, Duration::from_secs(10)));
        reg.set_limits(tighter);

        assert!(!reg.check("old", TrafficClass::BoardWrite).is_admitted());
        for _ in 0..3 {
            assert!(reg.check("new", TrafficClass::BoardWrite).is_admitted());
        }
        assert!(!reg.check("new", TrafficClass::BoardWrite).is_admitted());
    }

    #[test]
    fn concurrent_first_requests_share_one_entry() {
        let clock = ManualClock::default();
        let limits = ClassLimits::default()
            .with_class(TrafficClass::BoardWrite, BucketConfig::new(10, Duration::from_secs(60)));
        let reg = Arc::new(ClientRegistry::new(limits, clock));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    (0..5)
                        .filter(|_| reg.check("racer", TrafficClass::BoardWrite).is_admitted())
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(admitted, 10);
        assert_eq!(reg.len(), 1);
    }
}
