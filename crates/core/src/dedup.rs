use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

const MAX_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DedupSettings {
    pub expiry_secs: u64,
    pub max_entries: usize,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self { expiry_secs: 300, max_entries: 100 }
    }
}

impl DedupSettings {
    fn expiry(&self) -> Duration {
        let secs = self.expiry_secs.min(MAX_EXPIRY_SECS);
        Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1_000))
    }
}

#[derive(Debug, Default)]
struct DedupState {
    order: VecDeque<(String, DateTime<Utc>)>,
    seen: HashMap<String, DateTime<Utc>>,
}

impl DedupState {
    fn purge_expired(&mut self, now: DateTime<Utc>, expiry: Duration) {
        while let Some((_, received_at)) = self.order.front() {
            if now.signed_duration_since(*received_at) <= expiry {
                break;
            }
            if let Some((event_id, _)) = self.order.pop_front() {
                self.seen.remove(&event_id);
            }
        }
    }

    fn forget(&mut self, event_id: &str) {
        self.seen.remove(event_id);
        if let Some(position) = self.order.iter().position(|(id, _)| id == event_id) {
            self.order.remove(position);
        }
    }

    fn record(&mut self, event_id: &str, now: DateTime<Utc>, max_entries: usize) {
        self.order.push_back((event_id.to_owned(), now));
        self.seen.insert(event_id.to_owned(), now);
        while self.order.len() > max_entries {
            if let Some((evicted, _)) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
    }
}

/// Process-local record of recently admitted inbound event ids.
///
/// Entries leave the cache when they age past `expiry_secs` or when the cache
/// grows past `max_entries` (oldest insertion first). `admit` holds a single
/// lock for the whole check-and-insert, so two concurrent deliveries of the
/// same id cannot both be admitted.
pub struct DedupCache {
    settings: DedupSettings,
    clock: Arc<dyn Clock>,
    state: Mutex<DedupState>,
}

impl std::fmt::Debug for DedupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupCache")
            .field("settings", &self.settings)
            .field("entries", &self.len())
            .finish()
    }
}

impl DedupCache {
    pub fn new(settings: DedupSettings, clock: Arc<dyn Clock>) -> Self {
        let settings = DedupSettings {
            expiry_secs: settings.expiry_secs,
            max_entries: settings.max_entries.max(1),
        };
        Self { settings, clock, state: Mutex::new(DedupState::default()) }
    }

    pub fn with_system_clock(settings: DedupSettings) -> Self {
        Self::new(settings, Arc::new(SystemClock))
    }

    pub fn settings(&self) -> DedupSettings {
        self.settings
    }

    /// Returns `true` when the event should be processed, `false` for a duplicate.
    pub fn admit(&self, event_id: &str) -> bool {
        self.admit_at(event_id, self.clock.now())
    }

    pub fn admit_at(&self, event_id: &str, now: DateTime<Utc>) -> bool {
        if event_id.trim().is_empty() {
            return true;
        }

        let expiry = self.settings.expiry();
        let mut state = self.lock();
        state.purge_expired(now, expiry);

        if let Some(received_at) = state.seen.get(event_id).copied() {
            if now.signed_duration_since(received_at) <= expiry {
                return false;
            }
            // Only reachable when the clock stepped backwards and left a stale
            // entry behind a newer one.
            state.forget(event_id);
        }

        state.record(event_id, now, self.settings.max_entries);
        true
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.lock().seen.contains_key(event_id)
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, DedupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{DedupCache, DedupSettings, ManualClock};

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid timestamp")
    }

    fn cache_with_clock(settings: DedupSettings) -> (DedupCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(epoch()));
        (DedupCache::new(settings, clock.clone()), clock)
    }

    #[test]
    fn retry_within_window_is_suppressed() {
        let (cache, clock) = cache_with_clock(DedupSettings::default());

        assert!(cache.admit("Ev01"));
        clock.advance(Duration::seconds(2));
        assert!(!cache.admit("Ev01"));
    }

    #[test]
    fn redelivery_after_expiry_is_admitted_again() {
        let (cache, clock) = cache_with_clock(DedupSettings::default());

        assert!(cache.admit("Ev02"));
        clock.advance(Duration::seconds(310));
        assert!(cache.admit("Ev02"));
    }

    #[test]
    fn duplicate_does_not_refresh_original_timestamp() {
        let (cache, clock) =
            cache_with_clock(DedupSettings { expiry_secs: 10, max_entries: 100 });

        assert!(cache.admit("Ev03"));
        clock.advance(Duration::seconds(8));
        assert!(!cache.admit("Ev03"));
        clock.advance(Duration::seconds(4));
        assert!(cache.admit("Ev03"), "age is measured from the first admit");
    }

    #[test]
    fn entry_at_exact_expiry_age_is_still_live() {
        let cache = DedupCache::with_system_clock(DedupSettings { expiry_secs: 60, max_entries: 10 });

        assert!(cache.admit_at("Ev04", epoch()));
        assert!(!cache.admit_at("Ev04", epoch() + Duration::seconds(60)));
        assert!(cache.admit_at("Ev04", epoch() + Duration::seconds(121)));
    }

    #[test]
    fn expired_entries_are_purged_before_lookup() {
        let (cache, clock) =
            cache_with_clock(DedupSettings { expiry_secs: 30, max_entries: 100 });

        for index in 0..5 {
            assert!(cache.admit(&format!("old-{index}")));
        }
        clock.advance(Duration::seconds(31));
        assert!(cache.admit("fresh"));

        assert_eq!(cache.len(), 1);
        assert!(cache.contains("fresh"));
        assert!(!cache.contains("old-0"));
    }

    #[test]
    fn size_never_exceeds_max_entries() {
        let (cache, clock) = cache_with_clock(DedupSettings { expiry_secs: 300, max_entries: 3 });

        for index in 0..10 {
            assert!(cache.admit(&format!("Ev-{index}")));
            clock.advance(Duration::milliseconds(10));
            assert!(cache.len() <= 3);
        }

        assert!(!cache.contains("Ev-6"));
        assert!(cache.contains("Ev-7"));
        assert!(cache.contains("Ev-9"));
    }

    #[test]
    fn evicted_id_can_be_admitted_again() {
        let (cache, _clock) = cache_with_clock(DedupSettings { expiry_secs: 300, max_entries: 2 });

        assert!(cache.admit("a"));
        assert!(cache.admit("b"));
        assert!(cache.admit("c"));
        assert!(cache.admit("a"), "oldest entry was evicted by size");
        assert!(!cache.admit("c"));
    }

    #[test]
    fn stale_entry_behind_newer_one_is_not_treated_as_duplicate() {
        let cache = DedupCache::with_system_clock(DedupSettings { expiry_secs: 300, max_entries: 10 });

        assert!(cache.admit_at("newer", epoch() + Duration::seconds(200)));
        assert!(cache.admit_at("stepped-back", epoch()));
        assert!(cache.admit_at("stepped-back", epoch() + Duration::seconds(350)));
        assert!(!cache.admit_at("newer", epoch() + Duration::seconds(350)));
    }

    #[test]
    fn blank_event_ids_are_admitted_without_being_recorded() {
        let (cache, _clock) = cache_with_clock(DedupSettings::default());

        assert!(cache.admit(""));
        assert!(cache.admit("   "));
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_max_entries_is_raised_to_one() {
        let (cache, _clock) = cache_with_clock(DedupSettings { expiry_secs: 300, max_entries: 0 });

        assert_eq!(cache.settings().max_entries, 1);
        assert!(cache.admit("only"));
        assert!(!cache.admit("only"));
    }

    #[test]
    fn concurrent_duplicates_admit_exactly_once() {
        let (cache, _clock) = cache_with_clock(DedupSettings::default());
        let admitted = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    if cache.admit("Ev-race") {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }
}
