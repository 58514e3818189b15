use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error};

use crate::error::GateError;
use crate::rate_limit::policy::Adjustment;

/// Counter state for one key within one fixed window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRecord {
    pub key: String,
    pub count: u32,
    pub reset_time: DateTime<Utc>,
}

/// Result of [`CounterStore::admit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Count after this request was (or wasn't) charged.
    pub count: u32,
    pub reset_time: DateTime<Utc>,
}

/// Fixed-window counters keyed by string.
///
/// Implementations must make `admit` a single atomic step: window reset,
/// limit check and increment happen together or concurrent requests on the
/// same key can overshoot the limit.
pub trait CounterStore: Send + Sync {
    /// Reset the window if it has elapsed, then admit the request if the count
    /// is under `limit`, charging it when `charge` is set.
    fn admit(
        &self,
        key: &str,
        window: TimeDelta,
        limit: u32,
        charge: bool,
        now: DateTime<Utc>,
    ) -> Result<Admission, GateError>;

    /// Apply a post-handler correction. Ignored unless the key is still in the
    /// window identified by `window_reset`.
    fn adjust(
        &self,
        key: &str,
        window_reset: DateTime<Utc>,
        adjustment: Adjustment,
    ) -> Result<(), GateError>;

    /// Current record, or `None` if absent or its window has elapsed.
    fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CounterRecord>, GateError>;

    /// Drop every record whose window has elapsed. Returns how many went.
    fn sweep(&self, now: DateTime<Utc>) -> Result<usize, GateError>;
}

/// Process-local counters behind one mutex. The sweep takes the same lock as
/// `admit`/`adjust`, so it can never delete a record mid-update.
#[derive(Default)]
pub struct MemoryCounterStore {
    records: Mutex<HashMap<String, CounterRecord>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, CounterRecord>>, GateError> {
        self.records
            .lock()
            .map_err(|e| GateError::StoreUnavailable(format!("counter lock poisoned: {}", e)))
    }
}

impl CounterStore for MemoryCounterStore {
    fn admit(
        &self,
        key: &str,
        window: TimeDelta,
        limit: u32,
        charge: bool,
        now: DateTime<Utc>,
    ) -> Result<Admission, GateError> {
        let mut records = self.lock()?;

        let record = records.entry(key.to_string()).or_insert_with(|| CounterRecord {
            key: key.to_string(),
            count: 0,
            reset_time: now + window,
        });

        // Elapsed windows are replaced, never carried over.
        if record.reset_time <= now {
            record.count = 0;
            record.reset_time = now + window;
        }

        if record.count >= limit {
            return Ok(Admission {
                allowed: false,
                count: record.count,
                reset_time: record.reset_time,
            });
        }

        if charge {
            record.count += 1;
        }

        Ok(Admission {
            allowed: true,
            count: record.count,
            reset_time: record.reset_time,
        })
    }

    fn adjust(
        &self,
        key: &str,
        window_reset: DateTime<Utc>,
        adjustment: Adjustment,
    ) -> Result<(), GateError> {
        let mut records = self.lock()?;

        let Some(record) = records.get_mut(key) else {
            return Ok(());
        };
        if record.reset_time != window_reset {
            debug!(key, "Window rolled over before reconcile, dropping adjustment");
            return Ok(());
        }

        match adjustment {
            Adjustment::Keep => {}
            Adjustment::Increment => record.count = record.count.saturating_add(1),
            Adjustment::Decrement => record.count = record.count.saturating_sub(1),
        }
        Ok(())
    }

    fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CounterRecord>, GateError> {
        let records = self.lock()?;
        Ok(records.get(key).filter(|r| r.reset_time > now).cloned())
    }

    fn sweep(&self, now: DateTime<Utc>) -> Result<usize, GateError> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, r| r.reset_time > now);
        Ok(before - records.len())
    }
}

/// Background task that drops expired counters.
pub async fn run_sweep_loop(store: Arc<dyn CounterStore>, period: Duration) {
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;

        match store.sweep(Utc::now()) {
            Ok(count) => {
                if count > 0 {
                    debug!("Sweep: dropped {} expired rate-limit counters", count);
                }
            }
            Err(e) => {
                error!("Counter sweep failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> TimeDelta {
        TimeDelta::seconds(60)
    }

    #[test]
    fn admits_up_to_limit() {
        let store = MemoryCounterStore::new();
        let now = Utc::now();

        for expected in 1..=3 {
            let admission = store.admit("k", window(), 3, true, now).unwrap();
            assert!(admission.allowed);
            assert_eq!(admission.count, expected);
            assert_eq!(admission.reset_time, now + window());
        }

        let denied = store.admit("k", window(), 3, true, now).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.count, 3);
    }

    #[test]
    fn elapsed_window_is_replaced_not_incremented() {
        let store = MemoryCounterStore::new();
        let start = Utc::now();
        for _ in 0..3 {
            store.admit("k", window(), 3, true, start).unwrap();
        }

        let later = start + window();
        let admission = store.admit("k", window(), 3, true, later).unwrap();
        assert!(admission.allowed);
        assert_eq!(admission.count, 1);
        assert_eq!(admission.reset_time, later + window());
    }

    #[test]
    fn uncharged_admission_leaves_count() {
        let store = MemoryCounterStore::new();
        let now = Utc::now();
        let admission = store.admit("k", window(), 1, false, now).unwrap();
        assert!(admission.allowed);
        assert_eq!(admission.count, 0);
        assert!(store.admit("k", window(), 1, false, now).unwrap().allowed);
    }

    #[test]
    fn get_hides_elapsed_records() {
        let store = MemoryCounterStore::new();
        let now = Utc::now();
        store.admit("k", window(), 3, true, now).unwrap();

        assert_eq!(store.get("k", now).unwrap().unwrap().count, 1);
        assert!(store.get("k", now + window()).unwrap().is_none());
        assert!(store.get("missing", now).unwrap().is_none());
    }

    #[test]
    fn adjust_is_scoped_to_its_window() {
        let store = MemoryCounterStore::new();
        let now = Utc::now();
        let first = store.admit("k", window(), 3, true, now).unwrap();

        store.adjust("k", first.reset_time, Adjustment::Decrement).unwrap();
        assert_eq!(store.get("k", now).unwrap().unwrap().count, 0);

        // Saturates at zero.
        store.adjust("k", first.reset_time, Adjustment::Decrement).unwrap();
        assert_eq!(store.get("k", now).unwrap().unwrap().count, 0);

        // A correction for a stale window must not touch the new one.
        let later = now + window();
        store.admit("k", window(), 3, true, later).unwrap();
        store.adjust("k", first.reset_time, Adjustment::Increment).unwrap();
        assert_eq!(store.get("k", later).unwrap().unwrap().count, 1);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let store = MemoryCounterStore::new();
        let now = Utc::now();
        store.admit("old", TimeDelta::seconds(1), 3, true, now).unwrap();
        store.admit("new", window(), 3, true, now).unwrap();

        assert_eq!(store.sweep(now + TimeDelta::seconds(2)).unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("new", now).unwrap().is_some());
    }

    #[test]
    fn concurrent_admissions_never_overshoot() {
        let store = Arc::new(MemoryCounterStore::new());
        let now = Utc::now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| store.admit("shared", window(), 100, true, now).unwrap().allowed)
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 100);
    }
}
