//! Guard table and RAII guard

use ballast_core::{Clock, Principal};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::GuardError;

/// Unit of exclusion
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuardKey {
    pub caller: Principal,
    /// Operation name (`withdraw_collateral`); one guard per caller and
    /// operation, across all of the caller's vaults
    pub operation: String,
}

impl GuardKey {
    pub fn new(caller: Principal, operation: impl Into<String>) -> Self {
        Self {
            caller,
            operation: operation.into(),
        }
    }
}

impl fmt::Display for GuardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.caller, self.operation)
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    generation: u64,
    acquired_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<GuardKey, Entry>,
    next_generation: u64,
}

/// Table of in-flight operations
pub struct GuardTable {
    inner: Mutex<Inner>,
    timeout: Duration,
    cap: usize,
    clock: Arc<dyn Clock>,
}

impl GuardTable {
    pub fn new(timeout_secs: u64, cap: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            timeout: Duration::seconds(timeout_secs as i64),
            cap,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Acquire the guard for `key`, or fail immediately if it is held.
    ///
    /// An expired entry for the same key is taken over; its holder's guard
    /// will then release nothing when dropped.
    pub fn acquire(self: &Arc<Self>, key: GuardKey) -> Result<OperationGuard, GuardError> {
        let now = self.clock.now();
        let mut inner = self.lock();

        if let Some(existing) = inner.entries.get(&key) {
            if now - existing.acquired_at <= self.timeout {
                debug!(key = %key, "guard busy");
                return Err(GuardError::AlreadyInProgress {
                    caller: key.caller.to_string(),
                    operation: key.operation.clone(),
                });
            }
            warn!(key = %key, acquired_at = %existing.acquired_at, "taking over expired guard");
        } else if inner.entries.len() >= self.cap {
            let removed = Self::sweep_locked(&mut inner, now, self.timeout);
            if removed == 0 {
                return Err(GuardError::CapacityExceeded { cap: self.cap });
            }
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;
        inner.entries.insert(
            key.clone(),
            Entry {
                generation,
                acquired_at: now,
            },
        );

        Ok(OperationGuard {
            table: Arc::clone(self),
            key,
            generation,
        })
    }

    /// Remove every guard older than the timeout. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        Self::sweep_locked(&mut inner, now, self.timeout)
    }

    fn sweep_locked(inner: &mut Inner, now: DateTime<Utc>, timeout: Duration) -> usize {
        let before = inner.entries.len();
        inner.entries.retain(|key, entry| {
            let keep = now - entry.acquired_at <= timeout;
            if !keep {
                warn!(key = %key, acquired_at = %entry.acquired_at, "sweeping stale guard");
            }
            keep
        });
        before - inner.entries.len()
    }

    pub fn is_held(&self, key: &GuardKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, key: &GuardKey, generation: u64) {
        let mut inner = self.lock();
        if inner.entries.get(key).map(|e| e.generation) == Some(generation) {
            inner.entries.remove(key);
        }
    }
}

/// Held for the duration of one operation; releases its key on drop
pub struct OperationGuard {
    table: Arc<GuardTable>,
    key: GuardKey,
    generation: u64,
}

impl OperationGuard {
    pub fn key(&self) -> &GuardKey {
        &self.key
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.table.release(&self.key, self.generation);
    }
}

/// Spawn the background sweep task
pub fn spawn_sweeper(table: Arc<GuardTable>, period: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let removed = table.sweep();
            if removed > 0 {
                debug!(removed, "guard sweep");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::ManualClock;
    use chrono::TimeZone;
    use std::sync::Barrier;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        ))
    }

    fn key(caller: &str, op: &str) -> GuardKey {
        GuardKey::new(Principal::new(caller).unwrap(), op)
    }

    #[test]
    fn test_duplicate_key_rejected_until_drop() {
        let table = Arc::new(GuardTable::new(300, 10, clock()));

        let guard = table.acquire(key("alice", "borrow_vault_1")).unwrap();
        assert!(matches!(
            table.acquire(key("alice", "borrow_vault_1")),
            Err(GuardError::AlreadyInProgress { .. })
        ));

        // Different caller or operation is independent
        assert!(table.acquire(key("bob", "borrow_vault_1")).is_ok());
        assert!(table.acquire(key("alice", "repay_vault_1")).is_ok());

        drop(guard);
        assert!(table.acquire(key("alice", "borrow_vault_1")).is_ok());
    }

    #[test]
    fn test_released_on_error_path() {
        let table = Arc::new(GuardTable::new(300, 10, clock()));

        fn failing(table: &Arc<GuardTable>) -> Result<(), String> {
            let _guard = table.acquire(key("alice", "op")).map_err(|e| e.to_string())?;
            Err("business rule".to_string())
        }

        assert!(failing(&table).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_sweep_removes_expired() {
        let clock = clock();
        let table = Arc::new(GuardTable::new(300, 10, clock.clone()));

        let stale = table.acquire(key("alice", "op")).unwrap();
        clock.advance(Duration::seconds(301));
        assert_eq!(table.sweep(), 1);
        assert!(table.is_empty());

        // A newer holder keeps its entry when the stale guard finally drops
        let fresh = table.acquire(key("alice", "op")).unwrap();
        drop(stale);
        assert!(table.is_held(fresh.key()));
    }

    #[test]
    fn test_expired_entry_is_taken_over() {
        let clock = clock();
        let table = Arc::new(GuardTable::new(300, 10, clock.clone()));

        let _old = table.acquire(key("alice", "op")).unwrap();
        clock.advance(Duration::seconds(301));
        assert!(table.acquire(key("alice", "op")).is_ok());
    }

    #[test]
    fn test_cap_bounds_outstanding_guards() {
        let clock = clock();
        let table = Arc::new(GuardTable::new(300, 2, clock.clone()));

        let _a = table.acquire(key("a", "op")).unwrap();
        let _b = table.acquire(key("b", "op")).unwrap();
        assert_eq!(
            table.acquire(key("c", "op")).err(),
            Some(GuardError::CapacityExceeded { cap: 2 })
        );

        // Expired entries make room
        clock.advance(Duration::seconds(301));
        assert!(table.acquire(key("c", "op")).is_ok());
    }

    #[test]
    fn test_concurrent_same_key_exactly_one_wins() {
        for _ in 0..50 {
            let table = Arc::new(GuardTable::new(300, 100, clock()));
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let table = Arc::clone(&table);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        let result = table.acquire(key("alice", "redeem"));
                        // Hold until both have tried
                        barrier.wait();
                        result.is_ok()
                    })
                })
                .collect();

            let wins = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(wins, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper() {
        let clock = clock();
        let table = Arc::new(GuardTable::new(300, 10, clock.clone()));
        let guard = table.acquire(key("alice", "op")).unwrap();
        std::mem::forget(guard);

        let handle = spawn_sweeper(Arc::clone(&table), std::time::Duration::from_secs(60));
        clock.advance(Duration::seconds(400));
        tokio::time::sleep(std::time::Duration::from_secs(61)).await;

        assert!(table.is_empty());
        handle.abort();
    }
}
