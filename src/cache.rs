//! TTL cache for computed metric results.
//!
//! An explicit value with an injected clock and a capacity bound, constructed
//! once per process and shared by reference. Entries are replaced, never
//! mutated; when the cache is full the oldest-inserted entry goes first.
//! Concurrent misses on the same key each run their own computation; the
//! lock is never held across an await.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::Value;

use crate::logging::log_cache;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis() as u64
    }
}

/// Hand-cranked clock for deterministic TTL tests.
#[derive(Default)]
pub struct ManualClock {
    ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self { ms: AtomicU64::new(start_ms) }
    }

    pub fn advance(&self, delta_ms: u64) {
        self.ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.ms.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct CacheEntry {
    value: Value,
    computed_at: u64,
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    // insertion order, oldest at the front
    order: VecDeque<String>,
}

pub struct MetricsCache {
    inner: Mutex<Inner>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl MetricsCache {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner { entries: HashMap::new(), order: VecDeque::new() }),
            capacity: capacity.max(1),
            clock,
        }
    }

    /// Fresh hit returns the stored value without running `compute`; a miss
    /// or expired entry runs `compute` once for this caller and stores the
    /// result. Failures are propagated and never cached.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl_ms: u64, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let now = self.clock.now_ms();
        {
            let inner = self.inner.lock().expect("cache lock poisoned");
            if let Some(entry) = inner.entries.get(key) {
                let age = now.saturating_sub(entry.computed_at);
                if age < ttl_ms {
                    log_cache("hit", key, Some(age));
                    return Ok(entry.value.clone());
                }
                log_cache("expired", key, Some(age));
            } else {
                log_cache("miss", key, None);
            }
        }

        let value = compute().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    fn insert(&self, key: &str, value: Value) {
        let computed_at = self.clock.now_ms();
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if inner.entries.contains_key(key) {
            // replacement: the entry re-enters at the back of the order
            inner.order.retain(|k| k != key);
        } else if inner.entries.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
                log_cache("evicted", &oldest, None);
            }
        }
        inner.order.push_back(key.to_string());
        inner.entries.insert(key.to_string(), CacheEntry { value, computed_at });
    }

    /// Drops entries whose key starts with `prefix`, or everything if None.
    pub fn invalidate(&self, prefix: Option<&str>) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        match prefix {
            None => {
                inner.entries.clear();
                inner.order.clear();
            }
            Some(p) => {
                inner.entries.retain(|k, _| !k.starts_with(p));
                inner.order.retain(|k| !k.starts_with(p));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================
