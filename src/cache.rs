// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use dashmap::DashMap;
use md5::{Digest, Md5};
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::metrics::normalize::round2;

/// Stable request fingerprint: MD5 over the canonical JSON of the ordered
/// parameter map. BTreeMap keys make insertion order irrelevant; absent
/// parameters are simply not in the map.
pub fn fingerprint(
    host: &str,
    port: u16,
    op: &str,
    params: &BTreeMap<String, String>,
) -> String {
    let mut canonical = params.clone();
    canonical.insert("host".to_string(), host.to_string());
    canonical.insert("port".to_string(), port.to_string());
    canonical.insert("op".to_string(), op.to_string());

    let payload = serde_json::to_string(&canonical)
        .expect("string map always serializes");
    let mut hasher = Md5::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    /// None means the entry never expires (TTL too large to represent).
    expiry: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expiry.is_some_and(|at| now >= at)
    }
}

/// Short-TTL cache for idempotent read-style results.
///
/// Entries never mutate; a put replaces the whole entry. Readers never see
/// an expired entry.
pub struct FingerprintCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    cleanups: AtomicU64,
}

impl FingerprintCache {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_size: max_size.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            cleanups: AtomicU64::new(0),
        }
    }

    /// Returns the cached value, removing the entry opportunistically when
    /// it expired.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let hit = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => {
                drop(self.entries.remove(key));
                self.evictions.fetch_add(1, Ordering::Relaxed);
                None
            },
            None => None,
        };
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Stores one successful result, making room by dropping the 20% oldest
    /// entries (by expiry) when the cache is full.
    pub fn put(&self, key: String, value: Value) {
        if self.entries.len() >= self.max_size
            && !self.entries.contains_key(&key)
        {
            self.evict_oldest();
        }
        let now = Instant::now();
        self.entries.insert(key, CacheEntry {
            value,
            expiry: now.checked_add(self.ttl),
        });
    }

    /// Drops every entry; returns how many were removed.
    pub fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Periodic sweep of expired entries.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            self.cleanups.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Value {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups > 0 {
            100.0 * hits as f64 / lookups as f64
        } else {
            0.0
        };
        json!({
            "size": self.entries.len(),
            "max_size": self.max_size,
            "ttl_seconds": self.ttl.as_secs(),
            "hits": hits,
            "misses": misses,
            "hit_rate_percent": round2(hit_rate),
            "evictions": self.evictions.load(Ordering::Relaxed),
            "cleanups": self.cleanups.load(Ordering::Relaxed),
        })
    }

    fn evict_oldest(&self) {
        let to_remove = (self.max_size / 5).max(1);
        // Oldest by expiry; never-expiring entries go last.
        let mut candidates: Vec<(String, Option<Instant>)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().expiry))
            .collect();
        candidates.sort_by_key(|(_, expiry)| (expiry.is_none(), *expiry));

        for (key, _) in candidates.into_iter().take(to_remove) {
            drop(self.entries.remove(&key));
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}
