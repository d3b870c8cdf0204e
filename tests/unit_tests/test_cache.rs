// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::BTreeMap, thread::sleep, time::Duration};

use routeros_collector_rs::cache::{FingerprintCache, fingerprint};
use serde_json::json;

fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn fingerprint_is_order_independent() {
    let a = params(&[("target", "8.8.8.8"), ("count", "4")]);
    let b = params(&[("count", "4"), ("target", "8.8.8.8")]);
    assert_eq!(
        fingerprint("r1", 8728, "ping", &a),
        fingerprint("r1", 8728, "ping", &b)
    );
}

#[test]
fn fingerprint_separates_requests() {
    let base = params(&[("target", "8.8.8.8"), ("count", "4")]);
    let other_target = params(&[("target", "1.1.1.1"), ("count", "4")]);

    let key = fingerprint("r1", 8728, "ping", &base);
    assert_ne!(key, fingerprint("r1", 8728, "ping", &other_target));
    assert_ne!(key, fingerprint("r2", 8728, "ping", &base));
    assert_ne!(key, fingerprint("r1", 8729, "ping", &base));
    assert_ne!(key, fingerprint("r1", 8728, "traceroute", &base));
}

#[test]
fn put_then_get_round_trips() {
    let cache = FingerprintCache::new(Duration::from_secs(3600), 100);
    cache.put("k1".to_string(), json!({"v": 1}));

    assert_eq!(cache.get("k1"), Some(json!({"v": 1})));
    assert_eq!(cache.get("other"), None);
}

#[test]
fn unlimited_ttl_never_expires() {
    let cache = FingerprintCache::new(Duration::MAX, 10);
    cache.put("k".to_string(), json!(42));
    assert_eq!(cache.get("k"), Some(json!(42)));
    assert_eq!(cache.purge_expired(), 0);
    assert_eq!(cache.get("k"), Some(json!(42)));
}

#[test]
fn expired_entries_are_invisible_and_removed() {
    let cache = FingerprintCache::new(Duration::ZERO, 10);
    cache.put("k".to_string(), json!(1));

    assert_eq!(cache.get("k"), None, "now >= expiry must read as a miss");
    assert!(cache.is_empty(), "expired entry is removed on read");
}

#[test]
fn replacement_is_whole_entry() {
    let cache = FingerprintCache::new(Duration::from_secs(3600), 10);
    cache.put("k".to_string(), json!({"old": true}));
    cache.put("k".to_string(), json!({"new": true}));
    assert_eq!(cache.get("k"), Some(json!({"new": true})));
    assert_eq!(cache.len(), 1);
}

#[test]
fn purge_expired_sweeps_only_stale_entries() {
    let cache = FingerprintCache::new(Duration::from_millis(40), 10);
    cache.put("stale".to_string(), json!(1));
    sleep(Duration::from_millis(60));
    cache.put("fresh".to_string(), json!(2));

    assert_eq!(cache.purge_expired(), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("fresh"), Some(json!(2)));
}

#[test]
fn at_capacity_drops_oldest_fifth() {
    let cache = FingerprintCache::new(Duration::from_secs(3600), 10);
    for i in 0..10 {
        cache.put(format!("k{i}"), json!(i));
        // Distinct expiries keep the eviction order deterministic.
        sleep(Duration::from_millis(2));
    }
    assert_eq!(cache.len(), 10);

    cache.put("k10".to_string(), json!(10));

    assert!(cache.len() <= 10);
    assert_eq!(cache.get("k0"), None, "oldest entry must be gone");
    assert_eq!(cache.get("k1"), None, "second-oldest entry must be gone");
    assert_eq!(cache.get("k10"), Some(json!(10)));
    assert_eq!(cache.get("k9"), Some(json!(9)));
}

#[test]
fn clear_reports_removed_count() {
    let cache = FingerprintCache::new(Duration::from_secs(3600), 10);
    cache.put("a".to_string(), json!(1));
    cache.put("b".to_string(), json!(2));
    assert_eq!(cache.clear(), 2);
    assert!(cache.is_empty());
}

#[test]
fn snapshot_tracks_hits_and_misses() {
    let cache = FingerprintCache::new(Duration::from_secs(3600), 10);
    cache.put("a".to_string(), json!(1));
    let _ = cache.get("a");
    let _ = cache.get("a");
    let _ = cache.get("missing");

    let snap = cache.snapshot();
    assert_eq!(snap["hits"], json!(2));
    assert_eq!(snap["misses"], json!(1));
    assert_eq!(snap["size"], json!(1));
}
