// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use routeros_collector_rs::stats::StatsRegistry;
use serde_json::json;

#[test]
fn request_counters_and_running_mean() {
    let stats = StatsRegistry::new();

    stats.request_started();
    stats.request_finished(Duration::from_secs(1), true);
    stats.request_started();
    stats.request_finished(Duration::from_secs(2), true);
    stats.request_started();
    stats.request_finished(Duration::from_secs(3), false);

    let snap = stats.snapshot();
    assert_eq!(snap["total_requests"], json!(3));
    assert_eq!(snap["successful_requests"], json!(2));
    assert_eq!(snap["failed_requests"], json!(1));
    assert_eq!(snap["active_requests"], json!(0));
    assert_eq!(snap["avg_response_time_seconds"], json!(2.0));
    assert!(
        (snap["success_rate_percent"].as_f64().expect("f64") - 66.67).abs()
            < 0.01
    );
}

#[test]
fn peak_concurrency_watermark() {
    let stats = StatsRegistry::new();

    stats.request_started();
    stats.request_started();
    stats.request_started();
    stats.request_finished(Duration::from_millis(10), true);

    let snap = stats.snapshot();
    assert_eq!(snap["peak_concurrent_requests"], json!(3));
    assert_eq!(snap["active_requests"], json!(2));
}

#[test]
fn connection_counters_accumulate() {
    let stats = StatsRegistry::new();
    stats.connection_created();
    stats.connection_created();
    stats.connection_reused();
    stats.connection_failed();
    stats.connection_evicted();
    stats.api_call();
    stats.batch_call();

    let snap = stats.snapshot();
    assert_eq!(snap["connections"]["created"], json!(2));
    assert_eq!(snap["connections"]["reused"], json!(1));
    assert_eq!(snap["connections"]["failed"], json!(1));
    assert_eq!(snap["connections"]["evicted"], json!(1));
    assert_eq!(snap["api_calls"], json!(1));
    assert_eq!(snap["batch_calls"], json!(1));
}

#[test]
fn empty_registry_reports_zero_rates() {
    let stats = StatsRegistry::new();
    let snap = stats.snapshot();
    assert_eq!(snap["total_requests"], json!(0));
    assert_eq!(snap["success_rate_percent"], json!(0.0));
    assert_eq!(snap["avg_response_time_seconds"], json!(0.0));
}
