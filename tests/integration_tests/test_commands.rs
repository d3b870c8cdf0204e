// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::BTreeMap, time::Duration};

use anyhow::Result;
use routeros_collector_rs::{
    client::session::Session,
    commands::{Op, generic::run_generic, ping::run_ping, traceroute::run_traceroute},
    error::CollectorError,
    metrics::normalize::PingStatus,
};
use tokio_util::sync::CancellationToken;

use crate::integration_tests::common::{
    MockOptions, MockRouter, test_session_tuning,
};

async fn open_session(mock: &MockRouter) -> Result<std::sync::Arc<Session>> {
    Ok(Session::open(
        &mock.endpoint("admin", "secret"),
        test_session_tuning(),
        &CancellationToken::new(),
    )
    .await?)
}

#[tokio::test]
async fn generic_command_collects_records() -> Result<()> {
    let mock = MockRouter::spawn(MockOptions::default()).await;
    let session = open_session(&mock).await?;

    let records = run_generic(
        &session,
        "/system/identity/print",
        &BTreeMap::new(),
        Duration::from_secs(5),
    )
    .await?;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("name").map(String::as_str), Some("mock-router"));
    Ok(())
}

#[tokio::test]
async fn generic_command_returns_multiple_records() -> Result<()> {
    let mock = MockRouter::spawn(MockOptions::default()).await;
    let session = open_session(&mock).await?;

    let records = run_generic(
        &session,
        "/interface/print",
        &BTreeMap::new(),
        Duration::from_secs(5),
    )
    .await?;

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get("name").map(String::as_str), Some("ether1"));
    assert_eq!(records[1].get("type").map(String::as_str), Some("bridge"));
    Ok(())
}

#[tokio::test]
async fn unknown_path_surfaces_device_error_verbatim() -> Result<()> {
    let mock = MockRouter::spawn(MockOptions::default()).await;
    let session = open_session(&mock).await?;

    let err = run_generic(
        &session,
        "/no/such/path",
        &BTreeMap::new(),
        Duration::from_secs(5),
    )
    .await
    .expect_err("mock rejects unknown paths");

    match err {
        CollectorError::Device(msg) => {
            assert_eq!(msg, "no such command prefix");
        },
        other => panic!("expected DeviceError, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn ping_summary_from_streamed_probes() -> Result<()> {
    let mock = MockRouter::spawn(MockOptions::default()).await;
    let session = open_session(&mock).await?;

    let summary = run_ping(&session, "192.0.2.1", 4, 64, 1).await?;
    assert_eq!(summary.packets_sent, 4);
    assert_eq!(summary.packets_received, 4);
    // Mock emits 10..13 ms.
    assert_eq!(summary.min_time_ms, Some(10.0));
    assert_eq!(summary.max_time_ms, Some(13.0));
    assert_eq!(summary.jitter_ms, Some(3.0));
    Ok(())
}

#[tokio::test]
async fn ping_to_silent_target_is_unreachable() -> Result<()> {
    let mock = MockRouter::spawn(MockOptions::default()).await;
    let session = open_session(&mock).await?;

    let summary = run_ping(&session, "203.0.113.9", 3, 64, 1).await?;
    assert_eq!(summary.packets_sent, 3);
    assert_eq!(summary.packets_received, 0);
    assert_eq!(summary.packet_loss_percent, 100.0);
    assert_eq!(summary.status, PingStatus::Unreachable);
    assert_eq!(summary.min_time_ms, None);
    Ok(())
}

#[tokio::test]
async fn traceroute_dedups_and_stops_at_target() -> Result<()> {
    let mock = MockRouter::spawn(MockOptions::default()).await;
    let session = open_session(&mock).await?;

    let summary = run_traceroute(&session, "198.51.100.7", 3).await?;
    assert_eq!(summary.hop_count, 3);
    assert_eq!(summary.hops[1].hop, 2);
    assert_eq!(summary.hops[1].loss_percent, 33.0, "last record wins");
    assert_eq!(summary.hops[2].address, "198.51.100.7");
    assert!(summary.reached_target);
    Ok(())
}

#[test]
fn command_strings_classify_into_ops() {
    let mut params = BTreeMap::new();
    params.insert("address".to_string(), "8.8.8.8".to_string());
    params.insert("count".to_string(), "2".to_string());

    let op = Op::from_command("/ping", &params).expect("valid");
    assert_eq!(op, Op::Ping {
        target: "8.8.8.8".to_string(),
        count: 2,
        size: 64,
        interval_secs: 1,
    });

    // CLI-style spelling normalizes to the API path.
    let op = Op::from_command("/tool traceroute", &params).expect("valid");
    assert_eq!(op, Op::Traceroute {
        target: "8.8.8.8".to_string(),
        count: 2,
    });

    let op = Op::from_command("/interface/print", &BTreeMap::new()).expect("valid");
    assert!(matches!(op, Op::Generic { .. }));

    let err = Op::from_command("interface print", &BTreeMap::new())
        .expect_err("relative paths are invalid");
    assert!(matches!(err, CollectorError::BadRequest(_)));

    let err = Op::from_command("/ping", &BTreeMap::new())
        .expect_err("ping requires an address");
    assert!(matches!(err, CollectorError::BadRequest(_)));
}
