// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde::Serialize;

use crate::proto::sentence::Reply;

/// Rounds to two decimals, the precision of every numeric field in the
/// canonical output schema.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Parses a device time field into milliseconds.
///
/// `"12ms"` → 12.0, `"850us"` → 0.85, `"2s"` → 2000.0, bare numbers are
/// already milliseconds. `"*"` and garbage are None.
pub fn parse_time_ms(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "*" {
        return None;
    }

    let (digits, scale) = if let Some(d) = trimmed.strip_suffix("ms") {
        (d, 1.0)
    } else if let Some(d) = trimmed.strip_suffix("us") {
        (d, 1.0 / 1000.0)
    } else if let Some(d) = trimmed.strip_suffix('s') {
        (d, 1000.0)
    } else {
        (trimmed, 1.0)
    };

    digits.trim().parse::<f64>().ok().map(|v| v * scale)
}

/// Canonical ping statistics. Timing fields are absent whenever no probe
/// came back.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PingSummary {
    pub packets_sent: u32,
    pub packets_received: u32,
    pub packet_loss_percent: f64,
    pub availability_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<f64>,
    pub status: PingStatus,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PingStatus {
    Reachable,
    Unreachable,
}

/// A probe counts as received when it carries a time and no timeout marker.
fn probe_received(record: &Reply) -> bool {
    record.attr("time").is_some()
        && record.attr("timeout").is_none()
        && record.attr("status") != Some("timeout")
}

/// Folds the `!re` stream of one ping call into the canonical summary.
pub fn summarize_ping(records: &[Reply]) -> PingSummary {
    let sent = records.len() as u32;
    let mut received = 0u32;
    let mut times: Vec<f64> = Vec::with_capacity(records.len());

    for record in records {
        if probe_received(record) {
            received += 1;
            if let Some(ms) = record.attr("time").and_then(parse_time_ms) {
                times.push(ms);
            }
        }
    }

    let loss = if sent == 0 {
        100.0
    } else {
        100.0 * f64::from(sent - received) / f64::from(sent)
    };

    let (min, avg, max, jitter) = if times.is_empty() {
        (None, None, None, None)
    } else {
        let min = times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = times.iter().sum::<f64>() / times.len() as f64;
        let jitter = if times.len() > 1 { max - min } else { 0.0 };
        (
            Some(round2(min)),
            Some(round2(avg)),
            Some(round2(max)),
            Some(round2(jitter)),
        )
    };

    PingSummary {
        packets_sent: sent,
        packets_received: received,
        packet_loss_percent: round2(loss),
        availability_percent: round2(100.0 - loss),
        min_time_ms: min,
        avg_time_ms: avg,
        max_time_ms: max,
        jitter_ms: jitter,
        status: if received > 0 {
            PingStatus::Reachable
        } else {
            PingStatus::Unreachable
        },
    }
}

/// One traceroute hop after dedup, ordered by hop number.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HopSummary {
    pub hop: u32,
    pub address: String,
    pub loss_percent: f64,
    pub sent: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worst_time_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TracerouteSummary {
    pub target: String,
    pub hop_count: usize,
    pub hops: Vec<HopSummary>,
    pub reached_target: bool,
}

fn hop_from_record(hop: u32, record: &Reply) -> HopSummary {
    HopSummary {
        hop,
        address: record.attr("address").unwrap_or("*").to_string(),
        loss_percent: record
            .attr("loss")
            .and_then(|v| v.trim_end_matches('%').trim().parse().ok())
            .unwrap_or(100.0),
        sent: record
            .attr("sent")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        last_time_ms: record
            .attr("last")
            .or_else(|| record.attr("time"))
            .and_then(parse_time_ms)
            .map(round2),
        avg_time_ms: record.attr("avg").and_then(parse_time_ms).map(round2),
        best_time_ms: record.attr("best").and_then(parse_time_ms).map(round2),
        worst_time_ms: record.attr("worst").and_then(parse_time_ms).map(round2),
    }
}

/// Dedups the rolling per-hop records (last one wins), orders hops
/// ascending and derives `reached_target`.
pub fn summarize_traceroute(records: &[Reply], target: &str) -> TracerouteSummary {
    let mut by_hop = std::collections::BTreeMap::new();
    for record in records {
        let Some(hop) = record.attr("hop").and_then(|v| v.parse::<u32>().ok())
        else {
            continue;
        };
        by_hop.insert(hop, hop_from_record(hop, record));
    }

    let hops: Vec<HopSummary> = by_hop.into_values().collect();
    let reached_target = hops
        .last()
        .map(|last| last.address == target || last.loss_percent < 100.0)
        .unwrap_or(false);

    TracerouteSummary {
        target: target.to_string(),
        hop_count: hops.len(),
        hops,
        reached_target,
    }
}
