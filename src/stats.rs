// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Mutex as StdMutex,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::metrics::normalize::round2;

/// Running mean of response times, updated under a short-hold mutex.
#[derive(Debug, Default)]
struct RunningMean {
    count: u64,
    mean: f64,
}

impl RunningMean {
    fn record(&mut self, sample: f64) {
        self.count += 1;
        self.mean += (sample - self.mean) / self.count as f64;
    }
}

/// Process-wide monotonic counters plus a rolling response-time average.
///
/// Counters are lock-free; snapshot construction copies values and derives
/// ratios outside any lock.
#[derive(Debug)]
pub struct StatsRegistry {
    started_at: Instant,
    started_at_utc: DateTime<Utc>,

    requests_total: AtomicU64,
    requests_success: AtomicU64,
    requests_failed: AtomicU64,
    active_requests: AtomicI64,
    peak_concurrent: AtomicI64,

    api_calls: AtomicU64,
    batch_calls: AtomicU64,

    connections_created: AtomicU64,
    connections_reused: AtomicU64,
    connections_failed: AtomicU64,
    connections_evicted: AtomicU64,

    response_time: StdMutex<RunningMean>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
            requests_total: AtomicU64::new(0),
            requests_success: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            active_requests: AtomicI64::new(0),
            peak_concurrent: AtomicI64::new(0),
            api_calls: AtomicU64::new(0),
            batch_calls: AtomicU64::new(0),
            connections_created: AtomicU64::new(0),
            connections_reused: AtomicU64::new(0),
            connections_failed: AtomicU64::new(0),
            connections_evicted: AtomicU64::new(0),
            response_time: StdMutex::new(RunningMean::default()),
        }
    }

    /// Bumps the active-request gauge and the peak watermark.
    pub fn request_started(&self) {
        let active = self.active_requests.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_concurrent.fetch_max(active, Ordering::Relaxed);
    }

    /// Finalizes one request: outcome counter, gauge and rolling mean.
    pub fn request_finished(&self, elapsed: Duration, success: bool) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.lock_mean().record(elapsed.as_secs_f64());
    }

    pub fn api_call(&self) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_call(&self) {
        self.batch_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_reused(&self) {
        self.connections_reused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_evicted(&self) {
        self.connections_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn started_at_utc(&self) -> DateTime<Utc> {
        self.started_at_utc
    }

    pub fn snapshot(&self) -> Value {
        let total = self.requests_total.load(Ordering::Relaxed);
        let success = self.requests_success.load(Ordering::Relaxed);
        let (mean_count, mean) = {
            let m = self.lock_mean();
            (m.count, m.mean)
        };
        let success_rate = if total > 0 {
            100.0 * success as f64 / total as f64
        } else {
            0.0
        };

        json!({
            "uptime_seconds": round2(self.uptime().as_secs_f64()),
            "start_time": self.started_at_utc.to_rfc3339(),
            "total_requests": total,
            "successful_requests": success,
            "failed_requests": self.requests_failed.load(Ordering::Relaxed),
            "active_requests": self.active_requests.load(Ordering::Relaxed),
            "peak_concurrent_requests": self.peak_concurrent.load(Ordering::Relaxed),
            "success_rate_percent": round2(success_rate),
            "avg_response_time_seconds": round2(mean),
            "measured_requests": mean_count,
            "api_calls": self.api_calls.load(Ordering::Relaxed),
            "batch_calls": self.batch_calls.load(Ordering::Relaxed),
            "connections": {
                "created": self.connections_created.load(Ordering::Relaxed),
                "reused": self.connections_reused.load(Ordering::Relaxed),
                "failed": self.connections_failed.load(Ordering::Relaxed),
                "evicted": self.connections_evicted.load(Ordering::Relaxed),
            },
        })
    }

    fn lock_mean(&self) -> std::sync::MutexGuard<'_, RunningMean> {
        self.response_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
