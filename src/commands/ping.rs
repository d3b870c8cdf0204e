// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use tokio::{
    task::JoinSet,
    time::{Instant, timeout},
};
use tracing::debug;

use crate::{
    client::session::Session,
    error::{CollectorError, Result},
    metrics::normalize::{PingSummary, summarize_ping},
    proto::sentence::Sentence,
};

/// Slack on top of `count × interval` for device scheduling and transit.
const PING_OVERHEAD: Duration = Duration::from_secs(5);

fn ping_deadline(count: u32, interval_secs: u32) -> Duration {
    Duration::from_secs(u64::from(count) * u64::from(interval_secs.max(1)))
        + PING_OVERHEAD
}

fn ping_sentence(target: &str, count: u32, size: u32, interval_secs: u32) -> Sentence {
    Sentence::command("/ping")
        .attr("address", target)
        .attr("count", count.to_string())
        .attr("size", size.to_string())
        .attr("interval", interval_secs.to_string())
}

/// Pings one target: the device streams one `!re` per probe, then `!done`.
pub async fn run_ping(
    session: &Session,
    target: &str,
    count: u32,
    size: u32,
    interval_secs: u32,
) -> Result<PingSummary> {
    let stream = session
        .call(ping_sentence(target, count, size, interval_secs))
        .await?;

    let deadline = ping_deadline(count, interval_secs);
    let outcome = timeout(deadline, stream.collect())
        .await
        .map_err(|_| CollectorError::Timeout(deadline))??;

    Ok(summarize_ping(&outcome.records))
}

/// Outcome of one target within a batch ping.
pub struct PingRun {
    pub target: String,
    pub result: Result<PingSummary>,
    pub elapsed_secs: f64,
}

/// Pings N targets over ONE session.
///
/// All calls are issued up front with distinct tags, so their reply streams
/// interleave on the wire and wall time tracks the slowest target instead
/// of the sum. Per-target failures stay per-target.
pub async fn run_batch_ping(
    session: &Session,
    targets: &[String],
    count: u32,
    size: u32,
    interval_secs: u32,
) -> Vec<PingRun> {
    let deadline = ping_deadline(count, interval_secs);
    let started_at = Instant::now();

    let mut started = Vec::with_capacity(targets.len());
    for target in targets {
        let call = session
            .call(ping_sentence(target, count, size, interval_secs))
            .await;
        started.push((target.clone(), call));
    }

    let mut results: Vec<Option<PingRun>> =
        (0..started.len()).map(|_| None).collect();
    let mut collectors = JoinSet::new();

    for (idx, (target, call)) in started.into_iter().enumerate() {
        match call {
            Ok(stream) => {
                collectors.spawn(async move {
                    let begun = Instant::now();
                    let result = match timeout(deadline, stream.collect()).await
                    {
                        Ok(Ok(outcome)) => Ok(summarize_ping(&outcome.records)),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(CollectorError::Timeout(deadline)),
                    };
                    (idx, PingRun {
                        target,
                        result,
                        elapsed_secs: begun.elapsed().as_secs_f64(),
                    })
                });
            },
            Err(e) => {
                results[idx] = Some(PingRun {
                    target,
                    result: Err(e),
                    elapsed_secs: started_at.elapsed().as_secs_f64(),
                });
            },
        }
    }

    while let Some(joined) = collectors.join_next().await {
        match joined {
            Ok((idx, run)) => results[idx] = Some(run),
            Err(e) => debug!("ping collector task failed: {e}"),
        }
    }

    results.into_iter().flatten().collect()
}
