// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use tokio::time::timeout;

use crate::{
    client::session::Session,
    error::{CollectorError, Result},
    metrics::normalize::{TracerouteSummary, summarize_traceroute},
    proto::sentence::{Reply, ReplyKind, Sentence},
};

const TRACE_OVERHEAD: Duration = Duration::from_secs(5);

fn trace_deadline(count: u32) -> Duration {
    Duration::from_secs(u64::from(count.max(1))) + TRACE_OVERHEAD
}

/// Whether a hop record proves the probe reached the target: the address
/// matches and nothing was lost on that hop.
fn is_final_hop(record: &Reply, target: &str) -> bool {
    record.attr("address") == Some(target)
        && record
            .attr("loss")
            .and_then(|v| v.trim_end_matches('%').trim().parse::<f64>().ok())
            == Some(0.0)
}

/// Traceroutes one target. The device emits several `!re` per hop with
/// rolling statistics; collection stops on `!done` or once a record shows
/// the target reached with zero loss (the tag is abandoned and the reader
/// discards the remainder of the stream).
pub async fn run_traceroute(
    session: &Session,
    target: &str,
    count: u32,
) -> Result<TracerouteSummary> {
    let sentence = Sentence::command("/tool/traceroute")
        .attr("address", target)
        .attr("count", count.to_string());
    let mut stream = session.call(sentence).await?;

    let deadline = trace_deadline(count);
    let collect = async {
        let mut records = Vec::new();
        loop {
            let reply = stream.next().await?;
            match reply.kind {
                ReplyKind::Re => {
                    let done = is_final_hop(&reply, target);
                    records.push(reply);
                    if done {
                        break;
                    }
                },
                ReplyKind::Done => break,
                ReplyKind::Trap | ReplyKind::Fatal => {
                    return Err(CollectorError::Device(reply.trap_message()));
                },
            }
        }
        Ok(records)
    };

    let records = timeout(deadline, collect)
        .await
        .map_err(|_| CollectorError::Timeout(deadline))??;

    Ok(summarize_traceroute(&records, target))
}
