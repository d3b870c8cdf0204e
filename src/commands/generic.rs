// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::BTreeMap, time::Duration};

use tokio::time::timeout;

use crate::{
    client::session::Session,
    error::{CollectorError, Result},
    proto::sentence::Sentence,
};

/// Runs an arbitrary read-style API path and returns one attribute map per
/// `!re` record. A `!trap` surfaces as `DeviceError` with the device text.
pub async fn run_generic(
    session: &Session,
    path: &str,
    attrs: &BTreeMap<String, String>,
    deadline: Duration,
) -> Result<Vec<BTreeMap<String, String>>> {
    let mut sentence = Sentence::command(path);
    for (key, value) in attrs {
        sentence = sentence.attr(key, value);
    }

    let stream = session.call(sentence).await?;
    let outcome = timeout(deadline, stream.collect())
        .await
        .map_err(|_| CollectorError::Timeout(deadline))??;

    Ok(outcome
        .records
        .into_iter()
        .map(|record| record.attrs)
        .collect())
}
