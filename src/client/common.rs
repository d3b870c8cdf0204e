// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{CollectorError, Result};

/// Wraps a socket future with the per-call I/O deadline and the session's
/// kill token. Cancellation wins over the timeout.
pub(super) async fn io_with_timeout<F, T>(
    label: &'static str,
    fut: F,
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(CollectorError::Canceled),
        res = timeout(io_timeout, fut) => {
            match res {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(CollectorError::wire(format!("{label}: {e}"))),
                Err(_) => Err(CollectorError::Timeout(io_timeout)),
            }
        }
    }
}
