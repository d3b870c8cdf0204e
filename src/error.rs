// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use thiserror::Error;

/// Error taxonomy of the collector core.
///
/// Components bubble these unchanged; only the HTTP layer maps them to
/// status codes. Batch endpoints fold per-target errors into the results
/// envelope instead of failing the whole request.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Missing or invalid input. Never retried.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The device refused the credentials. Not retried automatically.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The device answered `!trap`/`!fatal`. Message preserved verbatim.
    #[error("device error: {0}")]
    Device(String),

    /// Framing violation or socket reset. The owning session is discarded.
    #[error("wire error: {0}")]
    Wire(String),

    /// No session became available within the caller's deadline. Retryable.
    #[error("connection pool exhausted for {0}")]
    PoolExhausted(String),

    /// Global worker cap reached. Retryable.
    #[error("collector at capacity, try again later")]
    Busy,

    /// Operation deadline exceeded. Retryable.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The caller went away or shutdown was requested.
    #[error("operation canceled")]
    Canceled,

    /// Unexpected programming error.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CollectorError {
    pub fn wire(msg: impl Into<String>) -> Self {
        Self::Wire(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Whether the caller may usefully retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted(_) | Self::Busy | Self::Timeout(_)
        )
    }

    /// Short machine-readable label used in response envelopes and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Auth(_) => "auth_error",
            Self::Device(_) => "device_error",
            Self::Wire(_) => "wire_error",
            Self::PoolExhausted(_) => "pool_exhausted",
            Self::Busy => "busy",
            Self::Timeout(_) => "timeout",
            Self::Canceled => "canceled",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for CollectorError {
    fn from(e: std::io::Error) -> Self {
        Self::Wire(e.to_string())
    }
}

pub type Result<T, E = CollectorError> = std::result::Result<T, E>;
