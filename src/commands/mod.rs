// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::BTreeMap, time::Duration};

use serde_json::{Value, json};

pub mod generic;
pub mod ping;
pub mod traceroute;

use crate::{
    client::session::Session,
    error::{CollectorError, Result},
};

pub const DEFAULT_PING_COUNT: u32 = 4;
pub const DEFAULT_PING_SIZE: u32 = 64;
pub const DEFAULT_PING_INTERVAL_SECS: u32 = 1;
pub const DEFAULT_TRACE_COUNT: u32 = 3;

/// High-level operation shapes the collector executes on a router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Ping {
        target: String,
        count: u32,
        size: u32,
        interval_secs: u32,
    },
    Traceroute {
        target: String,
        count: u32,
    },
    Generic {
        path: String,
        attrs: BTreeMap<String, String>,
    },
}

impl Op {
    /// Classifies a command string. Ping and traceroute get dedicated
    /// handling; everything else passes through to the device, which
    /// rejects paths it does not know.
    pub fn from_command(
        command: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let path = command.trim().replace(' ', "/");
        if path.is_empty() || !path.starts_with('/') {
            return Err(CollectorError::bad_request(format!(
                "command must be an absolute API path, got {command:?}"
            )));
        }

        match path.as_str() {
            "/ping" => Ok(Self::Ping {
                target: required_param(params, "address")?,
                count: numeric_param(params, "count", DEFAULT_PING_COUNT)?,
                size: numeric_param(params, "size", DEFAULT_PING_SIZE)?,
                interval_secs: numeric_param(
                    params,
                    "interval",
                    DEFAULT_PING_INTERVAL_SECS,
                )?,
            }),
            "/tool/traceroute" => Ok(Self::Traceroute {
                target: required_param(params, "address")?,
                count: numeric_param(params, "count", DEFAULT_TRACE_COUNT)?,
            }),
            _ => Ok(Self::Generic {
                path,
                attrs: params.clone(),
            }),
        }
    }

    /// Label + ordered parameters for the cache fingerprint.
    pub fn fingerprint_params(&self) -> (String, BTreeMap<String, String>) {
        match self {
            Self::Ping {
                target,
                count,
                size,
                interval_secs,
            } => {
                let mut params = BTreeMap::new();
                params.insert("target".to_string(), target.clone());
                params.insert("count".to_string(), count.to_string());
                params.insert("size".to_string(), size.to_string());
                params.insert("interval".to_string(), interval_secs.to_string());
                ("ping".to_string(), params)
            },
            Self::Traceroute { target, count } => {
                let mut params = BTreeMap::new();
                params.insert("target".to_string(), target.clone());
                params.insert("count".to_string(), count.to_string());
                ("traceroute".to_string(), params)
            },
            Self::Generic { path, attrs } => (path.clone(), attrs.clone()),
        }
    }

    /// Executes the operation on an acquired session and returns the
    /// normalized JSON result.
    pub async fn execute(
        &self,
        session: &Session,
        base_timeout: Duration,
    ) -> Result<Value> {
        match self {
            Self::Ping {
                target,
                count,
                size,
                interval_secs,
            } => {
                let summary = ping::run_ping(
                    session,
                    target,
                    *count,
                    *size,
                    *interval_secs,
                )
                .await?;
                Ok(json!(summary))
            },
            Self::Traceroute { target, count } => {
                let summary =
                    traceroute::run_traceroute(session, target, *count).await?;
                Ok(json!(summary))
            },
            Self::Generic { path, attrs } => {
                let records =
                    generic::run_generic(session, path, attrs, base_timeout)
                        .await?;
                Ok(json!({ "output": records }))
            },
        }
    }
}

fn required_param(
    params: &BTreeMap<String, String>,
    key: &str,
) -> Result<String> {
    params
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| {
            CollectorError::bad_request(format!("missing parameter {key:?}"))
        })
}

fn numeric_param(
    params: &BTreeMap<String, String>,
    key: &str,
    default: u32,
) -> Result<u32> {
    match params.get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            CollectorError::bad_request(format!(
                "parameter {key:?} must be a number, got {raw:?}"
            ))
        }),
    }
}
