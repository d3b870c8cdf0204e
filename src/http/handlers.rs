// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::BTreeMap, sync::Arc};

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::{
    sync::Semaphore,
    task::JoinSet,
    time::{Instant, timeout},
};
use tracing::warn;

use crate::{
    cache::fingerprint,
    client::RouterEndpoint,
    commands::{DEFAULT_PING_COUNT, DEFAULT_PING_SIZE, Op, ping::run_batch_ping},
    error::{CollectorError, Result},
    http::state::AppState,
    metrics::normalize::round2,
};

const SERVICE_NAME: &str = "RouterOS Collector";
const VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// Request bodies

#[derive(Debug, Deserialize)]
pub struct PingRequest {
    host: String,
    username: String,
    password: String,
    targets: Vec<String>,
    #[serde(default = "default_ping_count")]
    count: u32,
    size: Option<u32>,
    interval: Option<u32>,
    #[serde(default = "default_true")]
    use_cache: bool,
    port: Option<u16>,
    use_ssl: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    host: String,
    username: String,
    password: String,
    command: String,
    #[serde(default)]
    parameters: BTreeMap<String, Value>,
    #[serde(default = "default_true")]
    use_cache: bool,
    port: Option<u16>,
    use_ssl: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    host: String,
    username: String,
    password: String,
    commands: Vec<BatchCommand>,
    max_concurrent: Option<usize>,
    port: Option<u16>,
    use_ssl: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchCommand {
    command: String,
    #[serde(default)]
    parameters: BTreeMap<String, Value>,
    use_cache: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct MultiHostRequest {
    hosts: Vec<HostSpec>,
    command: String,
    #[serde(default)]
    parameters: BTreeMap<String, Value>,
    max_concurrent_hosts: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HostSpec {
    host: String,
    username: String,
    password: String,
    port: Option<u16>,
    use_ssl: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct TestConnectionRequest {
    host: String,
    username: String,
    password: String,
    port: Option<u16>,
    use_ssl: Option<bool>,
}

fn default_ping_count() -> u32 {
    DEFAULT_PING_COUNT
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Info endpoints

pub async fn index(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": VERSION,
        "description": "Centralized monitoring collector for the MikroTik RouterOS binary API",
        "mode": "API-Only",
        "status": "running",
        "uptime_seconds": round2(state.stats.uptime().as_secs_f64()),
        "endpoints": {
            "health": "/health",
            "ping": "/api/v2/mikrotik/ping",
            "command": "/api/v2/mikrotik/command",
            "batch": "/api/v2/mikrotik/batch",
            "multi-host": "/api/v2/mikrotik/multi-host",
            "test-connection": "/api/v2/test-connection",
            "stats": "/api/v2/stats",
            "clear-cache": "/api/v2/cache/clear",
        },
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": VERSION,
        "mode": "API-Only",
        "uptime_seconds": round2(state.stats.uptime().as_secs_f64()),
        "performance": state.stats.snapshot(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub async fn get_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "application": {
            "service": SERVICE_NAME,
            "version": VERSION,
            "mode": "API-Only",
        },
        "requests": state.stats.snapshot(),
        "mikrotik_connector": {
            "pools": state.pools.snapshot(),
            "available_workers": state.governor.available_workers(),
        },
        "cache": state.cache.snapshot(),
        "configuration": state.cfg.snapshot(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub async fn clear_cache(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.cache.clear();
    Json(json!({
        "status": "success",
        "message": "cache cleared",
        "cleared_entries": cleared,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

// ---------------------------------------------------------------------------
// Batch ping on one router

pub async fn ping_targets(
    State(state): State<AppState>,
    payload: Result<Json<PingRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(req) = payload.map_err(rejection_to_bad_request)?;
    if req.targets.is_empty() {
        return Err(CollectorError::bad_request(
            "targets must be a non-empty list",
        ));
    }

    let _worker = state.governor.try_acquire_worker()?;
    state.stats.batch_call();

    let endpoint = endpoint_from(
        &state,
        &req.host,
        &req.username,
        &req.password,
        req.port,
        req.use_ssl,
    );
    let count = req.count;
    let size = req.size.unwrap_or(DEFAULT_PING_SIZE);
    let interval = req.interval.unwrap_or(1);
    // Short probes are worth caching; long ones never repeat fast enough.
    let cache_eligible = req.use_cache && count <= 4;

    let mut results = Map::new();
    let mut to_run: Vec<String> = Vec::new();
    let mut keys: BTreeMap<String, String> = BTreeMap::new();

    for target in &req.targets {
        let op = Op::Ping {
            target: target.clone(),
            count,
            size,
            interval_secs: interval,
        };
        let (name, params) = op.fingerprint_params();
        let key = fingerprint(&endpoint.host, endpoint.port, &name, &params);

        let cached = if cache_eligible {
            state.cache.get(&key)
        } else {
            None
        };
        match cached {
            Some(value) => {
                results.insert(
                    target.clone(),
                    json!({
                        "status": "success",
                        "data": value,
                        "cached": true,
                        "execution_time_seconds": 0.0,
                    }),
                );
            },
            None => {
                keys.insert(target.clone(), key);
                to_run.push(target.clone());
            },
        }
    }

    let mut total_elapsed = 0.0f64;
    if !to_run.is_empty() {
        let request_timeout = state.request_timeout();
        let runs = timeout(request_timeout, async {
            let _slot = state
                .governor
                .acquire_host_slot(
                    &endpoint.pool_key(),
                    state.cfg.pool.acquire_timeout,
                )
                .await?;
            let session = state.pools.acquire(&endpoint).await?;
            state.stats.api_call();
            Ok::<_, CollectorError>(
                run_batch_ping(&session, &to_run, count, size, interval).await,
            )
        })
        .await
        .map_err(|_| CollectorError::Timeout(request_timeout))??;

        for run in runs {
            total_elapsed = total_elapsed.max(run.elapsed_secs);
            match run.result {
                Ok(summary) => {
                    let data = json!(summary);
                    if cache_eligible && let Some(key) = keys.get(&run.target) {
                        state.cache.put(key.clone(), data.clone());
                    }
                    results.insert(
                        run.target,
                        json!({
                            "status": "success",
                            "data": data,
                            "cached": false,
                            "execution_time_seconds": round2(run.elapsed_secs),
                        }),
                    );
                },
                Err(e) => {
                    warn!(host = %req.host, "ping of {} failed: {e}", run.target);
                    results.insert(
                        run.target,
                        json!({
                            "status": "error",
                            "error": e.to_string(),
                            "error_kind": e.kind(),
                            "execution_time_seconds": round2(run.elapsed_secs),
                        }),
                    );
                },
            }
        }
    }

    let successful = count_successful(results.values());
    Ok(Json(json!({
        "status": "completed",
        "method": "API_BATCH",
        "host": req.host,
        "targets_requested": req.targets.len(),
        "targets_successful": successful,
        "total_execution_time_seconds": round2(total_elapsed),
        "results": results,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

// ---------------------------------------------------------------------------
// Single command

pub async fn execute_command(
    State(state): State<AppState>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(req) = payload.map_err(rejection_to_bad_request)?;
    let op = Op::from_command(&req.command, &stringify_params(&req.parameters))?;

    let _worker = state.governor.try_acquire_worker()?;
    let endpoint = endpoint_from(
        &state,
        &req.host,
        &req.username,
        &req.password,
        req.port,
        req.use_ssl,
    );

    let outcome =
        execute_on_router(state.clone(), endpoint, op, req.use_cache).await;
    let data = outcome.result?;

    Ok(Json(json!({
        "status": "success",
        "command": req.command,
        "host": req.host,
        "data": data,
        "cached": outcome.cached,
        "execution_time_seconds": round2(outcome.elapsed_secs),
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

// ---------------------------------------------------------------------------
// Batch of commands on one router

pub async fn execute_batch(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(req) = payload.map_err(rejection_to_bad_request)?;
    if req.commands.is_empty() {
        return Err(CollectorError::bad_request(
            "commands must be a non-empty list",
        ));
    }

    let _worker = state.governor.try_acquire_worker()?;
    state.stats.batch_call();

    let limit = state.cfg.concurrency.max_concurrent_commands;
    let max_concurrent = req.max_concurrent.unwrap_or(limit).clamp(1, limit);
    let endpoint = endpoint_from(
        &state,
        &req.host,
        &req.username,
        &req.password,
        req.port,
        req.use_ssl,
    );

    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut tasks = JoinSet::new();
    let mut results: Vec<Option<Value>> =
        (0..req.commands.len()).map(|_| None).collect();

    for (idx, cmd) in req.commands.iter().cloned().enumerate() {
        let op = match Op::from_command(
            &cmd.command,
            &stringify_params(&cmd.parameters),
        ) {
            Ok(op) => op,
            Err(e) => {
                results[idx] = Some(error_entry(&cmd.command, &e, 0.0));
                continue;
            },
        };

        let state = state.clone();
        let endpoint = endpoint.clone();
        let semaphore = Arc::clone(&semaphore);
        let use_cache = cmd.use_cache.unwrap_or(true);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let outcome =
                execute_on_router(state, endpoint, op, use_cache).await;
            (idx, entry_from_outcome(&cmd.command, outcome))
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, entry)) => results[idx] = Some(entry),
            Err(e) => warn!("batch command task failed: {e}"),
        }
    }

    let results: Vec<Value> = results.into_iter().flatten().collect();
    let successful = count_successful(results.iter());
    let total = results
        .iter()
        .filter_map(|r| r.get("execution_time_seconds"))
        .filter_map(Value::as_f64)
        .fold(0.0f64, f64::max);

    Ok(Json(json!({
        "status": "completed",
        "method": "API_BATCH_PARALLEL",
        "host": req.host,
        "commands_requested": req.commands.len(),
        "commands_successful": successful,
        "max_concurrent": max_concurrent,
        "total_execution_time_seconds": round2(total),
        "results": results,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

// ---------------------------------------------------------------------------
// One command across many routers

pub async fn execute_multi_host(
    State(state): State<AppState>,
    payload: Result<Json<MultiHostRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(req) = payload.map_err(rejection_to_bad_request)?;
    if req.hosts.is_empty() {
        return Err(CollectorError::bad_request(
            "hosts must be a non-empty list",
        ));
    }
    let op = Op::from_command(&req.command, &stringify_params(&req.parameters))?;

    let _worker = state.governor.try_acquire_worker()?;
    state.stats.batch_call();

    let limit = state.cfg.concurrency.max_concurrent_hosts;
    let max_concurrent_hosts =
        req.max_concurrent_hosts.unwrap_or(limit).clamp(1, limit);

    let semaphore = Arc::new(Semaphore::new(max_concurrent_hosts));
    let mut tasks = JoinSet::new();

    for spec in req.hosts.iter().cloned() {
        let state = state.clone();
        let op = op.clone();
        let semaphore = Arc::clone(&semaphore);
        let endpoint = endpoint_from(
            &state,
            &spec.host,
            &spec.username,
            &spec.password,
            spec.port,
            spec.use_ssl,
        );
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let outcome = execute_on_router(state, endpoint, op, false).await;
            (spec.host, outcome)
        });
    }

    let mut results = Map::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((host, outcome)) => {
                let entry = entry_from_outcome(&req.command, outcome);
                results.insert(host, entry);
            },
            Err(e) => warn!("multi-host task failed: {e}"),
        }
    }

    let successful = count_successful(results.values());
    let total = results
        .values()
        .filter_map(|r| r.get("execution_time_seconds"))
        .filter_map(Value::as_f64)
        .fold(0.0f64, f64::max);

    Ok(Json(json!({
        "status": "completed",
        "method": "API_MULTI_HOST_PARALLEL",
        "hosts_requested": req.hosts.len(),
        "hosts_successful": successful,
        "max_concurrent_hosts": max_concurrent_hosts,
        "command": req.command,
        "total_execution_time_seconds": round2(total),
        "results": results,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

// ---------------------------------------------------------------------------
// Credential check

pub async fn test_connection(
    State(state): State<AppState>,
    payload: Result<Json<TestConnectionRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(req) = payload.map_err(rejection_to_bad_request)?;

    let _worker = state.governor.try_acquire_worker()?;
    let endpoint = endpoint_from(
        &state,
        &req.host,
        &req.username,
        &req.password,
        req.port,
        req.use_ssl,
    );

    let started = Instant::now();
    let request_timeout = state.request_timeout();
    let records = timeout(request_timeout, async {
        let _slot = state
            .governor
            .acquire_host_slot(&endpoint.pool_key(), state.cfg.pool.acquire_timeout)
            .await?;
        let session = state.pools.acquire(&endpoint).await?;
        state.stats.api_call();
        crate::commands::generic::run_generic(
            &session,
            "/system/identity/print",
            &BTreeMap::new(),
            state.cfg.device.api_timeout,
        )
        .await
    })
    .await
    .map_err(|_| CollectorError::Timeout(request_timeout))??;

    let identity = records
        .first()
        .and_then(|r| r.get("name"))
        .cloned()
        .unwrap_or_default();

    Ok(Json(json!({
        "status": "success",
        "message": "connection and authentication succeeded",
        "host": endpoint.host,
        "port": endpoint.port,
        "ssl": endpoint.use_tls,
        "identity": identity,
        "response_time_seconds": round2(started.elapsed().as_secs_f64()),
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

// ---------------------------------------------------------------------------
// Shared plumbing

struct ExecOutcome {
    result: Result<Value>,
    cached: bool,
    elapsed_secs: f64,
}

/// Full per-operation path: cache lookup, per-router slot, pool acquire,
/// execute, cache fill. The session releases before the semaphore (drop
/// order is the reverse of acquisition).
async fn execute_on_router(
    state: AppState,
    endpoint: RouterEndpoint,
    op: Op,
    use_cache: bool,
) -> ExecOutcome {
    let (op_name, params) = op.fingerprint_params();
    let key = fingerprint(&endpoint.host, endpoint.port, &op_name, &params);

    if use_cache && let Some(value) = state.cache.get(&key) {
        return ExecOutcome {
            result: Ok(value),
            cached: true,
            elapsed_secs: 0.0,
        };
    }

    let started = Instant::now();
    let request_timeout = state.request_timeout();
    let result = match timeout(request_timeout, async {
        let slot = state
            .governor
            .acquire_host_slot(&endpoint.pool_key(), state.cfg.pool.acquire_timeout)
            .await?;
        let session = state.pools.acquire(&endpoint).await?;
        state.stats.api_call();
        let value = op.execute(&session, state.cfg.device.api_timeout).await;
        drop(session);
        drop(slot);
        value
    })
    .await
    {
        Ok(inner) => inner,
        Err(_) => Err(CollectorError::Timeout(request_timeout)),
    };

    if use_cache && let Ok(value) = &result {
        state.cache.put(key, value.clone());
    }

    ExecOutcome {
        result,
        cached: false,
        elapsed_secs: started.elapsed().as_secs_f64(),
    }
}

fn endpoint_from(
    state: &AppState,
    host: &str,
    username: &str,
    password: &str,
    port: Option<u16>,
    use_ssl: Option<bool>,
) -> RouterEndpoint {
    let use_tls = use_ssl.unwrap_or(state.cfg.device.use_ssl);
    RouterEndpoint {
        host: host.to_string(),
        port: port.unwrap_or_else(|| state.cfg.device_port(use_tls)),
        username: username.to_string(),
        password: password.to_string(),
        use_tls,
    }
}

/// JSON parameter values become attribute strings; nulls are dropped.
fn stringify_params(params: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    params
        .iter()
        .filter_map(|(k, v)| {
            let rendered = match v {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((k.clone(), rendered))
        })
        .collect()
}

fn entry_from_outcome(command: &str, outcome: ExecOutcome) -> Value {
    match outcome.result {
        Ok(data) => json!({
            "command": command,
            "status": "success",
            "data": data,
            "cached": outcome.cached,
            "execution_time_seconds": round2(outcome.elapsed_secs),
        }),
        Err(e) => error_entry(command, &e, outcome.elapsed_secs),
    }
}

fn error_entry(command: &str, e: &CollectorError, elapsed_secs: f64) -> Value {
    json!({
        "command": command,
        "status": "error",
        "error": e.to_string(),
        "error_kind": e.kind(),
        "execution_time_seconds": round2(elapsed_secs),
    })
}

fn count_successful<'a>(entries: impl Iterator<Item = &'a Value>) -> usize {
    entries
        .filter(|r| r.get("status").and_then(Value::as_str) == Some("success"))
        .count()
}

fn rejection_to_bad_request(rejection: JsonRejection) -> CollectorError {
    CollectorError::bad_request(rejection.body_text())
}
