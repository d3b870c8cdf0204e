// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{env, fs, str::FromStr, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::client::{pool::PoolTuning, session::SessionTuning};

/// Full collector configuration.
///
/// Defaults cover everything; an optional YAML file named by
/// `COLLECTOR_CONFIG` is loaded first, then individual environment
/// variables override whatever they name.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct CollectorConfig {
    pub http: HttpConfig,
    pub device: DeviceConfig,
    pub concurrency: ConcurrencyConfig,
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    pub logging: LogConfig,
}

/// HTTP bind address and optional API-key gate.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub enable_auth: bool,
    pub api_key: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            enable_auth: false,
            api_key: None,
        }
    }
}

/// Router-facing defaults. Per-request bodies may override port and TLS.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    pub api_port: u16,
    pub api_tls_port: u16,
    pub use_ssl: bool,
    /// Verify device certificates. Off by default: routers ship
    /// self-signed certificates.
    pub tls_verify: bool,
    #[serde(with = "serde_secs")]
    pub api_timeout: Duration,
    #[serde(with = "serde_secs")]
    pub connect_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            api_port: 8728,
            api_tls_port: 8729,
            use_ssl: false,
            tls_verify: false,
            api_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Admission-control limits.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Fan-out cap across routers for multi-host requests.
    pub max_concurrent_hosts: usize,
    /// Per-router semaphore size.
    pub max_concurrent_commands: usize,
    /// Global worker cap; beyond it requests fail fast with 429.
    pub max_workers: usize,
    #[serde(with = "serde_secs")]
    pub request_timeout: Duration,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_hosts: 50,
            max_concurrent_commands: 200,
            max_workers: 50,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Session pool limits and timers.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct PoolConfig {
    pub max_connections_per_host: usize,
    #[serde(with = "serde_secs")]
    pub idle_timeout: Duration,
    /// Idle age beyond which a session is probed before reuse.
    #[serde(with = "serde_secs")]
    pub liveness_after: Duration,
    #[serde(with = "serde_secs")]
    pub acquire_timeout: Duration,
    #[serde(with = "serde_secs")]
    pub janitor_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 50,
            idle_timeout: Duration::from_secs(300),
            liveness_after: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(30),
            janitor_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(with = "serde_secs")]
    pub ttl: Duration,
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            max_size: 1000,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl CollectorConfig {
    /// Loads the optional YAML file, applies environment overrides,
    /// validates, and returns the ready-to-use value.
    pub fn load() -> Result<Self> {
        let mut cfg = match env::var("COLLECTOR_CONFIG") {
            Ok(path) if !path.is_empty() => {
                let raw = fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config {path}"))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("failed to parse config {path}"))?
            },
            _ => Self::default(),
        };
        cfg.apply_env()?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Environment variables override file values field by field.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_str("COLLECTOR_HOST") {
            self.http.host = v;
        }
        if let Some(v) = env_parse("COLLECTOR_PORT")? {
            self.http.port = v;
        }
        if let Some(v) = env_bool("ENABLE_AUTH") {
            self.http.enable_auth = v;
        }
        if let Some(v) = env_str("API_KEY") {
            self.http.api_key = Some(v);
        }

        if let Some(v) = env_parse("MIKROTIK_API_PORT")? {
            self.device.api_port = v;
        }
        if let Some(v) = env_bool("MIKROTIK_USE_SSL") {
            self.device.use_ssl = v;
        }
        if let Some(v) = env_parse("MIKROTIK_API_TIMEOUT")? {
            self.device.api_timeout = Duration::from_secs(v);
        }

        if let Some(v) = env_parse("MAX_CONCURRENT_HOSTS")? {
            self.concurrency.max_concurrent_hosts = v;
        }
        if let Some(v) = env_parse("MAX_CONCURRENT_COMMANDS")? {
            self.concurrency.max_concurrent_commands = v;
        }
        if let Some(v) = env_parse("MAX_WORKERS")? {
            self.concurrency.max_workers = v;
        }
        if let Some(v) = env_parse("REQUEST_TIMEOUT")? {
            self.concurrency.request_timeout = Duration::from_secs(v);
        }

        if let Some(v) = env_parse("MAX_CONNECTIONS_PER_HOST")? {
            self.pool.max_connections_per_host = v;
        }
        if let Some(v) = env_parse("POOL_IDLE_TIMEOUT")? {
            self.pool.idle_timeout = Duration::from_secs(v);
        }

        if let Some(v) = env_parse("CACHE_TTL")? {
            self.cache.ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_parse("MAX_CACHE_SIZE")? {
            self.cache.max_size = v;
        }

        if let Some(v) = env_str("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env_str("LOG_FILE") {
            self.logging.file = Some(v);
        }
        Ok(())
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(self.http.port > 0, "COLLECTOR_PORT must be > 0");
        ensure!(
            self.pool.max_connections_per_host >= 1,
            "MAX_CONNECTIONS_PER_HOST must be >= 1"
        );
        ensure!(
            self.concurrency.max_workers >= 1,
            "MAX_WORKERS must be >= 1"
        );
        ensure!(
            self.concurrency.max_concurrent_hosts >= 1,
            "MAX_CONCURRENT_HOSTS must be >= 1"
        );
        ensure!(
            self.concurrency.max_concurrent_commands >= 1,
            "MAX_CONCURRENT_COMMANDS must be >= 1"
        );
        ensure!(self.cache.max_size >= 1, "MAX_CACHE_SIZE must be >= 1");
        if self.http.enable_auth {
            ensure!(
                self.http.api_key.as_deref().is_some_and(|k| !k.is_empty()),
                "API_KEY is required when ENABLE_AUTH is set"
            );
        }
        self.logging.level = self.logging.level.to_lowercase();
        Ok(())
    }

    pub fn pool_tuning(&self) -> PoolTuning {
        PoolTuning {
            max_per_host: self.pool.max_connections_per_host,
            idle_timeout: self.pool.idle_timeout,
            liveness_after: self.pool.liveness_after,
            acquire_timeout: self.pool.acquire_timeout,
            session: SessionTuning {
                connect_timeout: self.device.connect_timeout,
                io_timeout: self.device.api_timeout,
                tls_verify: self.device.tls_verify,
            },
        }
    }

    /// Default device port for the chosen transport.
    pub fn device_port(&self, use_ssl: bool) -> u16 {
        if use_ssl {
            self.device.api_tls_port
        } else {
            self.device.api_port
        }
    }

    /// Configuration section of the stats snapshot. Never includes the
    /// API key.
    pub fn snapshot(&self) -> Value {
        json!({
            "max_concurrent_hosts": self.concurrency.max_concurrent_hosts,
            "max_concurrent_commands": self.concurrency.max_concurrent_commands,
            "max_connections_per_host": self.pool.max_connections_per_host,
            "max_workers": self.concurrency.max_workers,
            "request_timeout_seconds": self.concurrency.request_timeout.as_secs(),
            "mikrotik_api_timeout_seconds": self.device.api_timeout.as_secs(),
            "mikrotik_use_ssl": self.device.use_ssl,
            "cache_ttl_seconds": self.cache.ttl.as_secs(),
            "max_cache_size": self.cache.max_size,
            "enable_auth": self.http.enable_auth,
        })
    }
}

fn env_str(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_str(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {name}: {raw:?}")),
    }
}

fn env_bool(name: &str) -> Option<bool> {
    env_str(name).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
