// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{env, time::Duration};

use anyhow::Result;
use routeros_collector_rs::cfg::config::CollectorConfig;
use serial_test::serial;

const OWNED_VARS: &[&str] = &[
    "COLLECTOR_HOST",
    "COLLECTOR_PORT",
    "MIKROTIK_API_PORT",
    "MIKROTIK_API_TIMEOUT",
    "MIKROTIK_USE_SSL",
    "MAX_CONCURRENT_HOSTS",
    "MAX_CONCURRENT_COMMANDS",
    "MAX_CONNECTIONS_PER_HOST",
    "MAX_WORKERS",
    "REQUEST_TIMEOUT",
    "POOL_IDLE_TIMEOUT",
    "CACHE_TTL",
    "MAX_CACHE_SIZE",
    "ENABLE_AUTH",
    "API_KEY",
    "LOG_LEVEL",
    "LOG_FILE",
    "COLLECTOR_CONFIG",
];

fn clear_env() {
    for var in OWNED_VARS {
        unsafe { env::remove_var(var) };
    }
}

#[test]
#[serial]
fn defaults_are_valid() -> Result<()> {
    clear_env();
    let mut cfg = CollectorConfig::default();
    cfg.validate_and_normalize()?;

    assert_eq!(cfg.http.port, 5000);
    assert_eq!(cfg.device.api_port, 8728);
    assert_eq!(cfg.device.api_tls_port, 8729);
    assert_eq!(cfg.pool.max_connections_per_host, 50);
    assert_eq!(cfg.pool.idle_timeout, Duration::from_secs(300));
    assert_eq!(cfg.concurrency.max_workers, 50);
    assert_eq!(cfg.concurrency.max_concurrent_commands, 200);
    assert_eq!(cfg.cache.ttl, Duration::from_secs(30));
    assert_eq!(cfg.cache.max_size, 1000);
    Ok(())
}

#[test]
#[serial]
fn device_port_follows_transport() {
    clear_env();
    let cfg = CollectorConfig::default();
    assert_eq!(cfg.device_port(false), 8728);
    assert_eq!(cfg.device_port(true), 8729);
}

#[test]
#[serial]
fn environment_overrides_apply() -> Result<()> {
    clear_env();
    unsafe {
        env::set_var("COLLECTOR_HOST", "127.0.0.1");
        env::set_var("COLLECTOR_PORT", "8080");
        env::set_var("MIKROTIK_API_TIMEOUT", "15");
        env::set_var("MAX_CONNECTIONS_PER_HOST", "7");
        env::set_var("MAX_CONCURRENT_COMMANDS", "33");
        env::set_var("CACHE_TTL", "120");
        env::set_var("MAX_CACHE_SIZE", "50");
        env::set_var("LOG_LEVEL", "DEBUG");
        env::set_var("MIKROTIK_USE_SSL", "true");
    }

    let cfg = CollectorConfig::load()?;
    clear_env();

    assert_eq!(cfg.http.host, "127.0.0.1");
    assert_eq!(cfg.http.port, 8080);
    assert_eq!(cfg.device.api_timeout, Duration::from_secs(15));
    assert_eq!(cfg.pool.max_connections_per_host, 7);
    assert_eq!(cfg.concurrency.max_concurrent_commands, 33);
    assert_eq!(cfg.cache.ttl, Duration::from_secs(120));
    assert_eq!(cfg.cache.max_size, 50);
    assert_eq!(cfg.logging.level, "debug", "level is normalized");
    assert!(cfg.device.use_ssl);
    Ok(())
}

#[test]
#[serial]
fn invalid_numeric_env_is_rejected() {
    clear_env();
    unsafe { env::set_var("COLLECTOR_PORT", "not-a-port") };
    let result = CollectorConfig::load();
    clear_env();
    assert!(result.is_err());
}

#[test]
#[serial]
fn auth_requires_api_key() {
    clear_env();
    unsafe { env::set_var("ENABLE_AUTH", "true") };
    let result = CollectorConfig::load();
    clear_env();
    assert!(result.is_err(), "ENABLE_AUTH without API_KEY must fail");
}

#[test]
#[serial]
fn auth_with_key_is_accepted() -> Result<()> {
    clear_env();
    unsafe {
        env::set_var("ENABLE_AUTH", "1");
        env::set_var("API_KEY", "sekrit");
    }
    let cfg = CollectorConfig::load()?;
    clear_env();
    assert!(cfg.http.enable_auth);
    assert_eq!(cfg.http.api_key.as_deref(), Some("sekrit"));
    Ok(())
}

#[test]
#[serial]
fn yaml_file_is_loaded_then_overridden() -> Result<()> {
    clear_env();
    let dir = env::temp_dir().join("routeros-collector-cfg-test");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("config.yaml");
    std::fs::write(
        &path,
        "http:\n  port: 9000\ncache:\n  max_size: 77\n",
    )?;

    unsafe {
        env::set_var("COLLECTOR_CONFIG", &path);
        env::set_var("MAX_CACHE_SIZE", "88");
    }
    let cfg = CollectorConfig::load()?;
    clear_env();

    assert_eq!(cfg.http.port, 9000, "file value survives");
    assert_eq!(cfg.cache.max_size, 88, "env wins over file");
    Ok(())
}
