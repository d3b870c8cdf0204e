// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use tracing::info;

use crate::{
    cache::FingerprintCache,
    cfg::config::CollectorConfig,
    client::pool::PoolRegistry,
    governor::Governor,
    stats::StatsRegistry,
};

/// Shared handles injected into every HTTP handler.
///
/// The pool and stats registries are the explicitly-initialized singletons
/// of the process; teardown drains the pools through `shutdown`.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<CollectorConfig>,
    pub pools: Arc<PoolRegistry>,
    pub governor: Arc<Governor>,
    pub cache: Arc<FingerprintCache>,
    pub stats: Arc<StatsRegistry>,
}

impl AppState {
    pub fn new(cfg: CollectorConfig) -> Self {
        let stats = Arc::new(StatsRegistry::new());
        let pools = Arc::new(PoolRegistry::new(
            cfg.pool_tuning(),
            Arc::clone(&stats),
        ));
        let governor = Arc::new(Governor::new(
            cfg.concurrency.max_workers,
            cfg.concurrency.max_concurrent_commands,
        ));
        let cache = Arc::new(FingerprintCache::new(
            cfg.cache.ttl,
            cfg.cache.max_size,
        ));
        Self {
            cfg: Arc::new(cfg),
            pools,
            governor,
            cache,
            stats,
        }
    }

    /// Background janitor: sweeps expired cache entries and idle/dead
    /// sessions forever. Spawned once at startup.
    pub async fn run_janitor(self) {
        let mut ticker = tokio::time::interval(self.cfg.pool.janitor_interval);
        ticker.set_missed_tick_behavior(
            tokio::time::MissedTickBehavior::Delay,
        );
        loop {
            ticker.tick().await;
            let removed = self.cache.purge_expired();
            if removed > 0 {
                info!(removed, "cache janitor removed expired entries");
            }
            self.pools.purge().await;
        }
    }

    /// Drains every pool and closes all sessions.
    pub fn shutdown(&self) {
        self.pools.shutdown();
    }

    pub fn request_timeout(&self) -> Duration {
        self.cfg.concurrency.request_timeout
    }
}
