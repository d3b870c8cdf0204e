// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    time::timeout,
};

use crate::{
    client::PoolKey,
    error::{CollectorError, Result},
};

/// Two-layer admission control.
///
/// The global permit bounds worker count process-wide and fails fast; the
/// per-router permit bounds the load offered to one device and queues up to
/// the caller's deadline. Permits release on drop, which keeps the release
/// order the reverse of acquisition.
pub struct Governor {
    global: Arc<Semaphore>,
    per_host: DashMap<PoolKey, Arc<Semaphore>>,
    per_host_limit: usize,
}

impl Governor {
    pub fn new(max_workers: usize, per_host_limit: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(max_workers.max(1))),
            per_host: DashMap::new(),
            per_host_limit: per_host_limit.max(1),
        }
    }

    /// Claims a global worker slot or refuses outright.
    pub fn try_acquire_worker(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.global)
            .try_acquire_owned()
            .map_err(|_| CollectorError::Busy)
    }

    /// Queues for a per-router slot up to the deadline.
    pub async fn acquire_host_slot(
        &self,
        key: &PoolKey,
        deadline: Duration,
    ) -> Result<OwnedSemaphorePermit> {
        let semaphore = self
            .per_host
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone();

        match timeout(deadline, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(CollectorError::Canceled),
            Err(_) => Err(CollectorError::Timeout(deadline)),
        }
    }

    pub fn available_workers(&self) -> usize {
        self.global.available_permits()
    }
}
