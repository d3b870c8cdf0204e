// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    ops::Deref,
    sync::{Arc, Mutex as StdMutex, MutexGuard},
    time::Duration,
};

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::{
    sync::Notify,
    time::{Instant, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    client::{
        PoolKey, RouterEndpoint,
        session::{Session, SessionState, SessionTuning},
    },
    error::{CollectorError, Result},
    stats::StatsRegistry,
};

/// Deadline for the identity probe used by liveness checks.
const LIVENESS_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool knobs derived from the collector config.
#[derive(Debug, Clone, Copy)]
pub struct PoolTuning {
    /// Hard cap on sessions per pool-key.
    pub max_per_host: usize,
    /// Idle sessions older than this are probed and evicted by the janitor.
    pub idle_timeout: Duration,
    /// Idle age beyond which an acquired session is probed before reuse.
    pub liveness_after: Duration,
    /// How long an acquire may wait for a free slot.
    pub acquire_timeout: Duration,
    pub session: SessionTuning,
}

#[derive(Debug)]
struct PoolInner {
    slots: Vec<Arc<Session>>,
    /// Connects in flight; they count against `max_per_host` so the cap
    /// holds even while login runs off-lock.
    placeholders: usize,
}

/// Bounded set of sessions for one pool-key.
#[derive(Debug)]
pub struct HostPool {
    key: PoolKey,
    inner: StdMutex<PoolInner>,
    notify: Notify,
    tuning: PoolTuning,
    stats: Arc<StatsRegistry>,
    cancel: CancellationToken,
}

impl HostPool {
    fn new(
        key: PoolKey,
        tuning: PoolTuning,
        stats: Arc<StatsRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            key,
            inner: StdMutex::new(PoolInner {
                slots: Vec::new(),
                placeholders: 0,
            }),
            notify: Notify::new(),
            tuning,
            stats,
            cancel,
        }
    }

    /// Hands out an Idle session, creating one when under capacity.
    ///
    /// Preference order: most-recently-used Idle session (warm), then a
    /// fresh connect behind a placeholder slot, then blocking on the notify
    /// until a slot frees or the deadline fires.
    pub async fn acquire(
        self: &Arc<Self>,
        endpoint: &RouterEndpoint,
    ) -> Result<SessionGuard> {
        let deadline = Instant::now() + self.tuning.acquire_timeout;

        loop {
            if let Some(session) = self.grab_idle() {
                if session.idle_age() > self.tuning.liveness_after
                    && !session.is_alive(LIVENESS_PROBE_TIMEOUT).await
                {
                    debug!(pool = %self.key, "stale session failed liveness probe");
                    self.discard(&session);
                    continue;
                }
                session.mark_reused();
                self.stats.connection_reused();
                return Ok(SessionGuard::new(Arc::clone(self), session));
            }

            if self.reserve_placeholder() {
                let _slot = PlaceholderSlot(self);
                match Session::open(endpoint, self.tuning.session, &self.cancel)
                    .await
                {
                    Ok(session) => {
                        session.set_state(SessionState::Busy);
                        self.lock_inner().slots.push(Arc::clone(&session));
                        self.stats.connection_created();
                        return Ok(SessionGuard::new(
                            Arc::clone(self),
                            session,
                        ));
                    },
                    Err(e) => {
                        self.stats.connection_failed();
                        return Err(e);
                    },
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(CollectorError::PoolExhausted(self.key.to_string()));
            }
            if timeout(deadline - now, self.notify.notified()).await.is_err() {
                return Err(CollectorError::PoolExhausted(self.key.to_string()));
            }
        }
    }

    /// Returns a borrowed session. Dead sessions are discarded instead of
    /// going back to Idle.
    fn release(&self, session: Arc<Session>) {
        if session.state() == SessionState::Dead {
            self.discard(&session);
            return;
        }
        session.touch();
        session.set_state(SessionState::Idle);
        self.notify.notify_one();
    }

    /// Janitor pass: sweep Dead sessions, then probe idle-expired ones and
    /// evict those that fail.
    pub async fn purge(&self) {
        self.sweep_dead();

        let stale: Vec<Arc<Session>> = {
            let inner = self.lock_inner();
            inner
                .slots
                .iter()
                .filter(|s| {
                    s.state() == SessionState::Idle
                        && s.idle_age() > self.tuning.idle_timeout
                })
                .map(Arc::clone)
                .collect()
        };
        for session in stale {
            // Claim the session so no caller acquires it mid-probe; a lost
            // race just means someone else is using it.
            if session.state() != SessionState::Idle {
                continue;
            }
            session.set_state(SessionState::Busy);
            if session.is_alive(LIVENESS_PROBE_TIMEOUT).await {
                session.set_state(SessionState::Idle);
                session.touch();
                self.notify.notify_one();
            } else {
                debug!(pool = %self.key, "evicting idle-expired session");
                self.discard(&session);
            }
        }
    }

    /// Closes every session and empties the pool.
    pub fn drain(&self) {
        let mut inner = self.lock_inner();
        for session in inner.slots.drain(..) {
            session.close();
        }
        self.notify.notify_one();
    }

    pub fn snapshot(&self) -> Value {
        let inner = self.lock_inner();
        let idle = inner
            .slots
            .iter()
            .filter(|s| s.state() == SessionState::Idle)
            .count();
        let busy = inner
            .slots
            .iter()
            .filter(|s| s.state() == SessionState::Busy)
            .count();
        json!({
            "total": inner.slots.len(),
            "idle": idle,
            "busy": busy,
            "dialing": inner.placeholders,
            "max": self.tuning.max_per_host,
        })
    }

    // --- internals ---

    fn lock_inner(&self) -> MutexGuard<'_, PoolInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn grab_idle(&self) -> Option<Arc<Session>> {
        let mut inner = self.lock_inner();
        self.retain_alive(&mut inner);
        let session = inner
            .slots
            .iter()
            .filter(|s| s.state() == SessionState::Idle)
            .max_by_key(|s| s.last_used())
            .map(Arc::clone)?;
        session.set_state(SessionState::Busy);
        Some(session)
    }

    fn sweep_dead(&self) {
        let mut inner = self.lock_inner();
        self.retain_alive(&mut inner);
    }

    fn retain_alive(&self, inner: &mut PoolInner) {
        let before = inner.slots.len();
        inner.slots.retain(|s| s.state() != SessionState::Dead);
        let removed = before - inner.slots.len();
        for _ in 0..removed {
            self.stats.connection_evicted();
            self.notify.notify_one();
        }
    }

    fn reserve_placeholder(&self) -> bool {
        let mut inner = self.lock_inner();
        if inner.slots.len() + inner.placeholders < self.tuning.max_per_host {
            inner.placeholders += 1;
            true
        } else {
            false
        }
    }

    fn discard(&self, session: &Arc<Session>) {
        session.close();
        let mut inner = self.lock_inner();
        let before = inner.slots.len();
        inner.slots.retain(|s| !Arc::ptr_eq(s, session));
        if inner.slots.len() < before {
            self.stats.connection_evicted();
            self.notify.notify_one();
        }
    }
}

/// Frees the reserved placeholder once the connect attempt resolves (or the
/// acquire future is dropped mid-connect).
struct PlaceholderSlot<'a>(&'a HostPool);

impl Drop for PlaceholderSlot<'_> {
    fn drop(&mut self) {
        let mut inner = self.0.lock_inner();
        inner.placeholders = inner.placeholders.saturating_sub(1);
        drop(inner);
        self.0.notify.notify_one();
    }
}

/// Borrow of one Busy session; the pool gets it back on drop.
#[derive(Debug)]
pub struct SessionGuard {
    pool: Arc<HostPool>,
    session: Option<Arc<Session>>,
}

impl SessionGuard {
    fn new(pool: Arc<HostPool>, session: Arc<Session>) -> Self {
        Self {
            pool,
            session: Some(session),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        self.session
            .as_ref()
            .expect("session is present until drop")
    }
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        self.session()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session);
        }
    }
}

/// Process-wide map of pool-key to pool.
pub struct PoolRegistry {
    pools: DashMap<PoolKey, Arc<HostPool>>,
    tuning: PoolTuning,
    stats: Arc<StatsRegistry>,
    cancel: CancellationToken,
}

impl PoolRegistry {
    pub fn new(tuning: PoolTuning, stats: Arc<StatsRegistry>) -> Self {
        Self {
            pools: DashMap::new(),
            tuning,
            stats,
            cancel: CancellationToken::new(),
        }
    }

    pub async fn acquire(&self, endpoint: &RouterEndpoint) -> Result<SessionGuard> {
        if self.cancel.is_cancelled() {
            return Err(CollectorError::Canceled);
        }
        let pool = self.pool_for(endpoint.pool_key());
        pool.acquire(endpoint).await
    }

    fn pool_for(&self, key: PoolKey) -> Arc<HostPool> {
        self.pools
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(HostPool::new(
                    key,
                    self.tuning,
                    Arc::clone(&self.stats),
                    self.cancel.child_token(),
                ))
            })
            .clone()
    }

    /// Periodic janitor entry point.
    pub async fn purge(&self) {
        let pools: Vec<Arc<HostPool>> =
            self.pools.iter().map(|e| Arc::clone(e.value())).collect();
        for pool in pools {
            pool.purge().await;
        }
    }

    /// Closes every session in every pool. Used on shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        for entry in self.pools.iter() {
            entry.value().drain();
        }
        self.pools.clear();
    }

    pub fn snapshot(&self) -> Value {
        let mut pools = serde_json::Map::new();
        for entry in self.pools.iter() {
            pools.insert(entry.key().to_string(), entry.value().snapshot());
        }
        Value::Object(pools)
    }
}
