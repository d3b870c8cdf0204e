// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use md5::{Digest, Md5};
use tokio::{
    io::{AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{Mutex, mpsc},
    time::{Instant, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    client::{
        RouterEndpoint, common::io_with_timeout, transport,
        transport::RouterStream,
    },
    error::{CollectorError, Result},
    proto::{
        codec::read_sentence,
        sentence::{Reply, ReplyKind, Sentence},
    },
};

/// Lifecycle of one pooled session.
///
/// Only Idle sessions may be acquired; exactly one caller holds a Busy
/// session; a Dead session is never re-used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Dialing = 0,
    Authenticating = 1,
    Idle = 2,
    Busy = 3,
    Dead = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Dialing,
            1 => Self::Authenticating,
            2 => Self::Idle,
            3 => Self::Busy,
            _ => Self::Dead,
        }
    }
}

/// Runtime knobs a session needs; derived from the collector config.
#[derive(Debug, Clone, Copy)]
pub struct SessionTuning {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub tls_verify: bool,
}

/// One authenticated API socket to a router.
///
/// A single reader task demultiplexes incoming sentences to per-tag sinks,
/// which lets many callers keep calls in flight on the same socket. Writes
/// are serialized by the writer mutex so sentence bytes never interleave.
#[derive(Debug)]
pub struct Session {
    peer: String,
    writer: Mutex<WriteHalf<RouterStream>>,
    pending: DashMap<String, mpsc::Sender<Reply>>,
    next_tag: AtomicU64,
    state: AtomicU8,
    created_at: Instant,
    last_used: StdMutex<Instant>,
    reuse_count: AtomicU64,
    cancel: CancellationToken,
    io_timeout: Duration,
}

impl Session {
    /// Dials, authenticates and starts the reader task. The returned
    /// session is Idle and ready for the pool.
    pub async fn open(
        endpoint: &RouterEndpoint,
        tuning: SessionTuning,
        parent: &CancellationToken,
    ) -> Result<Arc<Self>> {
        let stream =
            transport::connect(endpoint, tuning.connect_timeout, tuning.tls_verify)
                .await?;
        let (reader_half, writer_half) = tokio::io::split(stream);

        let session = Arc::new(Self {
            peer: endpoint.pool_key().to_string(),
            writer: Mutex::new(writer_half),
            pending: DashMap::new(),
            next_tag: AtomicU64::new(1),
            state: AtomicU8::new(SessionState::Dialing as u8),
            created_at: Instant::now(),
            last_used: StdMutex::new(Instant::now()),
            reuse_count: AtomicU64::new(0),
            cancel: parent.child_token(),
            io_timeout: tuning.io_timeout,
        });

        let reader = Arc::clone(&session);
        tokio::spawn(async move {
            let peer = reader.peer.clone();
            match reader.read_loop(reader_half).await {
                Err(CollectorError::Canceled) => {
                    debug!(peer = %peer, "reader stopped");
                },
                Err(e) => warn!(peer = %peer, "reader exited: {e}"),
                Ok(()) => {},
            }
        });

        session.set_state(SessionState::Authenticating);
        match timeout(tuning.io_timeout, session.login(endpoint)).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                session.mark_dead();
                return Err(e);
            },
            Err(_) => {
                session.mark_dead();
                return Err(CollectorError::Auth("login timed out".to_string()));
            },
        }

        session.set_state(SessionState::Idle);
        debug!(peer = %session.peer, "session established");
        Ok(session)
    }

    /// Issues a tagged sentence and returns the stream of its replies.
    ///
    /// The tag is registered before the write so the reader can never see a
    /// reply for an unknown tag; a failed write unregisters it again and
    /// kills the session (partial writes corrupt the framing).
    pub async fn call(&self, sentence: Sentence) -> Result<ReplyStream> {
        if self.cancel.is_cancelled() {
            return Err(CollectorError::wire("session is closed"));
        }

        let tag = self.alloc_tag();
        let (tx, rx) = mpsc::channel(32);
        self.pending.insert(tag.clone(), tx);

        let tagged = sentence.api_attr("tag", &tag);
        if let Err(e) = self.write_sentence(&tagged).await {
            self.pending.remove(&tag);
            self.mark_dead();
            return Err(e);
        }

        self.touch();
        Ok(ReplyStream { rx })
    }

    /// Probes the device with a short identity print. Any failure marks the
    /// session Dead.
    pub async fn is_alive(&self, deadline: Duration) -> bool {
        let probe = async {
            self.call(Sentence::command("/system/identity/print"))
                .await?
                .collect()
                .await
        };
        match timeout(deadline, probe).await {
            Ok(Ok(_)) => true,
            _ => {
                self.mark_dead();
                false
            },
        }
    }

    /// Closes the socket, stops the reader and fails all pending sinks.
    pub fn close(&self) {
        self.mark_dead();
    }

    pub fn mark_dead(&self) {
        self.state
            .store(SessionState::Dead as u8, Ordering::Release);
        self.cancel.cancel();
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        *self
            .last_used
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn idle_age(&self) -> Duration {
        self.last_used().elapsed()
    }

    pub(crate) fn touch(&self) {
        *self
            .last_used
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Instant::now();
    }

    pub(crate) fn mark_reused(&self) {
        self.reuse_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reuse_count(&self) -> u64 {
        self.reuse_count.load(Ordering::Relaxed)
    }

    // --- internals ---

    /// Login order per post-6.43 firmware: plaintext first. A reply that
    /// still carries `=ret=<challenge>` (or a trap on the plaintext form)
    /// selects the legacy MD5 challenge-response path.
    async fn login(&self, endpoint: &RouterEndpoint) -> Result<()> {
        let plain = Sentence::command("/login")
            .attr("name", &endpoint.username)
            .attr("password", &endpoint.password);

        match self.call(plain).await?.collect().await {
            Ok(outcome) => match outcome.done.attr("ret") {
                Some(ret) => {
                    let challenge = ret.to_string();
                    self.login_challenge(endpoint, &challenge).await
                },
                None => Ok(()),
            },
            Err(CollectorError::Device(_)) => {
                let outcome = self
                    .call(Sentence::command("/login"))
                    .await?
                    .collect()
                    .await
                    .map_err(auth_from_device)?;
                let challenge = outcome
                    .done
                    .attr("ret")
                    .ok_or_else(|| {
                        CollectorError::Auth(
                            "device sent no login challenge".to_string(),
                        )
                    })?
                    .to_string();
                self.login_challenge(endpoint, &challenge).await
            },
            Err(e) => Err(e),
        }
    }

    async fn login_challenge(
        &self,
        endpoint: &RouterEndpoint,
        challenge_hex: &str,
    ) -> Result<()> {
        let challenge = hex::decode(challenge_hex).map_err(|e| {
            CollectorError::Auth(format!("malformed login challenge: {e}"))
        })?;

        let mut hasher = Md5::new();
        hasher.update([0u8]);
        hasher.update(endpoint.password.as_bytes());
        hasher.update(&challenge);
        let response = format!("00{}", hex::encode(hasher.finalize()));

        let reply = Sentence::command("/login")
            .attr("name", &endpoint.username)
            .attr("response", response);
        self.call(reply)
            .await?
            .collect()
            .await
            .map_err(auth_from_device)?;
        Ok(())
    }

    fn alloc_tag(&self) -> String {
        // Wraparound is permitted but must never collide with a tag that is
        // still pending.
        loop {
            let n = self.next_tag.fetch_add(1, Ordering::Relaxed);
            let tag = n.to_string();
            if !self.pending.contains_key(&tag) {
                return tag;
            }
        }
    }

    async fn write_sentence(&self, sentence: &Sentence) -> Result<()> {
        let bytes = sentence.to_wire();
        let mut w = self.writer.lock().await;
        io_with_timeout(
            "write sentence",
            w.write_all(&bytes),
            self.io_timeout,
            &self.cancel,
        )
        .await
    }

    async fn read_loop(
        self: Arc<Self>,
        mut reader: ReadHalf<RouterStream>,
    ) -> Result<()> {
        let result = loop {
            let words = tokio::select! {
                _ = self.cancel.cancelled() => break Err(CollectorError::Canceled),
                res = read_sentence(&mut reader) => match res {
                    Ok(words) => words,
                    Err(e) => break Err(e),
                },
            };
            if words.is_empty() {
                continue;
            }

            let reply = match Reply::parse(&words) {
                Ok(reply) => reply,
                Err(e) => break Err(e),
            };

            if reply.kind == ReplyKind::Fatal {
                let msg = reply.trap_message();
                self.route(reply).await;
                break Err(CollectorError::wire(format!(
                    "device closed the connection: {msg}"
                )));
            }
            self.route(reply).await;
        };

        self.mark_dead();
        // Dropping the sinks is what delivers the wire error: every waiter
        // sees its channel close before a terminal reply.
        self.pending.clear();
        result
    }

    async fn route(&self, reply: Reply) {
        let Some(tag) = reply.tag.clone() else {
            debug!(peer = %self.peer, "dropping untagged reply");
            return;
        };
        let terminal = reply.kind.is_terminal();

        // Clone the sender out of the map; sending while holding the shard
        // guard would block the reader against removals.
        let tx = self.pending.get(&tag).map(|entry| entry.value().clone());
        match tx {
            Some(tx) => {
                if tx.send(reply).await.is_err() {
                    // Caller abandoned the call; the tag stays registered
                    // until its terminal reply so it cannot be re-issued.
                    debug!(peer = %self.peer, tag = %tag, "discarding reply for abandoned call");
                }
                if terminal {
                    self.pending.remove(&tag);
                }
            },
            None => {
                debug!(peer = %self.peer, tag = %tag, "dropping reply for unknown tag");
            },
        }
    }
}

fn auth_from_device(e: CollectorError) -> CollectorError {
    match e {
        CollectorError::Device(msg) => CollectorError::Auth(msg),
        other => other,
    }
}

/// Delivery channel for one tagged call. Replies arrive in device emission
/// order; the channel closing before a terminal reply is a wire error.
#[derive(Debug)]
pub struct ReplyStream {
    rx: mpsc::Receiver<Reply>,
}

/// Everything a finished call produced: the `!re` records and the `!done`
/// sentence (which may carry attributes, e.g. the login challenge).
#[derive(Debug)]
pub struct CallOutcome {
    pub records: Vec<Reply>,
    pub done: Reply,
}

impl ReplyStream {
    pub async fn next(&mut self) -> Result<Reply> {
        self.rx.recv().await.ok_or_else(|| {
            CollectorError::wire("session closed before terminal reply")
        })
    }

    /// Collects `!re` records until the terminal reply. A `!trap`/`!fatal`
    /// surfaces as `DeviceError` with the device message verbatim.
    pub async fn collect(mut self) -> Result<CallOutcome> {
        let mut records = Vec::new();
        loop {
            let reply = self.next().await?;
            match reply.kind {
                ReplyKind::Re => records.push(reply),
                ReplyKind::Done => {
                    return Ok(CallOutcome {
                        records,
                        done: reply,
                    });
                },
                ReplyKind::Trap | ReplyKind::Fatal => {
                    return Err(CollectorError::Device(reply.trap_message()));
                },
            }
        }
    }
}
