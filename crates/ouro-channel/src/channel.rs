//! Keyed request channel
//!
//! Issues one-shot requests and progress streams against a [`Transport`]
//! and reports their outcomes on a single event queue:
//! - every issue of a key bumps that key's version and returns a [`Ticket`]
//! - settlements always arrive; consumers drop them with [`RequestChannel::is_current`]
//! - one-shot results are remembered per key until [`RequestChannel::clear`];
//!   a remembered result is served only while its ticket is current
//! - at most one live stream per key, torn down by [`RequestChannel::clear_stream`]

use dashmap::DashMap;
use futures::StreamExt;
use moka::future::Cache;
use moka::ops::compute::Op;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ChannelError;
use crate::transport::{RequestOptions, Transport};

/// Kind of work a ticket stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketKind {
    /// One-shot request
    Request,
    /// Progress stream
    Stream,
}

/// Identity of one issued request or stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ticket {
    key: String,
    version: u64,
    kind: TicketKind,
}

impl Ticket {
    /// Resource key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Version of the key at issue time
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Request or stream
    #[inline]
    #[must_use]
    pub fn kind(&self) -> TicketKind {
        self.kind
    }
}

/// Outcome of a one-shot request
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    /// Request identity
    pub ticket: Ticket,
    /// Response body or failure
    pub outcome: Result<Value, ChannelError>,
}

/// One step of a progress stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Partial result
    Update(Value),
    /// Stream finished normally
    Done,
    /// Stream failed; no further events follow
    Failed(ChannelError),
}

impl StreamEvent {
    /// Whether no further events follow
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

/// Event delivered on the channel's queue
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A one-shot request settled
    Settled(Settlement),
    /// A stream produced an event
    Stream {
        /// Stream identity
        ticket: Ticket,
        /// What happened
        event: StreamEvent,
    },
}

impl ChannelEvent {
    /// Ticket the event belongs to
    #[inline]
    #[must_use]
    pub fn ticket(&self) -> &Ticket {
        match self {
            Self::Settled(settlement) => &settlement.ticket,
            Self::Stream { ticket, .. } => ticket,
        }
    }
}

/// Error carried by a stream payload, if any
///
/// Accepts `{"error": {"status", "message"}}`, `{"error": "text"}` and
/// `{"error": true}`; a `null`/`false` error field is no error.
#[must_use]
pub fn payload_error(payload: &Value) -> Option<ChannelError> {
    match payload.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(message) => Some(ChannelError::backend(500, message.clone())),
        Value::Object(fields) => {
            let status = fields
                .get("status")
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(500);
            let message = fields
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("stream failed");
            Some(ChannelError::backend(status, message))
        }
        other => Some(ChannelError::backend(500, other.to_string())),
    }
}

/// Whether a stream payload marks the end of the stream
#[inline]
#[must_use]
pub fn payload_done(payload: &Value) -> bool {
    payload.get("done").and_then(Value::as_bool).unwrap_or(false)
}

/// Default number of remembered one-shot results
const DEFAULT_CACHE_CAPACITY: u64 = 256;

/// Keyed request/stream channel over a transport
pub struct RequestChannel {
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    request_versions: Arc<DashMap<String, u64>>,
    stream_versions: Arc<DashMap<String, u64>>,
    streams: DashMap<String, JoinHandle<()>>,
    results: Cache<String, Arc<Settlement>>,
}

impl RequestChannel {
    /// Create channel and the receiving end of its event queue
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let channel = Self {
            transport,
            events,
            request_versions: Arc::new(DashMap::new()),
            stream_versions: Arc::new(DashMap::new()),
            streams: DashMap::new(),
            results: Cache::new(DEFAULT_CACHE_CAPACITY),
        };
        (channel, rx)
    }

    /// Whether the transport reports a live backend
    #[inline]
    #[must_use]
    pub fn connected(&self) -> bool {
        self.transport.is_connected()
    }

    fn bump(versions: &DashMap<String, u64>, key: &str, kind: TicketKind) -> Ticket {
        let mut version = versions.entry(key.to_string()).or_insert(0);
        *version += 1;
        Ticket {
            key: key.to_string(),
            version: *version,
            kind,
        }
    }

    fn current_version(versions: &DashMap<String, u64>, key: &str) -> u64 {
        versions.get(key).map_or(0, |v| *v)
    }

    /// Cache a settlement unless it is no longer current or a later one
    /// is already stored
    async fn remember(
        results: &Cache<String, Arc<Settlement>>,
        versions: &DashMap<String, u64>,
        settlement: Settlement,
    ) {
        let key = settlement.ticket.key.clone();
        let version = settlement.ticket.version;
        results
            .entry(key)
            .and_compute_with(|existing| {
                let newer_kept = existing.is_some_and(|e| e.value().ticket.version > version);
                let current = Self::current_version(versions, &settlement.ticket.key) == version;
                let op = if current && !newer_kept {
                    Op::Put(Arc::new(settlement))
                } else {
                    Op::Nop
                };
                std::future::ready(op)
            })
            .await;
    }

    /// Whether `ticket` is still the latest issue of its key
    #[must_use]
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        let versions = match ticket.kind {
            TicketKind::Request => &self.request_versions,
            TicketKind::Stream => &self.stream_versions,
        };
        Self::current_version(versions, &ticket.key) == ticket.version
    }

    /// Issue a one-shot request in the background
    ///
    /// Supersedes any outstanding request for `key`. The settlement is
    /// delivered as [`ChannelEvent::Settled`] and remembered if still current.
    pub fn request(&self, key: &str, payload: Value, options: RequestOptions) -> Ticket {
        let ticket = Self::bump(&self.request_versions, key, TicketKind::Request);
        tracing::debug!(key, version = ticket.version, "request issued");

        let transport = Arc::clone(&self.transport);
        let versions = Arc::clone(&self.request_versions);
        let results = self.results.clone();
        let events = self.events.clone();
        let issued = ticket.clone();

        tokio::spawn(async move {
            let outcome = transport.fetch(&issued.key, &payload, options).await;
            if let Err(e) = &outcome {
                tracing::error!(key = %issued.key, error = %e, "request failed");
            }
            let settlement = Settlement {
                ticket: issued,
                outcome,
            };
            Self::remember(&results, &versions, settlement.clone()).await;
            // Receiver gone means the consumer shut down
            let _ = events.send(ChannelEvent::Settled(settlement));
        });

        ticket
    }

    /// Issue a one-shot request and wait for its outcome
    ///
    /// Supersedes any outstanding request for `key`; nothing is delivered on
    /// the event queue.
    ///
    /// # Errors
    /// Whatever the transport reports
    pub async fn call(
        &self,
        key: &str,
        payload: Value,
        options: RequestOptions,
    ) -> Result<Value, ChannelError> {
        let ticket = Self::bump(&self.request_versions, key, TicketKind::Request);
        tracing::debug!(key, version = ticket.version, "call issued");

        let outcome = self.transport.fetch(key, &payload, options).await;
        if let Err(e) = &outcome {
            tracing::error!(key, error = %e, "call failed");
        }
        let settlement = Settlement {
            ticket,
            outcome: outcome.clone(),
        };
        Self::remember(&self.results, &self.request_versions, settlement).await;
        outcome
    }

    /// Last remembered settlement for `key`
    ///
    /// `None` means no response yet; a failure is `Some` with an `Err` outcome.
    /// A result stored after its key was cleared or reissued is never served.
    pub async fn cached(&self, key: &str) -> Option<Arc<Settlement>> {
        self.results
            .get(key)
            .await
            .filter(|settlement| self.is_current(&settlement.ticket))
    }

    /// Forget the result for `key` and invalidate any outstanding request
    pub async fn clear(&self, key: &str) {
        Self::bump(&self.request_versions, key, TicketKind::Request);
        self.results.invalidate(key).await;
        tracing::debug!(key, "request cleared");
    }

    /// Open a progress stream, replacing any live stream for `key`
    ///
    /// Delivers [`StreamEvent::Update`] per payload, then exactly one
    /// terminal event: `Done` after a `{"done": true}` payload or the end of
    /// the stream, `Failed` on an error payload or transport failure.
    pub fn open_stream(&self, key: &str, seed: Value) -> Ticket {
        let ticket = Self::bump(&self.stream_versions, key, TicketKind::Stream);
        if let Some((_, previous)) = self.streams.remove(key) {
            previous.abort();
        }
        tracing::info!(key, version = ticket.version, "stream opened");

        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();
        let issued = ticket.clone();

        let handle = tokio::spawn(async move {
            let emit = |event: StreamEvent| {
                let _ = events.send(ChannelEvent::Stream {
                    ticket: issued.clone(),
                    event,
                });
            };

            let mut stream = match transport.stream(&issued.key, &seed).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!(key = %issued.key, error = %e, "stream failed to open");
                    emit(StreamEvent::Failed(e));
                    return;
                }
            };

            while let Some(item) = stream.next().await {
                let payload = match item {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(key = %issued.key, error = %e, "stream failed");
                        emit(StreamEvent::Failed(e));
                        return;
                    }
                };
                if let Some(e) = payload_error(&payload) {
                    tracing::warn!(key = %issued.key, error = %e, "stream reported error");
                    emit(StreamEvent::Failed(e));
                    return;
                }
                let done = payload_done(&payload);
                emit(StreamEvent::Update(payload));
                if done {
                    break;
                }
            }
            tracing::debug!(key = %issued.key, "stream done");
            emit(StreamEvent::Done);
        });

        self.streams.insert(key.to_string(), handle);
        ticket
    }

    /// Tear down the stream for `key`; queued events become stale
    pub fn clear_stream(&self, key: &str) {
        Self::bump(&self.stream_versions, key, TicketKind::Stream);
        if let Some((_, handle)) = self.streams.remove(key) {
            handle.abort();
            tracing::debug!(key, "stream cleared");
        }
    }

    /// Whether a stream for `key` is still running
    #[must_use]
    pub fn is_streaming(&self, key: &str) -> bool {
        self.streams
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl std::fmt::Debug for RequestChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestChannel")
            .field("live_streams", &self.streams.len())
            .finish_non_exhaustive()
    }
}

impl Drop for RequestChannel {
    fn drop(&mut self) {
        for entry in self.streams.iter() {
            entry.value().abort();
        }
    }
}
