//! Testing utilities for the Ouroboros workspace
//!
//! Shared doubles and fixtures:
//! - [`MockTransport`]: records every request, replies from a script, and
//!   lets tests hold a reply back or feed a stream by hand
//! - [`RecordingAlerts`] and [`MemoryFileStore`] for the orchestrator's services
//! - [`Harness`]: an orchestrator over the default slice options wired to
//!   all of the above

#![allow(missing_docs)]

use futures::channel::mpsc as stream_mpsc;
use futures::StreamExt;
use ouro_channel::{
    ChannelError, ChannelEvent, EventStream, Method, RequestChannel, RequestOptions, Transport,
};
use ouro_core::{
    Alert, AlertSink, ChangeOrchestrator, FileStore, OrchestratorConfig, Services,
};
use ouro_options::{CompoundEntry, Entry, KeyPath};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};

// ----------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------

/// One recorded request or stream open
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub key: String,
    pub payload: Value,
    pub method: Option<Method>,
}

impl Call {
    /// Whether this was a stream open
    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.method.is_none()
    }
}

enum Reply {
    Ready(Result<Value, ChannelError>),
    Gated(oneshot::Receiver<Result<Value, ChannelError>>),
}

type StreamItem = Result<Value, ChannelError>;

/// Scripted in-process transport
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<Call>>,
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    streams: Mutex<HashMap<String, VecDeque<stream_mpsc::UnboundedReceiver<StreamItem>>>>,
    disconnected: AtomicBool,
    notify: Notify,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a reply for the next request to `key`
    pub fn reply(&self, key: &str, outcome: Result<Value, ChannelError>) {
        self.replies
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(Reply::Ready(outcome));
    }

    /// Queue a held-back reply for the next request to `key`
    ///
    /// The request stays pending until the returned sender is used.
    pub fn gate(&self, key: &str) -> oneshot::Sender<Result<Value, ChannelError>> {
        let (tx, rx) = oneshot::channel();
        self.replies
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(Reply::Gated(rx));
        tx
    }

    /// Queue a hand-fed stream for the next stream open on `key`
    pub fn stream(&self, key: &str) -> stream_mpsc::UnboundedSender<StreamItem> {
        let (tx, rx) = stream_mpsc::unbounded();
        self.streams
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(rx);
        tx
    }

    /// Queue a stream that replays `payloads` and ends
    pub fn scripted_stream(&self, key: &str, payloads: impl IntoIterator<Item = Value>) {
        let tx = self.stream(key);
        for payload in payloads {
            let _ = tx.unbounded_send(Ok(payload));
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::Relaxed);
    }

    /// Everything recorded so far, in issue order
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Recorded requests (not stream opens) to `key`
    #[must_use]
    pub fn requests_to(&self, key: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.key == key && !c.is_stream())
            .cloned()
            .collect()
    }

    /// Keys in issue order
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.key.clone()).collect()
    }

    /// Wait until `count` calls to `key` have been recorded
    ///
    /// # Panics
    /// After one second without enough calls
    pub async fn wait_for(&self, key: &str, count: usize) {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.calls.lock().iter().filter(|c| c.key == key).count() >= count {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(1), wait).await.is_err() {
            panic!("timed out waiting for {count} calls to {key}; saw {:?}", self.keys());
        }
    }

    fn record(&self, key: &str, payload: &Value, method: Option<Method>) {
        self.calls.lock().push(Call {
            key: key.to_string(),
            payload: payload.clone(),
            method,
        });
        self.notify.notify_waiters();
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn fetch(
        &self,
        key: &str,
        payload: &Value,
        options: RequestOptions,
    ) -> Result<Value, ChannelError> {
        self.record(key, payload, Some(options.method));
        let reply = self.replies.lock().get_mut(key).and_then(VecDeque::pop_front);
        match reply {
            None => Ok(Value::Null),
            Some(Reply::Ready(outcome)) => outcome,
            Some(Reply::Gated(rx)) => rx
                .await
                .unwrap_or_else(|_| Err(ChannelError::Transport("gate dropped".into()))),
        }
    }

    async fn stream(&self, key: &str, seed: &Value) -> Result<EventStream, ChannelError> {
        self.record(key, seed, None);
        let rx = self.streams.lock().get_mut(key).and_then(VecDeque::pop_front);
        match rx {
            Some(rx) => Ok(rx.boxed()),
            None => Ok(futures::stream::empty().boxed()),
        }
    }

    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::Relaxed)
    }
}

// ----------------------------------------------------------------------
// Services
// ----------------------------------------------------------------------

/// Alert sink that keeps every alert
#[derive(Debug, Default)]
pub struct RecordingAlerts {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerts {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.alerts.lock().iter().map(|a| a.message.clone()).collect()
    }
}

impl AlertSink for RecordingAlerts {
    fn alert(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}

/// In-memory file store keyed by full path
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: Mutex<HashMap<PathBuf, String>>,
    read_only: AtomicBool,
}

impl MemoryFileStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, path: impl Into<PathBuf>, text: impl Into<String>) {
        self.files.lock().insert(path.into(), text.into());
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<String> {
        self.files.lock().get(path).cloned()
    }

    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Make every write fail
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Relaxed);
    }
}

#[async_trait::async_trait]
impl FileStore for MemoryFileStore {
    async fn write_file(&self, folder: &Path, name: &str, data: &str) -> bool {
        if name.is_empty() || self.read_only.load(Ordering::Relaxed) {
            return false;
        }
        self.insert(folder.join(name), data);
        true
    }

    async fn read_file(&self, path: &Path) -> String {
        self.get(path).unwrap_or_default()
    }
}

// ----------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------

/// Working directory used by [`Harness`]
pub const WORKING_DIR: &str = "/work";

/// Layer-description file name used by [`Harness::with_layer_file`]
pub const LAYER_FILE: &str = "/work/state.json";

/// `{slice_width, bounding_box{x, y, z}}`
#[must_use]
pub fn sample_tree() -> CompoundEntry {
    let bounding_box = CompoundEntry::from_children(
        "bounding_box",
        "Bounding Box",
        [
            Entry::number("x", "X", 0.0).into(),
            Entry::number("y", "Y", 0.0).into(),
            Entry::number("z", "Z", 0.0).into(),
        ],
    )
    .unwrap();

    CompoundEntry::from_children(
        "options",
        "Options",
        [
            Entry::number("slice_width", "Slice Width", 120.0).into(),
            bounding_box.into(),
        ],
    )
    .unwrap()
}

/// Layer description with two image and one annotation layer
#[must_use]
pub fn layer_description() -> String {
    json!({
        "layers": [
            {"type": "image", "name": "em"},
            {"type": "annotation", "name": "axon_path"},
            {"type": "segmentation", "name": "seg"},
            {"type": "image", "name": "em_highres"}
        ]
    })
    .to_string()
}

/// Key path from dotted text
///
/// # Panics
/// If `text` is not a valid path
#[must_use]
pub fn path(text: &str) -> KeyPath {
    text.parse().unwrap()
}

/// Orchestrator over the default slice options, wired to test doubles
pub struct Harness {
    pub orchestrator: ChangeOrchestrator,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
    pub transport: Arc<MockTransport>,
    pub alerts: Arc<RecordingAlerts>,
    pub files: Arc<MemoryFileStore>,
}

impl Harness {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    #[must_use]
    pub fn with_config(config: OrchestratorConfig) -> Self {
        let transport = MockTransport::new();
        let alerts = RecordingAlerts::new();
        let files = MemoryFileStore::new();
        let services = Services {
            working_dir: Some(PathBuf::from(WORKING_DIR)),
            alerts: alerts.clone(),
            files: files.clone(),
        };
        let (channel, events) = RequestChannel::new(transport.clone());
        let orchestrator = ChangeOrchestrator::with_slice_options(config, channel, services).unwrap();
        Self {
            orchestrator,
            events,
            transport,
            alerts,
            files,
        }
    }

    /// Harness whose tree already points at a readable layer file
    ///
    /// The layer file field is set directly, so no request is issued.
    pub async fn with_layer_file() -> Self {
        let mut harness = Self::new();
        harness.files.insert(LAYER_FILE, layer_description());
        harness.orchestrator.edit(&path("neuroglancer_json"), &json!(LAYER_FILE)).await.unwrap();
        // The edit above requested a visualization; settle and forget it
        harness.transport.wait_for("/create_slice_visualization/", 1).await;
        harness.drain().await;
        harness
    }

    /// Next channel event
    ///
    /// # Panics
    /// After one second without an event
    pub async fn next_event(&mut self) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(1), self.events.recv())
            .await
            .ok()
            .flatten()
            .expect("no channel event within one second")
    }

    /// Deliver the next channel event to the orchestrator
    pub async fn step(&mut self) {
        let event = self.next_event().await;
        self.orchestrator.handle_event(event).unwrap();
    }

    /// Deliver every event that arrives within a short quiet period
    pub async fn drain(&mut self) {
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(50), self.events.recv()).await
        {
            self.orchestrator.handle_event(event).unwrap();
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
