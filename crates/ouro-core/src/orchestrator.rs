//! Change orchestrator
//!
//! Owns the option tree and turns edits into backend work:
//! - trigger-set edits persist the options and request a visualization,
//!   unless a request cannot be issued in the current state
//! - submission deletes the prior job, waits for the delete to settle,
//!   then persists the options and requests a new slice job
//! - job responses open the status stream; stream reports feed the
//!   [`ProgressView`]
//!
//! Every settlement is checked against the channel's current ticket for
//! its key, so a response to superseded or cleared work is dropped.

use ouro_channel::{
    ChannelError, ChannelEvent, RequestChannel, RequestOptions, Settlement, StreamEvent, Ticket,
};
use ouro_options::{
    join_normalized, resolve_relative_paths, slice_options, CompoundEntry, EntryChange, EntryType,
    KeyPath, OptionsError, SchemaCodec,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::layers::parse_layers;
use crate::progress::{decode_status, ProgressView};
use crate::services::{Alert, Services};
use crate::state::{allowed_transitions, validate_transition, OrchestratorState};

/// Alert raised when an options file is not JSON
pub const INVALID_JSON_ALERT: &str = "Invalid JSON file";

/// Alert raised when an options file does not fit the option tree
pub const WRONG_FORMAT_ALERT: &str =
    "Wrong JSON file format. Make sure you provide a slice options JSON file.";

/// Job identity carried by a response, if any
///
/// A job identity is an object with a non-null `task_id`; it is sent back
/// verbatim to delete the job or to open its status stream.
#[must_use]
pub fn job_identity(value: &Value) -> Option<&Value> {
    value
        .get("task_id")
        .filter(|id| !id.is_null())
        .map(|_| value)
}

/// Serialize with four-space indentation
///
/// # Errors
/// Only if `value` cannot be represented as JSON
pub fn to_pretty_json(value: &Value) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Work the orchestrator can be asked to do from outside
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Write one leaf
    Edit {
        /// Leaf address
        path: KeyPath,
        /// Raw value
        value: Value,
    },
    /// Persist options and request a visualization
    Visualize,
    /// Replace the current job with a new one
    Submit,
    /// Load an options file
    Load(PathBuf),
    /// Stop the run loop
    Shutdown,
}

/// Reacts to option edits and backend events
#[derive(Debug)]
pub struct ChangeOrchestrator {
    config: OrchestratorConfig,
    tree: CompoundEntry,
    channel: RequestChannel,
    services: Services,
    state: OrchestratorState,
    progress: ProgressView,
    visualization: Option<Value>,
    new_visualization: bool,
}

impl ChangeOrchestrator {
    /// Create orchestrator over an option tree
    #[must_use]
    pub fn new(
        config: OrchestratorConfig,
        tree: CompoundEntry,
        channel: RequestChannel,
        services: Services,
    ) -> Self {
        Self {
            config,
            tree,
            channel,
            services,
            state: OrchestratorState::Idle,
            progress: ProgressView::new(),
            visualization: None,
            new_visualization: true,
        }
    }

    /// Create orchestrator over the default slice options tree
    ///
    /// # Errors
    /// `OrchestratorError::Options` if the default tree cannot be built
    pub fn with_slice_options(
        config: OrchestratorConfig,
        channel: RequestChannel,
        services: Services,
    ) -> Result<Self, OrchestratorError> {
        Ok(Self::new(config, slice_options()?, channel, services))
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Get option tree
    #[inline]
    #[must_use]
    pub fn tree(&self) -> &CompoundEntry {
        &self.tree
    }

    /// Get request channel
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &RequestChannel {
        &self.channel
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Progress reported by the current stream
    #[inline]
    #[must_use]
    pub fn progress(&self) -> &ProgressView {
        &self.progress
    }

    /// Latest visualization result
    #[inline]
    #[must_use]
    pub fn visualization(&self) -> Option<&Value> {
        self.visualization.as_ref()
    }

    /// Whether the latest visualization request started from a new layer
    /// selection rather than a parameter tweak
    #[inline]
    #[must_use]
    pub fn is_new_visualization(&self) -> bool {
        self.new_visualization
    }

    /// Whether the backend is reachable
    #[inline]
    #[must_use]
    pub fn connected(&self) -> bool {
        self.channel.connected()
    }

    /// Whether a progress stream is in flight
    #[inline]
    #[must_use]
    pub fn stream_in_progress(&self) -> bool {
        self.state.is_streaming()
    }

    /// Progress of the bounding-box slicing step
    ///
    /// `0.0` while there is no visualization to apply it to, or the step has
    /// not reported yet.
    #[must_use]
    pub fn bounding_box_progress(&self) -> f64 {
        if self.visualization.is_none() {
            return 0.0;
        }
        self.progress
            .fraction(&self.config.bounding_box_step)
            .unwrap_or(0.0)
    }

    fn transition(&mut self, to: OrchestratorState) -> Result<(), OrchestratorError> {
        validate_transition(self.state, to)?;
        if self.state != to {
            tracing::info!("State {} -> {}", self.state, to);
        }
        self.state = to;
        Ok(())
    }

    fn alert(&self, alert: Alert) {
        self.services.alerts.alert(alert);
    }

    fn resolve(&self, raw: &str) -> PathBuf {
        match &self.services.working_dir {
            Some(dir) if raw.starts_with('.') => join_normalized(dir, Path::new(raw)),
            _ => PathBuf::from(raw),
        }
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    /// Write one leaf and react to the change
    ///
    /// Returns the visualization ticket if the edit issued a request.
    ///
    /// # Errors
    /// `OrchestratorError::Options` if no leaf lives at `path`
    pub async fn edit(
        &mut self,
        path: &KeyPath,
        raw: &Value,
    ) -> Result<Option<Ticket>, OrchestratorError> {
        let change = self.tree.set_at(path, raw)?;
        tracing::debug!(
            "Edited {}: {} -> {}",
            change.path,
            change.old_value,
            change.new_value
        );
        self.on_entry_change(&change).await
    }

    /// React to a leaf change
    ///
    /// A new layer-description file first repopulates the layer selectors.
    /// A selector keeps its current layer when the new file still offers
    /// it, otherwise the file's first layer is selected. The change then
    /// requests a visualization if the field is in the trigger set, its
    /// value is non-empty and no stream or slice job is in flight.
    ///
    /// # Errors
    /// Propagates state machine errors from the visualization request
    pub async fn on_entry_change(
        &mut self,
        change: &EntryChange,
    ) -> Result<Option<Ticket>, OrchestratorError> {
        let name = change.name();

        if name == self.config.layers.file && self.services.working_dir.is_some() {
            let Some(file) = change.new_value.as_str().filter(|s| !s.is_empty()) else {
                return Ok(None);
            };
            if !self.refresh_layers(file).await {
                return Ok(None);
            }
        }

        if !self.config.is_trigger(name) || change.is_empty() {
            tracing::debug!("Change to {} does not trigger a visualization", change.path);
            return Ok(None);
        }
        if !allowed_transitions(self.state).contains(&OrchestratorState::AwaitingVisualization) {
            tracing::debug!("Ignoring change to {} while {}", change.path, self.state);
            return Ok(None);
        }

        self.new_visualization = self.config.starts_new_visualization(name);
        self.request_visualization().await
    }

    async fn refresh_layers(&mut self, file: &str) -> bool {
        let path = self.resolve(file);
        let text = self.services.files.read_file(&path).await;
        let names = match parse_layers(&text) {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("Could not read layers from {}: {}", path.display(), e);
                self.alert(Alert::error(e.to_string()));
                return false;
            }
        };

        tracing::info!(
            "Found {} image and {} annotation layers in {}",
            names.image.len(),
            names.annotation.len(),
            path.display()
        );
        let image_field = self.config.layers.image.clone();
        let annotation_field = self.config.layers.annotation.clone();
        self.set_layer_choices(&image_field, names.image);
        self.set_layer_choices(&annotation_field, names.annotation);
        true
    }

    /// Replace a selector's choices; keep its value if still valid, else
    /// select the first choice
    fn set_layer_choices(&mut self, field: &str, choices: Vec<String>) {
        let Some(path) = self.tree.path_of(field) else {
            return;
        };
        let Some(entry) = self.tree.get_mut(&path) else {
            return;
        };
        let keep = entry
            .value()
            .as_str()
            .is_some_and(|current| choices.iter().any(|c| c == current));
        let first = choices.first().cloned();
        entry.set_options(Some(choices));
        if let (false, Some(first)) = (keep, first) {
            entry.set_value(&Value::String(first));
        }
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Write the options to `<output_name><suffix>` in the output folder
    ///
    /// File fields starting with `.` are made absolute against the working
    /// directory. Returns the written path, or `None` if there is no working
    /// directory, a required output field is empty, or the write failed.
    pub async fn save_options_to_file(&self) -> Option<PathBuf> {
        let dir = self.services.working_dir.as_deref()?;

        let mut object = self.tree.to_object();
        let file_paths = self.tree.find_paths_to_type(EntryType::FilePath);
        resolve_relative_paths(&mut object, &file_paths, dir);

        for field in &self.config.required_output_fields {
            if self.field_text(&object, field).map_or(true, str::is_empty) {
                tracing::debug!("Options not saved: {} is empty", field);
                return None;
            }
        }

        let folder = PathBuf::from(self.field_text(&object, &self.config.output_folder_field)?);
        let name = self
            .config
            .options_file_name(self.field_text(&object, &self.config.output_name_field)?);
        let data = match to_pretty_json(&object) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Could not serialize options: {}", e);
                return None;
            }
        };

        if !self.services.files.write_file(&folder, &name, &data).await {
            return None;
        }
        let path = folder.join(name);
        tracing::info!("Options saved to {}", path.display());
        Some(path)
    }

    fn field_text<'a>(&self, object: &'a Value, field: &str) -> Option<&'a str> {
        self.tree.path_of(field)?.lookup(object)?.as_str()
    }

    /// Persist the options and request a visualization of them
    ///
    /// Returns `None` without requesting if the options could not be saved.
    ///
    /// # Errors
    /// `OrchestratorError::InvalidTransition` if a stream or slice job is
    /// in flight
    pub async fn request_visualization(&mut self) -> Result<Option<Ticket>, OrchestratorError> {
        if self.services.working_dir.is_none() {
            return Ok(None);
        }
        validate_transition(self.state, OrchestratorState::AwaitingVisualization)?;

        let key = self.config.endpoints.visualization.clone();
        if self.channel.cached(&key).await.is_some() {
            self.channel.clear(&key).await;
        }

        let Some(options) = self.save_options_to_file().await else {
            return Ok(None);
        };

        self.transition(OrchestratorState::AwaitingVisualization)?;
        let ticket = self.channel.request(
            &key,
            json!({ "options": options.to_string_lossy() }),
            RequestOptions::post(),
        );
        tracing::info!("Requested visualization (version {})", ticket.version());
        Ok(Some(ticket))
    }

    /// Ask the backend for its current job and remember it
    ///
    /// # Errors
    /// `OrchestratorError::Channel` if the request fails
    pub async fn fetch_current_job(&mut self) -> Result<Option<Value>, OrchestratorError> {
        let key = self.config.endpoints.slice.clone();
        let value = self
            .channel
            .call(&key, Value::Null, RequestOptions::get())
            .await?;
        Ok(job_identity(&value).cloned())
    }

    async fn prior_job(&self) -> Option<Value> {
        let settlement = self.channel.cached(&self.config.endpoints.slice).await?;
        settlement.outcome.as_ref().ok().and_then(job_identity).cloned()
    }

    /// Replace the current job with one for the current options
    ///
    /// A prior job is deleted first; only once the delete settles are its
    /// result and stream cleared and the new slice request issued. Does
    /// nothing while disconnected or without a working directory.
    ///
    /// # Errors
    /// `OrchestratorError::InvalidTransition` while a slice request is
    /// pending
    pub async fn submit(&mut self) -> Result<Option<Ticket>, OrchestratorError> {
        if !self.connected() || self.services.working_dir.is_none() {
            tracing::debug!("Submit ignored: not connected or no working directory");
            return Ok(None);
        }
        validate_transition(self.state, OrchestratorState::AwaitingSlice)?;

        let slice_key = self.config.endpoints.slice.clone();
        if let Some(prior) = self.prior_job().await {
            tracing::info!("Deleting prior job {}", prior);
            let delete_key = self.config.endpoints.delete.clone();
            if let Err(e) = self.channel.call(&delete_key, prior, RequestOptions::post()).await {
                self.alert(Alert::error(e.message()));
            }
            self.channel.clear(&slice_key).await;
            self.channel.clear_stream(&self.config.endpoints.status_stream);
            self.progress.clear();
            if self.state.is_streaming() {
                self.transition(OrchestratorState::Idle)?;
            }
        }

        let Some(options) = self.save_options_to_file().await else {
            return Ok(None);
        };

        self.transition(OrchestratorState::AwaitingSlice)?;
        let ticket = self.channel.request(
            &slice_key,
            json!({ "options": options.to_string_lossy() }),
            RequestOptions::post(),
        );
        tracing::info!("Submitted slice job (version {})", ticket.version());
        Ok(Some(ticket))
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Load option values from a file
    ///
    /// The file must be JSON and fit the tree's schema; otherwise an error
    /// alert is raised and the tree is left untouched. After loading, the
    /// layer-description field is re-processed as if it had just changed.
    ///
    /// # Errors
    /// `OrchestratorError::InvalidJson` or `OrchestratorError::WrongFormat`
    pub async fn load_options_file(
        &mut self,
        path: &Path,
    ) -> Result<Vec<EntryChange>, OrchestratorError> {
        if self.services.working_dir.is_none() || path.as_os_str().is_empty() {
            return Ok(Vec::new());
        }

        let text = self.services.files.read_file(path).await;
        let document: Value = match serde_json::from_str(&text) {
            Ok(document) => document,
            Err(e) => {
                self.alert(Alert::error(INVALID_JSON_ALERT));
                return Err(OrchestratorError::InvalidJson(e.to_string()));
            }
        };

        let document = match self.load_codec()?.validate(&document) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!("Rejected options file {}: {}", path.display(), e);
                self.alert(Alert::error(WRONG_FORMAT_ALERT));
                return Err(e.into());
            }
        };

        let changes = self.tree.set_value(&document);
        tracing::info!(
            "Loaded {} ({} values changed)",
            path.display(),
            changes.len()
        );

        if let Some(layer_path) = self.tree.path_of(&self.config.layers.file) {
            if let Some(entry) = self.tree.get(&layer_path) {
                let current = EntryChange {
                    path: layer_path.clone(),
                    old_value: entry.value().clone(),
                    new_value: entry.value().clone(),
                };
                self.on_entry_change(&current).await?;
            }
        }
        Ok(changes)
    }

    /// Schema for loading: the tree's shape without the layer choices of
    /// the currently selected layer file
    fn load_codec(&self) -> Result<SchemaCodec, OptionsError> {
        let mut shape = self.tree.clone();
        for field in [&self.config.layers.image, &self.config.layers.annotation] {
            let Some(path) = shape.path_of(field) else {
                continue;
            };
            if let Some(entry) = shape.get_mut(&path) {
                entry.set_options(Some(Vec::new()));
            }
        }
        Ok(SchemaCodec::for_tree(&shape)?)
    }

    // ------------------------------------------------------------------
    // Backend events
    // ------------------------------------------------------------------

    /// Apply one channel event
    ///
    /// Events whose ticket is no longer current are discarded.
    ///
    /// # Errors
    /// Propagates state machine errors
    pub fn handle_event(&mut self, event: ChannelEvent) -> Result<(), OrchestratorError> {
        if !self.channel.is_current(event.ticket()) {
            tracing::warn!(
                "Discarding stale event for {} (version {})",
                event.ticket().key(),
                event.ticket().version()
            );
            return Ok(());
        }

        match event {
            ChannelEvent::Settled(settlement) => self.on_settled(settlement),
            ChannelEvent::Stream { ticket, event } => {
                if ticket.key() == self.config.endpoints.status_stream {
                    self.on_stream_event(event)
                } else {
                    tracing::debug!("Ignoring stream event for {}", ticket.key());
                    Ok(())
                }
            }
        }
    }

    fn on_settled(&mut self, settlement: Settlement) -> Result<(), OrchestratorError> {
        let key = settlement.ticket.key();
        if key == self.config.endpoints.visualization {
            self.on_visualization(settlement.outcome)
        } else if key == self.config.endpoints.slice {
            self.on_slice(settlement.outcome)
        } else {
            tracing::debug!("Ignoring settlement for {}", key);
            Ok(())
        }
    }

    fn on_visualization(&mut self, outcome: Result<Value, ChannelError>) -> Result<(), OrchestratorError> {
        let awaiting = self.state == OrchestratorState::AwaitingVisualization;
        match outcome {
            Err(e) => {
                self.alert(Alert::error(e.message()));
                if awaiting {
                    self.transition(OrchestratorState::Idle)?;
                }
            }
            Ok(value) => {
                if let Some(job) = job_identity(&value) {
                    if awaiting {
                        self.progress.clear();
                        self.channel
                            .open_stream(&self.config.endpoints.status_stream, job.clone());
                        self.transition(OrchestratorState::VisualizationStreaming)?;
                    }
                } else {
                    if !value.is_null() {
                        tracing::info!("Visualization received");
                        self.visualization = Some(value);
                    }
                    if awaiting {
                        self.transition(OrchestratorState::Idle)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn on_slice(&mut self, outcome: Result<Value, ChannelError>) -> Result<(), OrchestratorError> {
        if self.state != OrchestratorState::AwaitingSlice {
            tracing::debug!("Slice response while {}, not streaming", self.state);
            return Ok(());
        }
        match outcome.as_ref().map(job_identity) {
            Ok(Some(job)) => {
                self.progress.clear();
                self.channel
                    .open_stream(&self.config.endpoints.status_stream, job.clone());
                self.transition(OrchestratorState::SliceStreaming)
            }
            Ok(None) => {
                tracing::warn!("Slice response carried no job identity");
                self.transition(OrchestratorState::Idle)
            }
            Err(e) => {
                self.alert(Alert::error(e.message()));
                self.transition(OrchestratorState::Idle)
            }
        }
    }

    fn on_stream_event(&mut self, event: StreamEvent) -> Result<(), OrchestratorError> {
        match event {
            StreamEvent::Update(payload) => match decode_status(&payload) {
                Ok(update) => {
                    self.progress.apply(&update);
                    tracing::debug!("Progress: {} steps reported", self.progress.len());
                }
                Err(e) => tracing::warn!("Skipping unreadable status payload: {}", e),
            },
            StreamEvent::Done => {
                tracing::info!("Status stream done");
                if self.state.is_streaming() {
                    self.transition(OrchestratorState::Idle)?;
                }
            }
            StreamEvent::Failed(e) => {
                self.alert(Alert::error(e.message()));
                if self.state.is_streaming() {
                    self.transition(OrchestratorState::Idle)?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Driving
    // ------------------------------------------------------------------

    /// Execute one command
    ///
    /// # Errors
    /// Whatever the underlying operation reports
    pub async fn execute(&mut self, command: Command) -> Result<(), OrchestratorError> {
        match command {
            Command::Edit { path, value } => self.edit(&path, &value).await.map(drop),
            Command::Visualize => self.request_visualization().await.map(drop),
            Command::Submit => self.submit().await.map(drop),
            Command::Load(path) => self.load_options_file(&path).await.map(drop),
            Command::Shutdown => Ok(()),
        }
    }

    /// Process commands and channel events until shutdown
    ///
    /// Stops on [`Command::Shutdown`] or when every command sender is
    /// dropped. Failures are logged and do not stop the loop.
    pub async fn run(
        &mut self,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
        mut commands: mpsc::Receiver<Command>,
    ) {
        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    if let Err(e) = self.handle_event(event) {
                        tracing::error!("Event handling failed: {}", e);
                    }
                }
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => {
                        if let Err(e) = self.execute(command).await {
                            tracing::warn!("Command failed: {}", e);
                        }
                    }
                }
            }
        }
        tracing::info!("Orchestrator stopped");
    }

    /// Process channel events until the orchestrator is idle again
    ///
    /// `observe` runs after every event.
    ///
    /// # Errors
    /// Propagates state machine errors
    pub async fn run_until_idle(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<ChannelEvent>,
        mut observe: impl FnMut(&Self),
    ) -> Result<(), OrchestratorError> {
        while self.state != OrchestratorState::Idle {
            let Some(event) = events.recv().await else {
                break;
            };
            self.handle_event(event)?;
            observe(self);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn job_identity_requires_task_id() {
        assert!(job_identity(&json!({"task_id": "J1"})).is_some());
        assert!(job_identity(&json!({"task_id": null})).is_none());
        assert!(job_identity(&json!({"rects": []})).is_none());
        assert!(job_identity(&Value::Null).is_none());
    }

    #[test]
    fn pretty_json_uses_four_spaces() {
        let text = to_pretty_json(&json!({"a": {"b": 1}})).unwrap();
        assert_eq!(text, "{\n    \"a\": {\n        \"b\": 1\n    }\n}");
    }
}
