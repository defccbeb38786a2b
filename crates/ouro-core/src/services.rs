//! Ambient services the orchestrator depends on
//!
//! - [`AlertSink`]: user-facing messages with a severity
//! - [`FileStore`]: reading and writing option files; failures degrade to
//!   `false` / empty text rather than errors
//! - [`Services`]: the bundle injected into the orchestrator, together with
//!   the working directory relative file paths resolve against

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Something failed
    Error,
}

/// User-facing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Message text
    pub message: String,
    /// Severity
    pub severity: Severity,
}

impl Alert {
    /// Informational alert
    #[inline]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Info,
        }
    }

    /// Error alert
    #[inline]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Info => write!(f, "info: {}", self.message),
            Severity::Error => write!(f, "error: {}", self.message),
        }
    }
}

/// Receives user-facing alerts
pub trait AlertSink: Send + Sync {
    /// Present one alert
    fn alert(&self, alert: Alert);
}

/// Alert sink that forwards to the tracing subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlerts;

impl AlertSink for TracingAlerts {
    fn alert(&self, alert: Alert) {
        match alert.severity {
            Severity::Info => tracing::info!(message = %alert.message, "alert"),
            Severity::Error => tracing::error!(message = %alert.message, "alert"),
        }
    }
}

/// File access for option and layer-description files
#[async_trait::async_trait]
pub trait FileStore: Send + Sync {
    /// Write `data` to `folder/name`, creating `folder` as needed
    ///
    /// Returns `false` on failure or when `name` is empty.
    async fn write_file(&self, folder: &Path, name: &str, data: &str) -> bool;

    /// Read a file as text, empty on failure
    async fn read_file(&self, path: &Path) -> String;
}

/// Local filesystem store
#[derive(Debug, Clone, Copy, Default)]
pub struct FsFileStore;

#[async_trait::async_trait]
impl FileStore for FsFileStore {
    async fn write_file(&self, folder: &Path, name: &str, data: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        if let Err(e) = tokio::fs::create_dir_all(folder).await {
            tracing::warn!(folder = %folder.display(), error = %e, "could not create folder");
            return false;
        }
        let path = folder.join(name);
        match tokio::fs::write(&path, data).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), bytes = data.len(), "file written");
                true
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not write file");
                false
            }
        }
    }

    async fn read_file(&self, path: &Path) -> String {
        tokio::fs::read_to_string(path).await.unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "could not read file");
            String::new()
        })
    }
}

/// Services injected into the orchestrator
#[derive(Clone)]
pub struct Services {
    /// Directory relative paths resolve against; nothing is persisted or
    /// submitted while unset
    pub working_dir: Option<PathBuf>,
    /// Alert sink
    pub alerts: Arc<dyn AlertSink>,
    /// File store
    pub files: Arc<dyn FileStore>,
}

impl Services {
    /// Filesystem store and tracing alerts, rooted at `working_dir`
    #[must_use]
    pub fn local(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(working_dir.into()),
            alerts: Arc::new(TracingAlerts),
            files: Arc::new(FsFileStore),
        }
    }

    /// With working directory
    #[inline]
    #[must_use]
    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    /// With alert sink
    #[inline]
    #[must_use]
    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    /// With file store
    #[inline]
    #[must_use]
    pub fn with_files(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = files;
        self
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_creates_nested_folders() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("out/nested");

        assert!(FsFileStore.write_file(&folder, "a.json", "{}").await);
        assert_eq!(FsFileStore.read_file(&folder.join("a.json")).await, "{}");
    }

    #[tokio::test]
    async fn empty_name_is_not_written() {
        let dir = tempfile::tempdir().unwrap();

        assert!(!FsFileStore.write_file(dir.path(), "", "{}").await);
    }

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(FsFileStore.read_file(&dir.path().join("missing.json")).await, "");
    }

    #[test]
    fn alert_display() {
        assert_eq!(Alert::error("Invalid JSON file").to_string(), "error: Invalid JSON file");
        assert_eq!(Alert::info("saved").severity, Severity::Info);
    }
}
