//! Orchestrator configuration
//!
//! Endpoint keys, the trigger set and the field names the orchestrator gives
//! special meaning to. Defaults match the slicing backend and the default
//! slice options tree; a TOML file may override any subset.

use ouro_options::slice_options::{
    ADAPTIVE_SLICING_RATIO, DIST_BETWEEN_SLICES, MAX_DEPTH, NEUROGLANCER_ANNOTATION_LAYER,
    NEUROGLANCER_IMAGE_LAYER, NEUROGLANCER_JSON, OUTPUT_FILE_FOLDER, OUTPUT_FILE_NAME,
    SLICE_HEIGHT, SLICE_WIDTH, TARGET_SLICES_PER_BOX, USE_ADAPTIVE_SLICING,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::OrchestratorError;

/// Backend endpoint keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// On-demand visualization
    pub visualization: String,
    /// Slice job submission and lookup
    pub slice: String,
    /// Job deletion
    pub delete: String,
    /// Job progress stream
    pub status_stream: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            visualization: "/create_slice_visualization/".to_string(),
            slice: "/slice/".to_string(),
            delete: "/delete/".to_string(),
            status_stream: "/slice_status_stream/".to_string(),
        }
    }
}

/// Fields whose options depend on the layer-description file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerFields {
    /// Layer-description file field
    pub file: String,
    /// Image layer selector
    pub image: String,
    /// Annotation layer selector
    pub annotation: String,
}

impl Default for LayerFields {
    fn default() -> Self {
        Self {
            file: NEUROGLANCER_JSON.to_string(),
            image: NEUROGLANCER_IMAGE_LAYER.to_string(),
            annotation: NEUROGLANCER_ANNOTATION_LAYER.to_string(),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Backend base URL
    pub server_url: String,
    /// Endpoint keys
    pub endpoints: Endpoints,
    /// Fields whose change requests a new visualization
    pub trigger_fields: Vec<String>,
    /// Fields that must be non-empty before options are persisted
    pub required_output_fields: Vec<String>,
    /// Output folder field
    pub output_folder_field: String,
    /// Output base name field
    pub output_name_field: String,
    /// Layer-description field and its dependents
    pub layers: LayerFields,
    /// Pipeline step whose progress tracks bounding-box slicing
    pub bounding_box_step: String,
    /// Appended to the output name to form the options file name
    pub options_file_suffix: String,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl OrchestratorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With backend base URL
    #[inline]
    #[must_use]
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// With trigger set
    #[inline]
    #[must_use]
    pub fn with_trigger_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trigger_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// With required output fields
    #[inline]
    #[must_use]
    pub fn with_required_output_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_output_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// With request timeout
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    /// Request timeout
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether a change to `name` may request a visualization
    #[inline]
    #[must_use]
    pub fn is_trigger(&self, name: &str) -> bool {
        self.trigger_fields.iter().any(|field| field == name)
    }

    /// Whether a change to `name` starts a new visualization rather than
    /// refining the current one
    #[inline]
    #[must_use]
    pub fn starts_new_visualization(&self, name: &str) -> bool {
        name == self.layers.file || name == self.layers.annotation
    }

    /// Options file name for an output base name
    #[inline]
    #[must_use]
    pub fn options_file_name(&self, output_name: &str) -> String {
        format!("{output_name}{}", self.options_file_suffix)
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// `OrchestratorError::Config` if the text is not valid TOML for this type
    pub fn from_toml_str(text: &str) -> Result<Self, OrchestratorError> {
        toml::from_str(text).map_err(|e| OrchestratorError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// `OrchestratorError::Config` if the file cannot be read or parsed
    pub fn from_toml_file(path: &Path) -> Result<Self, OrchestratorError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| OrchestratorError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".to_string(),
            endpoints: Endpoints::default(),
            trigger_fields: [
                NEUROGLANCER_JSON,
                NEUROGLANCER_ANNOTATION_LAYER,
                SLICE_WIDTH,
                SLICE_HEIGHT,
                DIST_BETWEEN_SLICES,
                USE_ADAPTIVE_SLICING,
                ADAPTIVE_SLICING_RATIO,
                MAX_DEPTH,
                TARGET_SLICES_PER_BOX,
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            required_output_fields: [OUTPUT_FILE_FOLDER, OUTPUT_FILE_NAME, NEUROGLANCER_JSON]
                .iter()
                .map(ToString::to_string)
                .collect(),
            output_folder_field: OUTPUT_FILE_FOLDER.to_string(),
            output_name_field: OUTPUT_FILE_NAME.to_string(),
            layers: LayerFields::default(),
            bounding_box_step: "SliceParallelPipelineStep".to_string(),
            options_file_suffix: "-slice-options.json".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_backend() {
        let config = OrchestratorConfig::default();

        assert_eq!(config.endpoints.slice, "/slice/");
        assert!(config.is_trigger(SLICE_WIDTH));
        assert!(config.is_trigger(NEUROGLANCER_JSON));
        assert!(!config.is_trigger(OUTPUT_FILE_NAME));
        assert_eq!(config.options_file_name("sample"), "sample-slice-options.json");
    }

    #[test]
    fn default_triggers_are_leaves_of_the_slice_options() {
        let tree = ouro_options::slice_options().unwrap();
        let config = OrchestratorConfig::default();

        for field in &config.trigger_fields {
            let leaf = tree.path_of(field).and_then(|path| tree.get(&path));
            assert!(leaf.is_some(), "{field} is not an entry of the slice options");
        }
    }

    #[test]
    fn new_visualization_fields() {
        let config = OrchestratorConfig::default();

        assert!(config.starts_new_visualization(NEUROGLANCER_JSON));
        assert!(config.starts_new_visualization(NEUROGLANCER_ANNOTATION_LAYER));
        assert!(!config.starts_new_visualization(SLICE_WIDTH));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            server_url = "http://backend:9000"
            trigger_fields = ["slice_width"]

            [endpoints]
            slice = "/jobs/"
            "#,
        )
        .unwrap();

        assert_eq!(config.server_url, "http://backend:9000");
        assert_eq!(config.trigger_fields, vec!["slice_width"]);
        assert_eq!(config.endpoints.slice, "/jobs/");
        assert_eq!(config.endpoints.delete, "/delete/");
        assert_eq!(config.bounding_box_step, "SliceParallelPipelineStep");
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = OrchestratorConfig::from_toml_str("server_url = 12").unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn builders() {
        let config = OrchestratorConfig::new()
            .with_server_url("http://localhost:1")
            .with_trigger_fields(["a", "b"])
            .with_required_output_fields(Vec::<String>::new())
            .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.server_url, "http://localhost:1");
        assert!(config.is_trigger("b"));
        assert!(config.required_output_fields.is_empty());
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }
}
