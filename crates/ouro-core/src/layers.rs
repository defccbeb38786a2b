//! Layer-description (Neuroglancer state) parsing
//!
//! Only the `layers` array is read; each layer needs a `type` and a `name`.
//! Image and annotation layers with non-empty names become the choices of
//! the dependent selector fields.

use serde::Deserialize;

use crate::error::OrchestratorError;

#[derive(Debug, Deserialize)]
struct LayerDescription {
    layers: Vec<Layer>,
}

#[derive(Debug, Deserialize)]
struct Layer {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    name: String,
}

/// Selectable layer names, in file order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayerNames {
    /// Image layers
    pub image: Vec<String>,
    /// Annotation layers
    pub annotation: Vec<String>,
}

/// Parse layer names from a layer-description document
///
/// # Errors
/// `OrchestratorError::LayerDescription` if the text is not JSON or has no
/// `layers` array
pub fn parse_layers(text: &str) -> Result<LayerNames, OrchestratorError> {
    let description: LayerDescription = serde_json::from_str(text)
        .map_err(|e| OrchestratorError::LayerDescription(e.to_string()))?;

    let mut names = LayerNames::default();
    for layer in description.layers {
        if layer.name.is_empty() {
            continue;
        }
        match layer.kind.as_str() {
            "image" => names.image.push(layer.name),
            "annotation" => names.annotation.push(layer.name),
            _ => {}
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_image_and_annotation_layers() {
        let names = parse_layers(
            r#"{
                "layers": [
                    {"type": "image", "name": "em"},
                    {"type": "segmentation", "name": "seg"},
                    {"type": "annotation", "name": "path"},
                    {"type": "image", "name": ""},
                    {"type": "image", "name": "em2"}
                ],
                "position": [1, 2, 3]
            }"#,
        )
        .unwrap();

        assert_eq!(names.image, vec!["em", "em2"]);
        assert_eq!(names.annotation, vec!["path"]);
    }

    #[test]
    fn missing_layers_is_error() {
        assert!(matches!(
            parse_layers(r#"{"position": []}"#),
            Err(OrchestratorError::LayerDescription(_))
        ));
        assert!(parse_layers("").is_err());
    }
}
