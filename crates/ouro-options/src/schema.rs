//! Schema derivation and validation
//!
//! Derives a JSON schema from an option tree and validates external JSON
//! documents against it with `jsonschema`:
//! - leaves become typed fields (`enum` when the entry has a non-empty
//!   option set; an empty set means the choices are not known yet)
//! - compounds become nested objects whose children are all required

use jsonschema::JSONSchema;
use serde_json::{json, Map, Value};
use std::fmt;

use crate::compound::{CompoundEntry, OptionNode};
use crate::entry::{Entry, EntryType};
use crate::error::SchemaError;

/// Schema fragment for a single leaf
#[must_use]
pub fn entry_schema(entry: &Entry) -> Value {
    match (entry.entry_type(), entry.options()) {
        (EntryType::Number, _) => json!({ "type": "number" }),
        (EntryType::Boolean, _) => json!({ "type": "boolean" }),
        (EntryType::String, Some(options)) if !options.is_empty() => json!({ "type": "string", "enum": options }),
        (EntryType::String | EntryType::FilePath, _) => json!({ "type": "string" }),
    }
}

/// Schema for a compound and everything below it
#[must_use]
pub fn compound_schema(compound: &CompoundEntry) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::with_capacity(compound.children().len());

    for child in compound.children() {
        let fragment = match child {
            OptionNode::Entry(entry) => entry_schema(entry),
            OptionNode::Compound(nested) => compound_schema(nested),
        };
        properties.insert(child.name().to_string(), fragment);
        required.push(Value::String(child.name().to_string()));
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Validate `json` against a schema document
///
/// # Errors
/// `SchemaError::Compile` if `schema` is not a valid schema,
/// `SchemaError::Invalid` if `json` does not fit it
pub fn validate(json: &Value, schema: &Value) -> Result<Value, SchemaError> {
    SchemaCodec::new(schema.clone())?.validate(json)
}

/// A compiled schema for one option tree
pub struct SchemaCodec {
    schema: Value,
    compiled: JSONSchema,
}

impl SchemaCodec {
    /// Compile a schema document
    ///
    /// # Errors
    /// `SchemaError::Compile` if the document is not a valid schema
    pub fn new(schema: Value) -> Result<Self, SchemaError> {
        let compiled =
            JSONSchema::compile(&schema).map_err(|e| SchemaError::Compile(e.to_string()))?;
        Ok(Self { schema, compiled })
    }

    /// Compile the schema derived from a tree
    ///
    /// # Errors
    /// `SchemaError::Compile` if the derived schema does not compile
    #[inline]
    pub fn for_tree(tree: &CompoundEntry) -> Result<Self, SchemaError> {
        Self::new(tree.to_schema())
    }

    /// The schema document
    #[inline]
    #[must_use]
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Validate a document, returning it unchanged on success
    ///
    /// # Errors
    /// `SchemaError::Invalid` listing every violation
    pub fn validate(&self, json: &Value) -> Result<Value, SchemaError> {
        let reasons: Vec<String> = match self.compiled.validate(json) {
            Ok(()) => return Ok(json.clone()),
            Err(errors) => errors
                .map(|error| {
                    let location = error.instance_path.to_string();
                    if location.is_empty() {
                        error.to_string()
                    } else {
                        format!("{location}: {error}")
                    }
                })
                .collect(),
        };
        tracing::debug!(violations = reasons.len(), "document rejected by schema");
        Err(SchemaError::Invalid { reasons })
    }

    /// Whether a document fits the schema
    #[inline]
    #[must_use]
    pub fn is_valid(&self, json: &Value) -> bool {
        self.compiled.is_valid(json)
    }
}

impl fmt::Debug for SchemaCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaCodec")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tree() -> CompoundEntry {
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
                Entry::string("layer", "Layer", "a").with_options(["a", "b"]).into(),
                Entry::boolean("flush_cache", "Flush Cache", false).into(),
                Entry::file_path("source", "Source", "").into(),
                bounding_box.into(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn schema_mirrors_tree() {
        let schema = tree().to_schema();

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["slice_width"], json!({"type": "number"}));
        assert_eq!(
            schema["properties"]["layer"],
            json!({"type": "string", "enum": ["a", "b"]})
        );
        assert_eq!(schema["properties"]["source"], json!({"type": "string"}));
        assert_eq!(
            schema["properties"]["bounding_box"]["required"],
            json!(["x", "y", "z"])
        );
    }

    #[test]
    fn tree_object_validates_against_own_schema() {
        let tree = tree();
        let codec = SchemaCodec::for_tree(&tree).unwrap();

        let value = codec.validate(&tree.to_object()).unwrap();
        assert_eq!(value, tree.to_object());
    }

    #[test]
    fn missing_nested_key_fails() {
        let codec = SchemaCodec::for_tree(&tree()).unwrap();
        let doc = json!({
            "slice_width": 1,
            "layer": "a",
            "flush_cache": true,
            "source": "",
            "bounding_box": {"x": 1, "y": 2}
        });

        let err = codec.validate(&doc).unwrap_err();
        assert!(matches!(err, SchemaError::Invalid { .. }));
        assert!(err.to_string().contains('z'));
    }

    #[test]
    fn wrong_type_and_option_fail() {
        let codec = SchemaCodec::for_tree(&tree()).unwrap();
        let doc = json!({
            "slice_width": "wide",
            "layer": "c",
            "flush_cache": true,
            "source": "",
            "bounding_box": {"x": 1, "y": 2, "z": 3}
        });

        let err = codec.validate(&doc).unwrap_err();
        assert_eq!(err.reasons().len(), 2);
        assert!(!codec.is_valid(&doc));
    }

    #[test]
    fn nan_number_fails_validation() {
        let mut tree = tree();
        tree.set_value(&json!({"slice_width": "not a number"}));

        let result = validate(&tree.to_object(), &tree.to_schema());
        assert!(result.is_err());
    }

    #[test]
    fn empty_option_set_accepts_any_string() {
        let entry = Entry::string("layer", "Layer", "").with_options(Vec::<String>::new());
        assert_eq!(entry_schema(&entry), json!({"type": "string"}));
    }

    #[test]
    fn invalid_schema_document_is_compile_error() {
        let result = SchemaCodec::new(json!({"type": 12}));
        assert!(matches!(result, Err(SchemaError::Compile(_))));
    }
}
