//! Error types for the options model
//!
//! Entry writes never fail; these errors cover tree construction, path
//! addressing and schema validation.

/// Errors from building or addressing an option tree
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    /// Two siblings share a name
    #[error("duplicate name '{name}' under '{parent}'")]
    DuplicateName { name: String, parent: String },

    /// No leaf lives at the path
    #[error("no entry at path: {0}")]
    PathNotFound(String),

    /// Path text could not be parsed
    #[error("invalid key path: '{0}'")]
    InvalidPath(String),

    /// Unknown entry type name
    #[error("unknown entry type: '{0}'")]
    UnknownType(String),

    /// Schema derivation or validation failed
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Errors from schema compilation and validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// The schema document itself is not a valid JSON schema
    #[error("invalid schema: {0}")]
    Compile(String),

    /// The document does not fit the schema
    #[error("validation failed: {}", reasons.join("; "))]
    Invalid {
        /// One human-readable line per violation
        reasons: Vec<String>,
    },
}

impl SchemaError {
    /// Violation lines, empty for compile errors
    #[inline]
    #[must_use]
    pub fn reasons(&self) -> &[String] {
        match self {
            Self::Compile(_) => &[],
            Self::Invalid { reasons } => reasons,
        }
    }
}
