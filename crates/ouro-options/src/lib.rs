//! Ouroboros Options - hierarchical slice configuration
//!
//! The typed option tree a slicing job is described by:
//! - [`Entry`]: a named, typed leaf with optional enumerated choices
//! - [`CompoundEntry`]: an ordered, named group of entries and groups
//! - [`SchemaCodec`]: JSON schema derived from a tree, used to validate
//!   external documents before they are loaded
//! - [`KeyPath`] and [`find_paths_to_type`]: addressing leaves, e.g. every
//!   file-valued field so it can be made absolute before persisting
//!
//! Writes are permissive and validation is strict: an entry stores the best
//! coercion of whatever it is given, and only schema validation decides
//! whether a document is fit for the backend.
//!
//! # Example
//!
//! ```rust
//! use ouro_options::{slice_options, EntryType, SchemaCodec};
//! use serde_json::json;
//!
//! let mut tree = slice_options().unwrap();
//! tree.set_value(&json!({"slice_width": 64}));
//!
//! let codec = SchemaCodec::for_tree(&tree).unwrap();
//! assert!(codec.is_valid(&tree.to_object()));
//! assert_eq!(tree.find_paths_to_type(EntryType::FilePath).len(), 2);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod compound;
pub mod entry;
pub mod error;
pub mod path;
pub mod schema;
pub mod slice_options;

pub use compound::{CompoundEntry, EntryChange, NodeRef, OptionNode};
pub use entry::{Entry, EntryType, EntryValue, WidgetKind};
pub use error::{OptionsError, SchemaError};
pub use path::{find_paths_to_type, join_normalized, resolve_relative_paths, KeyPath};
pub use schema::{validate, SchemaCodec};
pub use slice_options::slice_options;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
