//! Key paths into option trees
//!
//! Provides [`KeyPath`] for addressing entries by the names from the root's
//! children down to a leaf, and the path-resolution helpers used to turn
//! relative file-valued fields into absolute paths before persisting.

use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::compound::CompoundEntry;
use crate::entry::EntryType;
use crate::error::OptionsError;

/// Path within an option tree
///
/// # Examples
/// - `["slice_width"]` → `slice_width`
/// - `["bounding_box_params", "max_depth"]` → `bounding_box_params.max_depth`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    /// Create path from a single segment
    #[inline]
    #[must_use]
    pub fn single(segment: impl Into<String>) -> Self {
        Self(vec![segment.into()])
    }

    /// Empty path (root)
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Get path segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Get number of segments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if path is empty (root)
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get last segment (if not root)
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Append a segment, returning new path
    #[inline]
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut new = self.clone();
        new.0.push(segment.into());
        new
    }

    /// Look the path up inside a plain JSON object
    #[must_use]
    pub fn lookup<'a>(&self, object: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(object, |current, segment| current.as_object()?.get(segment))
    }

    /// Mutable lookup inside a plain JSON object
    #[must_use]
    pub fn lookup_mut<'a>(&self, object: &'a mut Value) -> Option<&'a mut Value> {
        self.0
            .iter()
            .try_fold(object, |current, segment| current.as_object_mut()?.get_mut(segment))
    }
}

impl Display for KeyPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl FromStr for KeyPath {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        let segments: Vec<String> = s.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(OptionsError::InvalidPath(s.to_string()));
        }
        Ok(Self(segments))
    }
}

impl From<&[&str]> for KeyPath {
    fn from(segments: &[&str]) -> Self {
        Self(segments.iter().map(|s| (*s).to_string()).collect())
    }
}

/// Every key path whose leaf has the requested type, in document order
#[must_use]
pub fn find_paths_to_type(root: &CompoundEntry, entry_type: EntryType) -> Vec<KeyPath> {
    let mut paths = Vec::new();
    root.visit_entries(&mut |path, entry| {
        if entry.entry_type() == entry_type {
            paths.push(path.clone());
        }
    });
    paths
}

/// Rewrite relative file paths inside a `to_object` document to absolute
/// paths under `base`
///
/// Only string values starting with `.` are rewritten; paths that do not
/// resolve to a string are skipped. Returns the number of values rewritten.
pub fn resolve_relative_paths(object: &mut Value, paths: &[KeyPath], base: &Path) -> usize {
    let mut rewritten = 0;
    for path in paths {
        let Some(slot) = path.lookup_mut(object) else {
            continue;
        };
        let Some(relative) = slot.as_str().filter(|s| s.starts_with('.')) else {
            continue;
        };
        let absolute = join_normalized(base, Path::new(relative));
        tracing::debug!(%path, relative, absolute = %absolute.display(), "resolved relative path");
        *slot = Value::String(absolute.to_string_lossy().into_owned());
        rewritten += 1;
    }
    rewritten
}

/// Join `relative` onto `base`, folding `.` and `..` components lexically
#[must_use]
pub fn join_normalized(base: &Path, relative: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in base.join(relative).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_path_display_and_parse() {
        let path: KeyPath = "bounding_box.x".parse().unwrap();
        assert_eq!(path.segments(), &["bounding_box".to_string(), "x".to_string()]);
        assert_eq!(path.to_string(), "bounding_box.x");
        assert_eq!(path.last(), Some("x"));
        assert!("a..b".parse::<KeyPath>().is_err());
    }

    #[test]
    fn key_path_lookup() {
        let doc = json!({"bounding_box": {"x": 1}, "slice_width": 10});
        let path: KeyPath = "bounding_box.x".parse().unwrap();

        assert_eq!(path.lookup(&doc), Some(&json!(1)));
        assert_eq!(KeyPath::single("missing").lookup(&doc), None);
        assert_eq!(path.child("deeper").lookup(&doc), None);
    }

    #[test]
    fn resolves_only_dot_relative_values() {
        let mut doc = json!({
            "neuroglancer_json": "./data/state.json",
            "output_file_folder": "/abs/out",
            "nested": {"file": "../up.json"}
        });
        let paths = vec![
            KeyPath::single("neuroglancer_json"),
            KeyPath::single("output_file_folder"),
            KeyPath::from(&["nested", "file"][..]),
            KeyPath::single("missing"),
        ];

        let count = resolve_relative_paths(&mut doc, &paths, Path::new("/work/project"));

        assert_eq!(count, 2);
        assert_eq!(doc["neuroglancer_json"], json!("/work/project/data/state.json"));
        assert_eq!(doc["output_file_folder"], json!("/abs/out"));
        assert_eq!(doc["nested"]["file"], json!("/work/up.json"));
    }
}
