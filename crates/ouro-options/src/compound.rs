//! Composite option nodes
//!
//! A [`CompoundEntry`] is an ordered, named group of [`OptionNode`]s. The
//! root compound of a tree describes one complete job configuration.
//!
//! All mutation goes through the tree's own API and reports what changed as
//! [`EntryChange`] events, so the owner can react to the specific field
//! rather than to "the tree changed".

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::entry::{Entry, EntryType, EntryValue};
use crate::error::OptionsError;
use crate::path::{self, KeyPath};
use crate::schema;

/// Either a leaf entry or a nested compound
#[derive(Debug, Clone, PartialEq)]
pub enum OptionNode {
    /// Typed leaf
    Entry(Entry),
    /// Nested group
    Compound(CompoundEntry),
}

impl OptionNode {
    /// Node name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Entry(entry) => entry.name(),
            Self::Compound(compound) => compound.name(),
        }
    }

    /// Leaf view, if this is a leaf
    #[inline]
    #[must_use]
    pub fn as_entry(&self) -> Option<&Entry> {
        match self {
            Self::Entry(entry) => Some(entry),
            Self::Compound(_) => None,
        }
    }

    /// Compound view, if this is a compound
    #[inline]
    #[must_use]
    pub fn as_compound(&self) -> Option<&CompoundEntry> {
        match self {
            Self::Entry(_) => None,
            Self::Compound(compound) => Some(compound),
        }
    }

    /// Plain JSON value of the node
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Entry(entry) => entry.value().to_json(),
            Self::Compound(compound) => compound.to_object(),
        }
    }
}

impl From<Entry> for OptionNode {
    fn from(entry: Entry) -> Self {
        Self::Entry(entry)
    }
}

impl From<CompoundEntry> for OptionNode {
    fn from(compound: CompoundEntry) -> Self {
        Self::Compound(compound)
    }
}

/// Borrowed view of any node, including a root compound
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeRef<'a> {
    /// Leaf
    Entry(&'a Entry),
    /// Group
    Compound(&'a CompoundEntry),
}

impl<'a> NodeRef<'a> {
    /// Node name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'a str {
        match self {
            Self::Entry(entry) => entry.name(),
            Self::Compound(compound) => compound.name(),
        }
    }

    /// Leaf view
    #[inline]
    #[must_use]
    pub fn as_entry(&self) -> Option<&'a Entry> {
        match self {
            Self::Entry(entry) => Some(entry),
            Self::Compound(_) => None,
        }
    }
}

/// A single leaf mutation
#[derive(Debug, Clone, PartialEq)]
pub struct EntryChange {
    /// Path of the changed leaf
    pub path: KeyPath,
    /// Value before the write
    pub old_value: EntryValue,
    /// Value after the write
    pub new_value: EntryValue,
}

impl EntryChange {
    /// Name of the changed leaf
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.last().unwrap_or_default()
    }

    /// Whether the new value is blank
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_value.is_empty()
    }
}

/// Ordered, named group of option nodes
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundEntry {
    name: String,
    label: String,
    children: Vec<OptionNode>,
}

impl CompoundEntry {
    /// Create an empty compound
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            children: Vec::new(),
        }
    }

    /// Create a compound from its children
    ///
    /// # Errors
    /// `OptionsError::DuplicateName` if two children share a name
    pub fn from_children(
        name: impl Into<String>,
        label: impl Into<String>,
        children: impl IntoIterator<Item = OptionNode>,
    ) -> Result<Self, OptionsError> {
        children
            .into_iter()
            .try_fold(Self::new(name, label), |compound, node| compound.with(node))
    }

    /// Append a child, builder style
    ///
    /// # Errors
    /// `OptionsError::DuplicateName` if a sibling already has the name
    pub fn with(mut self, node: impl Into<OptionNode>) -> Result<Self, OptionsError> {
        self.push(node)?;
        Ok(self)
    }

    /// Append a child
    ///
    /// # Errors
    /// `OptionsError::DuplicateName` if a sibling already has the name
    pub fn push(&mut self, node: impl Into<OptionNode>) -> Result<(), OptionsError> {
        let node = node.into();
        if self.children.iter().any(|c| c.name() == node.name()) {
            return Err(OptionsError::DuplicateName {
                name: node.name().to_string(),
                parent: self.name.clone(),
            });
        }
        self.children.push(node);
        Ok(())
    }

    /// Name, unique among siblings
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display label
    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Children in insertion order
    #[inline]
    #[must_use]
    pub fn children(&self) -> &[OptionNode] {
        &self.children
    }

    /// Nested key→value mapping mirroring the tree
    #[must_use]
    pub fn to_object(&self) -> Value {
        let map: Map<String, Value> = self
            .children
            .iter()
            .map(|child| (child.name().to_string(), child.to_json()))
            .collect();
        Value::Object(map)
    }

    /// Assign leaf values from a nested mapping
    ///
    /// Keys are matched by name at each level. Keys missing from `nested`
    /// leave the corresponding entries untouched; a non-object `nested` is a
    /// no-op. Returns the changes in document order.
    pub fn set_value(&mut self, nested: &Value) -> Vec<EntryChange> {
        let mut changes = Vec::new();
        self.assign(&KeyPath::root(), nested, &mut changes);
        changes
    }

    fn assign(&mut self, prefix: &KeyPath, nested: &Value, changes: &mut Vec<EntryChange>) {
        let Some(map) = nested.as_object() else {
            return;
        };
        for child in &mut self.children {
            let Some(raw) = map.get(child.name()) else {
                continue;
            };
            let path = prefix.child(child.name());
            match child {
                OptionNode::Entry(entry) => {
                    let old_value = entry.set_value(raw);
                    if &old_value != entry.value() {
                        changes.push(EntryChange {
                            path,
                            old_value,
                            new_value: entry.value().clone(),
                        });
                    }
                }
                OptionNode::Compound(compound) => compound.assign(&path, raw, changes),
            }
        }
    }

    /// JSON schema mirroring the tree
    #[inline]
    #[must_use]
    pub fn to_schema(&self) -> Value {
        schema::compound_schema(self)
    }

    /// First node named `name`, depth-first in document order
    ///
    /// The root itself is considered first. Names are only required to be
    /// unique among siblings, so a name repeated at different depths
    /// resolves to the earliest occurrence.
    #[must_use]
    pub fn find_entry(&self, name: &str) -> Option<NodeRef<'_>> {
        if self.name == name {
            return Some(NodeRef::Compound(self));
        }
        self.children.iter().find_map(|child| match child {
            OptionNode::Entry(entry) => (entry.name() == name).then_some(NodeRef::Entry(entry)),
            OptionNode::Compound(compound) => compound.find_entry(name),
        })
    }

    /// Path of the first leaf named `name`, in document order
    #[must_use]
    pub fn path_of(&self, name: &str) -> Option<KeyPath> {
        let mut found = None;
        self.visit_entries(&mut |path, entry| {
            if found.is_none() && entry.name() == name {
                found = Some(path.clone());
            }
        });
        found
    }

    /// Every key path whose leaf has type `entry_type`
    #[inline]
    #[must_use]
    pub fn find_paths_to_type(&self, entry_type: EntryType) -> Vec<KeyPath> {
        path::find_paths_to_type(self, entry_type)
    }

    /// Leaf at `path`
    #[must_use]
    pub fn get(&self, path: &KeyPath) -> Option<&Entry> {
        let (last, parents) = path.segments().split_last()?;
        let mut current = self;
        for segment in parents {
            current = current.child(segment)?.as_compound()?;
        }
        current.child(last)?.as_entry()
    }

    /// Mutable leaf at `path`
    #[must_use]
    pub fn get_mut(&mut self, path: &KeyPath) -> Option<&mut Entry> {
        let (last, parents) = path.segments().split_last()?;
        let mut current = self;
        for segment in parents {
            current = match current.child_mut(segment)? {
                OptionNode::Compound(compound) => compound,
                OptionNode::Entry(_) => return None,
            };
        }
        match current.child_mut(last)? {
            OptionNode::Entry(entry) => Some(entry),
            OptionNode::Compound(_) => None,
        }
    }

    /// Write one leaf addressed by path
    ///
    /// # Errors
    /// `OptionsError::PathNotFound` if no leaf lives at `path`
    pub fn set_at(&mut self, path: &KeyPath, raw: &Value) -> Result<EntryChange, OptionsError> {
        let entry = self
            .get_mut(path)
            .ok_or_else(|| OptionsError::PathNotFound(path.to_string()))?;
        let old_value = entry.set_value(raw);
        Ok(EntryChange {
            path: path.clone(),
            old_value,
            new_value: entry.value().clone(),
        })
    }

    /// Walk every leaf in document order with its path
    pub fn visit_entries(&self, f: &mut impl FnMut(&KeyPath, &Entry)) {
        self.visit_from(&KeyPath::root(), f);
    }

    fn visit_from(&self, prefix: &KeyPath, f: &mut impl FnMut(&KeyPath, &Entry)) {
        for child in &self.children {
            let path = prefix.child(child.name());
            match child {
                OptionNode::Entry(entry) => f(&path, entry),
                OptionNode::Compound(compound) => compound.visit_from(&path, f),
            }
        }
    }

    /// Names occurring more than once anywhere in the tree
    ///
    /// Sibling uniqueness is enforced on insertion; this reports repeats
    /// across different depths, which make [`find_entry`](Self::find_entry)
    /// ambiguous.
    #[must_use]
    pub fn duplicate_names(&self) -> Vec<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut order = Vec::new();
        self.count_names(&mut counts, &mut order);
        order
            .into_iter()
            .filter(|name| counts.get(name).copied().unwrap_or_default() > 1)
            .map(str::to_string)
            .collect()
    }

    fn count_names<'a>(&'a self, counts: &mut HashMap<&'a str, usize>, order: &mut Vec<&'a str>) {
        for child in &self.children {
            let count = counts.entry(child.name()).or_insert(0);
            *count += 1;
            if *count == 1 {
                order.push(child.name());
            }
            if let OptionNode::Compound(compound) = child {
                compound.count_names(counts, order);
            }
        }
    }

    #[inline]
    fn child(&self, name: &str) -> Option<&OptionNode> {
        self.children.iter().find(|c| c.name() == name)
    }

    #[inline]
    fn child_mut(&mut self, name: &str) -> Option<&mut OptionNode> {
        self.children.iter_mut().find(|c| c.name() == name)
    }
}
