//! Leaf option entries
//!
//! An [`Entry`] is a single typed, named field of a slice configuration.
//! Writes are permissive: [`Entry::set_value`] never fails and stores the
//! best-effort coercion of its input. Unfit values (a `NaN` number, a string
//! outside `options`) are reported later by schema validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::OptionsError;

/// Largest integer magnitude that round-trips exactly through an `f64`
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Declared type of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryType {
    /// Floating point number
    Number,
    /// Free text, or a choice when `options` is set
    String,
    /// Flag
    Boolean,
    /// Path to a file or folder
    FilePath,
}

impl EntryType {
    /// Wire name of the type
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::FilePath => "filePath",
        }
    }

    /// Input widget used to edit an entry of this type
    #[inline]
    #[must_use]
    pub fn widget_kind(self, has_options: bool) -> WidgetKind {
        match self {
            Self::Number => WidgetKind::Number,
            Self::String if has_options => WidgetKind::Select,
            Self::String | Self::FilePath => WidgetKind::Text,
            Self::Boolean => WidgetKind::Checkbox,
        }
    }

    /// Coerce a raw input into a value of this type
    #[must_use]
    pub fn coerce(self, raw: &Value) -> EntryValue {
        match self {
            Self::Number => EntryValue::Number(coerce_number(raw)),
            Self::Boolean => EntryValue::Bool(matches!(raw, Value::Bool(true))
                || raw.as_str() == Some("true")),
            Self::String | Self::FilePath => EntryValue::Text(match raw {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            }),
        }
    }
}

impl Display for EntryType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "number" => Ok(Self::Number),
            "string" => Ok(Self::String),
            "boolean" => Ok(Self::Boolean),
            "filePath" => Ok(Self::FilePath),
            other => Err(OptionsError::UnknownType(other.to_string())),
        }
    }
}

/// Presentation widget for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetKind {
    /// Numeric input
    Number,
    /// Single line text input
    Text,
    /// Drop-down restricted to `options`
    Select,
    /// Checkbox
    Checkbox,
}

/// Current value of an entry
///
/// Two `NaN` numbers compare equal, so a stored `NaN` survives a
/// `to_json` / `set_value` round trip as the same value.
#[derive(Debug, Clone)]
pub enum EntryValue {
    /// Number value, possibly `NaN` after a non-numeric write
    Number(f64),
    /// String or file path value
    Text(String),
    /// Boolean value
    Bool(bool),
}

impl EntryValue {
    /// JSON form of the value
    ///
    /// Integral numbers serialize as JSON integers; `NaN` and infinities
    /// have no JSON form and become `null`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
                #[allow(clippy::cast_possible_truncation)]
                Value::from(*n as i64)
            }
            Self::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
            Self::Text(s) => Value::String(s.clone()),
            Self::Bool(b) => Value::Bool(*b),
        }
    }

    /// Whether the value counts as "not filled in"
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Text(s) if s.is_empty())
    }

    /// Text content, if this is a string value
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric content, if this is a number value
    #[inline]
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean content, if this is a boolean value
    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl PartialEq for EntryValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Display for EntryValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<f64> for EntryValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for EntryValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for EntryValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for EntryValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Numeric coercion with the permissive semantics of an interactive field:
/// blank text and `false` read as zero, `true` as one, and anything
/// unparseable as `NaN`.
///
/// `null` is what a non-finite number serializes to, so it reads back as
/// `NaN`. Text that parses to an infinity is `NaN` as well.
fn coerce_number(raw: &Value) -> f64 {
    match raw {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse::<f64>().ok().filter(|n| n.is_finite()).unwrap_or(f64::NAN)
            }
        }
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Null => f64::NAN,
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

/// A single typed configuration field
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    name: String,
    label: String,
    description: String,
    entry_type: EntryType,
    value: EntryValue,
    options: Option<Vec<String>>,
    separator: bool,
}

impl Entry {
    /// Create an entry with an initial value
    ///
    /// The initial value is coerced to `entry_type`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        entry_type: EntryType,
        value: &Value,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            description: String::new(),
            entry_type,
            value: entry_type.coerce(value),
            options: None,
            separator: false,
        }
    }

    /// Number entry
    #[inline]
    #[must_use]
    pub fn number(name: impl Into<String>, label: impl Into<String>, value: f64) -> Self {
        Self::new(name, label, EntryType::Number, &Value::Null).with_value(EntryValue::Number(value))
    }

    /// String entry
    #[inline]
    #[must_use]
    pub fn string(name: impl Into<String>, label: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, label, EntryType::String, &Value::String(value.into()))
    }

    /// Boolean entry
    #[inline]
    #[must_use]
    pub fn boolean(name: impl Into<String>, label: impl Into<String>, value: bool) -> Self {
        Self::new(name, label, EntryType::Boolean, &Value::Bool(value))
    }

    /// File path entry
    #[inline]
    #[must_use]
    pub fn file_path(name: impl Into<String>, label: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, label, EntryType::FilePath, &Value::String(value.into()))
    }

    #[inline]
    fn with_value(mut self, value: EntryValue) -> Self {
        self.value = value;
        self
    }

    /// With description (tooltip text)
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// With a closed set of permitted values
    #[inline]
    #[must_use]
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    /// Draw a separator after this entry
    #[inline]
    #[must_use]
    pub fn with_separator(mut self) -> Self {
        self.separator = true;
        self
    }

    /// Store a raw input, coerced to the entry type
    ///
    /// Returns the previous value. Never fails.
    pub fn set_value(&mut self, raw: &Value) -> EntryValue {
        let coerced = self.entry_type.coerce(raw);
        std::mem::replace(&mut self.value, coerced)
    }

    /// Replace the permitted values
    #[inline]
    pub fn set_options(&mut self, options: Option<Vec<String>>) {
        self.options = options;
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

    /// Description text
    #[inline]
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Declared type
    #[inline]
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    /// Current value
    #[inline]
    #[must_use]
    pub fn value(&self) -> &EntryValue {
        &self.value
    }

    /// Permitted values, if restricted
    #[inline]
    #[must_use]
    pub fn options(&self) -> Option<&[String]> {
        self.options.as_deref()
    }

    /// Whether a separator follows this entry
    #[inline]
    #[must_use]
    pub fn separator(&self) -> bool {
        self.separator
    }

    /// Widget used to edit this entry
    #[inline]
    #[must_use]
    pub fn widget_kind(&self) -> WidgetKind {
        self.entry_type.widget_kind(self.options.is_some())
    }
}
