//! Progress view over streamed status payloads
//!
//! The status stream reports per-step fractions. Payloads come in three
//! shapes, all accepted:
//! - a single item `{"step_name": "...", "fraction": 0.5}`
//! - a list of items or `["step", 0.5]` pairs
//! - an envelope `{"progress": [...], "done": bool, "error": ...}`
//!
//! Fractions are not assumed monotonic: the latest report for a step wins,
//! clamped into `[0, 1]`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OrchestratorError;

/// Fraction reported for one pipeline step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepProgress {
    /// Pipeline step name
    pub step_name: String,
    /// Completed fraction as reported
    pub fraction: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StepItem {
    Named { step_name: String, fraction: f64 },
    Pair(String, f64),
}

impl From<StepItem> for StepProgress {
    fn from(item: StepItem) -> Self {
        match item {
            StepItem::Named { step_name, fraction } | StepItem::Pair(step_name, fraction) => {
                Self {
                    step_name,
                    fraction,
                }
            }
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    progress: Vec<StepItem>,
    #[serde(default)]
    done: bool,
}

/// One decoded status payload
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusUpdate {
    /// Reported steps, in payload order
    pub steps: Vec<StepProgress>,
    /// Whether the payload marks the end of the job
    pub done: bool,
}

/// Decode a status payload
///
/// # Errors
/// `OrchestratorError::Channel` with a decode error if the payload has none
/// of the accepted shapes
pub fn decode_status(payload: &Value) -> Result<StatusUpdate, OrchestratorError> {
    let decode_err =
        |e: serde_json::Error| OrchestratorError::Channel(ouro_channel::ChannelError::from(e));

    match payload {
        Value::Array(_) => {
            let items: Vec<StepItem> = serde_json::from_value(payload.clone()).map_err(decode_err)?;
            Ok(StatusUpdate {
                steps: items.into_iter().map(Into::into).collect(),
                done: false,
            })
        }
        Value::Object(map) if map.contains_key("step_name") => {
            let item: StepItem = serde_json::from_value(payload.clone()).map_err(decode_err)?;
            Ok(StatusUpdate {
                steps: vec![item.into()],
                done: false,
            })
        }
        _ => {
            let envelope: Envelope = serde_json::from_value(payload.clone()).map_err(decode_err)?;
            Ok(StatusUpdate {
                steps: envelope.progress.into_iter().map(Into::into).collect(),
                done: envelope.done,
            })
        }
    }
}

/// Latest fraction per step, in first-seen order
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ProgressView {
    steps: IndexMap<String, f64>,
}

impl ProgressView {
    /// Create empty view
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one step report
    pub fn record(&mut self, step_name: impl Into<String>, fraction: f64) {
        let clamped = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self.steps.insert(step_name.into(), clamped);
    }

    /// Record every step of an update
    pub fn apply(&mut self, update: &StatusUpdate) {
        for step in &update.steps {
            self.record(step.step_name.clone(), step.fraction);
        }
    }

    /// Latest fraction for `step_name`
    #[inline]
    #[must_use]
    pub fn fraction(&self, step_name: &str) -> Option<f64> {
        self.steps.get(step_name).copied()
    }

    /// Steps and fractions in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.steps.iter().map(|(name, fraction)| (name.as_str(), *fraction))
    }

    /// Number of steps reported
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether nothing has been reported
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Forget all reports
    pub fn clear(&mut self) {
        self.steps.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decodes_all_payload_shapes() {
        let single = decode_status(&json!({"step_name": "Load", "fraction": 0.25})).unwrap();
        assert_eq!(single.steps[0].step_name, "Load");

        let pairs = decode_status(&json!([["Load", 1.0], ["Slice", 0.5]])).unwrap();
        assert_eq!(pairs.steps.len(), 2);

        let envelope = decode_status(&json!({
            "progress": [{"step_name": "Slice", "fraction": 1.0}],
            "done": true,
            "error": null
        }))
        .unwrap();
        assert!(envelope.done);
        assert_eq!(envelope.steps[0].fraction, 1.0);
    }

    #[test]
    fn malformed_payload_is_error() {
        assert!(decode_status(&json!({"step_name": "Load"})).is_err());
        assert!(decode_status(&json!(["Load"])).is_err());
    }

    #[test]
    fn last_write_wins_per_step() {
        let mut view = ProgressView::new();
        view.record("Load", 0.5);
        view.record("Slice", 0.1);
        view.record("Load", 0.3);

        assert_eq!(view.fraction("Load"), Some(0.3));
        let order: Vec<&str> = view.iter().map(|(name, _)| name).collect();
        assert_eq!(order, vec!["Load", "Slice"]);
    }

    #[test]
    fn fractions_are_clamped() {
        let mut view = ProgressView::new();
        view.record("a", 1.5);
        view.record("b", -0.2);
        view.record("c", f64::NAN);

        assert_eq!(view.fraction("a"), Some(1.0));
        assert_eq!(view.fraction("b"), Some(0.0));
        assert_eq!(view.fraction("c"), Some(0.0));
    }
}
