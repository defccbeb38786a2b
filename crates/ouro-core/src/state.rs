//! Orchestrator state machine
//!
//! Idle → AwaitingVisualization → VisualizationStreaming → Idle
//! Idle → AwaitingSlice → SliceStreaming → Idle
//!
//! A submission may pre-empt any visualization work, and a new trigger edit
//! may supersede an outstanding visualization request.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::OrchestratorError;

/// Orchestrator states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    /// Nothing in flight
    #[default]
    Idle,
    /// Visualization request issued, no response yet
    AwaitingVisualization,
    /// Visualization task reporting progress
    VisualizationStreaming,
    /// Slice request issued, no response yet
    AwaitingSlice,
    /// Slice job reporting progress
    SliceStreaming,
}

impl OrchestratorState {
    /// All states
    pub const ALL: [Self; 5] = [
        Self::Idle,
        Self::AwaitingVisualization,
        Self::VisualizationStreaming,
        Self::AwaitingSlice,
        Self::SliceStreaming,
    ];

    /// State name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingVisualization => "awaiting_visualization",
            Self::VisualizationStreaming => "visualization_streaming",
            Self::AwaitingSlice => "awaiting_slice",
            Self::SliceStreaming => "slice_streaming",
        }
    }

    /// Whether a progress stream is in flight
    #[inline]
    #[must_use]
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::VisualizationStreaming | Self::SliceStreaming)
    }

    /// Whether a one-shot request is awaiting its response
    #[inline]
    #[must_use]
    pub fn is_awaiting(self) -> bool {
        matches!(self, Self::AwaitingVisualization | Self::AwaitingSlice)
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States reachable from `from`
#[must_use]
pub fn allowed_transitions(from: OrchestratorState) -> &'static [OrchestratorState] {
    use OrchestratorState::{
        AwaitingSlice, AwaitingVisualization, Idle, SliceStreaming, VisualizationStreaming,
    };
    match from {
        Idle => &[AwaitingVisualization, AwaitingSlice],
        AwaitingVisualization => &[
            AwaitingVisualization,
            VisualizationStreaming,
            Idle,
            AwaitingSlice,
        ],
        VisualizationStreaming => &[Idle, AwaitingSlice],
        AwaitingSlice => &[SliceStreaming, Idle],
        SliceStreaming => &[Idle, AwaitingSlice],
    }
}

/// Check a transition against [`allowed_transitions`]
///
/// # Errors
/// `OrchestratorError::InvalidTransition` if `to` is not reachable from `from`
pub fn validate_transition(
    from: OrchestratorState,
    to: OrchestratorState,
) -> Result<(), OrchestratorError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrchestratorState::*;

    #[test]
    fn idle_transitions() {
        assert!(validate_transition(Idle, AwaitingVisualization).is_ok());
        assert!(validate_transition(Idle, AwaitingSlice).is_ok());

        assert!(validate_transition(Idle, SliceStreaming).is_err());
        assert!(validate_transition(Idle, Idle).is_err());
    }

    #[test]
    fn streams_only_end_or_yield_to_submission() {
        for streaming in [VisualizationStreaming, SliceStreaming] {
            assert!(validate_transition(streaming, Idle).is_ok());
            assert!(validate_transition(streaming, AwaitingSlice).is_ok());
            assert!(validate_transition(streaming, AwaitingVisualization).is_err());
        }
    }

    #[test]
    fn pending_slice_blocks_resubmission() {
        assert!(validate_transition(AwaitingSlice, AwaitingSlice).is_err());
        assert!(validate_transition(AwaitingSlice, AwaitingVisualization).is_err());
        assert!(validate_transition(AwaitingSlice, SliceStreaming).is_ok());
    }

    #[test]
    fn streaming_and_awaiting_are_disjoint() {
        for state in OrchestratorState::ALL {
            assert!(!(state.is_streaming() && state.is_awaiting()));
        }
        assert!(!Idle.is_streaming() && !Idle.is_awaiting());
    }

    #[test]
    fn state_names_round_trip_through_serde() {
        let json = serde_json::to_string(&AwaitingSlice).unwrap();
        assert_eq!(json, "\"awaiting_slice\"");
        assert_eq!(json.trim_matches('"'), AwaitingSlice.as_str());
    }
}
