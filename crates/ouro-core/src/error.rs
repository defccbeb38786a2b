//! Error types for the change orchestrator
//!
//! Covers:
//! - Tree addressing and schema failures (from `ouro-options`)
//! - Transport and backend failures (from `ouro-channel`)
//! - Rejected state transitions
//! - Malformed options or layer-description files
//! - Configuration loading

use ouro_channel::ChannelError;
use ouro_options::{OptionsError, SchemaError};

use crate::state::OrchestratorState;

/// Main orchestrator error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestratorError {
    /// Option tree error
    #[error("options error: {0}")]
    Options(#[from] OptionsError),

    /// Backend request failed
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// State machine rejected a transition
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: OrchestratorState,
        /// Requested state
        to: OrchestratorState,
    },

    /// Options file is not JSON
    #[error("invalid JSON file: {0}")]
    InvalidJson(String),

    /// Options file does not fit the option tree
    #[error("wrong options file format: {0}")]
    WrongFormat(#[from] SchemaError),

    /// Layer-description file could not be parsed
    #[error("invalid layer description: {0}")]
    LayerDescription(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),
}
