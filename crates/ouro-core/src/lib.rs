//! Ouroboros Core - change orchestration for slice options
//!
//! Connects the option tree to the slicing backend:
//! - Decides from each edit whether to persist options and request a
//!   visualization
//! - Replaces slice jobs with delete-before-recreate ordering
//! - Loads and validates options files
//! - Merges streamed progress into one [`ProgressView`]
//!
//! # Example
//!
//! ```rust,ignore
//! use ouro_channel::{HttpTransport, RequestChannel};
//! use ouro_core::{ChangeOrchestrator, OrchestratorConfig, Services};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OrchestratorConfig::new();
//! let transport = Arc::new(HttpTransport::with_timeout(&config.server_url, config.request_timeout())?);
//! let (channel, mut events) = RequestChannel::new(transport);
//! let mut orchestrator =
//!     ChangeOrchestrator::with_slice_options(config, channel, Services::local("."))?;
//!
//! orchestrator.load_options_file("sample-slice-options.json".as_ref()).await?;
//! orchestrator.submit().await?;
//! orchestrator
//!     .run_until_idle(&mut events, |o| println!("{:?}", o.progress()))
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod config;
pub mod error;
pub mod layers;
pub mod orchestrator;
pub mod progress;
pub mod services;
pub mod state;

// Re-exports for convenience
pub use config::{Endpoints, LayerFields, OrchestratorConfig};
pub use error::OrchestratorError;
pub use layers::{parse_layers, LayerNames};
pub use orchestrator::{
    job_identity, to_pretty_json, ChangeOrchestrator, Command, INVALID_JSON_ALERT,
    WRONG_FORMAT_ALERT,
};
pub use progress::{decode_status, ProgressView, StatusUpdate, StepProgress};
pub use services::{Alert, AlertSink, FileStore, FsFileStore, Services, Severity, TracingAlerts};
pub use state::{allowed_transitions, validate_transition, OrchestratorState};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the orchestrator
    pub use crate::{
        Alert, AlertSink, ChangeOrchestrator, Command, FileStore, OrchestratorConfig,
        OrchestratorError, OrchestratorState, ProgressView, Services, Severity,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
