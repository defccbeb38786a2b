//! Ouroboros Channel - backend requests and progress streams
//!
//! Keyed access to the slicing backend:
//! - [`Transport`]: the seam to the backend, [`HttpTransport`] over reqwest
//! - [`RequestChannel`]: one-shot requests and progress streams per key,
//!   with version tickets so late results can be recognised and dropped
//!
//! # Example
//!
//! ```rust,ignore
//! use ouro_channel::{ChannelEvent, HttpTransport, RequestChannel, RequestOptions};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpTransport::new("http://127.0.0.1:8000")?);
//! let (channel, mut events) = RequestChannel::new(transport);
//!
//! channel.request("/slice/", json!({"options": "/tmp/sample-slice-options.json"}), RequestOptions::post());
//! if let Some(ChannelEvent::Settled(settlement)) = events.recv().await {
//!     if channel.is_current(&settlement.ticket) {
//!         println!("{:?}", settlement.outcome);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod channel;
pub mod error;
pub mod http;
pub mod transport;

pub use channel::{
    payload_done, payload_error, ChannelEvent, RequestChannel, Settlement, StreamEvent, Ticket,
    TicketKind,
};
pub use error::ChannelError;
pub use http::{json_lines, query_pairs, HttpTransport};
pub use transport::{EventStream, Method, RequestOptions, Transport};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
