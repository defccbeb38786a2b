//! Transport seam between the channel and the backend
//!
//! The channel owns keys, versions and caching; a [`Transport`] only knows
//! how to perform one request or open one event stream.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChannelError;

/// Ordered stream of partial results
pub type EventStream = BoxStream<'static, Result<Value, ChannelError>>;

/// Request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Payload sent as query parameters
    #[default]
    Get,
    /// Payload sent as JSON body
    Post,
}

/// Per-request options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Request method
    pub method: Method,
}

impl RequestOptions {
    /// GET request
    #[inline]
    #[must_use]
    pub fn get() -> Self {
        Self { method: Method::Get }
    }

    /// POST request
    #[inline]
    #[must_use]
    pub fn post() -> Self {
        Self { method: Method::Post }
    }
}

/// Backend transport
///
/// Implement this trait to connect the channel to a backend.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform a single request against `key`
    async fn fetch(
        &self,
        key: &str,
        payload: &Value,
        options: RequestOptions,
    ) -> Result<Value, ChannelError>;

    /// Open an event stream for `key`, seeded with `seed`
    async fn stream(&self, key: &str, seed: &Value) -> Result<EventStream, ChannelError>;

    /// Whether the backend is currently reachable
    fn is_connected(&self) -> bool {
        true
    }
}
