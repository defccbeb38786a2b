//! Error types for the request channel
//!
//! A failed settlement is an explicit error value, never an absent result:
//! "no response yet" is `None` from the cache, "failed" is one of these.

/// Channel and transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Request could not be sent or the connection dropped
    #[error("transport failed: {0}")]
    Transport(String),

    /// Backend answered with an error status or error payload
    #[error("backend error {status}: {message}")]
    Backend {
        /// HTTP-like status code
        status: u16,
        /// Backend message
        message: String,
    },

    /// Response body was not the expected JSON
    #[error("could not decode response: {0}")]
    Decode(String),

    /// Transport could not be configured
    #[error("invalid transport configuration: {0}")]
    Config(String),
}

impl ChannelError {
    /// Create backend error
    #[inline]
    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        Self::Backend {
            status,
            message: message.into(),
        }
    }

    /// Message suitable for an alert
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Backend { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_display_and_message() {
        let err = ChannelError::backend(404, "no such task");
        assert_eq!(err.to_string(), "backend error 404: no such task");
        assert_eq!(err.message(), "no such task");
    }
}
