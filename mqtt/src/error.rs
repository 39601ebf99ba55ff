//! Error types for the MQTT multiplexer.

use thiserror::Error;

/// Error type for MQTT operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid topic filter passed to subscribe.
    #[error("mqtt: invalid topic pattern {pattern:?}: {source}")]
    InvalidTopicPattern {
        pattern: String,
        #[source]
        source: reactor_trie::InvalidPatternError,
    },

    /// Invalid share subscription.
    #[error("mqtt: invalid share subscription: {0}")]
    InvalidShareSubscription(String),

    /// Invalid topic name passed to publish.
    #[error("mqtt: invalid topic name: {0}")]
    InvalidTopicName(#[from] reactor_trie::InvalidTopicError),

    /// Invalid connection configuration.
    #[error("mqtt: invalid config: {0}")]
    InvalidConfig(String),

    /// Connection error.
    #[error("mqtt: connection error: {0}")]
    Connection(String),

    /// Publish error.
    #[error("mqtt: publish error: {0}")]
    Publish(String),

    /// Subscribe error.
    #[error("mqtt: subscribe error: {0}")]
    Subscribe(String),

    /// Handler error.
    #[error("mqtt: handler error: {0}")]
    Handler(String),
}

impl Error {
    pub(crate) fn invalid_pattern(
        pattern: &str,
        source: reactor_trie::InvalidPatternError,
    ) -> Self {
        Error::InvalidTopicPattern {
            pattern: pattern.to_string(),
            source,
        }
    }
}

/// Result type for MQTT operations.
pub type Result<T> = std::result::Result<T, Error>;
