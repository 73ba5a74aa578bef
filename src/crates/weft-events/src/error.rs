//! Error types for the event subsystem

use thiserror::Error;

/// Result type for event operations
pub type Result<T> = std::result::Result<T, EventError>;

/// Errors that can occur while constructing, registering, or delivering events
#[derive(Error, Debug)]
pub enum EventError {
    /// A required envelope field was empty
    #[error("Envelope field '{0}' must not be empty")]
    EmptyField(&'static str),

    /// Schema version did not match MAJOR.MINOR.PATCH
    #[error("Invalid schema version '{0}': expected MAJOR.MINOR.PATCH")]
    InvalidSchemaVersion(String),

    /// Schema version is not registered for the event type
    #[error("Schema {event_type}@{version} is not registered")]
    UnknownSchema {
        event_type: String,
        version: String,
    },

    /// Versions differ in major and cannot be decoded into one another
    #[error("Incompatible schema for '{event_type}': {from} -> {to}")]
    IncompatibleSchema {
        event_type: String,
        from: String,
        to: String,
    },

    /// A subscriber handler failed
    #[error("Handler error: {0}")]
    Handler(String),

    /// Subscription bookkeeping error
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Dead letter not found
    #[error("Dead letter not found: {0}")]
    DeadLetterNotFound(String),

    /// Payload (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}
