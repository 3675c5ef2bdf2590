//! Error types for the threshold monitor.
//!
//! All errors are strongly typed using thiserror. Per-envelope and
//! per-assertion errors are contained by the pipeline; only startup and
//! transport-processing failures are fatal.

use thiserror::Error;

/// Structural problems found while decoding one change envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("Envelope container ended before entry {position} was complete")]
    Truncated {
        position: usize,
    },

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: String,
        found: String,
    },

    #[error("Envelope is missing required field '{field}'")]
    MissingField {
        field: String,
    },

    #[error("No changed-property entry is open for decoding")]
    NoCurrentEntry,
}

impl EnvelopeError {
    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Failures reported by the state controller collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("State controller rejected the request ({name}): {message}")]
    Rejected {
        name: String,
        message: String,
    },

    #[error("State controller unreachable: {message}")]
    Unreachable {
        message: String,
    },

    #[error("State controller call timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Errors raised by a notification transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    Connect {
        message: String,
    },

    #[error("Match registration failed: {message}")]
    Subscribe {
        message: String,
    },

    #[error("Processing failed: {message}")]
    Process {
        message: String,
    },

    #[error("Transport closed")]
    Closed,
}

/// Static configuration errors, detected before the monitor starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Entity '{identifier}' has no watched properties")]
    EmptyWatchedProperties {
        identifier: String,
    },

    #[error("Entity '{identifier}' is configured more than once")]
    DuplicateEntity {
        identifier: String,
    },

    #[error("Invalid watch specification '{spec}': {reason}")]
    InvalidWatchSpec {
        spec: String,
        reason: String,
    },

    #[error("Unknown threshold kind '{0}' (expected 'high' or 'low')")]
    UnknownThreshold(String),
}

/// Top-level error type for the threshold monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Can't connect to bus: {0}")]
    TransportConnect(TransportError),

    #[error("Can't establish properties match: {0}")]
    Subscription(TransportError),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(#[from] EnvelopeError),

    #[error("Action failed: {0}")]
    Action(#[from] ActionError),

    #[error("Can't process bus events: {0}")]
    TransportProcess(TransportError),
}

impl MonitorError {
    /// Returns true if this error ends the monitor process.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_)
            | Self::TransportConnect(_)
            | Self::Subscription(_)
            | Self::TransportProcess(_) => true,
            Self::MalformedEnvelope(_) | Self::Action(_) => false,
        }
    }

    /// Returns true if this error happened before the receive loop started.
    #[must_use]
    pub const fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::TransportConnect(_) | Self::Subscription(_)
        )
    }
}

/// Result type alias for monitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;
