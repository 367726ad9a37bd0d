//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Error types raised by protocol drivers and polling contexts."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use thiserror::Error;

/// Result alias used by driver operations.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Failures reported by a protocol driver.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter failed to connect: {0}")]
    Connect(String),
    #[error("sampling tag '{tag}' failed: {reason}")]
    Sample { tag: String, reason: String },
    #[error("write to tag '{tag}' failed: {reason}")]
    Write { tag: String, reason: String },
    #[error("adapter is not connected")]
    NotConnected,
    #[error("operation '{0}' is not supported by this adapter")]
    Unsupported(&'static str),
    #[error("invalid adapter settings: {0}")]
    InvalidSettings(String),
    #[error("unknown adapter type '{0}'")]
    UnknownType(String),
    #[error(transparent)]
    Polling(#[from] PollingConfigError),
}

impl AdapterError {
    pub fn sample(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        AdapterError::Sample {
            tag: tag.into(),
            reason: reason.into(),
        }
    }

    pub fn write(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        AdapterError::Write {
            tag: tag.into(),
            reason: reason.into(),
        }
    }
}

/// Invalid polling parameters, detected at construction or per cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollingConfigError {
    #[error("polling tag must not be empty")]
    EmptyTag,
    #[error("polling interval must be positive")]
    ZeroInterval,
    #[error("qos {0} outside 0..=2")]
    InvalidQos(u8),
    #[error("min delay {min_ms}ms exceeds max delay {max_ms}ms")]
    InvertedDelayWindow { min_ms: u64, max_ms: u64 },
}
