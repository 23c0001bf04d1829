//! Error types for the schema registry

use thiserror::Error;

use crate::replay::ReplayError;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Coarse classification of a [`RegistryError`].
///
/// Transport layers map these to their own status codes; the registry
/// itself never produces protocol codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller input is invalid; fix the request and resubmit.
    Validation,
    /// Event or version absent.
    NotFound,
    /// Another writer got there first; re-fetch and retry.
    Conflict,
    /// Connection, transaction or stored-data failure.
    Storage,
    /// Replay produced an impossible state.
    Internal,
}

/// Schema registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Schema not found: {event}{}", .version.map(|v| format!(" version {v}")).unwrap_or_default())]
    NotFound { event: String, version: Option<u32> },

    #[error("Schema already exists: {event}")]
    AlreadyExists { event: String },

    #[error("Newer version of schema {event} already exists: expected {expected}, found {actual}")]
    VersionConflict {
        event: String,
        expected: u32,
        actual: u32,
    },

    #[error("Stored operation log for {event} is corrupt: {reason}")]
    Corrupt { event: String, reason: ReplayError },

    #[error("Internal consistency error: {0}")]
    InternalConsistency(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl RegistryError {
    /// Classify this error for the transport layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Validation(_) => ErrorKind::Validation,
            RegistryError::NotFound { .. } => ErrorKind::NotFound,
            RegistryError::AlreadyExists { .. } | RegistryError::VersionConflict { .. } => {
                ErrorKind::Conflict
            }
            RegistryError::Corrupt { .. }
            | RegistryError::Storage(_)
            | RegistryError::Json(_)
            | RegistryError::Config(_) => ErrorKind::Storage,
            RegistryError::InternalConsistency(_) => ErrorKind::Internal,
        }
    }

    /// True when the caller should re-fetch the schema and retry.
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        RegistryError::Validation(msg.into())
    }

    pub(crate) fn not_found(event: &str, version: Option<u32>) -> Self {
        RegistryError::NotFound {
            event: event.to_string(),
            version,
        }
    }
}
