//! Unified error types for the ctrun workspace.
//!
//! The variants follow the phases of a run: identity lookup, daemon
//! connection, image resolution, container and task creation, task start.
//! Phase variants wrap the underlying cause so the log line carries both the
//! resource name and what the daemon reported.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Reason an identity lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    /// No passwd entry matched the name.
    UserNotFound,
    /// No group entry matched the name.
    GroupNotFound,
    /// The user or group has no subordinate ID allocation.
    NoSubordinateRange,
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserNotFound => write!(f, "user not found"),
            Self::GroupNotFound => write!(f, "group not found"),
            Self::NoSubordinateRange => write!(f, "no subordinate ID range"),
        }
    }
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CtrunError {
    /// The runtime daemon could not be reached.
    #[error("cannot connect to runtime daemon at {address}: {source}")]
    Connection {
        /// Socket path that was dialed.
        address: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Identity resolution failed.
    #[error("{kind} for {name:?}: {message}")]
    Lookup {
        /// Which part of the lookup failed.
        kind: LookupKind,
        /// User or group name that was looked up.
        name: String,
        /// Detail from the last lookup attempt.
        message: String,
    },

    /// The image could neither be found locally nor pulled.
    #[error("couldn't resolve image {reference}: {source}")]
    ImageResolution {
        /// Image reference that was requested.
        reference: String,
        /// Cause reported by the daemon.
        source: Box<CtrunError>,
    },

    /// The daemon refused to create the container.
    #[error("error creating container {name}: {source}")]
    ContainerCreation {
        /// Container name.
        name: String,
        /// Cause reported by the daemon.
        source: Box<CtrunError>,
    },

    /// The daemon refused to create the task.
    #[error("error creating task in container {name}: {source}")]
    TaskCreation {
        /// Container name.
        name: String,
        /// Cause reported by the daemon.
        source: Box<CtrunError>,
    },

    /// The task could not be started (or its exit could not be subscribed to).
    #[error("error starting task in container {name}: {source}")]
    TaskStart {
        /// Container name.
        name: String,
        /// Cause reported by the daemon.
        source: Box<CtrunError>,
    },

    /// The operation is not valid for the task's current state.
    #[error("container {name} is {state}: {message}")]
    InvalidState {
        /// Container name.
        name: String,
        /// Current task state.
        state: String,
        /// What the caller has to do first.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The daemon answered a request with an error or an unusable reply.
    #[error("{method} failed: {message}")]
    Rpc {
        /// RPC method that failed.
        method: String,
        /// Error text from the daemon or the transport.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl CtrunError {
    /// Returns `true` if this error (or the cause it wraps) is a missing resource.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::ImageResolution { source, .. }
            | Self::ContainerCreation { source, .. }
            | Self::TaskCreation { source, .. }
            | Self::TaskStart { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Builds a `Lookup` error.
    pub fn lookup(kind: LookupKind, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Lookup {
            kind,
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CtrunError>;
