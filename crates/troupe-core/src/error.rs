// ABOUTME: Error types for session store operations using thiserror.
// ABOUTME: Distinguishes missing workspaces, unknown sessions, bad transitions, and IO failures.

use crate::session::SessionStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the file-backed session store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The workspace root does not exist or is not a directory.
    #[error("workspace not found at {path}")]
    WorkspaceMissing { path: PathBuf },

    /// Failed to read a file from the store.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file to the store.
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record did not parse.
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// No session with this id exists, active or archived.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A session with this id (or an archived copy of it) already exists.
    #[error("session already exists: {0}")]
    SessionExists(String),

    /// Session ids may only contain lowercase ascii letters, digits, and dashes.
    #[error("invalid session id: {0}")]
    InvalidId(String),

    /// The requested status change would move the session backwards.
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: SessionStatus,
        to: SessionStatus,
    },

    /// Archived sessions are frozen.
    #[error("session {0} is archived")]
    Archived(String),

    /// Archiving would overwrite an existing directory.
    #[error("archive destination already exists: {path}")]
    ArchiveCollision { path: PathBuf },

    /// Task index out of range.
    #[error("session {id} has no task #{index}")]
    TaskNotFound { id: String, index: usize },

    /// The messaging policy refused delivery.
    #[error("{from} may not send instructions to {to} under the hierarchical policy")]
    PolicyDenied { from: String, to: String },
}

/// Result type alias using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Write {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        StoreError::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn test_workspace_missing_display() {
        let err = StoreError::WorkspaceMissing {
            path: PathBuf::from("/nowhere"),
        };
        assert!(err.to_string().contains("/nowhere"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = StoreError::InvalidTransition {
            id: "architect-ada".to_string(),
            from: SessionStatus::Completed,
            to: SessionStatus::Spawned,
        };
        let display = err.to_string();
        assert!(display.contains("architect-ada"));
        assert!(display.contains("completed -> spawned"));
    }

    #[test]
    fn test_read_error_has_source() {
        let err = StoreError::read("/x", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_session_not_found_has_no_source() {
        let err = StoreError::SessionNotFound("intern-bo".to_string());
        assert!(err.source().is_none());
    }
}
