//! Error types for the engine.

use syncml_protocol::ProtocolError;
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by a [`Backend`](crate::Backend).
///
/// Per-item backend errors never abort a message; they become status codes
/// on the affected command.
#[derive(Error, Debug)]
pub enum BackendError {
    /// No entry with this id exists.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// The client id has no server counterpart in the map.
    #[error("no map entry for client id {0}")]
    NoMapEntry(String),

    /// The database URI is not served by this backend.
    #[error("invalid database: {0}")]
    InvalidDatabase(String),

    /// No user is bound to the backend session.
    #[error("no authenticated user")]
    NoUser,

    /// The underlying store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl BackendError {
    /// Returns true if the error means the requested object is missing
    /// rather than that the store failed.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_) | BackendError::NoMapEntry(_))
    }
}

/// Result type for message processing.
pub type SyncMlResult<T> = Result<T, SyncMlError>;

/// Errors that abort the processing of a whole message.
#[derive(Error, Debug)]
pub enum SyncMlError {
    /// The request could not be decoded or the response not encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A backend call outside per-item processing failed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The message did not start with a usable `<SyncHdr>`.
    #[error("message has no SyncHdr")]
    MissingHeader,

    /// The session could not be loaded.
    #[error("session error: {0}")]
    Session(String),
}

impl SyncMlError {
    /// Returns true if the client sent something unusable.
    pub fn is_client_error(&self) -> bool {
        match self {
            SyncMlError::Protocol(err) => err.is_parse_error(),
            SyncMlError::MissingHeader => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(BackendError::NoMapEntry("c1".into()).is_not_found());
        assert!(!BackendError::Storage("disk".into()).is_not_found());
        assert!(SyncMlError::MissingHeader.is_client_error());
        assert!(SyncMlError::from(ProtocolError::malformed("x")).is_client_error());
        assert!(!SyncMlError::Session("io".into()).is_client_error());
    }

    #[test]
    fn error_display() {
        let err = BackendError::NoMapEntry("c9".into());
        assert_eq!(err.to_string(), "no map entry for client id c9");
    }
}
