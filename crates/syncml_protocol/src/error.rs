//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or encoding SyncML element streams.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The underlying XML reader or writer failed.
    #[error("xml error: {0}")]
    Xml(String),

    /// The document is well formed but not a usable SyncML message.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The request content type is not handled.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// WBXML was requested but no codec is installed.
    #[error("no WBXML codec configured")]
    WbxmlUnavailable,

    /// An element handler stopped the decode.
    #[error("processing aborted: {0}")]
    Aborted(String),
}

impl ProtocolError {
    /// Creates a malformed-message error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Returns true if the error was caused by the request bytes
    /// rather than by the handler.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, ProtocolError::Xml(_) | ProtocolError::Malformed(_))
    }
}

impl From<quick_xml::Error> for ProtocolError {
    fn from(err: quick_xml::Error) -> Self {
        ProtocolError::Xml(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_are_classified() {
        assert!(ProtocolError::malformed("no header").is_parse_error());
        assert!(ProtocolError::Xml("eof".into()).is_parse_error());
        assert!(!ProtocolError::Aborted("backend".into()).is_parse_error());
        assert!(!ProtocolError::WbxmlUnavailable.is_parse_error());
    }

    #[test]
    fn error_display() {
        let err = ProtocolError::UnsupportedContentType("text/html".into());
        assert_eq!(err.to_string(), "unsupported content type: text/html");
    }
}
