//! SyncML response status codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A SyncML status code as carried in `<Status><Data>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatusCode(u16);

impl StatusCode {
    /// 101: the request is being processed.
    pub const IN_PROGRESS: StatusCode = StatusCode(101);
    /// 200: command completed successfully.
    pub const OK: StatusCode = StatusCode(200);
    /// 201: requested item was added.
    pub const ITEM_ADDED: StatusCode = StatusCode(201);
    /// 202: accepted for processing.
    pub const ACCEPTED_FOR_PROCESSING: StatusCode = StatusCode(202);
    /// 207: conflict resolved with merge.
    pub const CONFLICT_RESOLVED_WITH_MERGE: StatusCode = StatusCode(207);
    /// 208: conflict resolved with client's command winning.
    pub const CONFLICT_RESOLVED_WITH_CLIENT_WINNING: StatusCode = StatusCode(208);
    /// 210: delete without archive.
    pub const DELETE_WITHOUT_ARCHIVE: StatusCode = StatusCode(210);
    /// 211: item not deleted, it was not found.
    pub const ITEM_NOT_DELETED: StatusCode = StatusCode(211);
    /// 212: authentication accepted for the rest of the session.
    pub const AUTHENTICATION_ACCEPTED: StatusCode = StatusCode(212);
    /// 213: chunked item accepted and buffered.
    pub const CHUNKED_ITEM_ACCEPTED: StatusCode = StatusCode(213);
    /// 214: operation cancelled.
    pub const OPERATION_CANCELLED: StatusCode = StatusCode(214);
    /// 215: not executed.
    pub const NOT_EXECUTED: StatusCode = StatusCode(215);
    /// 400: bad request.
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    /// 401: invalid credentials.
    pub const INVALID_CREDENTIALS: StatusCode = StatusCode(401);
    /// 403: forbidden.
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    /// 404: not found.
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    /// 405: command not allowed.
    pub const COMMAND_NOT_ALLOWED: StatusCode = StatusCode(405);
    /// 406: optional feature not supported.
    pub const OPTIONAL_FEATURE_NOT_SUPPORTED: StatusCode = StatusCode(406);
    /// 407: credentials missing.
    pub const CREDENTIALS_MISSING: StatusCode = StatusCode(407);
    /// 412: incomplete command.
    pub const INCOMPLETE_COMMAND: StatusCode = StatusCode(412);
    /// 413: request entity too large.
    pub const REQUEST_ENTITY_TOO_LARGE: StatusCode = StatusCode(413);
    /// 415: unsupported media type.
    pub const UNSUPPORTED_MEDIA_TYPE: StatusCode = StatusCode(415);
    /// 418: item already exists.
    pub const ALREADY_EXISTS: StatusCode = StatusCode(418);
    /// 420: device full.
    pub const DEVICE_FULL: StatusCode = StatusCode(420);
    /// 424: size mismatch.
    pub const SIZE_MISMATCH: StatusCode = StatusCode(424);
    /// 500: command failed.
    pub const COMMAND_FAILED: StatusCode = StatusCode(500);
    /// 501: command not implemented.
    pub const COMMAND_NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    /// 506: processing error.
    pub const PROCESSING_ERROR: StatusCode = StatusCode(506);
    /// 508: refresh required, a slow sync follows.
    pub const REFRESH_REQUIRED: StatusCode = StatusCode(508);
    /// 510: data store failure.
    pub const DATASTORE_FAILURE: StatusCode = StatusCode(510);
    /// 511: server failure.
    pub const SERVER_FAILURE: StatusCode = StatusCode(511);
    /// 513: protocol version not supported.
    pub const PROTOCOL_VERSION_NOT_SUPPORTED: StatusCode = StatusCode(513);

    /// Creates a status code from its numeric value.
    pub const fn new(code: u16) -> Self {
        StatusCode(code)
    }

    /// Returns the numeric value.
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Parses the textual form found in `<Data>`.
    pub fn parse(text: &str) -> Option<Self> {
        text.trim().parse().ok().map(StatusCode)
    }

    /// Returns true for 2xx codes.
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.0)
    }

    /// Returns true if the client accepted a server item, counting
    /// "already exists" as accepted.
    pub fn is_item_accepted(self) -> bool {
        self.is_success() || self == StatusCode::ALREADY_EXISTS
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_classify() {
        assert_eq!(StatusCode::parse(" 201 "), Some(StatusCode::ITEM_ADDED));
        assert_eq!(StatusCode::parse("abc"), None);
        assert!(StatusCode::ITEM_ADDED.is_success());
        assert!(!StatusCode::REFRESH_REQUIRED.is_success());
        assert!(StatusCode::ALREADY_EXISTS.is_item_accepted());
        assert!(!StatusCode::COMMAND_FAILED.is_item_accepted());
    }

    #[test]
    fn display_is_numeric() {
        assert_eq!(StatusCode::CHUNKED_ITEM_ACCEPTED.to_string(), "213");
    }
}
