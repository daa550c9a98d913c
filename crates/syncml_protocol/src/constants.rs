//! Shared protocol constants.

/// Largest message the server accepts, advertised in every header.
pub const SERVER_MAX_MSG_SIZE: usize = 1_000_000;

/// Largest object the server accepts, advertised for SyncML 1.1 and later.
pub const SERVER_MAX_OBJ_SIZE: usize = 1_000_000;

/// Bytes reserved for closing a message once a Sync command is written.
pub const MSG_TRAILER_LEN: usize = 150;

/// Estimated size of a message without any item payload. An item larger
/// than the client's maximum message size minus this can never be sent.
pub const MSG_DEFAULT_LEN: usize = 1000;

/// MIME types.
pub mod mime {
    /// SyncML message in XML.
    pub const SYNCML_XML: &str = "application/vnd.syncml+xml";
    /// SyncML message in WBXML.
    pub const SYNCML_WBXML: &str = "application/vnd.syncml+wbxml";
    /// Device information in XML.
    pub const DEVINF_XML: &str = "application/vnd.syncml-devinf+xml";
    /// Device information in WBXML.
    pub const DEVINF_WBXML: &str = "application/vnd.syncml-devinf+wbxml";
}

/// Authentication types from `<Cred><Meta><Type>`.
pub mod auth {
    /// Base64 encoded `user:password`.
    pub const BASIC: &str = "syncml:auth-basic";
    /// MD5 digest authentication.
    pub const MD5: &str = "syncml:auth-md5";
}

/// Item formats from `<Meta><Format>`.
pub mod format {
    /// Base64 encoded payload.
    pub const B64: &str = "b64";
}
