//! `<SyncHdr>` fields.

use super::path_is;
use crate::auth::Credentials;
use syncml_protocol::ProtocolVersion;

/// The client's message header. Paths start at `SyncHdr`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Header {
    pub ver_dtd: String,
    pub session_id: String,
    pub message_id: String,
    pub target_uri: String,
    pub source_uri: String,
    pub loc_name: Option<String>,
    pub resp_uri: Option<String>,
    pub max_message_size: Option<usize>,
    pub credentials: Credentials,
}

impl Header {
    pub(crate) fn end_element(&mut self, path: &[String], text: &str) {
        let value = text.trim().to_string();
        if path_is(path, &["SyncHdr", "VerDTD"]) {
            self.ver_dtd = value;
        } else if path_is(path, &["SyncHdr", "SessionID"]) {
            self.session_id = value;
        } else if path_is(path, &["SyncHdr", "MsgID"]) {
            self.message_id = value;
        } else if path_is(path, &["SyncHdr", "Target", "LocURI"]) {
            self.target_uri = value;
        } else if path_is(path, &["SyncHdr", "Source", "LocURI"]) {
            self.source_uri = value;
        } else if path_is(path, &["SyncHdr", "Source", "LocName"]) {
            self.loc_name = Some(value).filter(|v| !v.is_empty());
        } else if path_is(path, &["SyncHdr", "RespURI"]) {
            self.resp_uri = Some(value).filter(|v| !v.is_empty());
        } else if path_is(path, &["SyncHdr", "Meta", "MaxMsgSize"]) {
            self.max_message_size = value.parse().ok();
        } else if path_is(path, &["SyncHdr", "Cred", "Data"]) {
            self.credentials.data = value;
        } else if path_is(path, &["SyncHdr", "Cred", "Meta", "Format"]) {
            self.credentials.format = value;
        } else if path_is(path, &["SyncHdr", "Cred", "Meta", "Type"]) {
            self.credentials.auth_type = value;
        }
    }

    /// Protocol version; unknown values are treated as 1.1.
    pub(crate) fn version(&self) -> ProtocolVersion {
        ProtocolVersion::from_ver_dtd(&self.ver_dtd).unwrap_or_default()
    }

    /// Numeric message id, 0 if the client sent garbage.
    pub(crate) fn message_id(&self) -> u32 {
        self.message_id.parse().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(header: &mut Header, parts: &[&str], text: &str) {
        let path: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
        header.end_element(&path, text);
    }

    #[test]
    fn collects_header_fields() {
        let mut header = Header::default();
        feed(&mut header, &["SyncHdr", "VerDTD"], "1.2");
        feed(&mut header, &["SyncHdr", "MsgID"], " 3 ");
        feed(&mut header, &["SyncHdr", "Source", "LocURI"], "IMEI:493005100592800");
        feed(&mut header, &["SyncHdr", "Source", "LocName"], "");
        feed(&mut header, &["SyncHdr", "Meta", "MaxMsgSize"], "10000");
        feed(&mut header, &["SyncHdr", "Cred", "Meta", "Type"], "syncml:auth-basic");
        feed(&mut header, &["SyncHdr", "Cred", "Data"], "dXNlcjpwYXNz");

        assert_eq!(header.version(), ProtocolVersion::V1_2);
        assert_eq!(header.message_id(), 3);
        assert_eq!(header.source_uri, "IMEI:493005100592800");
        assert_eq!(header.loc_name, None);
        assert_eq!(header.max_message_size, Some(10_000));
        assert_eq!(header.credentials.auth_type, "syncml:auth-basic");
        assert!(!header.credentials.is_missing());
    }

    #[test]
    fn unknown_version_defaults() {
        let header = Header {
            ver_dtd: "9.9".into(),
            ..Default::default()
        };
        assert_eq!(header.version(), ProtocolVersion::V1_1);
        assert_eq!(header.message_id(), 0);
    }
}
