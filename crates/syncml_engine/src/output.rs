//! Response construction.
//!
//! [`ResponseWriter`] knows the element layout of every SyncML artefact the
//! server emits and hands out command ids. It writes through an
//! [`ElementWriter`] so the same code produces XML and WBXML.

use crate::config::EngineConfig;
use crate::item::ItemKind;
use crate::session::SyncSession;
use syncml_protocol::{
    auth, format, ElementWriter, Encoding, ProtocolResult, ProtocolVersion, StatusCode,
};

/// Declaration heading every XML response.
pub(crate) const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Data stores advertised in the server's device information.
const SERVER_STORES: [(&str, &str, &str, Option<(&str, &str)>); 4] = [
    ("notes", "text/plain", "1.0", None),
    ("contacts", "text/directory", "3.0", Some(("text/x-vcard", "2.1"))),
    ("tasks", "text/calendar", "2.0", Some(("text/x-vcalendar", "1.0"))),
    ("calendar", "text/calendar", "2.0", Some(("text/x-vcalendar", "1.0"))),
];

/// A `<Status>` to emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport<'a> {
    /// CmdID of the command answered.
    pub cmd_ref: &'a str,
    /// Name of the command answered.
    pub cmd: &'a str,
    /// Outcome.
    pub code: StatusCode,
    /// `<TargetRef>`.
    pub target_ref: Option<&'a str>,
    /// `<SourceRef>`.
    pub source_ref: Option<&'a str>,
    /// Last anchor echoed in `<Item>`.
    pub anchor_last: Option<&'a str>,
    /// Next anchor echoed in `<Item>`.
    pub anchor_next: Option<&'a str>,
    /// Ask for basic credentials.
    pub challenge: bool,
}

impl<'a> StatusReport<'a> {
    /// Creates a status for a command.
    pub fn new(cmd_ref: &'a str, cmd: &'a str, code: StatusCode) -> Self {
        Self {
            cmd_ref,
            cmd,
            code,
            target_ref: None,
            source_ref: None,
            anchor_last: None,
            anchor_next: None,
            challenge: false,
        }
    }

    /// Sets `<TargetRef>`.
    pub fn with_target(mut self, target: &'a str) -> Self {
        self.target_ref = Some(target).filter(|t| !t.is_empty());
        self
    }

    /// Sets `<SourceRef>`.
    pub fn with_source(mut self, source: &'a str) -> Self {
        self.source_ref = Some(source).filter(|s| !s.is_empty());
        self
    }

    /// Echoes the client's anchors.
    pub fn with_anchors(mut self, last: &'a str, next: &'a str) -> Self {
        self.anchor_last = Some(last).filter(|a| !a.is_empty());
        self.anchor_next = Some(next).filter(|a| !a.is_empty());
        self
    }

    /// Adds a `<Chal>` asking for basic authentication.
    pub fn with_challenge(mut self) -> Self {
        self.challenge = true;
        self
    }
}

/// One server Add, Replace or Delete.
#[derive(Debug, Clone, Copy)]
pub struct SyncCommandOutput<'a> {
    /// Operation.
    pub kind: ItemKind,
    /// Payload, absent for deletes.
    pub content: Option<&'a str>,
    /// Content type.
    pub content_type: Option<&'a str>,
    /// Transfer format.
    pub format: Option<&'a str>,
    /// Client id, known for replaces and deletes.
    pub cuid: Option<&'a str>,
    /// Server id.
    pub suid: Option<&'a str>,
    /// Wrap the payload in CDATA.
    pub use_cdata: bool,
}

/// Builds one response message.
pub struct ResponseWriter {
    writer: Box<dyn ElementWriter>,
    encoding: Encoding,
    version: ProtocolVersion,
    ns: &'static str,
    meta_ns: &'static str,
    msg_ref: String,
    next_cmd_id: u32,
}

impl ResponseWriter {
    /// Wraps an element writer.
    pub fn new(writer: Box<dyn ElementWriter>, encoding: Encoding) -> Self {
        let version = ProtocolVersion::default();
        Self {
            writer,
            encoding,
            version,
            ns: version.namespace(),
            meta_ns: version.meta_namespace(),
            msg_ref: String::new(),
            next_cmd_id: 1,
        }
    }

    /// Opens `<SyncML>` for the session's version.
    pub fn begin(&mut self, session: &SyncSession) -> ProtocolResult<()> {
        self.version = session.version;
        self.ns = session.version.namespace();
        self.meta_ns = session.version.meta_namespace();
        self.msg_ref = session.message_id.to_string();
        self.next_cmd_id = 1;
        self.writer.start_element(self.ns, "SyncML")
    }

    /// Encoding of the response.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Bytes written so far.
    pub fn output_size(&self) -> usize {
        self.writer.output_size()
    }

    /// Returns true if the response is WBXML.
    pub fn is_binary(&self) -> bool {
        self.writer.is_binary()
    }

    /// The elements written so far.
    pub fn output(&self) -> Vec<u8> {
        self.writer.output()
    }

    /// Bytes sent ahead of the elements.
    pub fn prologue(&self) -> &'static str {
        match self.encoding {
            Encoding::Xml => XML_DECLARATION,
            Encoding::Wbxml => "",
        }
    }

    /// The finished message as sent, prologue included.
    pub fn message(&self) -> Vec<u8> {
        let mut body = self.prologue().as_bytes().to_vec();
        body.extend(self.writer.output());
        body
    }

    /// A writer in the same state that writes into a fresh buffer.
    fn scratch(&self) -> ResponseWriter {
        ResponseWriter {
            writer: self.writer.create_sub_handler(),
            encoding: self.encoding,
            version: self.version,
            ns: self.ns,
            meta_ns: self.meta_ns,
            msg_ref: self.msg_ref.clone(),
            next_cmd_id: self.next_cmd_id,
        }
    }

    /// Number of bytes `write` adds inside an open element of the body,
    /// measured on a scratch writer. Nothing is written and no command id
    /// is used up.
    pub fn measure<R>(
        &self,
        write: impl FnOnce(&mut ResponseWriter) -> ProtocolResult<R>,
    ) -> ProtocolResult<usize> {
        let mut scratch = self.scratch();
        scratch.start("SyncBody")?;
        let before = scratch.output_size();
        write(&mut scratch)?;
        Ok(scratch.output_size() - before)
    }

    /// Bytes a message still needs once a `<Sync>` is open: its end tag,
    /// `<Final/>`, the closing tags and the prologue.
    pub fn closing_len(&self) -> ProtocolResult<usize> {
        let mut scratch = self.scratch();
        scratch.start("SyncML")?;
        scratch.start("SyncBody")?;
        scratch.start("Sync")?;
        let before = scratch.output_size();
        scratch.sync_end()?;
        scratch.final_marker()?;
        scratch.end_message()?;
        Ok(scratch.output_size() - before + self.prologue().len())
    }

    fn start(&mut self, name: &str) -> ProtocolResult<()> {
        self.writer.start_element(self.ns, name)
    }

    fn end(&mut self, name: &str) -> ProtocolResult<()> {
        self.writer.end_element(self.ns, name)
    }

    fn leaf(&mut self, name: &str, text: &str) -> ProtocolResult<()> {
        self.start(name)?;
        self.writer.characters(text)?;
        self.end(name)
    }

    fn meta_leaf(&mut self, name: &str, text: &str) -> ProtocolResult<()> {
        self.writer.start_element(self.meta_ns, name)?;
        self.writer.characters(text)?;
        self.writer.end_element(self.meta_ns, name)
    }

    fn loc_uri(&mut self, wrapper: &str, uri: &str) -> ProtocolResult<()> {
        self.start(wrapper)?;
        self.leaf("LocURI", uri)?;
        self.end(wrapper)
    }

    fn cmd_id(&mut self) -> ProtocolResult<u32> {
        let id = self.next_cmd_id;
        self.next_cmd_id += 1;
        self.leaf("CmdID", &id.to_string())?;
        Ok(id)
    }

    /// Writes `<SyncHdr>`. Source and target swap roles relative to the
    /// client's header.
    pub fn header(&mut self, session: &SyncSession, config: &EngineConfig, resp_uri: Option<&str>) -> ProtocolResult<()> {
        self.start("SyncHdr")?;
        self.leaf("VerDTD", session.version.ver_dtd())?;
        self.leaf("VerProto", session.version.proto_name())?;
        self.leaf("SessionID", &session.session_id)?;
        self.leaf("MsgID", &session.message_id.to_string())?;

        self.start("Target")?;
        self.leaf("LocURI", &session.source_uri)?;
        if let Some(user) = session.user.as_deref() {
            self.leaf("LocName", user)?;
        }
        self.end("Target")?;
        self.loc_uri("Source", &session.target_uri)?;

        if let Some(uri) = resp_uri.filter(|u| !u.is_empty()) {
            self.leaf("RespURI", uri)?;
        }

        self.start("Meta")?;
        self.meta_leaf("MaxMsgSize", &config.max_message_size.to_string())?;
        if self.version.has_large_objects() {
            self.meta_leaf("MaxObjSize", &config.max_object_size.to_string())?;
        }
        self.end("Meta")?;
        self.end("SyncHdr")
    }

    /// Opens `<SyncBody>`.
    pub fn body_start(&mut self) -> ProtocolResult<()> {
        self.start("SyncBody")
    }

    /// Writes `<Final/>`.
    pub fn final_marker(&mut self) -> ProtocolResult<()> {
        self.start("Final")?;
        self.end("Final")
    }

    /// Closes `<SyncBody>` and `<SyncML>`.
    pub fn end_message(&mut self) -> ProtocolResult<()> {
        self.end("SyncBody")?;
        self.end("SyncML")
    }

    /// Writes a `<Status>`.
    pub fn status(&mut self, report: &StatusReport<'_>) -> ProtocolResult<u32> {
        self.start("Status")?;
        let id = self.cmd_id()?;
        let msg_ref = self.msg_ref.clone();
        self.leaf("MsgRef", &msg_ref)?;
        self.leaf("CmdRef", report.cmd_ref)?;
        self.leaf("Cmd", report.cmd)?;
        if let Some(target) = report.target_ref {
            self.leaf("TargetRef", target)?;
        }
        if let Some(source) = report.source_ref {
            self.leaf("SourceRef", source)?;
        }
        if report.challenge {
            self.start("Chal")?;
            self.start("Meta")?;
            self.meta_leaf("Type", auth::BASIC)?;
            self.meta_leaf("Format", format::B64)?;
            self.end("Meta")?;
            self.end("Chal")?;
        }
        self.leaf("Data", &report.code.to_string())?;
        if report.anchor_last.is_some() || report.anchor_next.is_some() {
            self.start("Item")?;
            self.start("Data")?;
            self.writer.start_element(self.meta_ns, "Anchor")?;
            if let Some(last) = report.anchor_last {
                self.meta_leaf("Last", last)?;
            }
            if let Some(next) = report.anchor_next {
                self.meta_leaf("Next", next)?;
            }
            self.writer.end_element(self.meta_ns, "Anchor")?;
            self.end("Data")?;
            self.end("Item")?;
        }
        self.end("Status")?;
        Ok(id)
    }

    /// Writes the server's sync `<Alert>` with its anchors.
    pub fn alert(
        &mut self,
        code: u16,
        client_db: &str,
        server_db: &str,
        last_anchor: &str,
        next_anchor: &str,
        max_object_size: usize,
    ) -> ProtocolResult<u32> {
        self.start("Alert")?;
        let id = self.cmd_id()?;
        self.leaf("Data", &code.to_string())?;
        self.start("Item")?;
        if !client_db.is_empty() {
            self.loc_uri("Target", client_db)?;
        }
        if !server_db.is_empty() {
            self.loc_uri("Source", server_db)?;
        }
        self.start("Meta")?;
        self.writer.start_element(self.meta_ns, "Anchor")?;
        self.meta_leaf("Last", last_anchor)?;
        self.meta_leaf("Next", next_anchor)?;
        self.writer.end_element(self.meta_ns, "Anchor")?;
        if self.version.has_large_objects() {
            self.meta_leaf("MaxObjSize", &max_object_size.to_string())?;
        }
        self.end("Meta")?;
        self.end("Item")?;
        self.end("Alert")?;
        Ok(id)
    }

    /// Writes an `<Alert>` without anchors, such as 223.
    pub fn notice_alert(&mut self, code: u16, client_uri: &str, server_uri: &str) -> ProtocolResult<u32> {
        self.start("Alert")?;
        let id = self.cmd_id()?;
        self.leaf("Data", &code.to_string())?;
        self.start("Item")?;
        if !client_uri.is_empty() {
            self.loc_uri("Target", client_uri)?;
        }
        if !server_uri.is_empty() {
            self.loc_uri("Source", server_uri)?;
        }
        self.end("Item")?;
        self.end("Alert")?;
        Ok(id)
    }

    /// Asks the client for its device information.
    pub fn get_devinf(&mut self) -> ProtocolResult<u32> {
        self.start("Get")?;
        let id = self.cmd_id()?;
        self.start("Meta")?;
        self.meta_leaf("Type", self.encoding.devinf_content_type())?;
        self.end("Meta")?;
        self.start("Item")?;
        self.loc_uri("Target", self.version.devinf_uri())?;
        self.end("Item")?;
        self.end("Get")?;
        Ok(id)
    }

    /// Answers a Get for device information.
    pub fn devinf_results(&mut self, cmd_ref: &str, config: &EngineConfig) -> ProtocolResult<u32> {
        self.start("Results")?;
        let id = self.cmd_id()?;
        let msg_ref = self.msg_ref.clone();
        self.leaf("MsgRef", &msg_ref)?;
        self.leaf("CmdRef", cmd_ref)?;
        self.start("Meta")?;
        self.meta_leaf("Type", self.encoding.devinf_content_type())?;
        self.end("Meta")?;
        self.start("Item")?;
        self.loc_uri("Source", self.version.devinf_uri())?;
        self.start("Data")?;
        let devinf = self.server_devinf(config)?;
        self.writer.opaque(&devinf)?;
        self.end("Data")?;
        self.end("Item")?;
        self.end("Results")?;
        Ok(id)
    }

    fn server_devinf(&self, config: &EngineConfig) -> ProtocolResult<Vec<u8>> {
        let ns = self.version.devinf_namespace();
        let mut out = self.writer.create_sub_handler();
        let leaf = |out: &mut Box<dyn ElementWriter>, name: &str, text: &str| -> ProtocolResult<()> {
            out.start_element(ns, name)?;
            out.characters(text)?;
            out.end_element(ns, name)
        };

        out.start_element(ns, "DevInf")?;
        leaf(&mut out, "VerDTD", self.version.ver_dtd())?;
        leaf(&mut out, "Man", &config.manufacturer)?;
        leaf(&mut out, "DevID", &config.server_device_id)?;
        leaf(&mut out, "DevTyp", "server")?;
        if self.version.has_large_objects() {
            for flag in ["SupportLargeObjs", "SupportNumberOfChanges"] {
                out.start_element(ns, flag)?;
                out.end_element(ns, flag)?;
            }
        }

        for (source_ref, content_type, version, extra) in SERVER_STORES {
            out.start_element(ns, "DataStore")?;
            leaf(&mut out, "SourceRef", source_ref)?;
            for (pref, list) in [("Rx-Pref", "Rx"), ("Tx-Pref", "Tx")] {
                out.start_element(ns, pref)?;
                leaf(&mut out, "CTType", content_type)?;
                leaf(&mut out, "VerCT", version)?;
                out.end_element(ns, pref)?;
                if let Some((extra_type, extra_version)) = extra {
                    out.start_element(ns, list)?;
                    leaf(&mut out, "CTType", extra_type)?;
                    leaf(&mut out, "VerCT", extra_version)?;
                    out.end_element(ns, list)?;
                }
            }
            out.start_element(ns, "SyncCap")?;
            for sync_type in 1..=6 {
                leaf(&mut out, "SyncType", &sync_type.to_string())?;
            }
            out.end_element(ns, "SyncCap")?;
            out.end_element(ns, "DataStore")?;
        }
        out.end_element(ns, "DevInf")?;
        Ok(out.output())
    }

    /// Opens a server `<Sync>`.
    pub fn sync_start(
        &mut self,
        client_uri: &str,
        server_uri: &str,
        number_of_changes: Option<usize>,
    ) -> ProtocolResult<u32> {
        self.start("Sync")?;
        let id = self.cmd_id()?;
        self.loc_uri("Target", client_uri)?;
        self.loc_uri("Source", server_uri)?;
        if let Some(count) = number_of_changes {
            self.leaf("NumberOfChanges", &count.to_string())?;
        }
        Ok(id)
    }

    /// Writes one Add, Replace or Delete and returns its CmdID.
    pub fn sync_command(&mut self, command: &SyncCommandOutput<'_>) -> ProtocolResult<u32> {
        let name = command.kind.element_name();
        self.start(name)?;
        let id = self.cmd_id()?;
        if let Some(content_type) = command.content_type {
            self.start("Meta")?;
            self.meta_leaf("Type", content_type)?;
            self.end("Meta")?;
        }
        if command.content.is_some() || command.cuid.is_some() || command.suid.is_some() {
            self.start("Item")?;
            if let Some(suid) = command.suid {
                self.loc_uri("Source", suid)?;
            }
            if let Some(cuid) = command.cuid {
                self.loc_uri("Target", cuid)?;
            }
            if let Some(format) = command.format.filter(|f| !f.is_empty()) {
                self.start("Meta")?;
                self.meta_leaf("Format", format)?;
                self.end("Meta")?;
            }
            if let Some(content) = command.content {
                self.start("Data")?;
                if command.use_cdata && !self.writer.is_binary() {
                    self.writer.cdata(content)?;
                } else {
                    self.writer.characters(content)?;
                }
                self.end("Data")?;
            }
            self.end("Item")?;
        }
        self.end(name)?;
        Ok(id)
    }

    /// Closes a server `<Sync>`.
    pub fn sync_end(&mut self) -> ProtocolResult<()> {
        self.end("Sync")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncml_protocol::XmlEncoder;

    fn session() -> SyncSession {
        let mut session = SyncSession::new("42", "IMEI:1", "http://sync.example.com", ProtocolVersion::V1_1);
        session.message_id = 3;
        session.user = Some("alice".into());
        session
    }

    fn writer() -> ResponseWriter {
        ResponseWriter::new(Box::new(XmlEncoder::new()), Encoding::Xml)
    }

    fn text(out: &ResponseWriter) -> String {
        String::from_utf8(out.output()).unwrap()
    }

    #[test]
    fn header_swaps_source_and_target() {
        let mut out = writer();
        out.begin(&session()).unwrap();
        out.header(&session(), &EngineConfig::default(), Some("http://sync.example.com?s=1"))
            .unwrap();
        let xml = text(&out);
        assert!(xml.starts_with("<SyncML xmlns=\"syncml:SYNCML1.1\"><SyncHdr><VerDTD>1.1</VerDTD>"));
        assert!(xml.contains("<Target><LocURI>IMEI:1</LocURI><LocName>alice</LocName></Target>"));
        assert!(xml.contains("<Source><LocURI>http://sync.example.com</LocURI></Source>"));
        assert!(xml.contains("<MsgID>3</MsgID>"));
        assert!(xml.contains("<MaxObjSize xmlns=\"syncml:metinf\">"));
    }

    #[test]
    fn command_ids_increase() {
        let mut out = writer();
        out.begin(&session()).unwrap();
        let a = out.status(&StatusReport::new("0", "SyncHdr", StatusCode::OK)).unwrap();
        let b = out.alert(200, "./contacts", "contacts", "0", "100", 1000).unwrap();
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn status_with_challenge_and_anchors() {
        let mut out = writer();
        out.begin(&session()).unwrap();
        let report = StatusReport::new("1", "Alert", StatusCode::REFRESH_REQUIRED)
            .with_target("contacts")
            .with_source("./contacts")
            .with_anchors("", "n2")
            .with_challenge();
        out.status(&report).unwrap();
        let xml = text(&out);
        assert!(xml.contains("<MsgRef>3</MsgRef><CmdRef>1</CmdRef><Cmd>Alert</Cmd>"));
        assert!(xml.contains("<Chal><Meta><Type xmlns=\"syncml:metinf\">syncml:auth-basic</Type>"));
        assert!(xml.contains("<Data>508</Data>"));
        assert!(xml.contains("<Item><Data><Anchor xmlns=\"syncml:metinf\"><Next>n2</Next></Anchor></Data></Item>"));
        assert!(!xml.contains("<Last"));
    }

    #[test]
    fn sync_command_layout() {
        let mut out = writer();
        out.begin(&session()).unwrap();
        out.sync_start("./contacts", "contacts", Some(1)).unwrap();
        let id = out
            .sync_command(&SyncCommandOutput {
                kind: ItemKind::Add,
                content: Some("BEGIN:VCARD"),
                content_type: Some("text/x-vcard"),
                format: None,
                cuid: None,
                suid: Some("s1"),
                use_cdata: true,
            })
            .unwrap();
        out.sync_end().unwrap();
        assert_eq!(id, 2);
        let xml = text(&out);
        assert!(xml.contains("<NumberOfChanges>1</NumberOfChanges>"));
        assert!(xml.contains(
            "<Add><CmdID>2</CmdID><Meta><Type xmlns=\"syncml:metinf\">text/x-vcard</Type></Meta><Item><Source><LocURI>s1</LocURI></Source><Data><![CDATA[BEGIN:VCARD]]></Data></Item></Add>"
        ));
    }

    #[test]
    fn measured_command_matches_written_bytes() {
        let mut out = writer();
        out.begin(&session()).unwrap();
        out.body_start().unwrap();
        out.sync_start("./notes", "notes", None).unwrap();
        let command = SyncCommandOutput {
            kind: ItemKind::Replace,
            content: Some("a < b & c"),
            content_type: Some("text/plain"),
            format: None,
            cuid: Some("c1"),
            suid: None,
            use_cdata: false,
        };

        let measured = out.measure(|o| o.sync_command(&command)).unwrap();
        let before = out.output_size();
        let id = out.sync_command(&command).unwrap();
        assert_eq!(id, 2);
        assert_eq!(out.output_size() - before, measured);

        let closing = out.closing_len().unwrap();
        let before = out.output_size();
        out.sync_end().unwrap();
        out.final_marker().unwrap();
        out.end_message().unwrap();
        let message = out.message();
        assert!(message.starts_with(XML_DECLARATION.as_bytes()));
        assert_eq!(message.len(), before + closing);
    }

    #[test]
    fn devinf_results_embed_server_stores() {
        let mut out = writer();
        out.begin(&session()).unwrap();
        out.devinf_results("4", &EngineConfig::default()).unwrap();
        let xml = text(&out);
        assert!(xml.contains("<LocURI>./devinf11</LocURI>"));
        assert!(xml.contains("<DevInf xmlns=\"syncml:devinf\"><VerDTD>1.1</VerDTD>"));
        assert_eq!(xml.matches("<DataStore>").count(), 4);
        assert!(xml.contains("<Rx><CTType>text/x-vcard</CTType><VerCT>2.1</VerCT></Rx>"));
        assert_eq!(xml.matches("<SyncType>").count(), 24);
    }
}
