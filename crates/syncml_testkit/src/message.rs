//! Client message builder.
//!
//! [`ClientMessage`] plays the device side of a session. Commands are
//! collected first and serialized by [`ClientMessage::build`], which hands
//! out command ids in document order starting at 1.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use syncml_protocol::{auth, format, ElementWriter, ProtocolResult, ProtocolVersion, XmlEncoder};

/// Device URI used when a test does not pick one.
pub const DEFAULT_DEVICE: &str = "IMEI:493005100592800";

/// Server URI used when a test does not pick one.
pub const DEFAULT_SERVER: &str = "http://sync.example.com/rpc";

/// Kind of a client change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// `<Add>`.
    Add,
    /// `<Replace>`.
    Replace,
    /// `<Delete>`.
    Delete,
}

impl ChangeKind {
    fn element(self) -> &'static str {
        match self {
            ChangeKind::Add => "Add",
            ChangeKind::Replace => "Replace",
            ChangeKind::Delete => "Delete",
        }
    }
}

/// One change inside a client `<Sync>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientChange {
    /// Command kind.
    pub kind: ChangeKind,
    /// Client id of the item.
    pub cuid: String,
    /// Server id, for replaces of items the server sent.
    pub suid: Option<String>,
    /// Command level `<Meta><Type>`.
    pub content_type: Option<String>,
    /// Item level `<Meta><Format>`.
    pub format: Option<String>,
    /// Item payload.
    pub data: Option<String>,
    /// Item level `<Meta><Size>`, announced on the first chunk.
    pub size: Option<usize>,
    /// Marks the payload as an incomplete chunk.
    pub more_data: bool,
}

impl ClientChange {
    fn new(kind: ChangeKind, cuid: &str) -> Self {
        Self {
            kind,
            cuid: cuid.to_string(),
            suid: None,
            content_type: None,
            format: None,
            data: None,
            size: None,
            more_data: false,
        }
    }

    /// An `<Add>` carrying `data` of `content_type`.
    pub fn add(cuid: &str, content_type: &str, data: &str) -> Self {
        Self {
            content_type: Some(content_type.to_string()),
            data: Some(data.to_string()),
            ..Self::new(ChangeKind::Add, cuid)
        }
    }

    /// A `<Replace>` carrying `data` of `content_type`.
    pub fn replace(cuid: &str, content_type: &str, data: &str) -> Self {
        Self {
            content_type: Some(content_type.to_string()),
            data: Some(data.to_string()),
            ..Self::new(ChangeKind::Replace, cuid)
        }
    }

    /// A `<Delete>` for `cuid`.
    pub fn delete(cuid: &str) -> Self {
        Self::new(ChangeKind::Delete, cuid)
    }

    /// Sets the server id.
    pub fn with_suid(mut self, suid: &str) -> Self {
        self.suid = Some(suid.to_string());
        self
    }

    /// Base64 encodes the payload and marks it with `<Format>b64</Format>`.
    pub fn base64(mut self) -> Self {
        self.data = self.data.map(|data| STANDARD.encode(data));
        self.format = Some(format::B64.to_string());
        self
    }

    /// Marks this change as one chunk of a larger item.
    pub fn chunk(mut self, total_size: Option<usize>, more_data: bool) -> Self {
        self.size = total_size;
        self.more_data = more_data;
        self
    }
}

/// Header credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Cred {
    Basic { user: String, password: String },
    Raw { data: String, auth_type: String, format: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClientCommand {
    Alert {
        code: u16,
        server_db: String,
        client_db: String,
        last: Option<String>,
        next: Option<String>,
    },
    Sync {
        server_db: String,
        client_db: String,
        changes: Vec<ClientChange>,
    },
    Map {
        server_db: String,
        client_db: String,
        pairs: Vec<(String, String)>,
    },
    Status {
        msg_ref: String,
        cmd_ref: String,
        cmd: String,
        code: u16,
    },
    Put {
        devinf: String,
        escaped: bool,
    },
    Results {
        cmd_ref: String,
        devinf: String,
    },
    Get,
    Other(String),
}

/// One client message under construction.
#[derive(Debug, Clone)]
pub struct ClientMessage {
    version: ProtocolVersion,
    session_id: String,
    message_id: u32,
    device: String,
    server: String,
    cred: Option<Cred>,
    loc_name: Option<String>,
    max_message_size: Option<usize>,
    commands: Vec<ClientCommand>,
    final_marker: bool,
}

impl ClientMessage {
    /// Starts message `message_id` of session `session_id`. The message
    /// ends with `<Final/>` unless [`ClientMessage::without_final`] is used.
    pub fn new(session_id: &str, message_id: u32) -> Self {
        Self {
            version: ProtocolVersion::V1_1,
            session_id: session_id.to_string(),
            message_id,
            device: DEFAULT_DEVICE.to_string(),
            server: DEFAULT_SERVER.to_string(),
            cred: None,
            loc_name: None,
            max_message_size: None,
            commands: Vec::new(),
            final_marker: true,
        }
    }

    /// Sets the protocol version.
    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Sets the device URI (`<Source><LocURI>` of the header).
    pub fn device(mut self, device: &str) -> Self {
        self.device = device.to_string();
        self
    }

    /// Sets the server URI (`<Target><LocURI>` of the header).
    pub fn server(mut self, server: &str) -> Self {
        self.server = server.to_string();
        self
    }

    /// Adds basic credentials and names the user in `<LocName>`.
    pub fn basic_auth(mut self, user: &str, password: &str) -> Self {
        self.cred = Some(Cred::Basic {
            user: user.to_string(),
            password: password.to_string(),
        });
        self.loc_name = Some(user.to_string());
        self
    }

    /// Adds credentials of an arbitrary type, such as an MD5 digest.
    pub fn credentials(mut self, auth_type: &str, data: &str, format: Option<&str>) -> Self {
        self.cred = Some(Cred::Raw {
            data: data.to_string(),
            auth_type: auth_type.to_string(),
            format: format.map(str::to_string),
        });
        self
    }

    /// Sets `<Source><LocName>` of the header.
    pub fn loc_name(mut self, user: &str) -> Self {
        self.loc_name = Some(user.to_string());
        self
    }

    /// Announces the client's maximum message size.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    /// Omits `<Final/>`: the client's package continues in the next message.
    pub fn without_final(mut self) -> Self {
        self.final_marker = false;
        self
    }

    /// Adds a sync `<Alert>` for `database`, which both sides name the same.
    pub fn alert(self, code: u16, database: &str, last: Option<&str>, next: &str) -> Self {
        self.alert_for(code, database, database, last, Some(next))
    }

    /// Adds an `<Alert>` with separate server and client database URIs.
    pub fn alert_for(
        mut self,
        code: u16,
        server_db: &str,
        client_db: &str,
        last: Option<&str>,
        next: Option<&str>,
    ) -> Self {
        self.commands.push(ClientCommand::Alert {
            code,
            server_db: server_db.to_string(),
            client_db: client_db.to_string(),
            last: last.map(str::to_string),
            next: next.map(str::to_string),
        });
        self
    }

    /// Adds a `<Sync>` for `database` with the given changes.
    pub fn sync(self, database: &str, changes: Vec<ClientChange>) -> Self {
        self.sync_for(database, database, changes)
    }

    /// Adds a `<Sync>` with separate server and client database URIs.
    pub fn sync_for(mut self, server_db: &str, client_db: &str, changes: Vec<ClientChange>) -> Self {
        self.commands.push(ClientCommand::Sync {
            server_db: server_db.to_string(),
            client_db: client_db.to_string(),
            changes,
        });
        self
    }

    /// Adds a `<Map>` of `(cuid, suid)` pairs.
    pub fn map(mut self, database: &str, pairs: &[(&str, &str)]) -> Self {
        self.commands.push(ClientCommand::Map {
            server_db: database.to_string(),
            client_db: database.to_string(),
            pairs: pairs
                .iter()
                .map(|(cuid, suid)| (cuid.to_string(), suid.to_string()))
                .collect(),
        });
        self
    }

    /// Adds a `<Status>` answering a server command.
    pub fn status(mut self, msg_ref: u32, cmd_ref: u32, cmd: &str, code: u16) -> Self {
        self.commands.push(ClientCommand::Status {
            msg_ref: msg_ref.to_string(),
            cmd_ref: cmd_ref.to_string(),
            cmd: cmd.to_string(),
            code,
        });
        self
    }

    /// Adds a `<Put>` with the device information nested as elements.
    pub fn put_devinf(mut self, devinf: &str) -> Self {
        self.commands.push(ClientCommand::Put {
            devinf: devinf.to_string(),
            escaped: false,
        });
        self
    }

    /// Adds a `<Put>` with the device information escaped as text.
    pub fn put_devinf_escaped(mut self, devinf: &str) -> Self {
        self.commands.push(ClientCommand::Put {
            devinf: devinf.to_string(),
            escaped: true,
        });
        self
    }

    /// Adds `<Results>` answering the server's Get for device information.
    pub fn results_devinf(mut self, cmd_ref: u32, devinf: &str) -> Self {
        self.commands.push(ClientCommand::Results {
            cmd_ref: cmd_ref.to_string(),
            devinf: devinf.to_string(),
        });
        self
    }

    /// Adds a `<Get>` for the server's device information.
    pub fn get_devinf(mut self) -> Self {
        self.commands.push(ClientCommand::Get);
        self
    }

    /// Adds an empty command the server does not implement, such as `Exec`.
    pub fn other(mut self, name: &str) -> Self {
        self.commands.push(ClientCommand::Other(name.to_string()));
        self
    }

    /// Returns the message id.
    pub fn message_id(&self) -> u32 {
        self.message_id
    }

    /// Serializes the message.
    pub fn try_build(&self) -> ProtocolResult<Vec<u8>> {
        let mut out = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>".to_vec();
        let mut writer = MessageWriter::new(self.version);
        writer.message(self)?;
        out.extend(writer.out.output());
        Ok(out)
    }

    /// Serializes the message, panicking on encoder errors.
    pub fn build(&self) -> Vec<u8> {
        self.try_build().expect("Failed to encode client message")
    }

    /// Serializes the message as a string.
    pub fn to_xml(&self) -> String {
        String::from_utf8_lossy(&self.build()).into_owned()
    }
}

struct MessageWriter {
    out: XmlEncoder,
    ns: &'static str,
    meta_ns: &'static str,
    version: ProtocolVersion,
    next_cmd_id: u32,
}

impl MessageWriter {
    fn new(version: ProtocolVersion) -> Self {
        Self {
            out: XmlEncoder::new(),
            ns: version.namespace(),
            meta_ns: version.meta_namespace(),
            version,
            next_cmd_id: 1,
        }
    }

    fn start(&mut self, name: &str) -> ProtocolResult<()> {
        self.out.start_element(self.ns, name)
    }

    fn end(&mut self, name: &str) -> ProtocolResult<()> {
        self.out.end_element(self.ns, name)
    }

    fn empty(&mut self, name: &str) -> ProtocolResult<()> {
        self.start(name)?;
        self.end(name)
    }

    fn leaf(&mut self, name: &str, text: &str) -> ProtocolResult<()> {
        self.start(name)?;
        self.out.characters(text)?;
        self.end(name)
    }

    fn meta_leaf(&mut self, name: &str, text: &str) -> ProtocolResult<()> {
        self.out.start_element(self.meta_ns, name)?;
        self.out.characters(text)?;
        self.out.end_element(self.meta_ns, name)
    }

    fn loc_uri(&mut self, wrapper: &str, uri: &str) -> ProtocolResult<()> {
        self.start(wrapper)?;
        self.leaf("LocURI", uri)?;
        self.end(wrapper)
    }

    fn cmd_id(&mut self) -> ProtocolResult<()> {
        let id = self.next_cmd_id;
        self.next_cmd_id += 1;
        self.leaf("CmdID", &id.to_string())
    }

    fn message(&mut self, msg: &ClientMessage) -> ProtocolResult<()> {
        self.start("SyncML")?;
        self.header(msg)?;
        self.start("SyncBody")?;
        for command in &msg.commands {
            self.command(command)?;
        }
        if msg.final_marker {
            self.empty("Final")?;
        }
        self.end("SyncBody")?;
        self.end("SyncML")
    }

    fn header(&mut self, msg: &ClientMessage) -> ProtocolResult<()> {
        self.start("SyncHdr")?;
        self.leaf("VerDTD", self.version.ver_dtd())?;
        self.leaf("VerProto", self.version.proto_name())?;
        self.leaf("SessionID", &msg.session_id)?;
        self.leaf("MsgID", &msg.message_id.to_string())?;
        self.loc_uri("Target", &msg.server)?;
        self.start("Source")?;
        self.leaf("LocURI", &msg.device)?;
        if let Some(user) = &msg.loc_name {
            self.leaf("LocName", user)?;
        }
        self.end("Source")?;

        if let Some(cred) = &msg.cred {
            let (data, auth_type, format) = match cred {
                Cred::Basic { user, password } => (
                    STANDARD.encode(format!("{user}:{password}")),
                    auth::BASIC.to_string(),
                    Some(format::B64.to_string()),
                ),
                Cred::Raw {
                    data,
                    auth_type,
                    format,
                } => (data.clone(), auth_type.clone(), format.clone()),
            };
            self.start("Cred")?;
            self.start("Meta")?;
            if let Some(format) = format {
                self.meta_leaf("Format", &format)?;
            }
            self.meta_leaf("Type", &auth_type)?;
            self.end("Meta")?;
            self.leaf("Data", &data)?;
            self.end("Cred")?;
        }

        if let Some(size) = msg.max_message_size {
            self.start("Meta")?;
            self.meta_leaf("MaxMsgSize", &size.to_string())?;
            self.end("Meta")?;
        }
        self.end("SyncHdr")
    }

    fn command(&mut self, command: &ClientCommand) -> ProtocolResult<()> {
        match command {
            ClientCommand::Alert {
                code,
                server_db,
                client_db,
                last,
                next,
            } => {
                self.start("Alert")?;
                self.cmd_id()?;
                self.leaf("Data", &code.to_string())?;
                self.start("Item")?;
                self.loc_uri("Target", server_db)?;
                self.loc_uri("Source", client_db)?;
                if last.is_some() || next.is_some() {
                    self.start("Meta")?;
                    self.out.start_element(self.meta_ns, "Anchor")?;
                    if let Some(last) = last {
                        self.meta_leaf("Last", last)?;
                    }
                    if let Some(next) = next {
                        self.meta_leaf("Next", next)?;
                    }
                    self.out.end_element(self.meta_ns, "Anchor")?;
                    self.end("Meta")?;
                }
                self.end("Item")?;
                self.end("Alert")
            }
            ClientCommand::Sync {
                server_db,
                client_db,
                changes,
            } => {
                self.start("Sync")?;
                self.cmd_id()?;
                self.loc_uri("Target", server_db)?;
                self.loc_uri("Source", client_db)?;
                for change in changes {
                    self.change(change)?;
                }
                self.end("Sync")
            }
            ClientCommand::Map {
                server_db,
                client_db,
                pairs,
            } => {
                self.start("Map")?;
                self.cmd_id()?;
                self.loc_uri("Target", server_db)?;
                self.loc_uri("Source", client_db)?;
                for (cuid, suid) in pairs {
                    self.start("MapItem")?;
                    self.loc_uri("Target", suid)?;
                    self.loc_uri("Source", cuid)?;
                    self.end("MapItem")?;
                }
                self.end("Map")
            }
            ClientCommand::Status {
                msg_ref,
                cmd_ref,
                cmd,
                code,
            } => {
                self.start("Status")?;
                self.cmd_id()?;
                self.leaf("MsgRef", msg_ref)?;
                self.leaf("CmdRef", cmd_ref)?;
                self.leaf("Cmd", cmd)?;
                self.leaf("Data", &code.to_string())?;
                self.end("Status")
            }
            ClientCommand::Put { devinf, escaped } => {
                self.start("Put")?;
                self.cmd_id()?;
                self.devinf_item("Source", devinf, *escaped)?;
                self.end("Put")
            }
            ClientCommand::Results { cmd_ref, devinf } => {
                self.start("Results")?;
                self.cmd_id()?;
                self.leaf("MsgRef", "1")?;
                self.leaf("CmdRef", cmd_ref)?;
                self.devinf_item("Source", devinf, false)?;
                self.end("Results")
            }
            ClientCommand::Get => {
                self.start("Get")?;
                self.cmd_id()?;
                self.start("Item")?;
                self.loc_uri("Target", self.version.devinf_uri())?;
                self.end("Item")?;
                self.end("Get")
            }
            ClientCommand::Other(name) => {
                self.start(name)?;
                self.cmd_id()?;
                self.end(name)
            }
        }
    }

    fn devinf_item(&mut self, wrapper: &str, devinf: &str, escaped: bool) -> ProtocolResult<()> {
        self.start("Meta")?;
        self.meta_leaf("Type", syncml_protocol::mime::DEVINF_XML)?;
        self.end("Meta")?;
        self.start("Item")?;
        self.loc_uri(wrapper, self.version.devinf_uri())?;
        self.start("Data")?;
        if escaped {
            self.out.characters(devinf)?;
        } else {
            self.out.opaque(devinf.as_bytes())?;
        }
        self.end("Data")?;
        self.end("Item")
    }

    fn change(&mut self, change: &ClientChange) -> ProtocolResult<()> {
        let name = change.kind.element();
        self.start(name)?;
        self.cmd_id()?;
        if let Some(content_type) = &change.content_type {
            self.start("Meta")?;
            self.meta_leaf("Type", content_type)?;
            self.end("Meta")?;
        }
        self.start("Item")?;
        self.loc_uri("Source", &change.cuid)?;
        if let Some(suid) = &change.suid {
            self.loc_uri("Target", suid)?;
        }
        if change.format.is_some() || change.size.is_some() {
            self.start("Meta")?;
            if let Some(format) = &change.format {
                self.meta_leaf("Format", format)?;
            }
            if let Some(size) = change.size {
                self.meta_leaf("Size", &size.to_string())?;
            }
            self.end("Meta")?;
        }
        if let Some(data) = &change.data {
            self.leaf("Data", data)?;
        }
        if change.more_data {
            self.empty("MoreData")?;
        }
        self.end("Item")?;
        self.end(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_carries_credentials_and_ids() {
        let xml = ClientMessage::new("42", 3)
            .basic_auth("alice", "secret")
            .max_message_size(5000)
            .to_xml();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<SessionID>42</SessionID><MsgID>3</MsgID>"));
        assert!(xml.contains("<LocName>alice</LocName>"));
        assert!(xml.contains(&STANDARD.encode("alice:secret")));
        assert!(xml.contains(">5000</MaxMsgSize>"));
        assert!(xml.ends_with("<Final></Final></SyncBody></SyncML>"));
    }

    #[test]
    fn command_ids_follow_document_order() {
        let xml = ClientMessage::new("1", 1)
            .alert(200, "contacts", Some("1"), "2")
            .sync(
                "contacts",
                vec![
                    ClientChange::add("c1", "text/x-vcard", "BEGIN:VCARD"),
                    ClientChange::delete("c2"),
                ],
            )
            .without_final()
            .to_xml();
        let alert = xml.find("<Alert><CmdID>1</CmdID>").unwrap();
        let sync = xml.find("<Sync><CmdID>2</CmdID>").unwrap();
        let add = xml.find("<Add><CmdID>3</CmdID>").unwrap();
        let delete = xml.find("<Delete><CmdID>4</CmdID>").unwrap();
        assert!(alert < sync && sync < add && add < delete);
        assert!(!xml.contains("Final"));
    }

    #[test]
    fn chunked_change_marks_more_data() {
        let xml = ClientMessage::new("1", 2)
            .sync(
                "notes",
                vec![ClientChange::add("n1", "text/plain", "part").chunk(Some(8), true)],
            )
            .to_xml();
        assert!(xml.contains(">8</Size>"));
        assert!(xml.contains("<Data>part</Data><MoreData></MoreData>"));
    }
}
