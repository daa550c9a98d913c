//! Server response parsing and query helpers.
//!
//! Responses are decoded with the protocol crate's XML decoder into a small
//! element tree. The views below pick out what tests assert on.

use syncml_protocol::{
    ElementDecoder, ElementHandler, ProtocolError, ProtocolResult, StatusCode, XmlDecoder,
};

/// One element of a decoded document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// Local name.
    pub name: String,
    /// Namespace URI.
    pub namespace: String,
    /// Concatenated direct character data.
    pub text: String,
    /// Child elements in document order.
    pub children: Vec<Element>,
}

impl Element {
    /// Returns the first child named `name`.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Returns all children named `name`.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follows a `/` separated path of child names.
    pub fn find(&self, path: &str) -> Option<&Element> {
        path.split('/')
            .filter(|p| !p.is_empty())
            .try_fold(self, |element, name| element.child(name))
    }

    /// Returns the trimmed text at `path`.
    pub fn text_at(&self, path: &str) -> Option<String> {
        self.find(path).map(|e| e.text.trim().to_string())
    }
}

#[derive(Default)]
struct TreeBuilder {
    stack: Vec<Element>,
    root: Option<Element>,
}

impl ElementHandler for TreeBuilder {
    fn start_element(&mut self, namespace: &str, name: &str) -> ProtocolResult<()> {
        self.stack.push(Element {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Element::default()
        });
        Ok(())
    }

    fn characters(&mut self, text: &str) -> ProtocolResult<()> {
        if let Some(current) = self.stack.last_mut() {
            current.text.push_str(text);
        }
        Ok(())
    }

    fn end_element(&mut self, _namespace: &str, _name: &str) -> ProtocolResult<()> {
        let element = self
            .stack
            .pop()
            .ok_or_else(|| ProtocolError::malformed("unbalanced end tag"))?;
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None => self.root = Some(element),
        }
        Ok(())
    }
}

/// A `<Status>` of the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    /// `<CmdID>` of the status itself.
    pub cmd_id: u32,
    /// `<MsgRef>`.
    pub msg_ref: String,
    /// `<CmdRef>`.
    pub cmd_ref: String,
    /// `<Cmd>`.
    pub cmd: String,
    /// `<Data>`.
    pub code: StatusCode,
    /// `<TargetRef>`.
    pub target_ref: Option<String>,
    /// `<SourceRef>`.
    pub source_ref: Option<String>,
    /// `<Item><Data><Anchor><Next>`.
    pub anchor_next: Option<String>,
    /// Whether a `<Chal>` is present.
    pub challenge: bool,
}

/// An `<Alert>` of the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertView {
    /// `<CmdID>`.
    pub cmd_id: u32,
    /// Alert code.
    pub code: u16,
    /// Client database.
    pub target: Option<String>,
    /// Server database.
    pub source: Option<String>,
    /// Server's last anchor.
    pub last: Option<String>,
    /// Server's next anchor.
    pub next: Option<String>,
}

/// One Add, Replace or Delete inside a server `<Sync>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerChangeView {
    /// `Add`, `Replace` or `Delete`.
    pub kind: String,
    /// `<CmdID>`.
    pub cmd_id: u32,
    /// Server id.
    pub suid: Option<String>,
    /// Client id, when the server knows it.
    pub cuid: Option<String>,
    /// `<Meta><Type>`.
    pub content_type: Option<String>,
    /// `<Item><Meta><Format>`.
    pub format: Option<String>,
    /// Payload.
    pub data: Option<String>,
}

/// A server `<Sync>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncView {
    /// `<CmdID>`.
    pub cmd_id: u32,
    /// Client database.
    pub target: String,
    /// Server database.
    pub source: String,
    /// `<NumberOfChanges>`.
    pub number_of_changes: Option<usize>,
    /// Changes in document order.
    pub changes: Vec<ServerChangeView>,
}

/// A decoded server response.
#[derive(Debug, Clone)]
pub struct Response {
    root: Element,
}

fn cmd_id(element: &Element) -> u32 {
    element
        .text_at("CmdID")
        .and_then(|id| id.parse().ok())
        .unwrap_or(0)
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.is_empty())
}

impl Response {
    /// Decodes an XML response.
    pub fn parse(body: &[u8]) -> ProtocolResult<Self> {
        let mut builder = TreeBuilder::default();
        XmlDecoder::new().decode(body, &mut builder)?;
        let root = builder
            .root
            .ok_or_else(|| ProtocolError::malformed("empty response"))?;
        Ok(Self { root })
    }

    /// Returns the `<SyncML>` element.
    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Returns a header value, e.g. `SessionID` or `Target/LocURI`.
    pub fn header(&self, path: &str) -> Option<String> {
        self.root.find("SyncHdr")?.text_at(path)
    }

    /// Returns the `<MsgID>` of the response.
    pub fn message_id(&self) -> u32 {
        self.header("MsgID")
            .and_then(|id| id.parse().ok())
            .unwrap_or(0)
    }

    /// Returns the body commands in document order.
    pub fn commands(&self) -> Vec<&Element> {
        self.root
            .find("SyncBody")
            .map(|body| body.children.iter().collect())
            .unwrap_or_default()
    }

    /// Returns the names of the body commands in document order.
    pub fn command_names(&self) -> Vec<String> {
        self.commands().iter().map(|c| c.name.clone()).collect()
    }

    /// Returns true if the response closes the server's package.
    pub fn has_final(&self) -> bool {
        self.commands().iter().any(|c| c.name == "Final")
    }

    /// Returns every `<Status>`.
    pub fn statuses(&self) -> Vec<StatusView> {
        self.commands()
            .into_iter()
            .filter(|c| c.name == "Status")
            .map(|status| StatusView {
                cmd_id: cmd_id(status),
                msg_ref: status.text_at("MsgRef").unwrap_or_default(),
                cmd_ref: status.text_at("CmdRef").unwrap_or_default(),
                cmd: status.text_at("Cmd").unwrap_or_default(),
                code: status
                    .text_at("Data")
                    .and_then(|d| StatusCode::parse(&d))
                    .unwrap_or(StatusCode::new(0)),
                target_ref: non_empty(status.text_at("TargetRef")),
                source_ref: non_empty(status.text_at("SourceRef")),
                anchor_next: non_empty(status.text_at("Item/Data/Anchor/Next")),
                challenge: status.child("Chal").is_some(),
            })
            .collect()
    }

    /// Returns the statuses answering commands named `cmd`.
    pub fn statuses_for(&self, cmd: &str) -> Vec<StatusView> {
        self.statuses().into_iter().filter(|s| s.cmd == cmd).collect()
    }

    /// Returns the first status answering a command named `cmd`.
    pub fn status_for(&self, cmd: &str) -> Option<StatusView> {
        self.statuses().into_iter().find(|s| s.cmd == cmd)
    }

    /// Returns the status whose `<SourceRef>` is `source`.
    pub fn status_for_item(&self, source: &str) -> Option<StatusView> {
        self.statuses()
            .into_iter()
            .find(|s| s.source_ref.as_deref() == Some(source) && s.cmd != "Sync")
    }

    /// Returns every `<Alert>`.
    pub fn alerts(&self) -> Vec<AlertView> {
        self.commands()
            .into_iter()
            .filter(|c| c.name == "Alert")
            .map(|alert| AlertView {
                cmd_id: cmd_id(alert),
                code: alert
                    .text_at("Data")
                    .and_then(|d| d.parse().ok())
                    .unwrap_or(0),
                target: non_empty(alert.text_at("Item/Target/LocURI")),
                source: non_empty(alert.text_at("Item/Source/LocURI")),
                last: alert.text_at("Item/Meta/Anchor/Last"),
                next: non_empty(alert.text_at("Item/Meta/Anchor/Next")),
            })
            .collect()
    }

    /// Returns every server `<Sync>`.
    pub fn syncs(&self) -> Vec<SyncView> {
        self.commands()
            .into_iter()
            .filter(|c| c.name == "Sync")
            .map(|sync| SyncView {
                cmd_id: cmd_id(sync),
                target: sync.text_at("Target/LocURI").unwrap_or_default(),
                source: sync.text_at("Source/LocURI").unwrap_or_default(),
                number_of_changes: sync
                    .text_at("NumberOfChanges")
                    .and_then(|n| n.parse().ok()),
                changes: sync
                    .children
                    .iter()
                    .filter(|c| matches!(c.name.as_str(), "Add" | "Replace" | "Delete"))
                    .map(|change| ServerChangeView {
                        kind: change.name.clone(),
                        cmd_id: cmd_id(change),
                        suid: non_empty(change.text_at("Item/Source/LocURI")),
                        cuid: non_empty(change.text_at("Item/Target/LocURI")),
                        content_type: non_empty(change.text_at("Meta/Type")),
                        format: non_empty(change.text_at("Item/Meta/Format")),
                        data: change.find("Item/Data").map(|d| d.text.clone()),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Returns the server changes sent for `database` in this response.
    pub fn changes_for(&self, database: &str) -> Vec<ServerChangeView> {
        self.syncs()
            .into_iter()
            .filter(|s| s.source == database)
            .flat_map(|s| s.changes)
            .collect()
    }

    /// Returns true if the response carries a command named `name`.
    pub fn has_command(&self, name: &str) -> bool {
        self.commands().iter().any(|c| c.name == name)
    }

    /// Returns the `<DevInf>` element of a `<Results>`, if any.
    pub fn devinf_results(&self) -> Option<&Element> {
        self.commands()
            .into_iter()
            .find(|c| c.name == "Results")
            .and_then(|results| results.find("Item/Data/DevInf"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SyncML xmlns="SYNCML:SYNCML1.1"><SyncHdr><VerDTD>1.1</VerDTD><SessionID>7</SessionID><MsgID>2</MsgID></SyncHdr><SyncBody>
<Status><CmdID>1</CmdID><MsgRef>2</MsgRef><CmdRef>0</CmdRef><Cmd>SyncHdr</Cmd><Data>200</Data></Status>
<Status><CmdID>2</CmdID><MsgRef>2</MsgRef><CmdRef>3</CmdRef><Cmd>Add</Cmd><SourceRef>c1</SourceRef><Data>201</Data></Status>
<Sync><CmdID>3</CmdID><Target><LocURI>./contacts</LocURI></Target><Source><LocURI>contacts</LocURI></Source>
<Delete><CmdID>4</CmdID><Item><Target><LocURI>c9</LocURI></Target></Item></Delete>
<Add><CmdID>5</CmdID><Meta><Type xmlns="syncml:metinf">text/x-vcard</Type></Meta><Item><Source><LocURI>s1</LocURI></Source><Data><![CDATA[BEGIN:VCARD]]></Data></Item></Add>
</Sync><Final/></SyncBody></SyncML>"#;

    #[test]
    fn queries_statuses_and_changes() {
        let response = Response::parse(RESPONSE.as_bytes()).unwrap();
        assert_eq!(response.message_id(), 2);
        assert_eq!(response.header("SessionID").as_deref(), Some("7"));
        assert_eq!(response.command_names(), ["Status", "Status", "Sync", "Final"]);
        assert!(response.has_final());

        let add = response.status_for_item("c1").unwrap();
        assert_eq!(add.code, StatusCode::ITEM_ADDED);
        assert_eq!(add.cmd_ref, "3");

        let changes = response.changes_for("contacts");
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].kind, "Delete");
        assert_eq!(changes[0].cuid.as_deref(), Some("c9"));
        assert_eq!(changes[1].suid.as_deref(), Some("s1"));
        assert_eq!(changes[1].content_type.as_deref(), Some("text/x-vcard"));
        assert_eq!(changes[1].data.as_deref(), Some("BEGIN:VCARD"));
    }

    #[test]
    fn element_paths() {
        let response = Response::parse(RESPONSE.as_bytes()).unwrap();
        let sync = response.root().find("SyncBody/Sync").unwrap();
        assert_eq!(sync.children_named("Add").count(), 1);
        assert!(sync.find("Missing/Path").is_none());
    }
}
