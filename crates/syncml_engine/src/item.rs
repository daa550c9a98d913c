//! Items carried by Sync commands.

use serde::{Deserialize, Serialize};
use std::fmt;
use syncml_protocol::StatusCode;

/// The operation of a Sync item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    /// New object.
    Add,
    /// Changed object.
    Replace,
    /// Removed object.
    Delete,
}

impl ItemKind {
    /// Parses an element name.
    pub fn from_element(name: &str) -> Option<Self> {
        match name {
            "Add" => Some(ItemKind::Add),
            "Replace" => Some(ItemKind::Replace),
            "Delete" => Some(ItemKind::Delete),
            _ => None,
        }
    }

    /// Element name on the wire.
    pub fn element_name(self) -> &'static str {
        match self {
            ItemKind::Add => "Add",
            ItemKind::Replace => "Replace",
            ItemKind::Delete => "Delete",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element_name())
    }
}

/// One client item from an Add, Replace or Delete command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItem {
    /// Operation.
    pub kind: ItemKind,
    /// CmdID of the enclosing command.
    pub cmd_id: String,
    /// Client id from `<Source><LocURI>`.
    pub cuid: Option<String>,
    /// Server id from `<Target><LocURI>`, if the client sent one.
    pub suid: Option<String>,
    /// Raw payload.
    pub content: String,
    /// Declared content type.
    pub content_type: Option<String>,
    /// Declared transfer format.
    pub content_format: Option<String>,
    /// Declared size, for the complete object.
    pub size: Option<usize>,
    /// More chunks follow.
    pub more_data: bool,
    /// Outcome reported back to the client.
    pub response_code: StatusCode,
}

impl SyncItem {
    /// Creates an empty item.
    pub fn new(kind: ItemKind, cmd_id: impl Into<String>) -> Self {
        Self {
            kind,
            cmd_id: cmd_id.into(),
            cuid: None,
            suid: None,
            content: String::new(),
            content_type: None,
            content_format: None,
            size: None,
            more_data: false,
            response_code: StatusCode::OK,
        }
    }

    /// Sets the client id.
    pub fn with_cuid(mut self, cuid: impl Into<String>) -> Self {
        self.cuid = Some(cuid.into());
        self
    }

    /// Sets the payload.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Sets the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the declared size.
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }
}

/// Buffered chunks of a client object split with `<MoreData/>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingItem {
    /// Server database URI of the Sync the chunks belong to.
    pub database: String,
    /// Operation.
    pub kind: ItemKind,
    /// Client id.
    pub cuid: Option<String>,
    /// Content type from the first chunk.
    pub content_type: Option<String>,
    /// Transfer format from the first chunk.
    pub content_format: Option<String>,
    /// Size declared on the first chunk.
    pub size: Option<usize>,
    /// Content received so far.
    pub content: String,
}

impl PendingItem {
    /// Starts buffering from a first chunk.
    pub fn start(database: &str, item: &SyncItem) -> Self {
        Self {
            database: database.to_string(),
            kind: item.kind,
            cuid: item.cuid.clone(),
            content_type: item.content_type.clone(),
            content_format: item.content_format.clone(),
            size: item.size,
            content: item.content.clone(),
        }
    }

    /// Returns true if `item` continues this object.
    pub fn continues(&self, database: &str, item: &SyncItem) -> bool {
        self.database == database && self.kind == item.kind && self.cuid == item.cuid
    }

    /// Completes the object with its last chunk.
    pub fn complete(self, last: SyncItem) -> SyncItem {
        let mut content = self.content;
        content.push_str(&last.content);
        SyncItem {
            content,
            content_type: last.content_type.or(self.content_type),
            content_format: last.content_format.or(self.content_format),
            size: self.size.or(last.size),
            ..last
        }
    }
}
