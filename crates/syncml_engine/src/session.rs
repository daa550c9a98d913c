//! Per-session state carried across messages.

use crate::device::Device;
use crate::item::{ItemKind, PendingItem};
use crate::sync::DatabaseSync;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use syncml_protocol::{DeviceInfo, ProtocolVersion, StatusCode};
use tracing::warn;

/// A server change awaiting the client's Status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentChange {
    /// Command that carried the change.
    pub kind: ItemKind,
    /// Server id.
    pub suid: String,
    /// Client id, unknown for adds.
    pub cuid: Option<String>,
}

/// Server changes by message id, database and command id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLedger {
    entries: BTreeMap<u32, BTreeMap<String, BTreeMap<u32, SentChange>>>,
}

impl ChangeLedger {
    /// Records a change sent in message `message_id`.
    pub fn record(&mut self, message_id: u32, database: &str, cmd_id: u32, change: SentChange) {
        self.entries
            .entry(message_id)
            .or_default()
            .entry(database.to_string())
            .or_default()
            .insert(cmd_id, change);
    }

    /// Resolves the change answered by a client Status. Failures are logged.
    pub fn resolve(
        &mut self,
        message_id: u32,
        database: Option<&str>,
        cmd_id: u32,
        code: StatusCode,
    ) -> Option<SentChange> {
        let databases = self.entries.get_mut(&message_id)?;
        let change = match database {
            Some(db) => databases.get_mut(db)?.remove(&cmd_id),
            None => databases.values_mut().find_map(|cmds| cmds.remove(&cmd_id)),
        }?;

        if !code.is_success() {
            warn!(
                message_id,
                cmd_id,
                status = %code,
                kind = %change.kind,
                suid = %change.suid,
                "client rejected server change"
            );
        }

        databases.retain(|_, cmds| !cmds.is_empty());
        if databases.is_empty() {
            self.entries.remove(&message_id);
        }
        Some(change)
    }

    /// Number of unanswered changes.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .flat_map(|dbs| dbs.values())
            .map(BTreeMap::len)
            .sum()
    }

    /// Returns true if every change was answered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State of one SyncML session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSession {
    /// `<SessionID>` chosen by the client.
    pub session_id: String,
    /// Client device id, the header's source.
    pub source_uri: String,
    /// Server URI, the header's target.
    pub target_uri: String,
    /// Protocol version.
    pub version: ProtocolVersion,
    /// Id of the message being processed.
    pub message_id: u32,
    /// User name from the credentials or `<LocName>`.
    pub user: Option<String>,
    /// Set once credentials were accepted.
    pub authenticated: bool,
    /// `<MaxMsgSize>` announced by the client.
    pub max_message_size: Option<usize>,
    /// Device information sent by the client.
    pub device_info: Option<DeviceInfo>,
    /// Database syncs keyed by server URI.
    pub syncs: BTreeMap<String, DatabaseSync>,
    /// A Final is owed to the client.
    pub delayed_final: bool,
    /// The server already asked for device information.
    pub devinf_requested: bool,
    /// Chunks of an incomplete client object.
    pub pending_item: Option<PendingItem>,
    /// Server changes awaiting a Status.
    pub ledger: ChangeLedger,
}

impl SyncSession {
    /// Creates a fresh session.
    pub fn new(
        session_id: impl Into<String>,
        source_uri: impl Into<String>,
        target_uri: impl Into<String>,
        version: ProtocolVersion,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            source_uri: source_uri.into(),
            target_uri: target_uri.into(),
            version,
            message_id: 0,
            user: None,
            authenticated: false,
            max_message_size: None,
            device_info: None,
            syncs: BTreeMap::new(),
            delayed_final: false,
            devinf_requested: false,
            pending_item: None,
            ledger: ChangeLedger::default(),
        }
    }

    /// Quirk variant for the client.
    pub fn device(&self) -> Device {
        Device::detect(&self.source_uri, self.device_info.as_ref())
    }

    /// Message budget for this session.
    pub fn message_budget(&self, default: usize) -> usize {
        self.max_message_size.unwrap_or(default)
    }

    /// Sync for a server database URI.
    pub fn sync(&self, server_uri: &str) -> Option<&DatabaseSync> {
        self.syncs.get(server_uri)
    }

    /// Returns true if any sync still has server changes to send.
    pub fn has_pending_syncs(&self) -> bool {
        self.syncs.values().any(DatabaseSync::has_pending_elements)
    }

    /// Server URIs of syncs with pending changes.
    pub fn pending_syncs(&self) -> Vec<String> {
        self.syncs
            .iter()
            .filter(|(_, sync)| sync.has_pending_elements())
            .map(|(uri, _)| uri.clone())
            .collect()
    }

    /// Returns true if every sync reached the completed state.
    pub fn all_syncs_complete(&self) -> bool {
        self.syncs.values().all(DatabaseSync::is_complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncml_protocol::SyncType;

    fn change(suid: &str) -> SentChange {
        SentChange {
            kind: ItemKind::Add,
            suid: suid.into(),
            cuid: None,
        }
    }

    #[test]
    fn ledger_resolves_by_message_and_command() {
        let mut ledger = ChangeLedger::default();
        ledger.record(2, "contacts", 4, change("s1"));
        ledger.record(2, "notes", 5, change("s2"));
        ledger.record(3, "contacts", 4, change("s3"));
        assert_eq!(ledger.len(), 3);

        assert_eq!(ledger.resolve(2, Some("contacts"), 4, StatusCode::OK).unwrap().suid, "s1");
        assert!(ledger.resolve(2, Some("contacts"), 4, StatusCode::OK).is_none());
        assert_eq!(ledger.resolve(2, None, 5, StatusCode::COMMAND_FAILED).unwrap().suid, "s2");
        assert!(ledger.resolve(9, None, 1, StatusCode::OK).is_none());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn aggregate_queries() {
        let mut session = SyncSession::new("1", "IMEI:1", "http://server", ProtocolVersion::V1_1);
        assert!(session.all_syncs_complete());
        assert_eq!(session.message_budget(1000), 1000);
        session.max_message_size = Some(500);
        assert_eq!(session.message_budget(1000), 500);

        session.syncs.insert(
            "contacts".into(),
            DatabaseSync::new(SyncType::TwoWay, "contacts", "./contacts", 0, 10, "a1"),
        );
        assert!(!session.all_syncs_complete());
        assert!(!session.has_pending_syncs());
        assert!(session.pending_syncs().is_empty());
        assert_eq!(session.device(), Device::Default);
    }
}
