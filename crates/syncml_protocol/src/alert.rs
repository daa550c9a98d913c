//! Alert and sync-type codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of synchronization negotiated for one database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncType {
    /// 200: both sides exchange changes since the last sync.
    TwoWay,
    /// 201: full comparison of both data sets.
    Slow,
    /// 202: only the client sends changes.
    OneWayFromClient,
    /// 203: the client replaces all server data.
    RefreshFromClient,
    /// 204: only the server sends changes.
    OneWayFromServer,
    /// 205: the server replaces all client data.
    RefreshFromServer,
}

impl SyncType {
    /// Returns the sync type for an alert code, if it is one.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(SyncType::TwoWay),
            201 => Some(SyncType::Slow),
            202 => Some(SyncType::OneWayFromClient),
            203 => Some(SyncType::RefreshFromClient),
            204 => Some(SyncType::OneWayFromServer),
            205 => Some(SyncType::RefreshFromServer),
            _ => None,
        }
    }

    /// Returns the alert code.
    pub fn code(self) -> u16 {
        match self {
            SyncType::TwoWay => 200,
            SyncType::Slow => 201,
            SyncType::OneWayFromClient => 202,
            SyncType::RefreshFromClient => 203,
            SyncType::OneWayFromServer => 204,
            SyncType::RefreshFromServer => 205,
        }
    }

    /// Returns true if the server sends its changes for this sync type.
    pub fn sends_server_changes(self) -> bool {
        !matches!(self, SyncType::OneWayFromClient | SyncType::RefreshFromClient)
    }

    /// Returns true if the server accepts client data for this sync type.
    pub fn accepts_client_changes(self) -> bool {
        !matches!(self, SyncType::OneWayFromServer | SyncType::RefreshFromServer)
    }

    /// Returns true if the server's stored map must be discarded when this
    /// sync starts.
    pub fn erases_map(self) -> bool {
        matches!(self, SyncType::Slow | SyncType::RefreshFromClient)
    }

    /// Returns true if anchors must match the stored history.
    pub fn requires_anchor_match(self) -> bool {
        matches!(
            self,
            SyncType::TwoWay | SyncType::OneWayFromClient | SyncType::OneWayFromServer
        )
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncType::TwoWay => "two-way",
            SyncType::Slow => "slow",
            SyncType::OneWayFromClient => "one-way-from-client",
            SyncType::RefreshFromClient => "refresh-from-client",
            SyncType::OneWayFromServer => "one-way-from-server",
            SyncType::RefreshFromServer => "refresh-from-server",
        };
        f.write_str(name)
    }
}

/// Alert codes that are not sync types.
pub struct AlertCode;

impl AlertCode {
    /// 100: display a message to the user.
    pub const DISPLAY: u16 = 100;
    /// 222: request the next message of the package.
    pub const NEXT_MESSAGE: u16 = 222;
    /// 223: end of data for a chunked object was not received.
    pub const NO_END_OF_DATA: u16 = 223;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_both_ways() {
        for code in 200..=205 {
            let sync_type = SyncType::from_code(code).unwrap();
            assert_eq!(sync_type.code(), code);
        }
        assert_eq!(SyncType::from_code(AlertCode::NEXT_MESSAGE), None);
    }

    #[test]
    fn direction_rules() {
        assert!(!SyncType::OneWayFromClient.sends_server_changes());
        assert!(!SyncType::RefreshFromClient.sends_server_changes());
        assert!(SyncType::Slow.sends_server_changes());
        assert!(!SyncType::OneWayFromServer.accepts_client_changes());
        assert!(SyncType::TwoWay.accepts_client_changes());
        assert!(SyncType::Slow.erases_map());
        assert!(!SyncType::TwoWay.erases_map());
    }
}
