//! The storage contract the engine drives.

use crate::auth::{self, Credentials, Md5Credentials};
use crate::error::BackendResult;
use serde::{Deserialize, Serialize};
use syncml_protocol::CtProperty;

/// Seconds since the Unix epoch as used by anchors and the UID map.
pub type Timestamp = u64;

/// Databases every backend is expected to serve.
pub const KNOWN_DATABASES: [&str; 5] = ["tasks", "calendar", "notes", "contacts", "configuration"];

/// One change reported by [`Backend::get_server_changes`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerChange {
    /// Server id of the entry.
    pub suid: String,
    /// Client id, if the entry is mapped.
    pub cuid: Option<String>,
    /// When the backend recorded the change.
    pub timestamp: Timestamp,
}

impl ServerChange {
    /// Creates an unmapped change.
    pub fn new(suid: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            suid: suid.into(),
            cuid: None,
            timestamp,
        }
    }

    /// Attaches the client id.
    pub fn with_cuid(mut self, cuid: impl Into<String>) -> Self {
        self.cuid = Some(cuid.into());
        self
    }
}

/// Changes of one database within a time window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerChanges {
    /// Entries created in the window.
    pub adds: Vec<ServerChange>,
    /// Entries modified in the window.
    pub replaces: Vec<ServerChange>,
    /// Entries deleted in the window.
    pub deletes: Vec<ServerChange>,
}

impl ServerChanges {
    /// Total number of changes.
    pub fn len(&self) -> usize {
        self.adds.len() + self.replaces.len() + self.deletes.len()
    }

    /// Returns true if there are no changes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Anchors stored after the last successful sync of a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAnchors {
    /// The client's Next anchor from that sync.
    pub client: String,
    /// The server's Next anchor from that sync.
    pub server: Timestamp,
}

/// Storage and authentication contract.
///
/// A backend value serves a single message: the engine calls
/// [`Backend::session_start`] when the header arrives and
/// [`Backend::set_user`] once the client authenticated. Implementations key
/// UID maps and anchors on (user, device, database) and entries on
/// (user, database).
pub trait Backend {
    /// Binds the backend to a device and protocol session.
    fn session_start(&mut self, device_id: &str, session_id: &str);

    /// Binds the backend to the authenticated user.
    fn set_user(&mut self, user: &str);

    /// Called when the session completed.
    fn session_close(&mut self) {}

    /// Verifies a clear-text password.
    fn check_password(&mut self, user: &str, password: &str) -> BackendResult<bool>;

    /// Table for the `syncml:auth-md5` scheme. Empty unless configured.
    fn md5_credentials(&self) -> Option<&Md5Credentials> {
        None
    }

    /// Checks the credentials of a header and returns the authenticated
    /// user name.
    fn check_authentication(&mut self, username: &str, credentials: &Credentials) -> Option<String> {
        auth::check_credentials(self, username, credentials)
    }

    /// Canonical database name for a client or server URI.
    fn normalize(&self, database_uri: &str) -> String {
        normalize_database(database_uri)
    }

    /// Returns true if the backend serves the database.
    fn is_valid_database_uri(&self, database_uri: &str) -> bool {
        KNOWN_DATABASES.contains(&self.normalize(database_uri).as_str())
    }

    /// Reports entries created, modified and deleted in `[from, to)`.
    /// Modifications and deletions are only reported when `from > 0`.
    fn get_server_changes(
        &mut self,
        database: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> BackendResult<ServerChanges>;

    /// Retrieves an entry rendered in `content_type`.
    fn retrieve_entry(
        &mut self,
        database: &str,
        suid: &str,
        content_type: &str,
        fields: Option<&[CtProperty]>,
    ) -> BackendResult<String>;

    /// Stores a new entry and returns its server id.
    fn add_entry(
        &mut self,
        database: &str,
        content: &str,
        content_type: &str,
        cuid: Option<&str>,
    ) -> BackendResult<String>;

    /// Replaces the entry mapped to `cuid` and returns its server id.
    fn replace_entry(
        &mut self,
        database: &str,
        content: &str,
        content_type: &str,
        cuid: &str,
    ) -> BackendResult<String>;

    /// Deletes the entry mapped to `cuid`. Returns false if it did not exist.
    fn delete_entry(&mut self, database: &str, cuid: &str) -> BackendResult<bool>;

    /// Records a client/server id pair tagged with the time of the change
    /// that produced it.
    fn create_uid_map(
        &mut self,
        database: &str,
        cuid: &str,
        suid: &str,
        timestamp: Timestamp,
    ) -> BackendResult<()>;

    /// Returns the tag of the map entry for a server id.
    fn map_timestamp(&mut self, database: &str, suid: &str) -> BackendResult<Option<Timestamp>>;

    /// Forgets every id pair of the database.
    fn erase_map(&mut self, database: &str) -> BackendResult<()>;

    /// Stores the anchors of a completed sync.
    fn write_sync_anchors(
        &mut self,
        database: &str,
        client_anchor_next: &str,
        server_anchor_next: Timestamp,
    ) -> BackendResult<()>;

    /// Reads the anchors of the last completed sync.
    fn read_sync_anchors(&mut self, database: &str) -> BackendResult<Option<SyncAnchors>>;

    /// Current time.
    fn current_timestamp(&self) -> Timestamp;
}

/// Folds a database URI to its canonical name: the query string is
/// dropped, the last path segment lower-cased and common aliases mapped.
pub fn normalize_database(database_uri: &str) -> String {
    let without_query = database_uri.split('?').next().unwrap_or("");
    let base = without_query
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .to_lowercase();

    match base.as_str() {
        "contacts" | "contact" | "card" | "scard" => "contacts".to_string(),
        "calendar" | "event" | "events" | "cal" | "scal" => "calendar".to_string(),
        "notes" | "memo" | "note" | "snote" => "notes".to_string(),
        "tasks" | "task" | "stask" => "tasks".to_string(),
        _ => base,
    }
}

/// Reads a query parameter from a database URI such as
/// `calendar?mode=private`.
pub fn get_parameter(database_uri: &str, parameter: &str) -> Option<String> {
    let (_, query) = database_uri.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == parameter).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_aliases() {
        assert_eq!(normalize_database("./Contacts"), "contacts");
        assert_eq!(normalize_database("scal"), "calendar");
        assert_eq!(normalize_database("events?foo=bar"), "calendar");
        assert_eq!(normalize_database("./C\\Notes"), "notes");
        assert_eq!(normalize_database("STASK"), "tasks");
        assert_eq!(normalize_database("configuration"), "configuration");
        assert_eq!(normalize_database("./photos"), "photos");
    }

    #[test]
    fn parameters_from_query() {
        assert_eq!(
            get_parameter("calendar?mode=x&source=y", "source"),
            Some("y".to_string())
        );
        assert_eq!(get_parameter("calendar", "source"), None);
        assert_eq!(get_parameter("calendar?flag", "flag"), Some(String::new()));
    }

    #[test]
    fn change_counts() {
        let changes = ServerChanges {
            adds: vec![ServerChange::new("s1", 10)],
            deletes: vec![ServerChange::new("s2", 11).with_cuid("c2")],
            ..Default::default()
        };
        assert_eq!(changes.len(), 2);
        assert!(!changes.is_empty());
        assert_eq!(changes.deletes[0].cuid.as_deref(), Some("c2"));
    }
}
