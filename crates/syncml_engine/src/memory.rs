//! In-memory reference backend.

use crate::auth::Md5Credentials;
use crate::backend::{
    get_parameter, normalize_database, Backend, ServerChange, ServerChanges, SyncAnchors,
    Timestamp,
};
use crate::error::{BackendError, BackendResult};
use chrono::NaiveDateTime;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use syncml_protocol::CtProperty;
use tracing::debug;
use uuid::Uuid;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `now`.
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    /// Sets the time.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Moves the time forward.
    pub fn advance(&self, seconds: Timestamp) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// An entry held by the memory backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// Server id.
    pub suid: String,
    /// Raw content.
    pub content: String,
    /// Content type the entry was stored with.
    pub content_type: String,
    /// Creation time.
    pub created: Timestamp,
    /// Last modification time.
    pub modified: Timestamp,
}

/// A client/server id pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    /// Client id.
    pub cuid: String,
    /// Server id.
    pub suid: String,
    /// Time of the change that created the pair.
    pub timestamp: Timestamp,
}

/// Anchors stored for one device and database of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorRecord {
    /// Device the anchors belong to.
    pub device_id: String,
    /// Normalized database name.
    pub database: String,
    /// The anchors.
    pub anchors: SyncAnchors,
}

/// (user, device, database)
type PartnerKey = (String, String, String);

/// Timestamp of a `start=YYYY[MM[DD[hhmmss]]]` database parameter.
fn start_parameter(database: &str) -> Option<Timestamp> {
    let start = get_parameter(database, "start")?;
    let start = start.trim();
    let padded = match start.len() {
        4 => format!("{start}0101000000"),
        6 => format!("{start}01000000"),
        8 => format!("{start}000000"),
        _ => start.to_string(),
    };
    let parsed = NaiveDateTime::parse_from_str(&padded, "%Y%m%d%H%M%S").ok()?;
    Timestamp::try_from(parsed.and_utc().timestamp()).ok()
}

/// Returns true if `key` belongs to `user` and, where given, to `device_id`
/// and `database`.
fn partner_matches(key: &PartnerKey, user: &str, device_id: Option<&str>, database: Option<&str>) -> bool {
    key.0 == user
        && device_id.is_none_or(|device| key.1 == device)
        && database.is_none_or(|db| key.2 == normalize_database(db))
}

#[derive(Default)]
struct MemoryStore {
    passwords: HashMap<String, String>,
    entries: HashMap<(String, String), BTreeMap<String, StoredEntry>>,
    maps: HashMap<PartnerKey, Vec<MapEntry>>,
    anchors: HashMap<PartnerKey, SyncAnchors>,
    suid_lists: HashMap<PartnerKey, BTreeSet<String>>,
}

impl MemoryStore {
    fn map_by_cuid(&self, key: &PartnerKey, cuid: &str) -> Option<&MapEntry> {
        self.maps.get(key)?.iter().find(|m| m.cuid == cuid)
    }

    fn map_by_suid(&self, key: &PartnerKey, suid: &str) -> Option<&MapEntry> {
        self.maps.get(key)?.iter().find(|m| m.suid == suid)
    }
}

/// Backend keeping everything in process memory.
///
/// Clones share the same store; each clone carries its own device and user
/// binding, so a server hands every request a fresh [`MemoryBackend::handle`].
#[derive(Clone)]
pub struct MemoryBackend {
    store: Arc<RwLock<MemoryStore>>,
    clock: Arc<dyn Clock>,
    md5: Option<Arc<Md5Credentials>>,
    device_id: String,
    user: Option<String>,
}

impl MemoryBackend {
    /// Creates an empty backend on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty backend on the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(RwLock::new(MemoryStore::default())),
            clock,
            md5: None,
            device_id: String::new(),
            user: None,
        }
    }

    /// Installs an `auth-md5` table.
    pub fn with_md5_credentials(mut self, table: Md5Credentials) -> Self {
        self.md5 = Some(Arc::new(table));
        self
    }

    /// Returns an unbound handle on the same store.
    pub fn handle(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            md5: self.md5.clone(),
            device_id: String::new(),
            user: None,
        }
    }

    /// Registers a user.
    pub fn add_user(&self, user: &str, password: &str) {
        self.store
            .write()
            .passwords
            .insert(user.to_string(), password.to_string());
    }

    /// Stores an entry as if it was created on the server.
    pub fn insert_entry(&self, user: &str, database: &str, content: &str, content_type: &str) -> String {
        let now = self.clock.now();
        let suid = Uuid::new_v4().to_string();
        let entry = StoredEntry {
            suid: suid.clone(),
            content: content.to_string(),
            content_type: content_type.to_string(),
            created: now,
            modified: now,
        };
        self.store
            .write()
            .entries
            .entry((user.to_string(), normalize_database(database)))
            .or_default()
            .insert(suid.clone(), entry);
        suid
    }

    /// Modifies an entry as if it was edited on the server.
    pub fn update_entry(&self, user: &str, database: &str, suid: &str, content: &str) -> bool {
        let now = self.clock.now();
        let mut store = self.store.write();
        let key = (user.to_string(), normalize_database(database));
        match store.entries.get_mut(&key).and_then(|e| e.get_mut(suid)) {
            Some(entry) => {
                entry.content = content.to_string();
                entry.modified = now;
                true
            }
            None => false,
        }
    }

    /// Removes an entry as if it was deleted on the server.
    pub fn remove_entry(&self, user: &str, database: &str, suid: &str) -> bool {
        let key = (user.to_string(), normalize_database(database));
        self.store
            .write()
            .entries
            .get_mut(&key)
            .and_then(|e| e.remove(suid))
            .is_some()
    }

    /// All entries of a user's database ordered by creation.
    pub fn entries(&self, user: &str, database: &str) -> Vec<StoredEntry> {
        let key = (user.to_string(), normalize_database(database));
        let store = self.store.read();
        let mut entries: Vec<StoredEntry> = store
            .entries
            .get(&key)
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| (a.created, &a.suid).cmp(&(b.created, &b.suid)));
        entries
    }

    /// Id pairs for a device.
    pub fn map_entries(&self, user: &str, device_id: &str, database: &str) -> Vec<MapEntry> {
        let key = (user.to_string(), device_id.to_string(), normalize_database(database));
        self.store.read().maps.get(&key).cloned().unwrap_or_default()
    }

    /// Stored anchors for a device.
    pub fn anchors(&self, user: &str, device_id: &str, database: &str) -> Option<SyncAnchors> {
        let key = (user.to_string(), device_id.to_string(), normalize_database(database));
        self.store.read().anchors.get(&key).cloned()
    }

    /// Every anchor pair stored for `user`, ordered by device and database.
    pub fn user_anchors(&self, user: &str) -> Vec<AnchorRecord> {
        let store = self.store.read();
        let mut records: Vec<AnchorRecord> = store
            .anchors
            .iter()
            .filter(|(key, _)| key.0 == user)
            .map(|((_, device_id, database), anchors)| AnchorRecord {
                device_id: device_id.clone(),
                database: database.clone(),
                anchors: anchors.clone(),
            })
            .collect();
        records.sort_by(|a, b| (&a.device_id, &a.database).cmp(&(&b.device_id, &b.database)));
        records
    }

    /// Deletes the anchors of `user`, limited to one device and/or database
    /// when given. The next sync of every affected pair is slow. Returns the
    /// number of anchor pairs removed.
    pub fn remove_anchor(&self, user: &str, device_id: Option<&str>, database: Option<&str>) -> usize {
        let mut store = self.store.write();
        let before = store.anchors.len();
        store
            .anchors
            .retain(|key, _| !partner_matches(key, user, device_id, database));
        let removed = before - store.anchors.len();
        debug!(
            user,
            device = device_id.unwrap_or("*"),
            database = database.unwrap_or("*"),
            removed,
            "removed anchors"
        );
        removed
    }

    /// Deletes the id maps of `user`, limited to one device and/or database
    /// when given. Returns the number of id pairs removed.
    pub fn remove_maps(&self, user: &str, device_id: Option<&str>, database: Option<&str>) -> usize {
        let mut store = self.store.write();
        let mut removed = 0;
        store.maps.retain(|key, entries| {
            let matched = partner_matches(key, user, device_id, database);
            if matched {
                removed += entries.len();
            }
            !matched
        });
        debug!(
            user,
            device = device_id.unwrap_or("*"),
            database = database.unwrap_or("*"),
            removed,
            "removed id maps"
        );
        removed
    }

    fn user(&self) -> BackendResult<&str> {
        self.user.as_deref().ok_or(BackendError::NoUser)
    }

    fn data_key(&self, database: &str) -> BackendResult<(String, String)> {
        Ok((self.user()?.to_string(), normalize_database(database)))
    }

    fn partner_key(&self, database: &str) -> BackendResult<PartnerKey> {
        Ok((
            self.user()?.to_string(),
            self.device_id.clone(),
            normalize_database(database),
        ))
    }

    /// Replaces the stored id list and returns the ids that disappeared.
    fn track_deletes(store: &mut MemoryStore, key: &PartnerKey, current: BTreeSet<String>) -> Vec<String> {
        let previous = store.suid_lists.insert(key.clone(), current.clone()).unwrap_or_default();
        let deleted: Vec<String> = previous.difference(&current).cloned().collect();
        debug!(current = current.len(), deleted = deleted.len(), "tracked deletions");
        deleted
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn session_start(&mut self, device_id: &str, _session_id: &str) {
        self.device_id = device_id.to_string();
        self.user = None;
    }

    fn set_user(&mut self, user: &str) {
        self.user = Some(user.to_string());
    }

    fn check_password(&mut self, user: &str, password: &str) -> BackendResult<bool> {
        Ok(self
            .store
            .read()
            .passwords
            .get(user)
            .is_some_and(|stored| stored == password))
    }

    fn md5_credentials(&self) -> Option<&Md5Credentials> {
        self.md5.as_deref()
    }

    fn get_server_changes(
        &mut self,
        database: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> BackendResult<ServerChanges> {
        let data_key = self.data_key(database)?;
        let partner = self.partner_key(database)?;
        let mut store = self.store.write();

        let mut entries: Vec<StoredEntry> = store
            .entries
            .get(&data_key)
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| (a.created, &a.suid).cmp(&(b.created, &b.suid)));

        // A slow sync may be limited to entries from a start date on.
        let first = match from {
            0 => start_parameter(database).unwrap_or(0),
            _ => from,
        };
        let mut changes = ServerChanges::default();
        let mut added = BTreeSet::new();
        for entry in &entries {
            if entry.created >= first && entry.created < to {
                added.insert(entry.suid.clone());
                changes.adds.push(ServerChange::new(&entry.suid, entry.created));
            }
        }

        if from > 0 {
            let mut modified: Vec<&StoredEntry> = entries
                .iter()
                .filter(|e| e.modified >= from && e.modified < to && !added.contains(&e.suid))
                .collect();
            modified.sort_by_key(|e| e.modified);
            for entry in modified {
                let mut change = ServerChange::new(&entry.suid, entry.modified);
                change.cuid = store.map_by_suid(&partner, &entry.suid).map(|m| m.cuid.clone());
                changes.replaces.push(change);
            }
        }

        let current: BTreeSet<String> = entries.iter().map(|e| e.suid.clone()).collect();
        let deleted = Self::track_deletes(&mut store, &partner, current);
        if from > 0 {
            for suid in deleted {
                let mut change = ServerChange::new(&suid, from);
                change.cuid = store.map_by_suid(&partner, &suid).map(|m| m.cuid.clone());
                changes.deletes.push(change);
            }
        }

        Ok(changes)
    }

    fn retrieve_entry(
        &mut self,
        database: &str,
        suid: &str,
        _content_type: &str,
        _fields: Option<&[CtProperty]>,
    ) -> BackendResult<String> {
        let key = self.data_key(database)?;
        self.store
            .read()
            .entries
            .get(&key)
            .and_then(|e| e.get(suid))
            .map(|e| e.content.clone())
            .ok_or_else(|| BackendError::NotFound(suid.to_string()))
    }

    fn add_entry(
        &mut self,
        database: &str,
        content: &str,
        content_type: &str,
        _cuid: Option<&str>,
    ) -> BackendResult<String> {
        let key = self.data_key(database)?;
        let now = self.clock.now();
        let suid = Uuid::new_v4().to_string();
        let entry = StoredEntry {
            suid: suid.clone(),
            content: content.to_string(),
            content_type: content_type.to_string(),
            created: now,
            modified: now,
        };
        self.store
            .write()
            .entries
            .entry(key)
            .or_default()
            .insert(suid.clone(), entry);
        Ok(suid)
    }

    fn replace_entry(
        &mut self,
        database: &str,
        content: &str,
        content_type: &str,
        cuid: &str,
    ) -> BackendResult<String> {
        let key = self.data_key(database)?;
        let partner = self.partner_key(database)?;
        let now = self.clock.now();
        let mut store = self.store.write();

        let suid = store
            .map_by_cuid(&partner, cuid)
            .map(|m| m.suid.clone())
            .ok_or_else(|| BackendError::NoMapEntry(cuid.to_string()))?;
        let entry = store
            .entries
            .get_mut(&key)
            .and_then(|e| e.get_mut(&suid))
            .ok_or_else(|| BackendError::NotFound(suid.clone()))?;
        entry.content = content.to_string();
        entry.content_type = content_type.to_string();
        entry.modified = now;
        Ok(suid)
    }

    fn delete_entry(&mut self, database: &str, cuid: &str) -> BackendResult<bool> {
        let key = self.data_key(database)?;
        let partner = self.partner_key(database)?;
        let mut store = self.store.write();

        let Some(suid) = store.map_by_cuid(&partner, cuid).map(|m| m.suid.clone()) else {
            return Ok(false);
        };
        let removed = store
            .entries
            .get_mut(&key)
            .and_then(|e| e.remove(&suid))
            .is_some();
        if let Some(list) = store.suid_lists.get_mut(&partner) {
            list.remove(&suid);
        }
        if let Some(map) = store.maps.get_mut(&partner) {
            map.retain(|m| m.cuid != cuid);
        }
        Ok(removed)
    }

    fn create_uid_map(
        &mut self,
        database: &str,
        cuid: &str,
        suid: &str,
        timestamp: Timestamp,
    ) -> BackendResult<()> {
        let partner = self.partner_key(database)?;
        let mut store = self.store.write();
        let map = store.maps.entry(partner).or_default();
        map.retain(|m| m.cuid != cuid && m.suid != suid);
        map.push(MapEntry {
            cuid: cuid.to_string(),
            suid: suid.to_string(),
            timestamp,
        });
        Ok(())
    }

    fn map_timestamp(&mut self, database: &str, suid: &str) -> BackendResult<Option<Timestamp>> {
        let partner = self.partner_key(database)?;
        Ok(self
            .store
            .read()
            .map_by_suid(&partner, suid)
            .map(|m| m.timestamp))
    }

    fn erase_map(&mut self, database: &str) -> BackendResult<()> {
        let partner = self.partner_key(database)?;
        let mut store = self.store.write();
        store.maps.remove(&partner);
        store.suid_lists.remove(&partner);
        Ok(())
    }

    fn write_sync_anchors(
        &mut self,
        database: &str,
        client_anchor_next: &str,
        server_anchor_next: Timestamp,
    ) -> BackendResult<()> {
        let partner = self.partner_key(database)?;
        self.store.write().anchors.insert(
            partner,
            SyncAnchors {
                client: client_anchor_next.to_string(),
                server: server_anchor_next,
            },
        );
        Ok(())
    }

    fn read_sync_anchors(&mut self, database: &str) -> BackendResult<Option<SyncAnchors>> {
        let partner = self.partner_key(database)?;
        Ok(self.store.read().anchors.get(&partner).cloned())
    }

    fn current_timestamp(&self) -> Timestamp {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(clock: Arc<ManualClock>) -> MemoryBackend {
        let backend = MemoryBackend::with_clock(clock);
        let mut handle = backend.handle();
        handle.session_start("dev1", "1");
        handle.set_user("alice");
        handle
    }

    #[test]
    fn requires_user() {
        let mut backend = MemoryBackend::new();
        backend.session_start("dev1", "1");
        assert!(matches!(
            backend.get_server_changes("contacts", 0, 10),
            Err(BackendError::NoUser)
        ));
    }

    #[test]
    fn session_start_clears_user() {
        let mut backend = bound(Arc::new(ManualClock::new(1)));
        backend.session_start("dev2", "1");
        assert!(matches!(
            backend.get_server_changes("contacts", 0, 10),
            Err(BackendError::NoUser)
        ));
    }

    #[test]
    fn password_check() {
        let mut backend = MemoryBackend::new();
        backend.add_user("alice", "secret");
        assert!(backend.check_password("alice", "secret").unwrap());
        assert!(!backend.check_password("alice", "wrong").unwrap());
        assert!(!backend.check_password("bob", "secret").unwrap());
    }

    #[test]
    fn changes_within_window() {
        let clock = Arc::new(ManualClock::new(100));
        let mut backend = bound(Arc::clone(&clock));
        let s1 = backend.insert_entry("alice", "contacts", "A", "text/x-vcard");
        clock.set(200);
        let s2 = backend.insert_entry("alice", "contacts", "B", "text/x-vcard");

        let all = backend.get_server_changes("contacts", 0, 300).unwrap();
        assert_eq!(
            all.adds.iter().map(|c| c.suid.as_str()).collect::<Vec<_>>(),
            vec![s1.as_str(), s2.as_str()]
        );
        assert!(all.replaces.is_empty());

        let later = backend.get_server_changes("contacts", 150, 300).unwrap();
        assert_eq!(later.adds.len(), 1);
        assert_eq!(later.adds[0].suid, s2);
    }

    #[test]
    fn slow_sync_honours_start_parameter() {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let mut backend = bound(Arc::clone(&clock));
        backend.insert_entry("alice", "calendar", "old", "text/calendar");
        clock.set(1_710_000_000);
        let recent = backend.insert_entry("alice", "calendar", "recent", "text/calendar");
        let to = 1_720_000_000;

        assert_eq!(backend.get_server_changes("calendar", 0, to).unwrap().adds.len(), 2);
        for uri in ["calendar?start=2024", "calendar?start=202403", "./calendar?source=x&start=20240301"] {
            let changes = backend.get_server_changes(uri, 0, to).unwrap();
            assert_eq!(changes.adds.len(), 1, "{uri}");
            assert_eq!(changes.adds[0].suid, recent);
        }
        assert!(backend
            .get_server_changes("calendar?start=20240310", 0, to)
            .unwrap()
            .adds
            .is_empty());
        assert_eq!(
            backend.get_server_changes("calendar?start=soon", 0, to).unwrap().adds.len(),
            2
        );
    }

    #[test]
    fn modifications_and_deletions_only_on_delta() {
        let clock = Arc::new(ManualClock::new(100));
        let mut backend = bound(Arc::clone(&clock));
        let s1 = backend.insert_entry("alice", "contacts", "A", "text/x-vcard");
        let s2 = backend.insert_entry("alice", "contacts", "B", "text/x-vcard");
        backend.create_uid_map("contacts", "c1", &s1, 100).unwrap();
        backend.create_uid_map("contacts", "c2", &s2, 100).unwrap();

        // First run initialises the id list.
        let initial = backend.get_server_changes("contacts", 0, 150).unwrap();
        assert_eq!(initial.adds.len(), 2);
        assert!(initial.deletes.is_empty());

        clock.set(200);
        assert!(backend.update_entry("alice", "contacts", &s1, "A2"));
        assert!(backend.remove_entry("alice", "contacts", &s2));

        let delta = backend.get_server_changes("contacts", 150, 300).unwrap();
        assert!(delta.adds.is_empty());
        assert_eq!(delta.replaces.len(), 1);
        assert_eq!(delta.replaces[0].cuid.as_deref(), Some("c1"));
        assert_eq!(delta.deletes.len(), 1);
        assert_eq!(delta.deletes[0].suid, s2);
        assert_eq!(delta.deletes[0].cuid.as_deref(), Some("c2"));

        // Deletions are reported once.
        let again = backend.get_server_changes("contacts", 150, 300).unwrap();
        assert!(again.deletes.is_empty());
    }

    #[test]
    fn client_delete_is_not_reported_back() {
        let clock = Arc::new(ManualClock::new(100));
        let mut backend = bound(Arc::clone(&clock));
        let s1 = backend.add_entry("notes", "hello", "text/plain", Some("c1")).unwrap();
        backend.create_uid_map("notes", "c1", &s1, 100).unwrap();
        backend.get_server_changes("notes", 0, 150).unwrap();

        assert!(backend.delete_entry("notes", "c1").unwrap());
        assert!(!backend.delete_entry("notes", "c1").unwrap());

        let delta = backend.get_server_changes("notes", 150, 300).unwrap();
        assert!(delta.deletes.is_empty());
        assert!(backend.map_entries("alice", "dev1", "notes").is_empty());
    }

    #[test]
    fn replace_requires_map() {
        let mut backend = bound(Arc::new(ManualClock::new(100)));
        let err = backend
            .replace_entry("notes", "x", "text/plain", "unknown")
            .unwrap_err();
        assert!(matches!(err, BackendError::NoMapEntry(_)));

        let suid = backend.add_entry("notes", "x", "text/plain", Some("c1")).unwrap();
        backend.create_uid_map("notes", "c1", &suid, 100).unwrap();
        let replaced = backend.replace_entry("notes", "y", "text/plain", "c1").unwrap();
        assert_eq!(replaced, suid);
        assert_eq!(backend.entries("alice", "notes")[0].content, "y");
    }

    #[test]
    fn uid_map_upsert_and_erase() {
        let mut backend = bound(Arc::new(ManualClock::new(100)));
        backend.create_uid_map("memo", "c1", "s1", 10).unwrap();
        backend.create_uid_map("notes", "c1", "s1", 20).unwrap();
        assert_eq!(backend.map_timestamp("notes", "s1").unwrap(), Some(20));
        assert_eq!(backend.map_entries("alice", "dev1", "notes").len(), 1);

        backend.erase_map("notes").unwrap();
        assert_eq!(backend.map_timestamp("notes", "s1").unwrap(), None);
    }

    #[test]
    fn anchors_can_be_listed_and_removed() {
        let store = MemoryBackend::with_clock(Arc::new(ManualClock::new(100)));
        for (device, database, anchor) in [
            ("dev1", "contacts", "a1"),
            ("dev1", "./calendar", "a2"),
            ("dev2", "contacts", "a3"),
        ] {
            let mut handle = store.handle();
            handle.session_start(device, "1");
            handle.set_user("alice");
            handle.write_sync_anchors(database, anchor, 100).unwrap();
        }
        let mut bob = store.handle();
        bob.session_start("dev1", "2");
        bob.set_user("bob");
        bob.write_sync_anchors("contacts", "b1", 100).unwrap();

        let listed: Vec<(String, String, String)> = store
            .user_anchors("alice")
            .into_iter()
            .map(|r| (r.device_id, r.database, r.anchors.client))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("dev1".into(), "calendar".into(), "a2".into()),
                ("dev1".into(), "contacts".into(), "a1".into()),
                ("dev2".into(), "contacts".into(), "a3".into()),
            ]
        );

        assert_eq!(store.remove_anchor("alice", Some("dev1"), Some("calendar")), 1);
        assert_eq!(store.remove_anchor("alice", None, Some("./contacts")), 2);
        assert!(store.user_anchors("alice").is_empty());
        assert_eq!(store.user_anchors("bob").len(), 1);
        assert_eq!(store.remove_anchor("alice", None, None), 0);
    }

    #[test]
    fn maps_can_be_removed_per_device() {
        let store = MemoryBackend::with_clock(Arc::new(ManualClock::new(100)));
        for device in ["dev1", "dev2"] {
            let mut handle = store.handle();
            handle.session_start(device, "1");
            handle.set_user("alice");
            handle.create_uid_map("contacts", "c1", "s1", 0).unwrap();
            handle.create_uid_map("contacts", "c2", "s2", 0).unwrap();
            handle.create_uid_map("notes", "n1", "s3", 0).unwrap();
        }

        assert_eq!(store.remove_maps("alice", Some("dev1"), None), 3);
        assert!(store.map_entries("alice", "dev1", "contacts").is_empty());
        assert!(store.map_entries("alice", "dev1", "notes").is_empty());
        assert_eq!(store.map_entries("alice", "dev2", "contacts").len(), 2);

        assert_eq!(store.remove_maps("alice", None, Some("notes")), 1);
        assert_eq!(store.map_entries("alice", "dev2", "contacts").len(), 2);
        assert_eq!(store.remove_maps("alice", None, None), 2);
        assert_eq!(store.remove_maps("alice", None, None), 0);
    }

    #[test]
    fn anchors_round_trip() {
        let mut backend = bound(Arc::new(ManualClock::new(100)));
        assert_eq!(backend.read_sync_anchors("contacts").unwrap(), None);
        backend.write_sync_anchors("contacts", "20240101T000000Z", 1000).unwrap();
        let anchors = backend.read_sync_anchors("card").unwrap().unwrap();
        assert_eq!(anchors.client, "20240101T000000Z");
        assert_eq!(anchors.server, 1000);
    }
}
