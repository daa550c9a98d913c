//! The per-database sync state machine.
//!
//! A [`DatabaseSync`] is created by an Alert and moves forward through
//! [`SyncState`] on every client `<Final>`. It applies client items to the
//! backend and sends the server's changes in budgeted batches: deletes
//! first, then adds, then replaces, each queue drained in FIFO order across
//! as many messages as needed.

use crate::backend::{normalize_database, ServerChange, Timestamp};
use crate::context::RequestContext;
use crate::error::{BackendError, BackendResult, SyncMlResult};
use crate::item::{ItemKind, SyncItem};
use crate::output::SyncCommandOutput;
use crate::session::SentChange;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::OnceLock;
use syncml_protocol::{format, StatusCode, SyncType};
use tracing::{debug, info, warn};

/// Backend database that receives tasks of a combined calendar store.
pub const TASKS_DATABASE: &str = "tasks";

/// Protocol phase of a database sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SyncState {
    /// Alert received, client changes not yet complete.
    Init,
    /// Client changes are coming in.
    Sync,
    /// Waiting for the client's id mappings.
    Map,
    /// Nothing left to do.
    Completed,
}

/// Per-sync statistics, logged when the sync closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounters {
    /// Client adds applied.
    pub client_adds: u32,
    /// Client replaces applied.
    pub client_replaces: u32,
    /// Client deletes applied.
    pub client_deletes: u32,
    /// Client replaces that had to be stored as adds.
    pub client_add_replaces: u32,
    /// Adds sent to the client.
    pub server_adds: u32,
    /// Replaces sent to the client.
    pub server_replaces: u32,
    /// Deletes sent to the client.
    pub server_deletes: u32,
    /// Failed client items.
    pub errors: u32,
}

/// A server change waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    /// Server id.
    pub suid: String,
    /// Client id, known for replaces and deletes.
    pub cuid: Option<String>,
    /// Backend database holding the entry.
    pub database: String,
}

/// Server changes not yet sent, by operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChanges {
    /// Deletes, sent first.
    pub deletes: VecDeque<PendingChange>,
    /// Adds, sent second.
    pub adds: VecDeque<PendingChange>,
    /// Replaces, sent last.
    pub replaces: VecDeque<PendingChange>,
}

impl PendingChanges {
    /// Number of changes left.
    pub fn len(&self) -> usize {
        self.deletes.len() + self.adds.len() + self.replaces.len()
    }

    /// Returns true if nothing is left.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Emit {
    Sent,
    Skipped,
    Full,
}

struct ClientTypes {
    primary: String,
    tasks: String,
    requested: Option<String>,
}

/// Synchronization of one database within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSync {
    server_uri: String,
    client_uri: String,
    sync_type: SyncType,
    state: SyncState,
    client_anchor_next: String,
    server_anchor_last: Timestamp,
    server_anchor_next: Timestamp,
    expecting_map_data: bool,
    syncs_sent: u32,
    syncs_received: u32,
    counters: SyncCounters,
    pending: Option<PendingChanges>,
    overlay_adds: BTreeSet<String>,
}

impl DatabaseSync {
    /// Creates a sync in the [`SyncState::Init`] state.
    pub fn new(
        sync_type: SyncType,
        server_uri: impl Into<String>,
        client_uri: impl Into<String>,
        server_anchor_last: Timestamp,
        server_anchor_next: Timestamp,
        client_anchor_next: impl Into<String>,
    ) -> Self {
        Self {
            server_uri: server_uri.into(),
            client_uri: client_uri.into(),
            sync_type,
            state: SyncState::Init,
            client_anchor_next: client_anchor_next.into(),
            server_anchor_last,
            server_anchor_next,
            expecting_map_data: false,
            syncs_sent: 0,
            syncs_received: 0,
            counters: SyncCounters::default(),
            pending: None,
            overlay_adds: BTreeSet::new(),
        }
    }

    /// Server database URI as sent by the client.
    pub fn server_uri(&self) -> &str {
        &self.server_uri
    }

    /// Client database URI.
    pub fn client_uri(&self) -> &str {
        &self.client_uri
    }

    /// Negotiated sync type.
    pub fn sync_type(&self) -> SyncType {
        self.sync_type
    }

    /// Current phase.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Start of the server change window.
    pub fn server_anchor_last(&self) -> Timestamp {
        self.server_anchor_last
    }

    /// End of the server change window.
    pub fn server_anchor_next(&self) -> Timestamp {
        self.server_anchor_next
    }

    /// The client's Next anchor.
    pub fn client_anchor_next(&self) -> &str {
        &self.client_anchor_next
    }

    /// Statistics so far.
    pub fn counters(&self) -> SyncCounters {
        self.counters
    }

    /// Server changes not yet sent. `None` until they were compiled.
    pub fn pending_changes(&self) -> Option<&PendingChanges> {
        self.pending.as_ref()
    }

    /// Returns true if the client owes a Map for server adds.
    pub fn expecting_map_data(&self) -> bool {
        self.expecting_map_data
    }

    /// Number of client Sync commands seen.
    pub fn syncs_received(&self) -> u32 {
        self.syncs_received
    }

    /// Counts a client Sync command.
    pub fn add_sync_received(&mut self) {
        self.syncs_received += 1;
    }

    /// Returns true once the sync reached [`SyncState::Completed`].
    pub fn is_complete(&self) -> bool {
        self.state == SyncState::Completed
    }

    /// Returns true if compiled server changes remain to be sent, or the
    /// Sync carrying them has not been opened yet.
    pub fn has_pending_elements(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| !p.is_empty() || self.syncs_sent == 0)
    }

    fn is_calendar_overlay(&self, ctx: &RequestContext<'_>) -> bool {
        ctx.device().handles_tasks_in_calendar() && normalize_database(&self.server_uri) == "calendar"
    }

    /// Applies one client item to the backend and sets its response code.
    /// Returns the server id of the stored entry.
    pub fn handle_client_item(&mut self, ctx: &mut RequestContext<'_>, item: &mut SyncItem) -> Option<String> {
        debug!(
            database = %self.server_uri,
            kind = %item.kind,
            cuid = item.cuid.as_deref().unwrap_or(""),
            "handling client item"
        );

        // Some clients count a trailing newline they never send.
        if let Some(size) = item.size.filter(|size| *size > 0) {
            let actual = item.content.len();
            if actual != size && actual + 1 != size {
                warn!(declared = size, actual, "client item size mismatch");
                item.response_code = StatusCode::SIZE_MISMATCH;
                self.counters.errors += 1;
                return None;
            }
        }

        let device = ctx.device();
        let overlay = self.is_calendar_overlay(ctx);
        let mut content = item.content.clone();
        if item.content_format.as_deref() == Some(format::B64) {
            match STANDARD.decode(content.trim()) {
                Ok(bytes) => content = String::from_utf8_lossy(&bytes).into_owned(),
                Err(err) => warn!(error = %err, "client item is not valid base64"),
            }
        }

        let calendar_type = matches!(
            item.content_type.as_deref(),
            Some("text/calendar" | "text/x-vcalendar")
        );
        let database = if overlay && calendar_type && is_vtodo(&content) {
            TASKS_DATABASE.to_string()
        } else {
            self.server_uri.clone()
        };

        let content_type = item
            .content_type
            .clone()
            .unwrap_or_else(|| device.preferred_content_type(&database));
        let (content, content_type) = if item.kind == ItemKind::Delete {
            (content, content_type)
        } else {
            device.convert_client_to_server(&ctx.conversion(None), &content, &content_type)
        };

        let cuid = item.cuid.clone();
        match item.kind {
            ItemKind::Add => self.client_add(ctx, item, &database, &content, &content_type),
            ItemKind::Replace => {
                let replaced = match cuid.as_deref() {
                    Some(cuid) => ctx.backend.replace_entry(&database, &content, &content_type, cuid),
                    None => Err(BackendError::NoMapEntry(String::new())),
                };
                match replaced {
                    Ok(suid) => {
                        self.counters.client_replaces += 1;
                        item.response_code = StatusCode::OK;
                        debug!(suid = %suid, "replaced entry on client request");
                        self.map_client_change(ctx, &database, cuid.as_deref(), &suid);
                        Some(suid)
                    }
                    Err(err) => {
                        debug!(error = %err, "replace failed, adding instead");
                        let suid = self.client_add(ctx, item, &database, &content, &content_type)?;
                        self.counters.client_adds -= 1;
                        self.counters.client_add_replaces += 1;
                        Some(suid)
                    }
                }
            }
            ItemKind::Delete => {
                let Some(cuid) = cuid else {
                    item.response_code = StatusCode::ITEM_NOT_DELETED;
                    self.counters.errors += 1;
                    return None;
                };
                let mut deleted = self.client_delete(ctx, &database, &cuid);
                if !deleted && overlay {
                    debug!(cuid = %cuid, "retrying delete in the tasks database");
                    deleted = self.client_delete(ctx, TASKS_DATABASE, &cuid);
                }
                if deleted {
                    self.counters.client_deletes += 1;
                    item.response_code = StatusCode::OK;
                } else {
                    self.counters.errors += 1;
                    item.response_code = StatusCode::ITEM_NOT_DELETED;
                    debug!(cuid = %cuid, "entry to delete is already gone");
                }
                None
            }
        }
    }

    fn client_add(
        &mut self,
        ctx: &mut RequestContext<'_>,
        item: &mut SyncItem,
        database: &str,
        content: &str,
        content_type: &str,
    ) -> Option<String> {
        match ctx.backend.add_entry(database, content, content_type, item.cuid.as_deref()) {
            Ok(suid) => {
                self.counters.client_adds += 1;
                item.response_code = StatusCode::ITEM_ADDED;
                debug!(suid = %suid, "added client entry");
                self.map_client_change(ctx, database, item.cuid.as_deref(), &suid);
                Some(suid)
            }
            Err(err) => {
                self.counters.errors += 1;
                item.response_code = StatusCode::NOT_EXECUTED;
                warn!(error = %err, database, "adding client entry failed");
                None
            }
        }
    }

    fn client_delete(&mut self, ctx: &mut RequestContext<'_>, database: &str, cuid: &str) -> bool {
        match ctx.backend.delete_entry(database, cuid) {
            Ok(deleted) => deleted,
            Err(err) => {
                warn!(error = %err, database, cuid, "deleting client entry failed");
                false
            }
        }
    }

    /// Tags the id pair with the current time so the change is not sent
    /// back to the client.
    fn map_client_change(&self, ctx: &mut RequestContext<'_>, database: &str, cuid: Option<&str>, suid: &str) {
        let Some(cuid) = cuid else {
            return;
        };
        let now = ctx.backend.current_timestamp();
        if let Err(err) = ctx.backend.create_uid_map(database, cuid, suid, now) {
            warn!(error = %err, database, cuid, suid, "recording id map failed");
        }
    }

    /// Records a client Map item. Entries sent from the tasks database of a
    /// combined calendar are mapped there.
    pub fn create_uid_map(&self, ctx: &mut RequestContext<'_>, cuid: &str, suid: &str) -> BackendResult<()> {
        let database = if self.overlay_adds.contains(suid) && self.is_calendar_overlay(ctx) {
            TASKS_DATABASE
        } else {
            self.server_uri.as_str()
        };
        ctx.backend.create_uid_map(database, cuid, suid, 0)?;
        debug!(database, cuid, suid, "created map entry");
        Ok(())
    }

    /// Writes server changes into the response until they are exhausted or
    /// the message is full.
    pub fn create_sync_output(&mut self, ctx: &mut RequestContext<'_>) -> SyncMlResult<()> {
        if !self.sync_type.sends_server_changes() {
            return Ok(());
        }
        if self.syncs_sent > 0 && !self.has_pending_elements() {
            return Ok(());
        }
        if ctx.flags.message_full {
            return Ok(());
        }

        let mut number_of_changes = None;
        let mut pending = match self.pending.take() {
            Some(pending) => pending,
            None => match self.retrieve_changes(ctx) {
                Ok(pending) => {
                    info!(
                        database = %self.server_uri,
                        from = self.server_anchor_last,
                        to = self.server_anchor_next,
                        changes = pending.len(),
                        "compiled server changes"
                    );
                    let counted = ctx
                        .session
                        .device_info
                        .as_ref()
                        .is_some_and(|info| info.supports_number_of_changes);
                    if counted {
                        number_of_changes = Some(pending.len());
                    }
                    pending
                }
                Err(err) => {
                    warn!(database = %self.server_uri, error = %err, "retrieving server changes failed");
                    return Ok(());
                }
            },
        };

        let opening = ctx
            .out
            .measure(|out| out.sync_start(&self.client_uri, &self.server_uri, number_of_changes))?;
        ctx.flags.expect_response = true;
        if !ctx.has_room_for(opening)? {
            debug!(database = %self.server_uri, "no room left to open a sync");
            ctx.flags.message_full = true;
            self.pending = Some(pending);
            return Ok(());
        }
        ctx.out
            .sync_start(&self.client_uri, &self.server_uri, number_of_changes)?;

        let result = self.emit_changes(ctx, &mut pending);
        self.pending = Some(pending);
        self.syncs_sent += 1;
        result
    }

    fn retrieve_changes(&self, ctx: &mut RequestContext<'_>) -> BackendResult<PendingChanges> {
        let mut pending = PendingChanges::default();
        self.collect_changes(ctx, &self.server_uri, &mut pending)?;
        if self.is_calendar_overlay(ctx) {
            self.collect_changes(ctx, TASKS_DATABASE, &mut pending)?;
        }
        Ok(pending)
    }

    fn collect_changes(
        &self,
        ctx: &mut RequestContext<'_>,
        database: &str,
        pending: &mut PendingChanges,
    ) -> BackendResult<()> {
        if ctx.backend.normalize(database) == "configuration" {
            return Ok(());
        }
        let changes =
            ctx.backend
                .get_server_changes(database, self.server_anchor_last, self.server_anchor_next)?;

        let pending_change = |change: ServerChange| PendingChange {
            suid: change.suid,
            cuid: change.cuid,
            database: database.to_string(),
        };

        for change in changes.deletes {
            if change.cuid.is_some() {
                pending.deletes.push_back(pending_change(change));
            } else {
                debug!(suid = %change.suid, "client never saw deleted entry");
            }
        }
        for change in changes.adds {
            if !is_mirrored(ctx, database, &change)? {
                pending.adds.push_back(PendingChange {
                    cuid: None,
                    ..pending_change(change)
                });
            }
        }
        for change in changes.replaces {
            if is_mirrored(ctx, database, &change)? {
                continue;
            }
            if change.cuid.is_some() {
                pending.replaces.push_back(pending_change(change));
            } else {
                pending.adds.push_back(pending_change(change));
            }
        }
        Ok(())
    }

    fn client_types(&self, ctx: &RequestContext<'_>) -> ClientTypes {
        let device = ctx.device();
        let info = ctx.session.device_info.as_ref();
        ClientTypes {
            primary: device.preferred_content_type_client(info, &self.server_uri, &self.client_uri),
            tasks: device.preferred_content_type_client(info, TASKS_DATABASE, &self.client_uri),
            requested: info
                .and_then(|i| i.data_store(&self.client_uri))
                .and_then(|ds| ds.preferred_rx_content_type())
                .map(str::to_string),
        }
    }

    fn emit_changes(&mut self, ctx: &mut RequestContext<'_>, pending: &mut PendingChanges) -> SyncMlResult<()> {
        let message_id = ctx.session.message_id;

        while let Some(change) = pending.deletes.front() {
            let command = SyncCommandOutput {
                kind: ItemKind::Delete,
                content: None,
                content_type: None,
                format: None,
                cuid: change.cuid.as_deref(),
                suid: None,
                use_cdata: false,
            };
            if !ctx.has_room_for(ctx.out.measure(|out| out.sync_command(&command))?)? {
                return self.message_full(ctx, "delete");
            }
            debug!(suid = %change.suid, cuid = ?change.cuid, "sending delete");
            let cmd_id = ctx.out.sync_command(&command)?;
            let Some(change) = pending.deletes.pop_front() else {
                break;
            };
            ctx.session.ledger.record(
                message_id,
                &self.server_uri,
                cmd_id,
                SentChange {
                    kind: ItemKind::Delete,
                    suid: change.suid,
                    cuid: change.cuid,
                },
            );
            self.counters.server_deletes += 1;
        }

        let types = self.client_types(ctx);
        for kind in [ItemKind::Add, ItemKind::Replace] {
            loop {
                let queue = match kind {
                    ItemKind::Add => &mut pending.adds,
                    _ => &mut pending.replaces,
                };
                let Some(change) = queue.front().cloned() else {
                    break;
                };
                match self.emit_item(ctx, kind, &change, &types)? {
                    Emit::Full => return self.message_full(ctx, kind.element_name()),
                    Emit::Sent | Emit::Skipped => {
                        queue.pop_front();
                    }
                }
            }
        }

        ctx.out.sync_end()?;
        Ok(())
    }

    fn emit_item(
        &mut self,
        ctx: &mut RequestContext<'_>,
        kind: ItemKind,
        change: &PendingChange,
        types: &ClientTypes,
    ) -> SyncMlResult<Emit> {
        let from_overlay = change.database != self.server_uri;
        let content_type = if from_overlay { &types.tasks } else { &types.primary };
        let fields = ctx
            .session
            .device_info
            .as_ref()
            .and_then(|info| info.ct_caps.get(content_type.as_str()))
            .map(Vec::as_slice);
        let content = match ctx
            .backend
            .retrieve_entry(&change.database, &change.suid, content_type, fields)
        {
            Ok(content) => content,
            Err(err) => {
                warn!(suid = %change.suid, error = %err, "changed entry vanished before it was sent");
                return Ok(Emit::Skipped);
            }
        };

        let device = ctx.device();
        let client = device.convert_server_to_client(
            &ctx.conversion(types.requested.as_deref()),
            &content,
            content_type,
            &change.database,
        );

        let (cuid, suid) = match kind {
            ItemKind::Add => (None, Some(change.suid.as_str())),
            _ => (change.cuid.as_deref(), None),
        };
        let command = SyncCommandOutput {
            kind,
            content: Some(&client.content),
            content_type: Some(&client.content_type),
            format: client.format.as_deref(),
            cuid,
            suid,
            use_cdata: device.use_cdata_tag(),
        };
        let size = ctx.out.measure(|out| out.sync_command(&command))?;
        if !ctx.has_room_for(size)? {
            let budget = ctx.message_budget();
            if size + ctx.config.limits.default_len > budget {
                warn!(
                    suid = %change.suid,
                    size,
                    budget,
                    "entry does not fit into a single message and is not sent"
                );
                return Ok(Emit::Skipped);
            }
            return Ok(Emit::Full);
        }

        debug!(kind = %kind, suid = %change.suid, "sending server change");
        let cmd_id = ctx.out.sync_command(&command)?;

        let message_id = ctx.session.message_id;
        ctx.session.ledger.record(
            message_id,
            &self.server_uri,
            cmd_id,
            SentChange {
                kind,
                suid: change.suid.clone(),
                cuid: change.cuid.clone(),
            },
        );
        if kind == ItemKind::Add {
            self.counters.server_adds += 1;
            self.expecting_map_data = true;
            if from_overlay {
                self.overlay_adds.insert(change.suid.clone());
            }
        } else {
            self.counters.server_replaces += 1;
        }
        Ok(Emit::Sent)
    }

    fn message_full(&mut self, ctx: &mut RequestContext<'_>, during: &str) -> SyncMlResult<()> {
        debug!(
            database = %self.server_uri,
            during,
            size = ctx.out.output_size(),
            budget = ctx.message_budget(),
            "message full"
        );
        ctx.flags.message_full = true;
        ctx.out.sync_end()?;
        Ok(())
    }

    /// Advances the state on a client `<Final>`. Leaving
    /// [`SyncState::Sync`] sends the server changes.
    pub fn handle_final(&mut self, ctx: &mut RequestContext<'_>) -> SyncMlResult<()> {
        debug!(database = %self.server_uri, state = ?self.state, "handling final");
        match self.state {
            SyncState::Init => self.state = SyncState::Sync,
            SyncState::Sync => {
                self.create_sync_output(ctx)?;
                let adds_pending = self.pending.as_ref().is_some_and(|p| !p.adds.is_empty());
                self.state = if self.sync_type.sends_server_changes()
                    && (self.expecting_map_data || adds_pending)
                {
                    SyncState::Map
                } else {
                    SyncState::Completed
                };
            }
            SyncState::Map => self.state = SyncState::Completed,
            SyncState::Completed => {}
        }
        Ok(())
    }

    /// Persists the anchors of a finished sync.
    pub fn close_sync(&self, ctx: &mut RequestContext<'_>) -> BackendResult<()> {
        ctx.backend
            .write_sync_anchors(&self.server_uri, &self.client_anchor_next, self.server_anchor_next)?;
        let c = self.counters;
        info!(
            database = %self.server_uri,
            errors = c.errors,
            client_adds = c.client_adds,
            client_replaces = c.client_replaces,
            client_deletes = c.client_deletes,
            client_add_replaces = c.client_add_replaces,
            server_adds = c.server_adds,
            server_replaces = c.server_replaces,
            server_deletes = c.server_deletes,
            "finished sync"
        );
        Ok(())
    }
}

fn is_mirrored(ctx: &mut RequestContext<'_>, database: &str, change: &ServerChange) -> BackendResult<bool> {
    let tagged = ctx.backend.map_timestamp(database, &change.suid)?;
    Ok(tagged.is_some_and(|ts| ts >= change.timestamp))
}

fn is_vtodo(content: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^BEGIN[^:\r\n]*:VTODO").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(content))
}
