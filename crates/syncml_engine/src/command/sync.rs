//! `<Sync>`: a batch of client Add, Replace and Delete commands.

use super::{path_is, reject_unauthenticated};
use crate::context::RequestContext;
use crate::error::SyncMlResult;
use crate::item::{ItemKind, PendingItem, SyncItem};
use crate::output::StatusReport;
use syncml_protocol::{ProtocolResult, StatusCode};
use tracing::{debug, warn};

/// One Add, Replace or Delete with its items.
#[derive(Debug)]
struct ItemCommand {
    kind: ItemKind,
    cmd_id: String,
    content_type: Option<String>,
    content_format: Option<String>,
    items: Vec<SyncItem>,
}

impl ItemCommand {
    fn finish(self) -> impl Iterator<Item = SyncItem> {
        let Self {
            cmd_id,
            content_type,
            content_format,
            items,
            ..
        } = self;
        items.into_iter().map(move |mut item| {
            item.cmd_id = cmd_id.clone();
            item.content_type = item.content_type.or_else(|| content_type.clone());
            item.content_format = item.content_format.or_else(|| content_format.clone());
            item
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct SyncCommand {
    cmd_id: String,
    server_uri: String,
    client_uri: String,
    current: Option<ItemCommand>,
    items: Vec<SyncItem>,
}

impl SyncCommand {
    pub(crate) fn start_element(&mut self, path: &[String]) -> ProtocolResult<()> {
        match path {
            [_, name] => {
                if let Some(kind) = ItemKind::from_element(name) {
                    self.current = Some(ItemCommand {
                        kind,
                        cmd_id: String::new(),
                        content_type: None,
                        content_format: None,
                        items: Vec::new(),
                    });
                }
            }
            [_, _, item] if item == "Item" => {
                if let Some(command) = self.current.as_mut() {
                    command.items.push(SyncItem::new(command.kind, ""));
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn end_element(&mut self, path: &[String], text: &str) {
        if path.len() == 2 {
            if path_is(path, &["Sync", "CmdID"]) {
                self.cmd_id = text.trim().to_string();
            }
            if ItemKind::from_element(&path[1]).is_some() {
                if let Some(command) = self.current.take() {
                    self.items.extend(command.finish());
                }
            }
            return;
        }
        if path_is(path, &["Sync", "Target", "LocURI"]) {
            self.server_uri = text.trim().to_string();
            return;
        }
        if path_is(path, &["Sync", "Source", "LocURI"]) {
            self.client_uri = text.trim().to_string();
            return;
        }

        let Some(command) = self.current.as_mut() else {
            return;
        };
        let rest: Vec<&str> = path[2..].iter().map(String::as_str).collect();
        let value = || Some(text.trim().to_string()).filter(|v| !v.is_empty());
        match rest.as_slice() {
            ["CmdID"] => command.cmd_id = text.trim().to_string(),
            ["Meta", "Type"] => command.content_type = value(),
            ["Meta", "Format"] => command.content_format = value(),
            ["Item", tail @ ..] => {
                let Some(item) = command.items.last_mut() else {
                    return;
                };
                match tail {
                    ["Source", "LocURI"] => item.cuid = value(),
                    ["Target", "LocURI"] => item.suid = value(),
                    ["Data"] => item.content = text.to_string(),
                    ["Meta", "Type"] => item.content_type = value(),
                    ["Meta", "Format"] => item.content_format = value(),
                    ["Meta", "Size"] => item.size = text.trim().parse().ok(),
                    ["MoreData"] => item.more_data = true,
                    _ => {}
                }
            }
            _ => {}
        }
    }

    pub(crate) fn handle(self, ctx: &mut RequestContext<'_>) -> SyncMlResult<()> {
        let SyncCommand {
            cmd_id,
            server_uri,
            client_uri,
            items,
            ..
        } = self;
        if reject_unauthenticated(ctx, &cmd_id, "Sync")? {
            return Ok(());
        }

        let sync_status = StatusReport::new(&cmd_id, "Sync", StatusCode::OK)
            .with_target(&server_uri)
            .with_source(&client_uri);
        let Some(accepts) = ctx
            .session
            .sync(&server_uri)
            .map(|sync| sync.sync_type().accepts_client_changes())
        else {
            warn!(database = %server_uri, "sync without alert");
            ctx.out.status(&StatusReport {
                code: StatusCode::NOT_FOUND,
                ..sync_status
            })?;
            return Ok(());
        };
        ctx.out.status(&sync_status)?;

        debug!(database = %server_uri, items = items.len(), "handling client sync");
        ctx.with_sync(&server_uri, |sync, _| sync.add_sync_received());

        let omit_accepted = ctx.device().omit_individual_sync_status();
        for item in items {
            let Some(mut item) = collect_chunks(ctx, &server_uri, item, accepts)? else {
                continue;
            };

            if accepts {
                ctx.with_sync(&server_uri, |sync, ctx| sync.handle_client_item(ctx, &mut item));
            } else {
                warn!(database = %server_uri, "client change refused for server-only sync");
                item.response_code = StatusCode::COMMAND_NOT_ALLOWED;
            }

            let code = item.response_code;
            if omit_accepted && matches!(code, StatusCode::OK | StatusCode::ITEM_ADDED) {
                continue;
            }
            ctx.out.status(
                &StatusReport::new(&item.cmd_id, item.kind.element_name(), code)
                    .with_source(item.cuid.as_deref().unwrap_or("")),
            )?;
        }
        Ok(())
    }
}

/// Buffers chunks of large objects. Returns the item once it is complete.
fn collect_chunks(
    ctx: &mut RequestContext<'_>,
    server_uri: &str,
    item: SyncItem,
    accepts: bool,
) -> SyncMlResult<Option<SyncItem>> {
    let item = match ctx.session.pending_item.take() {
        Some(mut pending) if pending.continues(server_uri, &item) => {
            if item.more_data {
                pending.content.push_str(&item.content);
                chunk_accepted(ctx, &item, pending)?;
                return Ok(None);
            }
            debug!(cuid = ?item.cuid, "last chunk received");
            pending.complete(item)
        }
        Some(pending) => {
            warn!(cuid = ?pending.cuid, "chunked item abandoned by client");
            item
        }
        None => item,
    };

    if item.more_data && accepts {
        let pending = PendingItem::start(server_uri, &item);
        chunk_accepted(ctx, &item, pending)?;
        return Ok(None);
    }
    Ok(Some(item))
}

fn chunk_accepted(ctx: &mut RequestContext<'_>, item: &SyncItem, pending: PendingItem) -> SyncMlResult<()> {
    debug!(cuid = ?item.cuid, buffered = pending.content.len(), "chunk accepted");
    ctx.session.pending_item = Some(pending);
    ctx.out.status(
        &StatusReport::new(&item.cmd_id, item.kind.element_name(), StatusCode::CHUNKED_ITEM_ACCEPTED)
            .with_source(item.cuid.as_deref().unwrap_or("")),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::DatabaseSync;
    use crate::test_support::{path, Fixture};
    use syncml_protocol::SyncType;

    struct Builder(SyncCommand);

    impl Builder {
        fn new(db: &str) -> Self {
            let mut cmd = SyncCommand::default();
            cmd.end_element(&path("Sync/CmdID"), "5");
            cmd.end_element(&path("Sync/Target/LocURI"), db);
            cmd.end_element(&path("Sync/Source/LocURI"), "./contacts");
            Builder(cmd)
        }

        fn item(mut self, kind: &str, cmd_id: &str, cuid: &str, data: &str, more: bool) -> Self {
            let cmd = &mut self.0;
            cmd.start_element(&path(&format!("Sync/{kind}"))).unwrap();
            cmd.end_element(&path(&format!("Sync/{kind}/CmdID")), cmd_id);
            cmd.end_element(&path(&format!("Sync/{kind}/Meta/Type")), "text/x-vcard");
            cmd.start_element(&path(&format!("Sync/{kind}/Item"))).unwrap();
            cmd.end_element(&path(&format!("Sync/{kind}/Item/Source/LocURI")), cuid);
            cmd.end_element(&path(&format!("Sync/{kind}/Item/Data")), data);
            if more {
                cmd.end_element(&path(&format!("Sync/{kind}/Item/MoreData")), "");
            }
            cmd.end_element(&path(&format!("Sync/{kind}/Item")), "");
            cmd.end_element(&path(&format!("Sync/{kind}")), "");
            self
        }

        fn build(self) -> SyncCommand {
            self.0
        }
    }

    fn with_sync(fx: &mut Fixture, sync_type: SyncType) {
        fx.session.syncs.insert(
            "contacts".into(),
            DatabaseSync::new(sync_type, "contacts", "./contacts", 0, 5_000, "n"),
        );
    }

    #[test]
    fn items_inherit_command_meta() {
        let cmd = Builder::new("contacts")
            .item("Add", "6", "c1", "BEGIN:VCARD\r\nEND:VCARD\r\n", false)
            .item("Delete", "7", "c2", "", false)
            .build();
        assert_eq!(cmd.items.len(), 2);
        assert_eq!(cmd.items[0].cmd_id, "6");
        assert_eq!(cmd.items[0].content_type.as_deref(), Some("text/x-vcard"));
        assert_eq!(cmd.items[1].kind, ItemKind::Delete);
        assert_eq!(cmd.items[1].cuid.as_deref(), Some("c2"));
    }

    #[test]
    fn applies_items_and_reports_status() {
        let mut fx = Fixture::new();
        with_sync(&mut fx, SyncType::TwoWay);
        let cmd = Builder::new("contacts")
            .item("Add", "6", "c1", "BEGIN:VCARD\r\nFN:X\r\nEND:VCARD\r\n", false)
            .build();
        let (_, _, xml) = fx.run(|ctx| cmd.handle(ctx).unwrap());
        assert!(xml.contains("<CmdRef>5</CmdRef><Cmd>Sync</Cmd>"));
        assert!(xml.contains("<CmdRef>6</CmdRef><Cmd>Add</Cmd><SourceRef>c1</SourceRef><Data>201</Data>"));
        assert_eq!(fx.backend.entries("alice", "contacts").len(), 1);
        assert_eq!(fx.session.sync("contacts").unwrap().syncs_received(), 1);
    }

    #[test]
    fn unknown_database_is_not_found() {
        let mut fx = Fixture::new();
        let cmd = Builder::new("notes").item("Add", "6", "c1", "x", false).build();
        let (_, _, xml) = fx.run(|ctx| cmd.handle(ctx).unwrap());
        assert!(xml.contains("<Data>404</Data>"));
        assert!(!xml.contains("<Cmd>Add</Cmd>"));
    }

    #[test]
    fn server_only_sync_refuses_client_items() {
        let mut fx = Fixture::new();
        with_sync(&mut fx, SyncType::RefreshFromServer);
        let cmd = Builder::new("contacts").item("Replace", "6", "c1", "x", false).build();
        let (_, _, xml) = fx.run(|ctx| cmd.handle(ctx).unwrap());
        assert!(xml.contains("<Cmd>Replace</Cmd><SourceRef>c1</SourceRef><Data>405</Data>"));
        assert!(fx.backend.entries("alice", "contacts").is_empty());
    }

    #[test]
    fn chunks_are_buffered_across_messages() {
        let mut fx = Fixture::new();
        with_sync(&mut fx, SyncType::TwoWay);

        let first = Builder::new("contacts").item("Add", "6", "c1", "BEGIN:VCARD\r\n", true).build();
        let (_, _, xml) = fx.run(|ctx| first.handle(ctx).unwrap());
        assert!(xml.contains("<Data>213</Data>"));
        assert!(fx.session.pending_item.is_some());
        assert!(fx.backend.entries("alice", "contacts").is_empty());

        let last = Builder::new("contacts").item("Add", "3", "c1", "FN:Y\r\nEND:VCARD\r\n", false).build();
        let (_, _, xml) = fx.run(|ctx| last.handle(ctx).unwrap());
        assert!(xml.contains("<CmdRef>3</CmdRef><Cmd>Add</Cmd><SourceRef>c1</SourceRef><Data>201</Data>"));
        assert!(fx.session.pending_item.is_none());
        let stored = fx.backend.entries("alice", "contacts");
        assert_eq!(stored[0].content, "BEGIN:VCARD\r\nFN:Y\r\nEND:VCARD\r\n");
    }

    #[test]
    fn mozilla_plugin_gets_no_status_for_accepted_items() {
        let mut fx = Fixture::new();
        fx.session.source_uri = "fmz-4711".into();
        with_sync(&mut fx, SyncType::TwoWay);
        let cmd = Builder::new("contacts")
            .item("Add", "6", "c1", "BEGIN:VCARD\r\nEND:VCARD\r\n", false)
            .item("Delete", "7", "missing", "", false)
            .build();
        let (_, _, xml) = fx.run(|ctx| cmd.handle(ctx).unwrap());
        assert!(!xml.contains("<Cmd>Add</Cmd>"));
        assert!(xml.contains("<Cmd>Delete</Cmd><SourceRef>missing</SourceRef><Data>211</Data>"));
    }
}
