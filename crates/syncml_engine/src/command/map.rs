//! `<Map>`: client ids for entries the server added.

use super::{path_is, reject_unauthenticated};
use crate::context::RequestContext;
use crate::error::SyncMlResult;
use crate::output::StatusReport;
use syncml_protocol::{ProtocolResult, StatusCode};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct MapItem {
    cuid: String,
    suid: String,
}

#[derive(Debug, Default)]
pub(crate) struct MapCommand {
    cmd_id: String,
    server_uri: String,
    client_uri: String,
    items: Vec<MapItem>,
}

impl MapCommand {
    pub(crate) fn start_element(&mut self, path: &[String]) -> ProtocolResult<()> {
        if path_is(path, &["Map", "MapItem"]) {
            self.items.push(MapItem::default());
        }
        Ok(())
    }

    pub(crate) fn end_element(&mut self, path: &[String], text: &str) {
        let value = text.trim().to_string();
        if path_is(path, &["Map", "CmdID"]) {
            self.cmd_id = value;
        } else if path_is(path, &["Map", "Target", "LocURI"]) {
            self.server_uri = value;
        } else if path_is(path, &["Map", "Source", "LocURI"]) {
            self.client_uri = value;
        } else if let Some(item) = self.items.last_mut() {
            if path_is(path, &["Map", "MapItem", "Target", "LocURI"]) {
                item.suid = value;
            } else if path_is(path, &["Map", "MapItem", "Source", "LocURI"]) {
                item.cuid = value;
            }
        }
    }

    pub(crate) fn handle(self, ctx: &mut RequestContext<'_>) -> SyncMlResult<()> {
        if reject_unauthenticated(ctx, &self.cmd_id, "Map")? {
            return Ok(());
        }

        let failures = ctx.with_sync(&self.server_uri, |sync, ctx| {
            self.items
                .iter()
                .filter(|item| match sync.create_uid_map(ctx, &item.cuid, &item.suid) {
                    Ok(()) => false,
                    Err(err) => {
                        warn!(cuid = %item.cuid, suid = %item.suid, error = %err, "storing map entry failed");
                        true
                    }
                })
                .count()
        });

        let code = match failures {
            None => {
                warn!(database = %self.server_uri, "map for unknown sync");
                StatusCode::NOT_FOUND
            }
            Some(0) => StatusCode::OK,
            Some(_) => StatusCode::COMMAND_FAILED,
        };
        debug!(database = %self.server_uri, entries = self.items.len(), status = %code, "handled map");
        ctx.out.status(
            &StatusReport::new(&self.cmd_id, "Map", code)
                .with_target(&self.server_uri)
                .with_source(&self.client_uri),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::DatabaseSync;
    use crate::test_support::{path, Fixture};
    use syncml_protocol::SyncType;

    fn map(db: &str, pairs: &[(&str, &str)]) -> MapCommand {
        let mut cmd = MapCommand::default();
        cmd.end_element(&path("Map/CmdID"), "4");
        cmd.end_element(&path("Map/Target/LocURI"), db);
        cmd.end_element(&path("Map/Source/LocURI"), "./contacts");
        for (cuid, suid) in pairs {
            cmd.start_element(&path("Map/MapItem")).unwrap();
            cmd.end_element(&path("Map/MapItem/Target/LocURI"), suid);
            cmd.end_element(&path("Map/MapItem/Source/LocURI"), cuid);
        }
        cmd
    }

    #[test]
    fn stores_id_pairs() {
        let mut fx = Fixture::new();
        fx.session.syncs.insert(
            "contacts".into(),
            DatabaseSync::new(SyncType::TwoWay, "contacts", "./contacts", 0, 10, "n"),
        );
        let cmd = map("contacts", &[("c1", "s1"), ("c2", "s2")]);
        let (_, _, xml) = fx.run(|ctx| cmd.handle(ctx).unwrap());
        assert!(xml.contains("<Cmd>Map</Cmd><TargetRef>contacts</TargetRef><SourceRef>./contacts</SourceRef><Data>200</Data>"));
        let entries = fx.backend.map_entries("alice", "IMEI:1", "contacts");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.timestamp == 0));
    }

    #[test]
    fn map_without_sync_is_not_found() {
        let mut fx = Fixture::new();
        let (_, _, xml) = fx.run(|ctx| map("notes", &[("c1", "s1")]).handle(ctx).unwrap());
        assert!(xml.contains("<Data>404</Data>"));
    }
}
