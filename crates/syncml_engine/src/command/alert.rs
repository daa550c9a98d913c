//! `<Alert>`: starts the sync of one database.

use super::{path_is, reject_unauthenticated};
use crate::context::RequestContext;
use crate::error::SyncMlResult;
use crate::output::StatusReport;
use crate::sync::DatabaseSync;
use syncml_protocol::{AlertCode, StatusCode, SyncType};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub(crate) struct AlertCommand {
    cmd_id: String,
    code: Option<u16>,
    server_uri: String,
    client_uri: String,
    anchor_last: String,
    anchor_next: String,
}

impl AlertCommand {
    pub(crate) fn end_element(&mut self, path: &[String], text: &str) {
        let value = text.trim();
        if path_is(path, &["Alert", "CmdID"]) {
            self.cmd_id = value.to_string();
        } else if path_is(path, &["Alert", "Data"]) {
            self.code = value.parse().ok();
        } else if path_is(path, &["Alert", "Item", "Target", "LocURI"]) {
            self.server_uri = value.to_string();
        } else if path_is(path, &["Alert", "Item", "Source", "LocURI"]) {
            self.client_uri = value.to_string();
        } else if path_is(path, &["Alert", "Item", "Meta", "Anchor", "Last"]) {
            self.anchor_last = value.to_string();
        } else if path_is(path, &["Alert", "Item", "Meta", "Anchor", "Next"]) {
            self.anchor_next = value.to_string();
        }
    }

    pub(crate) fn handle(self, ctx: &mut RequestContext<'_>) -> SyncMlResult<()> {
        if reject_unauthenticated(ctx, &self.cmd_id, "Alert")? {
            return Ok(());
        }

        let code = self.code.unwrap_or_default();
        let status = |code| {
            StatusReport::new(&self.cmd_id, "Alert", code)
                .with_target(&self.server_uri)
                .with_source(&self.client_uri)
        };

        if code == AlertCode::NEXT_MESSAGE {
            debug!("client asks for the next message");
            ctx.out.status(&status(StatusCode::OK))?;
            return Ok(());
        }

        let Some(requested) = SyncType::from_code(code) else {
            warn!(code, "unsupported alert");
            ctx.out.status(&status(StatusCode::OPTIONAL_FEATURE_NOT_SUPPORTED))?;
            return Ok(());
        };

        if !ctx.backend.is_valid_database_uri(&self.server_uri) {
            warn!(database = %self.server_uri, "alert for unknown database");
            ctx.out.status(&status(StatusCode::NOT_FOUND))?;
            return Ok(());
        }

        let stored = match ctx.backend.read_sync_anchors(&self.server_uri) {
            Ok(anchors) => anchors,
            Err(err) => {
                warn!(database = %self.server_uri, error = %err, "reading anchors failed");
                None
            }
        };

        let mut sync_type = requested;
        let mut response = StatusCode::OK;
        let mut server_last = 0;
        if requested.requires_anchor_match() {
            match &stored {
                Some(anchors) if anchors.client == self.anchor_last => server_last = anchors.server,
                Some(anchors) => {
                    info!(
                        database = %self.server_uri,
                        stored = %anchors.client,
                        sent = %self.anchor_last,
                        "client anchor mismatch, forcing slow sync"
                    );
                    sync_type = SyncType::Slow;
                    response = StatusCode::REFRESH_REQUIRED;
                }
                None => {
                    info!(database = %self.server_uri, "no sync history, forcing slow sync");
                    sync_type = SyncType::Slow;
                    response = StatusCode::REFRESH_REQUIRED;
                }
            }
        }

        if sync_type.erases_map() {
            if let Err(err) = ctx.backend.erase_map(&self.server_uri) {
                warn!(database = %self.server_uri, error = %err, "erasing id map failed");
                ctx.out.status(&status(StatusCode::COMMAND_FAILED))?;
                return Ok(());
            }
        }

        let server_next = ctx.backend.current_timestamp();
        info!(
            database = %self.server_uri,
            sync_type = %sync_type,
            from = server_last,
            to = server_next,
            "starting sync"
        );

        let sync = DatabaseSync::new(
            sync_type,
            self.server_uri.as_str(),
            self.client_uri.as_str(),
            server_last,
            server_next,
            self.anchor_next.as_str(),
        );
        if ctx.session.syncs.insert(self.server_uri.clone(), sync).is_some() {
            warn!(database = %self.server_uri, "alert restarts an existing sync");
        }

        ctx.out
            .status(&status(response).with_anchors("", &self.anchor_next))?;
        ctx.out.alert(
            sync_type.code(),
            &self.client_uri,
            &self.server_uri,
            &server_last.to_string(),
            &server_next.to_string(),
            ctx.config.max_object_size,
        )?;
        Ok(())
    }
}
