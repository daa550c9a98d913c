//! Protocol commands.
//!
//! The content handler opens a [`Command`] when an element starts at body
//! depth, feeds it every nested element with its path relative to the
//! command (`path[0]` is the command name) and runs
//! [`Command::handle`] once the command element closes.

mod alert;
mod get;
mod header;
mod map;
mod put;
mod status;
mod sync;

pub(crate) use header::Header;

use crate::context::RequestContext;
use crate::error::SyncMlResult;
use crate::output::StatusReport;
use alert::AlertCommand;
use get::GetCommand;
use map::MapCommand;
use put::PutCommand;
use status::StatusCommand;
use sync::SyncCommand;
use syncml_protocol::{AlertCode, ProtocolResult, StatusCode};
use tracing::warn;

/// Returns true if `path` equals `expected`.
pub(crate) fn path_is(path: &[String], expected: &[&str]) -> bool {
    path.len() == expected.len() && path.iter().zip(expected).all(|(a, b)| a == b)
}

/// A command being parsed.
pub(crate) enum Command {
    Alert(AlertCommand),
    Sync(SyncCommand),
    Map(MapCommand),
    Status(StatusCommand),
    Get(GetCommand),
    Put(PutCommand),
    Final,
    Unsupported { name: String, cmd_id: String },
}

impl Command {
    /// Opens the command for an element name.
    pub(crate) fn open(name: &str) -> Self {
        match name {
            "Alert" => Command::Alert(AlertCommand::default()),
            "Sync" => Command::Sync(SyncCommand::default()),
            "Map" => Command::Map(MapCommand::default()),
            "Status" => Command::Status(StatusCommand::default()),
            "Get" => Command::Get(GetCommand::default()),
            "Put" => Command::Put(PutCommand::new(false)),
            "Results" => Command::Put(PutCommand::new(true)),
            "Final" => Command::Final,
            other => Command::Unsupported {
                name: other.to_string(),
                cmd_id: String::new(),
            },
        }
    }

    /// Element name of the command.
    pub(crate) fn name(&self) -> &str {
        match self {
            Command::Alert(_) => "Alert",
            Command::Sync(_) => "Sync",
            Command::Map(_) => "Map",
            Command::Status(_) => "Status",
            Command::Get(_) => "Get",
            Command::Put(put) => put.name(),
            Command::Final => "Final",
            Command::Unsupported { name, .. } => name,
        }
    }

    /// Returns true if the client must send another message after this
    /// command. Only these commands may end a package.
    pub(crate) fn expects_response(&self) -> bool {
        !matches!(
            self,
            Command::Status(_) | Command::Map(_) | Command::Final | Command::Sync(_)
        ) && self.name() != "Results"
    }

    pub(crate) fn start_element(&mut self, namespace: &str, path: &[String]) -> ProtocolResult<()> {
        match self {
            Command::Sync(cmd) => cmd.start_element(path),
            Command::Map(cmd) => cmd.start_element(path),
            Command::Put(cmd) => cmd.start_element(namespace, path),
            _ => Ok(()),
        }
    }

    pub(crate) fn characters(&mut self, path: &[String], text: &str) -> ProtocolResult<()> {
        match self {
            Command::Put(cmd) => cmd.characters(path, text),
            _ => Ok(()),
        }
    }

    pub(crate) fn end_element(&mut self, namespace: &str, path: &[String], text: &str) -> ProtocolResult<()> {
        match self {
            Command::Alert(cmd) => cmd.end_element(path, text),
            Command::Sync(cmd) => cmd.end_element(path, text),
            Command::Map(cmd) => cmd.end_element(path, text),
            Command::Status(cmd) => cmd.end_element(path, text),
            Command::Get(cmd) => cmd.end_element(path, text),
            Command::Put(cmd) => cmd.end_element(namespace, path, text)?,
            Command::Final => {}
            Command::Unsupported { cmd_id, .. } => {
                if path.len() == 2 && path[1] == "CmdID" {
                    *cmd_id = text.trim().to_string();
                }
            }
        }
        Ok(())
    }

    /// Executes the command against the session and writes its response.
    pub(crate) fn handle(self, ctx: &mut RequestContext<'_>) -> SyncMlResult<()> {
        match self {
            Command::Alert(cmd) => cmd.handle(ctx),
            Command::Sync(cmd) => cmd.handle(ctx),
            Command::Map(cmd) => cmd.handle(ctx),
            Command::Status(cmd) => cmd.handle(ctx),
            Command::Get(cmd) => cmd.handle(ctx),
            Command::Put(cmd) => cmd.handle(ctx),
            Command::Final => handle_final(ctx),
            Command::Unsupported { name, cmd_id } => {
                warn!(command = %name, "command not implemented");
                ctx.out
                    .status(&StatusReport::new(&cmd_id, &name, StatusCode::COMMAND_NOT_IMPLEMENTED))?;
                Ok(())
            }
        }
    }
}

/// Answers a data command of an unauthenticated client.
pub(crate) fn reject_unauthenticated(
    ctx: &mut RequestContext<'_>,
    cmd_id: &str,
    name: &str,
) -> SyncMlResult<bool> {
    if ctx.session.authenticated {
        return Ok(false);
    }
    warn!(command = name, "command from unauthenticated client");
    ctx.out
        .status(&StatusReport::new(cmd_id, name, StatusCode::INVALID_CREDENTIALS))?;
    Ok(true)
}

/// The client finished its package: flag an unfinished chunked item, ask
/// for device information once and advance every sync.
fn handle_final(ctx: &mut RequestContext<'_>) -> SyncMlResult<()> {
    if !ctx.session.authenticated {
        return Ok(());
    }

    if let Some(pending) = ctx.session.pending_item.take() {
        warn!(cuid = ?pending.cuid, "package ended inside a chunked item");
        let client_uri = ctx
            .session
            .sync(&pending.database)
            .map(|sync| sync.client_uri().to_string())
            .unwrap_or_default();
        ctx.out
            .notice_alert(AlertCode::NO_END_OF_DATA, &client_uri, &pending.database)?;
    }

    if ctx.session.device_info.is_none() && !ctx.session.devinf_requested {
        ctx.out.get_devinf()?;
        ctx.session.devinf_requested = true;
        ctx.flags.expect_response = true;
    }

    let databases: Vec<String> = ctx.session.syncs.keys().cloned().collect();
    for database in databases {
        ctx.with_sync(&database, |sync, ctx| sync.handle_final(ctx))
            .transpose()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn path_matching() {
        assert!(path_is(&path(&["Sync", "Target", "LocURI"]), &["Sync", "Target", "LocURI"]));
        assert!(!path_is(&path(&["Sync", "Target"]), &["Sync", "Target", "LocURI"]));
        assert!(!path_is(&path(&["Sync", "Source", "LocURI"]), &["Sync", "Target", "LocURI"]));
    }

    #[test]
    fn commands_that_may_end_a_package() {
        for name in ["Status", "Map", "Final", "Sync", "Results"] {
            assert!(!Command::open(name).expects_response(), "{name}");
        }
        for name in ["Alert", "Get", "Put", "Atomic"] {
            assert!(Command::open(name).expects_response(), "{name}");
        }
        assert_eq!(Command::open("Results").name(), "Results");
        assert_eq!(Command::open("Exec").name(), "Exec");
    }
}
