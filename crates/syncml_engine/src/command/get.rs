//! `<Get>`: the client asks for the server's device information.

use super::{path_is, reject_unauthenticated};
use crate::context::RequestContext;
use crate::error::SyncMlResult;
use crate::output::StatusReport;
use syncml_protocol::StatusCode;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub(crate) struct GetCommand {
    cmd_id: String,
    target: String,
}

impl GetCommand {
    pub(crate) fn end_element(&mut self, path: &[String], text: &str) {
        if path_is(path, &["Get", "CmdID"]) {
            self.cmd_id = text.trim().to_string();
        } else if path_is(path, &["Get", "Item", "Target", "LocURI"]) {
            self.target = text.trim().to_string();
        }
    }

    pub(crate) fn handle(self, ctx: &mut RequestContext<'_>) -> SyncMlResult<()> {
        if reject_unauthenticated(ctx, &self.cmd_id, "Get")? {
            return Ok(());
        }

        let status = StatusReport::new(&self.cmd_id, "Get", StatusCode::OK).with_target(&self.target);
        if !is_devinf_uri(&self.target) {
            warn!(target = %self.target, "get for unsupported target");
            ctx.out.status(&StatusReport {
                code: StatusCode::NOT_FOUND,
                ..status
            })?;
            return Ok(());
        }

        debug!("sending server device information");
        ctx.out.status(&status)?;
        ctx.out.devinf_results(&self.cmd_id, ctx.config)?;
        Ok(())
    }
}

fn is_devinf_uri(uri: &str) -> bool {
    matches!(uri.trim_start_matches("./"), "devinf10" | "devinf11" | "devinf12")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{path, Fixture};

    fn get(target: &str) -> GetCommand {
        let mut cmd = GetCommand::default();
        cmd.end_element(&path("Get/CmdID"), "3");
        cmd.end_element(&path("Get/Item/Target/LocURI"), target);
        cmd
    }

    #[test]
    fn answers_devinf_with_results() {
        let mut fx = Fixture::new();
        let (_, _, xml) = fx.run(|ctx| get("./devinf11").handle(ctx).unwrap());
        assert!(xml.contains("<Cmd>Get</Cmd><TargetRef>./devinf11</TargetRef><Data>200</Data>"));
        assert!(xml.contains("<Results><CmdID>2</CmdID><MsgRef>1</MsgRef><CmdRef>3</CmdRef>"));
        assert!(xml.contains("<DevInf xmlns=\"syncml:devinf\">"));
    }

    #[test]
    fn other_targets_are_not_found() {
        let mut fx = Fixture::new();
        let (_, _, xml) = fx.run(|ctx| get("./contacts").handle(ctx).unwrap());
        assert!(xml.contains("<Data>404</Data>"));
        assert!(!xml.contains("<Results>"));
    }
}
