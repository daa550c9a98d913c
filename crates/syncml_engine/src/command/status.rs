//! `<Status>` sent by the client for server commands.

use super::path_is;
use crate::context::RequestContext;
use crate::error::SyncMlResult;
use crate::item::ItemKind;
use syncml_protocol::StatusCode;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub(crate) struct StatusCommand {
    msg_ref: String,
    cmd_ref: String,
    cmd: String,
    code: String,
}

impl StatusCommand {
    pub(crate) fn end_element(&mut self, path: &[String], text: &str) {
        let value = text.trim().to_string();
        if path_is(path, &["Status", "MsgRef"]) {
            self.msg_ref = value;
        } else if path_is(path, &["Status", "CmdRef"]) {
            self.cmd_ref = value;
        } else if path_is(path, &["Status", "Cmd"]) {
            self.cmd = value;
        } else if path_is(path, &["Status", "Data"]) {
            self.code = value;
        }
    }

    pub(crate) fn handle(self, ctx: &mut RequestContext<'_>) -> SyncMlResult<()> {
        let Some(code) = StatusCode::parse(&self.code) else {
            warn!(cmd = %self.cmd, data = %self.code, "status without code");
            return Ok(());
        };

        if ItemKind::from_element(&self.cmd).is_none() {
            if !code.is_success() {
                warn!(cmd = %self.cmd, cmd_ref = %self.cmd_ref, status = %code, "client reported failure");
            }
            return Ok(());
        }

        let (Ok(message_id), Ok(cmd_id)) = (self.msg_ref.parse(), self.cmd_ref.parse()) else {
            warn!(msg_ref = %self.msg_ref, cmd_ref = %self.cmd_ref, "unparsable status reference");
            return Ok(());
        };
        match ctx.session.ledger.resolve(message_id, None, cmd_id, code) {
            Some(change) => debug!(kind = %change.kind, suid = %change.suid, status = %code, "client answered change"),
            None => debug!(message_id, cmd_id, "status for unknown change"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SentChange;
    use crate::test_support::{path, Fixture};

    fn status(msg: &str, cmd_ref: &str, cmd: &str, code: &str) -> StatusCommand {
        let mut st = StatusCommand::default();
        st.end_element(&path("Status/MsgRef"), msg);
        st.end_element(&path("Status/CmdRef"), cmd_ref);
        st.end_element(&path("Status/Cmd"), cmd);
        st.end_element(&path("Status/Data"), code);
        st
    }

    #[test]
    fn resolves_ledger_entries() {
        let mut fx = Fixture::new();
        fx.session.ledger.record(
            2,
            "contacts",
            7,
            SentChange {
                kind: ItemKind::Add,
                suid: "s1".into(),
                cuid: None,
            },
        );
        fx.run(|ctx| status("2", "7", "Replace", "500").handle(ctx).unwrap());
        assert!(fx.session.ledger.is_empty());

        fx.run(|ctx| status("2", "x", "Add", "200").handle(ctx).unwrap());
        fx.run(|ctx| status("1", "0", "SyncHdr", "212").handle(ctx).unwrap());
        let (_, flags, xml) = fx.run(|ctx| status("1", "1", "Alert", "200").handle(ctx).unwrap());
        assert!(xml.is_empty());
        assert!(!flags.expect_response);
    }
}
