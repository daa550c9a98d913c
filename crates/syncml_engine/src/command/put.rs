//! `<Put>` and `<Results>`: the client's device information.

use super::{path_is, reject_unauthenticated};
use crate::context::RequestContext;
use crate::error::SyncMlResult;
use crate::output::StatusReport;
use syncml_protocol::{DevInfParser, ElementDecoder, ElementHandler, ProtocolResult, StatusCode, XmlDecoder};
use tracing::{debug, info, warn};

/// Depth of `<DevInf>` below the command: `[cmd, Item, Data, DevInf]`.
const DEVINF_DEPTH: usize = 4;

pub(crate) struct PutCommand {
    results: bool,
    cmd_id: String,
    source: String,
    parser: Option<DevInfParser>,
    data: String,
}

impl PutCommand {
    pub(crate) fn new(results: bool) -> Self {
        Self {
            results,
            cmd_id: String::new(),
            source: String::new(),
            parser: None,
            data: String::new(),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        if self.results {
            "Results"
        } else {
            "Put"
        }
    }

    fn in_devinf(path: &[String]) -> bool {
        path.len() >= DEVINF_DEPTH && path[1] == "Item" && path[2] == "Data" && path[3] == "DevInf"
    }

    pub(crate) fn start_element(&mut self, namespace: &str, path: &[String]) -> ProtocolResult<()> {
        if !Self::in_devinf(path) {
            return Ok(());
        }
        if path.len() == DEVINF_DEPTH {
            self.parser = Some(DevInfParser::new());
        }
        match (self.parser.as_mut(), path.last()) {
            (Some(parser), Some(name)) => parser.start_element(namespace, name),
            _ => Ok(()),
        }
    }

    pub(crate) fn characters(&mut self, path: &[String], text: &str) -> ProtocolResult<()> {
        match self.parser.as_mut() {
            Some(parser) if Self::in_devinf(path) => parser.characters(text),
            _ => Ok(()),
        }
    }

    pub(crate) fn end_element(&mut self, namespace: &str, path: &[String], text: &str) -> ProtocolResult<()> {
        if Self::in_devinf(path) {
            if let (Some(parser), Some(name)) = (self.parser.as_mut(), path.last()) {
                parser.end_element(namespace, name)?;
            }
            return Ok(());
        }

        let value = text.trim();
        if path.len() == 2 && path[1] == "CmdID" {
            self.cmd_id = value.to_string();
        } else if path.len() == 4 && path_is(&path[1..], &["Item", "Source", "LocURI"]) {
            self.source = value.to_string();
        } else if path.len() == 3 && path_is(&path[1..], &["Item", "Data"]) && self.parser.is_none() {
            // Some clients escape the document instead of nesting it.
            self.data = value.to_string();
        }
        Ok(())
    }

    pub(crate) fn handle(self, ctx: &mut RequestContext<'_>) -> SyncMlResult<()> {
        let name = self.name();
        if reject_unauthenticated(ctx, &self.cmd_id, name)? {
            return Ok(());
        }

        let info = match self.parser {
            Some(parser) => Some(parser.finish()),
            None if self.data.starts_with('<') => {
                let mut parser = DevInfParser::new();
                match XmlDecoder::new().decode(self.data.as_bytes(), &mut parser) {
                    Ok(()) => Some(parser.finish()),
                    Err(err) => {
                        warn!(error = %err, "unreadable device information");
                        None
                    }
                }
            }
            None => None,
        };

        match info {
            Some(info) => {
                info!(
                    manufacturer = %info.manufacturer,
                    model = %info.model,
                    stores = info.data_stores.len(),
                    "received device information"
                );
                ctx.session.device_info = Some(info);
                debug!(device = ?ctx.device(), "device detected");
            }
            None => warn!(command = name, "no device information in command"),
        }

        ctx.out.status(
            &StatusReport::new(&self.cmd_id, name, StatusCode::OK).with_source(&self.source),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::test_support::{path, Fixture};

    const NS: &str = "syncml:devinf";

    fn put_with_tree(results: bool) -> PutCommand {
        let mut cmd = PutCommand::new(results);
        let name = cmd.name();
        cmd.end_element("", &path(&format!("{name}/CmdID")), "2").unwrap();
        cmd.end_element("", &path(&format!("{name}/Item/Source/LocURI")), "./devinf11")
            .unwrap();
        for (p, text) in [("DevInf", None), ("DevInf/Man", Some("NOKIA")), ("DevInf/Mod", Some("6630"))] {
            let full = path(&format!("{name}/Item/Data/{p}"));
            cmd.start_element(NS, &full).unwrap();
            if let Some(text) = text {
                cmd.characters(&full, text).unwrap();
                cmd.end_element(NS, &full, text).unwrap();
            }
        }
        cmd.end_element(NS, &path(&format!("{name}/Item/Data/DevInf")), "").unwrap();
        cmd
    }

    #[test]
    fn nested_devinf_sets_device() {
        let mut fx = Fixture::new();
        let (_, _, xml) = fx.run(|ctx| put_with_tree(false).handle(ctx).unwrap());
        assert!(xml.contains("<Cmd>Put</Cmd><SourceRef>./devinf11</SourceRef><Data>200</Data>"));
        let info = fx.session.device_info.as_ref().unwrap();
        assert_eq!(info.manufacturer, "NOKIA");
        assert_eq!(fx.session.device(), Device::Nokia);
    }

    #[test]
    fn results_answer_the_servers_get() {
        let mut fx = Fixture::new();
        let (_, _, xml) = fx.run(|ctx| put_with_tree(true).handle(ctx).unwrap());
        assert!(xml.contains("<Cmd>Results</Cmd>"));
        assert_eq!(fx.session.device(), Device::Nokia);
    }

    #[test]
    fn escaped_devinf_is_parsed() {
        let mut fx = Fixture::new();
        let mut cmd = PutCommand::new(false);
        cmd.end_element("", &path("Put/CmdID"), "2").unwrap();
        cmd.end_element(
            "",
            &path("Put/Item/Data"),
            "<DevInf xmlns=\"syncml:devinf\"><Man>Synthesis AG</Man></DevInf>",
        )
        .unwrap();
        fx.run(|ctx| cmd.handle(ctx).unwrap());
        assert_eq!(fx.session.device(), Device::Synthesis);
    }

    #[test]
    fn put_needs_authentication() {
        let mut fx = Fixture::new();
        fx.session.authenticated = false;
        let (_, _, xml) = fx.run(|ctx| put_with_tree(false).handle(ctx).unwrap());
        assert!(xml.contains("<Data>401</Data>"));
        assert!(fx.session.device_info.is_none());
    }
}
