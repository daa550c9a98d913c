//! Helpers for unit tests that drive commands directly.

use crate::backend::Backend;
use crate::config::EngineConfig;
use crate::context::{MessageFlags, RequestContext};
use crate::memory::{ManualClock, MemoryBackend};
use crate::output::ResponseWriter;
use crate::session::SyncSession;
use std::sync::Arc;
use syncml_protocol::{Encoding, ProtocolVersion, XmlEncoder};

pub(crate) struct Fixture {
    pub backend: MemoryBackend,
    pub clock: Arc<ManualClock>,
    pub session: SyncSession,
    pub config: EngineConfig,
}

impl Fixture {
    /// Authenticated session of `alice` on device `IMEI:1`, clock at 1000.
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = MemoryBackend::with_clock(clock.clone());
        store.add_user("alice", "secret");
        let mut backend = store.handle();
        backend.session_start("IMEI:1", "1");
        backend.set_user("alice");
        let mut session = SyncSession::new("1", "IMEI:1", "http://server", ProtocolVersion::V1_1);
        session.message_id = 1;
        session.authenticated = true;
        session.user = Some("alice".into());
        Self {
            backend,
            clock,
            session,
            config: EngineConfig::default(),
        }
    }

    /// Runs `f` in a fresh context inside an open `<SyncBody>` and returns
    /// its result, the flags and the XML written by `f`.
    pub fn run<R>(&mut self, f: impl FnOnce(&mut RequestContext<'_>) -> R) -> (R, MessageFlags, String) {
        let mut flags = MessageFlags::default();
        let mut out = ResponseWriter::new(Box::new(XmlEncoder::new()), Encoding::Xml);
        out.begin(&self.session).unwrap();
        out.body_start().unwrap();
        let opened = out.output_size();
        let result = {
            let mut ctx = RequestContext {
                session: &mut self.session,
                backend: &mut self.backend,
                config: &self.config,
                flags: &mut flags,
                out: &mut out,
            };
            f(&mut ctx)
        };
        let xml = String::from_utf8(out.output()[opened..].to_vec()).unwrap();
        (result, flags, xml)
    }
}

/// Splits a slash separated path.
pub(crate) fn path(spec: &str) -> Vec<String> {
    spec.split('/').map(str::to_string).collect()
}
