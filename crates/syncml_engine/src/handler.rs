//! Message processing: decode a request, dispatch its commands and build
//! the response.

use crate::backend::Backend;
use crate::command::{Command, Header};
use crate::config::EngineConfig;
use crate::context::{MessageFlags, RequestContext};
use crate::error::{SyncMlError, SyncMlResult};
use crate::output::{ResponseWriter, StatusReport};
use crate::session::SyncSession;
use std::sync::Arc;
use syncml_protocol::{
    ElementDecoder, ElementHandler, ElementWriter, Encoding, ProtocolError, ProtocolResult, StatusCode,
    WbxmlCodec, XmlDecoder, XmlEncoder,
};
use tracing::{debug, info, warn};

/// Supplies the stored state of a session once the header named it.
pub trait SessionLoader {
    /// Returns the session of `device_id` and `session_id`, or `None` if
    /// this message starts a new one.
    fn load(&mut self, device_id: &str, session_id: &str) -> SyncMlResult<Option<SyncSession>>;
}

impl<F> SessionLoader for F
where
    F: FnMut(&str, &str) -> SyncMlResult<Option<SyncSession>>,
{
    fn load(&mut self, device_id: &str, session_id: &str) -> SyncMlResult<Option<SyncSession>> {
        self(device_id, session_id)
    }
}

/// Result of processing one message.
#[derive(Debug)]
pub struct MessageOutcome {
    /// Response body.
    pub body: Vec<u8>,
    /// Content type of the response.
    pub content_type: &'static str,
    /// Session state after the message.
    pub session: SyncSession,
    /// The session finished and its state may be discarded.
    pub session_closed: bool,
}

impl MessageOutcome {
    /// Client device id from the header.
    pub fn device_id(&self) -> &str {
        &self.session.source_uri
    }

    /// Protocol session id from the header.
    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }
}

/// Entry point of the engine.
///
/// One call to [`SyncEngine::process`] handles one client message. The
/// caller serializes messages of a session and persists the returned
/// session between calls.
#[derive(Clone, Default)]
pub struct SyncEngine {
    config: EngineConfig,
    wbxml: Option<Arc<dyn WbxmlCodec>>,
}

impl SyncEngine {
    /// Creates an engine handling XML messages.
    pub fn new(config: EngineConfig) -> Self {
        Self { config, wbxml: None }
    }

    /// Installs a WBXML implementation.
    pub fn with_wbxml_codec(mut self, codec: Arc<dyn WbxmlCodec>) -> Self {
        self.wbxml = Some(codec);
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Processes one message and returns the response.
    ///
    /// A request that cannot be decoded fails as a whole; no partial
    /// response is produced and the loaded session is not returned.
    pub fn process(
        &self,
        request: &[u8],
        content_type: &str,
        resp_uri: Option<&str>,
        backend: &mut dyn Backend,
        sessions: &mut dyn SessionLoader,
    ) -> SyncMlResult<MessageOutcome> {
        let encoding = Encoding::from_content_type(content_type);
        let writer: Box<dyn ElementWriter> = match encoding {
            Encoding::Xml => Box::new(XmlEncoder::new()),
            Encoding::Wbxml => self
                .wbxml
                .as_ref()
                .ok_or(ProtocolError::WbxmlUnavailable)?
                .encoder(),
        };
        debug!(bytes = request.len(), ?encoding, "processing message");

        let mut handler = ContentHandler {
            config: &self.config,
            backend,
            sessions,
            out: ResponseWriter::new(writer, encoding),
            resp_uri,
            stack: Vec::new(),
            text: String::new(),
            header: None,
            command: None,
            session: None,
            flags: MessageFlags::default(),
            got_final: false,
            finished: false,
            session_closed: false,
            failure: None,
        };

        let decoded = match (encoding, self.wbxml.as_ref()) {
            (Encoding::Wbxml, Some(codec)) => codec.decode(request, &mut handler),
            _ => XmlDecoder::new().decode(request, &mut handler),
        };
        if let Some(failure) = handler.failure.take() {
            return Err(failure);
        }
        decoded?;
        handler.finish()
    }
}

struct ContentHandler<'a> {
    config: &'a EngineConfig,
    backend: &'a mut dyn Backend,
    sessions: &'a mut dyn SessionLoader,
    out: ResponseWriter,
    resp_uri: Option<&'a str>,
    stack: Vec<String>,
    text: String,
    header: Option<Header>,
    command: Option<Command>,
    session: Option<SyncSession>,
    flags: MessageFlags,
    got_final: bool,
    finished: bool,
    session_closed: bool,
    failure: Option<SyncMlError>,
}

impl<'a> ContentHandler<'a> {
    fn in_header(&self) -> bool {
        self.stack.get(1).is_some_and(|name| name == "SyncHdr")
    }

    /// Records a processing failure and stops the decoder.
    fn guard(&mut self, result: SyncMlResult<()>) -> ProtocolResult<()> {
        result.map_err(|err| {
            let message = err.to_string();
            self.failure = Some(err);
            ProtocolError::Aborted(message)
        })
    }

    fn context(&mut self) -> SyncMlResult<RequestContext<'_>> {
        let session = self.session.as_mut().ok_or(SyncMlError::MissingHeader)?;
        Ok(RequestContext {
            session,
            backend: &mut *self.backend,
            config: self.config,
            flags: &mut self.flags,
            out: &mut self.out,
        })
    }

    fn handle_header(&mut self) -> SyncMlResult<()> {
        let header = self.header.take().ok_or(SyncMlError::MissingHeader)?;
        let device_id = header.source_uri.clone();
        let session_id = header.session_id.clone();

        let mut session = match self.sessions.load(&device_id, &session_id)? {
            Some(session) if session.source_uri == device_id && session.session_id == session_id => session,
            Some(_) => {
                warn!(device = %device_id, session = %session_id, "stored session belongs to another client");
                SyncSession::new(&session_id, &device_id, &header.target_uri, header.version())
            }
            None => {
                info!(device = %device_id, session = %session_id, "new session");
                SyncSession::new(&session_id, &device_id, &header.target_uri, header.version())
            }
        };

        let message_id = header.message_id();
        if session.message_id != 0 && message_id <= session.message_id {
            warn!(previous = session.message_id, message_id, "message id did not increase, treating as retransmission");
        }
        session.message_id = message_id;
        session.version = header.version();
        session.target_uri = header.target_uri.clone();
        if header.max_message_size.is_some() {
            session.max_message_size = header.max_message_size;
        }

        self.backend.session_start(&device_id, &session_id);

        let code = if session.authenticated {
            if let Some(user) = session.user.as_deref() {
                self.backend.set_user(user);
            }
            StatusCode::OK
        } else {
            let name = header.loc_name.as_deref().unwrap_or("");
            match self.backend.check_authentication(name, &header.credentials) {
                Some(user) => {
                    info!(user = %user, "client authenticated");
                    self.backend.set_user(&user);
                    session.user = Some(user);
                    session.authenticated = true;
                    StatusCode::AUTHENTICATION_ACCEPTED
                }
                None if header.credentials.is_missing() => StatusCode::CREDENTIALS_MISSING,
                None => {
                    debug!(device = %device_id, "invalid authentication");
                    StatusCode::INVALID_CREDENTIALS
                }
            }
        };

        self.out.begin(&session)?;
        self.out.header(&session, self.config, self.resp_uri)?;
        self.out.body_start()?;
        let mut report = StatusReport::new("0", "SyncHdr", code)
            .with_target(&session.target_uri)
            .with_source(&session.source_uri);
        if !session.authenticated {
            report = report.with_challenge();
        }
        self.out.status(&report)?;

        debug!(
            authenticated = session.authenticated,
            version = session.version.ver_dtd(),
            message_id = session.message_id,
            source = %session.source_uri,
            target = %session.target_uri,
            user = session.user.as_deref().unwrap_or(""),
            binary = self.out.is_binary(),
            "handled header"
        );
        self.session = Some(session);
        Ok(())
    }

    fn handle_command(&mut self, command: Command) -> SyncMlResult<()> {
        if command.expects_response() {
            self.flags.expect_response = true;
        }
        if matches!(command, Command::Final) {
            self.got_final = true;
        }
        debug!(command = command.name(), "handling command");
        let mut ctx = self.context()?;
        command.handle(&mut ctx)
    }

    fn handle_end(&mut self) -> SyncMlResult<()> {
        let got_final = self.got_final;
        let mut ctx = self.context()?;

        if ctx.flags.message_full || ctx.session.has_pending_syncs() {
            ctx.flags.expect_response = true;
        }

        if !ctx.flags.message_full {
            for database in ctx.session.pending_syncs() {
                if ctx.flags.message_full {
                    break;
                }
                debug!(database = %database, "continuing sync output");
                ctx.with_sync(&database, |sync, ctx| sync.create_sync_output(ctx))
                    .transpose()?;
            }
        }

        let can_finish = !ctx.flags.message_full && !ctx.session.has_pending_syncs();
        if got_final || ctx.session.delayed_final {
            if can_finish {
                debug!(delayed = !got_final, "sending final");
                ctx.out.final_marker()?;
                ctx.session.delayed_final = false;
            } else {
                ctx.flags.expect_response = true;
                ctx.session.delayed_final = true;
            }
        }

        ctx.out.end_message()?;

        if got_final && !ctx.flags.expect_response && ctx.session.all_syncs_complete() {
            let databases: Vec<String> = ctx.session.syncs.keys().cloned().collect();
            for database in databases {
                if let Some(Err(err)) = ctx.with_sync(&database, |sync, ctx| sync.close_sync(ctx)) {
                    warn!(database = %database, error = %err, "storing anchors failed");
                }
            }
            ctx.backend.session_close();
            info!(session = %ctx.session.session_id, "session completed");
            self.session_closed = true;
        } else {
            debug!("response message completed");
        }
        self.finished = true;
        Ok(())
    }

    fn finish(mut self) -> SyncMlResult<MessageOutcome> {
        let session = self.session.take().ok_or(SyncMlError::MissingHeader)?;
        if !self.finished {
            return Err(ProtocolError::malformed("message has no SyncBody").into());
        }
        Ok(MessageOutcome {
            body: self.out.message(),
            content_type: self.out.encoding().content_type(),
            session,
            session_closed: self.session_closed,
        })
    }
}

impl<'a> ElementHandler for ContentHandler<'a> {
    fn start_element(&mut self, namespace: &str, name: &str) -> ProtocolResult<()> {
        self.stack.push(name.to_string());
        self.text.clear();

        match self.stack.len() {
            1 => Ok(()),
            2 => {
                if name == "SyncHdr" {
                    self.header = Some(Header::default());
                    Ok(())
                } else if self.session.is_none() {
                    self.guard(Err(SyncMlError::MissingHeader))
                } else {
                    Ok(())
                }
            }
            _ if self.in_header() => Ok(()),
            3 => {
                let mut command = Command::open(name);
                command.start_element(namespace, &self.stack[2..])?;
                self.command = Some(command);
                Ok(())
            }
            _ => match self.command.as_mut() {
                Some(command) => command.start_element(namespace, &self.stack[2..]),
                None => Ok(()),
            },
        }
    }

    fn characters(&mut self, text: &str) -> ProtocolResult<()> {
        self.text.push_str(text);
        if self.stack.len() >= 3 && !self.in_header() {
            if let Some(command) = self.command.as_mut() {
                command.characters(&self.stack[2..], text)?;
            }
        }
        Ok(())
    }

    fn end_element(&mut self, namespace: &str, _name: &str) -> ProtocolResult<()> {
        let text = std::mem::take(&mut self.text);
        let depth = self.stack.len();

        let result = if depth < 2 {
            Ok(())
        } else if self.in_header() {
            if depth == 2 {
                let result = self.handle_header();
                self.guard(result)
            } else {
                if let Some(header) = self.header.as_mut() {
                    header.end_element(&self.stack[1..], &text);
                }
                Ok(())
            }
        } else if depth == 2 {
            let result = self.handle_end();
            self.guard(result)
        } else {
            if let Some(command) = self.command.as_mut() {
                command.end_element(namespace, &self.stack[2..], &text)?;
            }
            if depth == 3 {
                match self.command.take() {
                    Some(command) => {
                        let result = self.handle_command(command);
                        self.guard(result)
                    }
                    None => Ok(()),
                }
            } else {
                Ok(())
            }
        };

        self.stack.pop();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::output::XML_DECLARATION;

    fn fresh(_: &str, _: &str) -> SyncMlResult<Option<SyncSession>> {
        Ok(None)
    }

    const MINIMAL: &str = r#"<SyncML xmlns="SYNCML:SYNCML1.1"><SyncHdr><VerDTD>1.1</VerDTD><VerProto>SyncML/1.1</VerProto><SessionID>7</SessionID><MsgID>1</MsgID><Target><LocURI>http://server</LocURI></Target><Source><LocURI>IMEI:1</LocURI></Source></SyncHdr><SyncBody><Final/></SyncBody></SyncML>"#;

    #[test]
    fn unauthenticated_message_gets_challenge() {
        let store = MemoryBackend::new();
        let mut backend = store.handle();
        let outcome = SyncEngine::default()
            .process(MINIMAL.as_bytes(), "application/vnd.syncml+xml", None, &mut backend, &mut fresh)
            .unwrap();
        let body = String::from_utf8(outcome.body.clone()).unwrap();
        assert!(body.starts_with(XML_DECLARATION));
        assert!(body.contains("<Cmd>SyncHdr</Cmd>"));
        assert!(body.contains("<Data>407</Data>"));
        assert!(body.contains("<Chal>"));
        assert!(body.contains("<Final/>") || body.contains("<Final></Final>"));
        assert!(!outcome.session.authenticated);
        assert_eq!(outcome.session_id(), "7");
        assert_eq!(outcome.device_id(), "IMEI:1");
    }

    #[test]
    fn body_without_header_is_rejected() {
        let store = MemoryBackend::new();
        let mut backend = store.handle();
        let err = SyncEngine::default()
            .process(
                b"<SyncML><SyncBody><Final/></SyncBody></SyncML>",
                "application/vnd.syncml+xml",
                None,
                &mut backend,
                &mut fresh,
            )
            .unwrap_err();
        assert!(matches!(err, SyncMlError::MissingHeader));
    }

    #[test]
    fn wbxml_needs_a_codec() {
        let store = MemoryBackend::new();
        let mut backend = store.handle();
        let err = SyncEngine::default()
            .process(&[0x02, 0x00], "application/vnd.syncml+wbxml", None, &mut backend, &mut fresh)
            .unwrap_err();
        assert!(matches!(err, SyncMlError::Protocol(ProtocolError::WbxmlUnavailable)));
    }

    #[test]
    fn truncated_xml_fails_whole_message() {
        let store = MemoryBackend::new();
        let mut backend = store.handle();
        let truncated = &MINIMAL[..MINIMAL.len() - 20];
        let err = SyncEngine::default()
            .process(truncated.as_bytes(), "application/vnd.syncml+xml", None, &mut backend, &mut fresh)
            .unwrap_err();
        assert!(err.is_client_error());
    }
}
