//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::key::SessionKey;
use crate::store::{MemorySessionStore, SessionStore};
use parking_lot::Mutex;
use syncml_engine::{Backend, SyncEngine, SyncMlError, SyncMlResult, SyncSession};
use tracing::{debug, info, warn};

/// Response to one client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResponse {
    /// Encoded SyncML message.
    pub body: Vec<u8>,
    /// MIME type matching the request's encoding.
    pub content_type: &'static str,
}

struct ServerState<B> {
    backend: B,
    store: Box<dyn SessionStore>,
}

/// The sync server.
///
/// Handles one message at a time: the backend and the session store sit
/// behind a single lock, so messages of one session never interleave.
///
/// # Example
///
/// ```
/// use syncml_engine::MemoryBackend;
/// use syncml_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default(), MemoryBackend::new());
/// assert_eq!(server.session_count().unwrap(), 0);
///
/// // An HTTP endpoint would pass each POST body to server.handle_request()
/// // and answer with the returned body and content type.
/// ```
pub struct SyncServer<B: Backend> {
    config: ServerConfig,
    engine: SyncEngine,
    state: Mutex<ServerState<B>>,
}

impl<B: Backend> SyncServer<B> {
    /// Creates a server keeping sessions in memory.
    pub fn new(config: ServerConfig, backend: B) -> Self {
        Self::with_store(config, backend, MemorySessionStore::new())
    }

    /// Creates a server with a session store.
    pub fn with_store(config: ServerConfig, backend: B, store: impl SessionStore + 'static) -> Self {
        let engine = SyncEngine::new(config.engine.clone());
        Self {
            config,
            engine,
            state: Mutex::new(ServerState {
                backend,
                store: Box::new(store),
            }),
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handles one client message.
    ///
    /// The stored session is loaded once the header identifies it, saved
    /// after the message, and removed when the session is over. A message
    /// that fails as a whole leaves the store as it was.
    pub fn handle_request(&self, body: &[u8], content_type: &str) -> ServerResult<SyncResponse> {
        let mut state = self.state.lock();
        let ServerState { backend, store } = &mut *state;
        let secret = self.config.session_secret.as_deref();
        debug!(bytes = body.len(), content_type, "request received");

        let mut loader = |device_id: &str, session_id: &str| -> SyncMlResult<Option<SyncSession>> {
            let key = SessionKey::derive(device_id, session_id, secret);
            store.load(&key).map_err(|e| SyncMlError::Session(e.to_string()))
        };
        let outcome = match self.engine.process(
            body,
            content_type,
            self.config.resp_uri.as_deref(),
            backend,
            &mut loader,
        ) {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = ServerError::from(e);
                warn!(error = %err, client_error = err.is_client_error(), "message rejected");
                return Err(err);
            }
        };

        let key = SessionKey::derive(outcome.device_id(), outcome.session_id(), secret);
        if outcome.session_closed {
            store.remove(&key)?;
            info!(device = outcome.device_id(), session = outcome.session_id(), "session closed");
        } else {
            store.save(&key, &outcome.session)?;
        }
        debug!(
            device = outcome.device_id(),
            message = outcome.session.message_id,
            bytes = outcome.body.len(),
            "response sent"
        );

        Ok(SyncResponse {
            body: outcome.body,
            content_type: outcome.content_type,
        })
    }

    /// Number of sessions awaiting further messages.
    pub fn session_count(&self) -> ServerResult<usize> {
        self.state.lock().store.len()
    }

    /// Runs `f` with exclusive access to the backend.
    pub fn with_backend<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        f(&mut self.state.lock().backend)
    }
}
