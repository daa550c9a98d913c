//! Everything a command needs while one message is processed.

use crate::backend::Backend;
use crate::config::EngineConfig;
use crate::device::{ConversionContext, Device};
use crate::output::ResponseWriter;
use crate::session::SyncSession;
use crate::sync::DatabaseSync;
use syncml_protocol::ProtocolResult;

/// Per-message flags that decide how the response ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags {
    /// The server needs another message from the client.
    pub expect_response: bool,
    /// No more server changes fit into this message.
    pub message_full: bool,
}

/// Mutable state threaded through command handling.
pub struct RequestContext<'a> {
    /// Session of the message.
    pub session: &'a mut SyncSession,
    /// Storage collaborator.
    pub backend: &'a mut dyn Backend,
    /// Engine configuration.
    pub config: &'a EngineConfig,
    /// Flags for the response.
    pub flags: &'a mut MessageFlags,
    /// Response under construction.
    pub out: &'a mut ResponseWriter,
}

impl<'a> RequestContext<'a> {
    /// Runs `f` with the sync of `server_uri` detached from the session so
    /// both can be borrowed mutably. Returns `None` if there is no such sync.
    pub fn with_sync<R>(
        &mut self,
        server_uri: &str,
        f: impl FnOnce(&mut DatabaseSync, &mut Self) -> R,
    ) -> Option<R> {
        let (key, mut sync) = self.session.syncs.remove_entry(server_uri)?;
        let result = f(&mut sync, self);
        self.session.syncs.insert(key, sync);
        Some(result)
    }

    /// Quirk variant of the client.
    pub fn device(&self) -> Device {
        self.session.device()
    }

    /// Maximum size of the response.
    pub fn message_budget(&self) -> usize {
        self.session.message_budget(self.config.max_message_size)
    }

    /// Returns true if `size` more bytes fit into the response with room
    /// left to close the message.
    pub fn has_room_for(&self, size: usize) -> ProtocolResult<bool> {
        let reserve = self.config.limits.trailer_len.max(self.out.closing_len()?);
        Ok(self.out.output_size() + size + reserve <= self.message_budget())
    }

    /// Conversion facts for content exchanged with the client.
    pub fn conversion<'c>(&'c self, requested_content_type: Option<&'c str>) -> ConversionContext<'c> {
        ConversionContext {
            source_uri: &self.session.source_uri,
            requested_content_type,
            local_offset: self.config.local_offset,
        }
    }
}
