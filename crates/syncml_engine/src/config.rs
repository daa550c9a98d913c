//! Configuration for the engine.

use chrono::{FixedOffset, Offset, Utc};
use syncml_protocol::{MSG_DEFAULT_LEN, MSG_TRAILER_LEN, SERVER_MAX_MSG_SIZE, SERVER_MAX_OBJ_SIZE};

/// Size accounting used when filling a message with server changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageLimits {
    /// Bytes kept free behind the server changes of a message. The
    /// closing tags are always reserved, whichever is larger.
    pub trailer_len: usize,
    /// Estimated wrapper size of one command around its payload.
    pub default_len: usize,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            trailer_len: MSG_TRAILER_LEN,
            default_len: MSG_DEFAULT_LEN,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum message size used when the client announces none; also
    /// advertised as the server's own limit.
    pub max_message_size: usize,
    /// Maximum object size advertised for SyncML 1.2.
    pub max_object_size: usize,
    /// Budget accounting.
    pub limits: MessageLimits,
    /// Device id of the server in its DevInf.
    pub server_device_id: String,
    /// Manufacturer in the server's DevInf.
    pub manufacturer: String,
    /// Offset applied for devices that need local times.
    pub local_offset: FixedOffset,
}

impl EngineConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_message_size: SERVER_MAX_MSG_SIZE,
            max_object_size: SERVER_MAX_OBJ_SIZE,
            limits: MessageLimits::default(),
            server_device_id: "localhost".to_string(),
            manufacturer: "syncml-rs".to_string(),
            local_offset: Utc.fix(),
        }
    }

    /// Sets the default maximum message size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets the maximum object size.
    pub fn with_max_object_size(mut self, size: usize) -> Self {
        self.max_object_size = size;
        self
    }

    /// Sets the budget accounting.
    pub fn with_limits(mut self, limits: MessageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the server device id.
    pub fn with_server_device_id(mut self, id: impl Into<String>) -> Self {
        self.server_device_id = id.into();
        self
    }

    /// Sets the local offset in seconds east of UTC. Out of range values
    /// fall back to UTC.
    pub fn with_local_offset_seconds(mut self, seconds: i32) -> Self {
        self.local_offset = FixedOffset::east_opt(seconds).unwrap_or_else(|| Utc.fix());
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
