//! # SyncML Engine
//!
//! Server side of the SyncML data synchronization protocol.
//!
//! This crate provides:
//! - The [`Backend`] storage contract and an in-memory [`MemoryBackend`]
//! - Per-session state ([`SyncSession`]) that survives between messages
//! - The per-database state machine ([`DatabaseSync`]): Init → Sync → Map
//!   → Completed
//! - Device quirk handling for known client families ([`Device`])
//! - Command processing and response construction
//! - [`SyncEngine`], which turns one client message into one response
//!
//! ## Message flow
//!
//! 1. The header is parsed, the session loaded and the client authenticated
//! 2. Each body command is dispatched once its element closes
//! 3. At the end of the body, pending server changes are written as far
//!    as the message budget allows and `<Final>` is sent or deferred
//! 4. When the client finished its package and nothing is outstanding,
//!    every sync stores its anchors and the session closes
//!
//! ## Key Invariants
//!
//! - Server changes go out as deletes, then adds, then replaces
//! - A sync's state never moves backwards
//! - Changes caused by the client in this session are never echoed back
//! - A response never exceeds the client's maximum message size: every
//!   server command is measured before it is written, with the closing of
//!   the message reserved; a change too large for any message is skipped

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod backend;
mod command;
mod config;
mod context;
mod device;
mod error;
mod handler;
mod item;
mod memory;
mod output;
mod session;
mod sync;

#[cfg(test)]
mod test_support;

pub use auth::{check_credentials, decode_basic, Credentials, Md5Credentials};
pub use backend::{
    get_parameter, normalize_database, Backend, ServerChange, ServerChanges, SyncAnchors, Timestamp,
    KNOWN_DATABASES,
};
pub use config::{EngineConfig, MessageLimits};
pub use context::{MessageFlags, RequestContext};
pub use device::{strip_uid, utc_to_local, ClientContent, ConversionContext, Device};
pub use error::{BackendError, BackendResult, SyncMlError, SyncMlResult};
pub use handler::{MessageOutcome, SessionLoader, SyncEngine};
pub use item::{ItemKind, PendingItem, SyncItem};
pub use memory::{
    AnchorRecord, Clock, ManualClock, MapEntry, MemoryBackend, StoredEntry, SystemClock,
};
pub use output::{ResponseWriter, StatusReport, SyncCommandOutput};
pub use session::{ChangeLedger, SentChange, SyncSession};
pub use sync::{
    DatabaseSync, PendingChange, PendingChanges, SyncCounters, SyncState, TASKS_DATABASE,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
