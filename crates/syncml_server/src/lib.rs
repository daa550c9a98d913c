//! # SyncML Server
//!
//! Hosting layer around the SyncML engine.
//!
//! This crate provides:
//! - Request serialization (one message at a time per server)
//! - Session persistence between the messages of a session
//! - Session keys derived from device and session ids (SHA-256 or HMAC-SHA256)
//! - A memory store and a CBOR file store
//!
//! # Request Flow
//!
//! For every request the server:
//! 1. Decodes the message; the engine asks for the stored session as soon
//!    as the `<SyncHdr>` names device and session
//! 2. Runs the commands against the backend
//! 3. Saves the session, or removes it once the engine reports it closed
//!
//! A request that cannot be decoded returns an error and leaves the store
//! untouched.
//!
//! ```rust,ignore
//! use syncml_engine::MemoryBackend;
//! use syncml_server::{ServerConfig, SyncServer};
//!
//! let config = ServerConfig::default().with_resp_uri("http://sync.example.com/rpc");
//! let server = SyncServer::new(config, MemoryBackend::new());
//! let response = server.handle_request(&body, "application/vnd.syncml+xml")?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod key;
mod server;
mod store;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use key::SessionKey;
pub use server::{SyncResponse, SyncServer};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
