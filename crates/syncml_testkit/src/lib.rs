//! # SyncML Testkit
//!
//! Test utilities for the SyncML engine.
//!
//! This crate provides:
//! - A client message builder that plays the device side of a session
//! - A response parser with query helpers for statuses, alerts and
//!   server changes
//! - vCard, iCalendar and device-information fixtures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use syncml_testkit::prelude::*;
//!
//! let request = ClientMessage::new("1", 1)
//!     .basic_auth("alice", "secret")
//!     .alert(201, "contacts", None, "1")
//!     .build();
//! let response = Response::parse(&engine_output)?;
//! assert_eq!(response.status_for("Alert").unwrap().code.as_u16(), 508);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod message;
pub mod response;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::message::*;
    pub use crate::response::*;
}

pub use fixtures::*;
pub use generators::*;
pub use message::*;
pub use response::*;
