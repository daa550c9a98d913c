//! # SyncML Protocol
//!
//! Protocol vocabulary and element codecs for the SyncML engine.
//!
//! This crate provides:
//! - Status, alert and sync-type codes
//! - Protocol versions with their namespaces and device-info URIs
//! - The `DeviceInfo` model and a streaming `<DevInf>` parser
//! - Element-stream traits shared by the XML and WBXML codecs
//! - The XML decoder and encoder built on `quick-xml`
//!
//! This is a pure protocol crate with no I/O operations. WBXML support is
//! pluggable through [`WbxmlCodec`]; no WBXML implementation ships here.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod alert;
mod constants;
mod devinf;
mod element;
mod error;
mod status;
mod version;
mod xml;

pub use alert::{AlertCode, SyncType};
pub use constants::{
    auth, format, mime, MSG_DEFAULT_LEN, MSG_TRAILER_LEN, SERVER_MAX_MSG_SIZE,
    SERVER_MAX_OBJ_SIZE,
};
pub use devinf::{ContentTypeVersion, CtProperty, DataStore, DevInfParser, DeviceInfo};
pub use element::{ElementDecoder, ElementHandler, ElementWriter, Encoding, WbxmlCodec};
pub use error::{ProtocolError, ProtocolResult};
pub use status::StatusCode;
pub use version::ProtocolVersion;
pub use xml::{detect_charset, XmlDecoder, XmlEncoder};
