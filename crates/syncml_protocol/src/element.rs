//! Element-stream traits shared by the XML and WBXML codecs.
//!
//! Decoding is push based: a decoder walks the request and reports
//! `start_element` / `characters` / `end_element` events to an
//! [`ElementHandler`]. Encoding is the mirror image: response builders drive
//! an [`ElementWriter`], which serializes either to XML or to WBXML.

use crate::constants::mime;
use crate::error::ProtocolResult;

/// Receives decoded element events.
pub trait ElementHandler {
    /// Called when an element opens.
    fn start_element(&mut self, namespace: &str, name: &str) -> ProtocolResult<()>;

    /// Called with character data. May be called several times per element.
    fn characters(&mut self, text: &str) -> ProtocolResult<()>;

    /// Called when an element closes.
    fn end_element(&mut self, namespace: &str, name: &str) -> ProtocolResult<()>;
}

/// Turns request bytes into element events.
pub trait ElementDecoder {
    /// Decodes `input`, reporting every element to `handler`.
    fn decode(&mut self, input: &[u8], handler: &mut dyn ElementHandler) -> ProtocolResult<()>;
}

/// Serializes element events into an output buffer.
pub trait ElementWriter {
    /// Opens an element.
    fn start_element(&mut self, namespace: &str, name: &str) -> ProtocolResult<()>;

    /// Writes escaped character data.
    fn characters(&mut self, text: &str) -> ProtocolResult<()>;

    /// Writes character data that should be protected from markup
    /// interpretation. Encoders without a CDATA notion fall back to
    /// [`ElementWriter::characters`].
    fn cdata(&mut self, text: &str) -> ProtocolResult<()> {
        self.characters(text)
    }

    /// Closes an element.
    fn end_element(&mut self, namespace: &str, name: &str) -> ProtocolResult<()>;

    /// Embeds the complete output of a sub-handler.
    fn opaque(&mut self, data: &[u8]) -> ProtocolResult<()>;

    /// Number of bytes produced so far.
    fn output_size(&self) -> usize;

    /// Returns a copy of the bytes produced so far.
    fn output(&self) -> Vec<u8>;

    /// Returns true if the writer produces WBXML.
    fn is_binary(&self) -> bool;

    /// Creates an empty writer of the same kind, used for embedded
    /// documents such as device information.
    fn create_sub_handler(&self) -> Box<dyn ElementWriter>;
}

/// A WBXML implementation supplied by the embedding application.
pub trait WbxmlCodec: Send + Sync {
    /// Decodes a WBXML request.
    fn decode(&self, input: &[u8], handler: &mut dyn ElementHandler) -> ProtocolResult<()>;

    /// Creates a writer producing WBXML.
    fn encoder(&self) -> Box<dyn ElementWriter>;
}

/// Wire encoding of a SyncML message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Textual XML.
    Xml,
    /// Binary WBXML.
    Wbxml,
}

impl Encoding {
    /// Picks the encoding from a request's content type. Anything other
    /// than the WBXML SyncML type is treated as XML.
    pub fn from_content_type(content_type: &str) -> Self {
        let base = content_type.split(';').next().unwrap_or("").trim();
        if base.eq_ignore_ascii_case(mime::SYNCML_WBXML) {
            Encoding::Wbxml
        } else {
            Encoding::Xml
        }
    }

    /// Returns the response content type.
    pub fn content_type(self) -> &'static str {
        match self {
            Encoding::Xml => mime::SYNCML_XML,
            Encoding::Wbxml => mime::SYNCML_WBXML,
        }
    }

    /// Returns the content type used for embedded device information.
    pub fn devinf_content_type(self) -> &'static str {
        match self {
            Encoding::Xml => mime::DEVINF_XML,
            Encoding::Wbxml => mime::DEVINF_WBXML,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_from_content_type() {
        assert_eq!(
            Encoding::from_content_type("application/vnd.syncml+wbxml"),
            Encoding::Wbxml
        );
        assert_eq!(
            Encoding::from_content_type("application/vnd.syncml+xml; charset=UTF-8"),
            Encoding::Xml
        );
        assert_eq!(Encoding::from_content_type(""), Encoding::Xml);
        assert_eq!(Encoding::Wbxml.devinf_content_type(), mime::DEVINF_WBXML);
    }
}
