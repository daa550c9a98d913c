//! XML implementation of the element codecs.

use crate::element::{ElementDecoder, ElementHandler, ElementWriter};
use crate::error::{ProtocolError, ProtocolResult};
use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use regex::bytes::Regex;
use std::sync::OnceLock;

/// Returns the charset named in the XML declaration, or `UTF-8`.
pub fn detect_charset(input: &[u8]) -> String {
    static DECLARATION: OnceLock<Option<Regex>> = OnceLock::new();
    let re = DECLARATION.get_or_init(|| {
        Regex::new(r#"^\s*<\?xml[^>]*encoding\s*=\s*["']([A-Za-z0-9._-]+)["']"#).ok()
    });
    let head = &input[..input.len().min(256)];
    re.as_ref()
        .and_then(|re| re.captures(head))
        .and_then(|caps| caps.get(1))
        .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
        .map(str::to_string)
        .unwrap_or_else(|| "UTF-8".to_string())
}

fn is_latin1(charset: &str) -> bool {
    matches!(
        charset.to_ascii_lowercase().as_str(),
        "iso-8859-1" | "latin1" | "latin-1" | "iso8859-1"
    )
}

/// Namespace bindings introduced by one open element.
struct Scope {
    name: String,
    namespace: String,
    default_ns: String,
    prefixes: Vec<(String, String)>,
}

/// Streaming XML decoder.
#[derive(Debug, Default)]
pub struct XmlDecoder {
    charset: Option<String>,
}

impl XmlDecoder {
    /// Creates a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Charset found in the declaration of the last decoded document.
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    fn open(scopes: &[Scope], start: &BytesStart<'_>) -> ProtocolResult<Scope> {
        let qname = start.name();
        let qualified = utf8(qname.as_ref())?;
        let mut default_ns = scopes
            .last()
            .map(|s| s.default_ns.clone())
            .unwrap_or_default();
        let mut prefixes = Vec::new();

        for attr in start.attributes() {
            let attr = attr.map_err(|err| ProtocolError::Xml(err.to_string()))?;
            let key = utf8(attr.key.as_ref())?;
            if key == "xmlns" {
                default_ns = attr.unescape_value()?.into_owned();
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                prefixes.push((prefix.to_string(), attr.unescape_value()?.into_owned()));
            }
        }

        let (namespace, name) = match qualified.split_once(':') {
            Some((prefix, local)) => {
                let bound = prefixes
                    .iter()
                    .rev()
                    .chain(scopes.iter().rev().flat_map(|s| s.prefixes.iter().rev()))
                    .find(|(p, _)| p == prefix)
                    .map(|(_, uri)| uri.clone())
                    .unwrap_or_default();
                (bound, local.to_string())
            }
            None => (default_ns.clone(), qualified.to_string()),
        };

        Ok(Scope {
            name,
            namespace,
            default_ns,
            prefixes,
        })
    }
}

fn utf8(bytes: &[u8]) -> ProtocolResult<&str> {
    std::str::from_utf8(bytes).map_err(|err| ProtocolError::Xml(err.to_string()))
}

impl ElementDecoder for XmlDecoder {
    fn decode(&mut self, input: &[u8], handler: &mut dyn ElementHandler) -> ProtocolResult<()> {
        let charset = detect_charset(input);
        let transcoded: String;
        let input = if is_latin1(&charset) && std::str::from_utf8(input).is_err() {
            transcoded = input.iter().map(|&b| char::from(b)).collect();
            transcoded.as_bytes()
        } else {
            input
        };
        self.charset = Some(charset);

        let mut reader = Reader::from_reader(input);
        let mut buf = Vec::new();
        let mut scopes: Vec<Scope> = Vec::new();
        let mut seen_root = false;

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(start) => {
                    let scope = Self::open(&scopes, &start)?;
                    handler.start_element(&scope.namespace, &scope.name)?;
                    scopes.push(scope);
                    seen_root = true;
                }
                Event::Empty(start) => {
                    let scope = Self::open(&scopes, &start)?;
                    handler.start_element(&scope.namespace, &scope.name)?;
                    handler.end_element(&scope.namespace, &scope.name)?;
                    seen_root = true;
                }
                Event::End(_) => {
                    let scope = scopes
                        .pop()
                        .ok_or_else(|| ProtocolError::malformed("unbalanced end tag"))?;
                    handler.end_element(&scope.namespace, &scope.name)?;
                }
                Event::Text(text) => {
                    if !scopes.is_empty() {
                        let text = text.unescape()?;
                        handler.characters(&text)?;
                    }
                }
                Event::CData(data) => {
                    if !scopes.is_empty() {
                        let raw = data.into_inner();
                        handler.characters(utf8(&raw)?)?;
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !seen_root {
            return Err(ProtocolError::malformed("document has no root element"));
        }
        if let Some(open) = scopes.last() {
            return Err(ProtocolError::malformed(format!(
                "document ended inside <{}>",
                open.name
            )));
        }
        Ok(())
    }
}

/// XML writer with per-element namespace declarations.
pub struct XmlEncoder {
    writer: Writer<Vec<u8>>,
    namespaces: Vec<String>,
}

impl XmlEncoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
            namespaces: Vec::new(),
        }
    }

    fn write(&mut self, event: Event<'_>) -> ProtocolResult<()> {
        self.writer
            .write_event(event)
            .map_err(|err| ProtocolError::Xml(err.to_string()))
    }
}

impl Default for XmlEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementWriter for XmlEncoder {
    fn start_element(&mut self, namespace: &str, name: &str) -> ProtocolResult<()> {
        let mut start = BytesStart::new(name);
        let inherited = self.namespaces.last().map(String::as_str).unwrap_or("");
        if !namespace.is_empty() && namespace != inherited {
            start.push_attribute(("xmlns", namespace));
        }
        let effective = if namespace.is_empty() {
            inherited.to_string()
        } else {
            namespace.to_string()
        };
        self.namespaces.push(effective);
        self.write(Event::Start(start))
    }

    fn characters(&mut self, text: &str) -> ProtocolResult<()> {
        self.write(Event::Text(BytesText::new(text)))
    }

    fn cdata(&mut self, text: &str) -> ProtocolResult<()> {
        if text.contains("]]>") {
            return self.characters(text);
        }
        self.write(Event::CData(BytesCData::new(text)))
    }

    fn end_element(&mut self, _namespace: &str, name: &str) -> ProtocolResult<()> {
        self.namespaces.pop();
        self.write(Event::End(BytesEnd::new(name)))
    }

    fn opaque(&mut self, data: &[u8]) -> ProtocolResult<()> {
        let body = match data.windows(2).position(|w| w == b"?>") {
            Some(pos) if data.starts_with(b"<?xml") => &data[pos + 2..],
            _ => data,
        };
        self.writer.get_mut().extend_from_slice(body);
        Ok(())
    }

    fn output_size(&self) -> usize {
        self.writer.get_ref().len()
    }

    fn output(&self) -> Vec<u8> {
        self.writer.get_ref().clone()
    }

    fn is_binary(&self) -> bool {
        false
    }

    fn create_sub_handler(&self) -> Box<dyn ElementWriter> {
        Box::new(XmlEncoder::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl ElementHandler for Recorder {
        fn start_element(&mut self, namespace: &str, name: &str) -> ProtocolResult<()> {
            self.events.push(format!("start {namespace} {name}"));
            Ok(())
        }

        fn characters(&mut self, text: &str) -> ProtocolResult<()> {
            if !text.trim().is_empty() {
                self.events.push(format!("text {text}"));
            }
            Ok(())
        }

        fn end_element(&mut self, _namespace: &str, name: &str) -> ProtocolResult<()> {
            self.events.push(format!("end {name}"));
            Ok(())
        }
    }

    #[test]
    fn decodes_namespaces_and_cdata() {
        let doc = br#"<?xml version="1.0" encoding="UTF-8"?>
<SyncML xmlns="SYNCML:SYNCML1.1"><Meta><Type xmlns="syncml:metinf">text/x-vcard</Type></Meta><Data><![CDATA[a<b]]></Data><Final/></SyncML>"#;
        let mut recorder = Recorder::default();
        let mut decoder = XmlDecoder::new();
        decoder.decode(doc, &mut recorder).unwrap();

        assert_eq!(decoder.charset(), Some("UTF-8"));
        assert_eq!(
            recorder.events,
            vec![
                "start SYNCML:SYNCML1.1 SyncML",
                "start SYNCML:SYNCML1.1 Meta",
                "start syncml:metinf Type",
                "text text/x-vcard",
                "end Type",
                "end Meta",
                "start SYNCML:SYNCML1.1 Data",
                "text a<b",
                "end Data",
                "start SYNCML:SYNCML1.1 Final",
                "end Final",
                "end SyncML",
            ]
        );
    }

    #[test]
    fn prefixed_names_resolve() {
        let doc = br#"<SyncML xmlns:m="syncml:metinf"><m:Type>x</m:Type></SyncML>"#;
        let mut recorder = Recorder::default();
        XmlDecoder::new().decode(doc, &mut recorder).unwrap();
        assert_eq!(recorder.events[1], "start syncml:metinf Type");
    }

    #[test]
    fn rejects_truncated_documents() {
        let mut recorder = Recorder::default();
        let err = XmlDecoder::new()
            .decode(b"<SyncML><SyncHdr>", &mut recorder)
            .unwrap_err();
        assert!(err.is_parse_error());

        let err = XmlDecoder::new()
            .decode(b"<SyncML><A></B></SyncML>", &mut recorder)
            .unwrap_err();
        assert!(err.is_parse_error());

        let err = XmlDecoder::new().decode(b"   ", &mut recorder).unwrap_err();
        assert!(err.is_parse_error());
    }

    #[test]
    fn latin1_input_is_transcoded() {
        let mut doc = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><A>".to_vec();
        doc.push(0xE9);
        doc.extend_from_slice(b"</A>");
        let mut recorder = Recorder::default();
        XmlDecoder::new().decode(&doc, &mut recorder).unwrap();
        assert_eq!(recorder.events[1], "text \u{e9}");
    }

    #[test]
    fn encoder_declares_namespace_changes_only() {
        let mut enc = XmlEncoder::new();
        enc.start_element("syncml:SYNCML1.1", "SyncML").unwrap();
        enc.start_element("syncml:SYNCML1.1", "Meta").unwrap();
        enc.start_element("syncml:metinf", "MaxMsgSize").unwrap();
        enc.characters("1000").unwrap();
        enc.end_element("syncml:metinf", "MaxMsgSize").unwrap();
        enc.end_element("syncml:SYNCML1.1", "Meta").unwrap();
        enc.start_element("syncml:SYNCML1.1", "Data").unwrap();
        enc.characters("a&b").unwrap();
        enc.end_element("syncml:SYNCML1.1", "Data").unwrap();
        enc.end_element("syncml:SYNCML1.1", "SyncML").unwrap();

        let out = String::from_utf8(enc.output()).unwrap();
        assert_eq!(
            out,
            "<SyncML xmlns=\"syncml:SYNCML1.1\"><Meta><MaxMsgSize xmlns=\"syncml:metinf\">1000</MaxMsgSize></Meta><Data>a&amp;b</Data></SyncML>"
        );
        assert_eq!(enc.output_size(), out.len());
    }

    #[test]
    fn cdata_and_opaque() {
        let mut sub = XmlEncoder::new().create_sub_handler();
        sub.start_element("syncml:devinf", "DevInf").unwrap();
        sub.end_element("syncml:devinf", "DevInf").unwrap();

        let mut enc = XmlEncoder::new();
        enc.start_element("", "Data").unwrap();
        enc.cdata("BEGIN:VCARD<").unwrap();
        enc.cdata("x]]>y").unwrap();
        enc.opaque(&sub.output()).unwrap();
        enc.end_element("", "Data").unwrap();

        let out = String::from_utf8(enc.output()).unwrap();
        assert_eq!(
            out,
            "<Data><![CDATA[BEGIN:VCARD<]]>x]]&gt;y<DevInf xmlns=\"syncml:devinf\"></DevInf></Data>"
        );
    }
}
