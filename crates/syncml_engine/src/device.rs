//! Client device quirks.
//!
//! Each known client family gets a [`Device`] variant. Detection runs once
//! per lookup from the session's source URI and device information; the
//! variant then answers capability questions and converts content between
//! the client's and the backend's representation.

use crate::backend::normalize_database;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{FixedOffset, NaiveDateTime, TimeZone, Utc};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use syncml_protocol::{format, DeviceInfo};
use tracing::debug;

/// Content on its way to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContent {
    /// Converted payload.
    pub content: String,
    /// Content type announced to the client.
    pub content_type: String,
    /// Transfer format such as `b64`, if any.
    pub format: Option<String>,
}

/// Facts a conversion may depend on.
#[derive(Debug, Clone, Copy)]
pub struct ConversionContext<'a> {
    /// The client's source URI (device id).
    pub source_uri: &'a str,
    /// Content type the client asked for, if known.
    pub requested_content_type: Option<&'a str>,
    /// Offset used to turn UTC times into device local time.
    pub local_offset: FixedOffset,
}

/// Known client families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Device {
    /// Standards-following client.
    #[default]
    Default,
    /// Funambol / Sync4j connectors (Outlook, Pocket PC, …).
    Sync4j,
    /// Sony Ericsson P800/P900 family.
    P800,
    /// Synthesis SyncML clients.
    Synthesis,
    /// Nokia phones.
    Nokia,
    /// Funambol Mozilla plugin.
    Sync4jMozilla,
}

impl Device {
    /// Selects the variant for a client.
    pub fn detect(source_uri: &str, info: Option<&DeviceInfo>) -> Self {
        let uri = source_uri.to_lowercase();
        let manufacturer = info.map(|i| i.manufacturer.to_lowercase()).unwrap_or_default();
        let model = info.map(|i| i.model.to_lowercase()).unwrap_or_default();

        if ["sync4j", "sc-pim", "fol-", "fwm-", "fbb-"]
            .iter()
            .any(|prefix| uri.contains(prefix))
        {
            Device::Sync4j
        } else if manufacturer.contains("sony ericsson") || model.contains("a1000") {
            Device::P800
        } else if manufacturer.contains("synthesis") {
            Device::Synthesis
        } else if manufacturer.contains("nokia") {
            Device::Nokia
        } else if uri.contains("fmz-") {
            Device::Sync4jMozilla
        } else {
            Device::Default
        }
    }

    /// Returns true if the device keeps tasks inside its calendar store.
    pub fn handles_tasks_in_calendar(self) -> bool {
        matches!(self, Device::P800 | Device::Nokia)
    }

    /// Returns true if successful item statuses are left out of Sync
    /// responses.
    pub fn omit_individual_sync_status(self) -> bool {
        matches!(self, Device::Sync4jMozilla)
    }

    /// Returns true if item data may be wrapped in CDATA sections.
    pub fn use_cdata_tag(self) -> bool {
        !matches!(self, Device::Sync4j | Device::Sync4jMozilla | Device::Nokia)
    }

    /// Returns true if the device cannot parse `Z`-suffixed times.
    pub fn use_local_time(self) -> bool {
        matches!(self, Device::P800)
    }

    /// Content type assumed for client items that declare none.
    pub fn preferred_content_type(self, server_uri: &str) -> String {
        let database = normalize_database(server_uri);
        let content_type = match database.as_str() {
            "contacts" => "text/x-vcard",
            "notes" => "text/x-vnote",
            "calendar" | "tasks" => "text/x-vcalendar",
            _ => "text/plain",
        };
        content_type.to_string()
    }

    /// Content type the server should send for a database.
    pub fn preferred_content_type_client(
        self,
        info: Option<&DeviceInfo>,
        server_uri: &str,
        client_uri: &str,
    ) -> String {
        if let Some(ct) = info
            .and_then(|i| i.data_store(client_uri))
            .and_then(|ds| ds.preferred_rx_content_type())
        {
            if matches!(self, Device::Sync4j | Device::Sync4jMozilla) && is_sif_note(ct) {
                return "text/plain".to_string();
            }
            return ct.to_string();
        }

        let database = normalize_database(server_uri);
        if self == Device::P800 && matches!(database.as_str(), "calendar" | "tasks") {
            return "text/x-vcalendar".to_string();
        }
        if database.contains("contact") || database.contains("card") {
            "text/x-vcard".to_string()
        } else if database.contains("note") || database.contains("memo") {
            "text/plain".to_string()
        } else if database.contains("task") || database.contains("cal") || database.contains("event") {
            "text/calendar".to_string()
        } else {
            "text/plain".to_string()
        }
    }

    /// Converts client content for the backend. Returns the content and
    /// its content type.
    pub fn convert_client_to_server(
        self,
        ctx: &ConversionContext<'_>,
        content: &str,
        content_type: &str,
    ) -> (String, String) {
        let mut content = strip_uid(content);
        let mut content_type = content_type.to_string();

        if matches!(self, Device::Sync4j | Device::Sync4jMozilla) {
            let calendar_like = matches!(content_type.as_str(), "text/calendar" | "text/x-vcalendar");
            if is_sif_note(&content_type) {
                content = sif_to_note(&content);
                content_type = "text/plain".to_string();
            } else if calendar_like && is_outlook_connector(ctx.source_uri) {
                content = strip_status(&content);
            }
        }

        debug!(device = ?self, content_type = %content_type, "converted client content");
        (content, content_type)
    }

    /// Converts backend content for the client.
    pub fn convert_server_to_client(
        self,
        ctx: &ConversionContext<'_>,
        content: &str,
        content_type: &str,
        database: &str,
    ) -> ClientContent {
        let mut converted = ClientContent {
            content: strip_uid(content),
            content_type: content_type.to_string(),
            format: None,
        };

        if self.use_local_time() {
            converted.content = utc_to_local(&converted.content, ctx.local_offset);
        }

        if matches!(self, Device::Sync4j | Device::Sync4jMozilla) {
            let calendar_like = matches!(content_type, "text/calendar" | "text/x-vcalendar");
            if calendar_like && is_outlook_connector(ctx.source_uri) {
                converted.content = strip_status(&converted.content);
            }

            let requested = ctx.requested_content_type.unwrap_or(content_type);
            let wants_sif_note = is_sif_note(requested);
            if requested != content_type
                && wants_sif_note
                && normalize_database(database) == "notes"
            {
                converted.content = STANDARD.encode(note_to_sif(&converted.content));
                converted.content_type = "text/x-s4j-sifn".to_string();
                converted.format = Some(format::B64.to_string());
            }
        }

        converted
    }
}

fn is_sif_note(content_type: &str) -> bool {
    matches!(content_type, "text/x-s4j-sifn" | "text/x-sifn")
}

fn is_outlook_connector(source_uri: &str) -> bool {
    source_uri.to_lowercase().contains("fol-")
}

fn uid_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^UID:[^\r\n]*(\r\n|\r|\n)").ok())
        .as_ref()
}

fn status_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?mi)^STATUS:[^\r\n]*\r?\n").ok())
        .as_ref()
}

fn utc_time() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(:|;|,)(\d{8}T\d{6})Z").ok())
        .as_ref()
}

/// Removes the first `UID:` line. Client and server ids live in separate
/// namespaces and travel in `<LocURI>` instead.
pub fn strip_uid(content: &str) -> String {
    match uid_line() {
        Some(re) => re.replacen(content, 1, "").into_owned(),
        None => content.to_string(),
    }
}

fn strip_status(content: &str) -> String {
    match status_line() {
        Some(re) => re.replace_all(content, "").into_owned(),
        None => content.to_string(),
    }
}

/// Rewrites `YYYYMMDDTHHMMSSZ` values as floating local times.
pub fn utc_to_local(content: &str, offset: FixedOffset) -> String {
    let Some(re) = utc_time() else {
        return content.to_string();
    };
    re.replace_all(content, |caps: &regex::Captures<'_>| {
        let original = &caps[0];
        match NaiveDateTime::parse_from_str(&caps[2], "%Y%m%dT%H%M%S") {
            Ok(naive) => {
                let local = Utc.from_utc_datetime(&naive).with_timezone(&offset);
                format!("{}{}", &caps[1], local.format("%Y%m%dT%H%M%S"))
            }
            Err(_) => original.to_string(),
        }
    })
    .into_owned()
}

/// Text of the first `tag` element of a SIF document, with references
/// resolved and CDATA taken verbatim. `None` if the element is missing or
/// the document is not well formed.
fn sif_value(sif: &str, tag: &str) -> Option<String> {
    let mut reader = Reader::from_str(sif);
    let mut value: Option<String> = None;
    let mut depth = 0usize;
    loop {
        match reader.read_event().ok()? {
            Event::Start(start) if value.is_none() && start.name().as_ref() == tag.as_bytes() => {
                value = Some(String::new());
                depth = 1;
            }
            Event::Empty(start) if value.is_none() && start.name().as_ref() == tag.as_bytes() => {
                return Some(String::new());
            }
            Event::Start(_) if depth > 0 => depth += 1,
            Event::End(_) if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return value;
                }
            }
            Event::Text(text) if depth > 0 => {
                let text = text.unescape().ok()?;
                value.as_mut()?.push_str(&text);
            }
            Event::CData(data) if depth > 0 => {
                let data = std::str::from_utf8(&data).ok()?;
                value.as_mut()?.push_str(data);
            }
            Event::Eof => return None,
            _ => {}
        }
    }
}

fn sif_to_note(sif: &str) -> String {
    sif_value(sif, "Body").unwrap_or_default()
}

fn note_to_sif(note: &str) -> String {
    let first_line = note.lines().next().unwrap_or("");
    format!(
        "<note><Body>{}</Body><Subject>{}</Subject></note>",
        escape(note),
        escape(first_line)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncml_protocol::{ContentTypeVersion, DataStore};

    fn ctx(source_uri: &str) -> ConversionContext<'_> {
        ConversionContext {
            source_uri,
            requested_content_type: None,
            local_offset: FixedOffset::east_opt(3600).unwrap(),
        }
    }

    fn info(manufacturer: &str, model: &str) -> DeviceInfo {
        DeviceInfo {
            manufacturer: manufacturer.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    #[test]
    fn detection_order() {
        assert_eq!(Device::detect("fol-abc123", None), Device::Sync4j);
        assert_eq!(Device::detect("sc-pim-xyz", Some(&info("Nokia", ""))), Device::Sync4j);
        assert_eq!(
            Device::detect("IMEI:1", Some(&info("Sony Ericsson", "P800"))),
            Device::P800
        );
        assert_eq!(Device::detect("x", Some(&info("Motorola", "A1000"))), Device::P800);
        assert_eq!(
            Device::detect("x", Some(&info("Synthesis AG", "PocketPC"))),
            Device::Synthesis
        );
        assert_eq!(Device::detect("IMEI:2", Some(&info("NOKIA", "6630"))), Device::Nokia);
        assert_eq!(Device::detect("fmz-thunderbird", None), Device::Sync4jMozilla);
        assert_eq!(Device::detect("anything", None), Device::Default);
    }

    #[test]
    fn capability_flags() {
        assert!(Device::Nokia.handles_tasks_in_calendar());
        assert!(Device::P800.handles_tasks_in_calendar());
        assert!(!Device::Default.handles_tasks_in_calendar());
        assert!(!Device::Sync4j.use_cdata_tag());
        assert!(Device::Default.use_cdata_tag());
        assert!(Device::P800.use_local_time());
    }

    #[test]
    fn content_type_from_devinf_first() {
        let mut di = DeviceInfo::default();
        di.data_stores.push(DataStore {
            source_ref: "./Contacts".into(),
            rx_pref: Some(ContentTypeVersion {
                content_type: "text/vcard".into(),
                version: "3.0".into(),
            }),
            ..Default::default()
        });
        let dev = Device::Default;
        assert_eq!(
            dev.preferred_content_type_client(Some(&di), "contacts", "./Contacts"),
            "text/vcard"
        );
        assert_eq!(
            dev.preferred_content_type_client(None, "contacts", "./Contacts"),
            "text/x-vcard"
        );
        assert_eq!(dev.preferred_content_type_client(None, "memo", "m"), "text/plain");
        assert_eq!(dev.preferred_content_type_client(None, "scal", "c"), "text/calendar");
        assert_eq!(
            Device::P800.preferred_content_type_client(None, "tasks", "t"),
            "text/x-vcalendar"
        );

        let mut sif = DeviceInfo::default();
        sif.data_stores.push(DataStore {
            source_ref: "snote".into(),
            rx_pref: Some(ContentTypeVersion {
                content_type: "text/x-s4j-sifn".into(),
                version: "1.0".into(),
            }),
            ..Default::default()
        });
        assert_eq!(
            Device::Sync4j.preferred_content_type_client(Some(&sif), "notes", "snote"),
            "text/plain"
        );
        assert_eq!(
            Device::Default.preferred_content_type_client(Some(&sif), "notes", "snote"),
            "text/x-s4j-sifn"
        );
        assert_eq!(
            Device::P800.preferred_content_type_client(None, "calendar", "c"),
            "text/x-vcalendar"
        );
    }

    #[test]
    fn uid_is_stripped_once() {
        let vcard = "BEGIN:VCARD\r\nUID:abc\r\nFN:A\r\nUID:second\r\nEND:VCARD\r\n";
        let (out, ct) = Device::Default.convert_client_to_server(&ctx("x"), vcard, "text/x-vcard");
        assert_eq!(out, "BEGIN:VCARD\r\nFN:A\r\nUID:second\r\nEND:VCARD\r\n");
        assert_eq!(ct, "text/x-vcard");
    }

    #[test]
    fn local_time_rewrite() {
        let event = "BEGIN:VEVENT\nDTSTART:20240102T230000Z\nSUMMARY:x\nEND:VEVENT\n";
        let out = Device::P800.convert_server_to_client(&ctx("x"), event, "text/calendar", "calendar");
        assert!(out.content.contains("DTSTART:20240103T000000\n"));

        let untouched = Device::Default.convert_server_to_client(&ctx("x"), event, "text/calendar", "calendar");
        assert!(untouched.content.contains("DTSTART:20240102T230000Z"));
    }

    #[test]
    fn outlook_status_is_dropped() {
        let event = "BEGIN:VEVENT\r\nSTATUS:2\r\nSUMMARY:x\r\nEND:VEVENT\r\n";
        let (out, _) = Device::Sync4j.convert_client_to_server(&ctx("fol-1234"), event, "text/calendar");
        assert!(!out.contains("STATUS"));
        let (kept, _) = Device::Sync4j.convert_client_to_server(&ctx("sc-pim-1"), event, "text/calendar");
        assert!(kept.contains("STATUS:2"));
    }

    #[test]
    fn sif_notes() {
        let (note, ct) = Device::Sync4j.convert_client_to_server(
            &ctx("sc-pim-1"),
            "<note><Body>buy milk &amp; eggs</Body></note>",
            "text/x-s4j-sifn",
        );
        assert_eq!(note, "buy milk & eggs");
        assert_eq!(ct, "text/plain");

        let mut context = ctx("sc-pim-1");
        context.requested_content_type = Some("text/x-s4j-sifn");
        let out = Device::Sync4j.convert_server_to_client(&context, "a<b", "text/plain", "notes");
        assert_eq!(out.content_type, "text/x-s4j-sifn");
        assert_eq!(out.format.as_deref(), Some("b64"));
        let decoded = String::from_utf8(STANDARD.decode(out.content).unwrap()).unwrap();
        assert_eq!(decoded, "<note><Body>a&lt;b</Body><Subject>a&lt;b</Subject></note>");
    }

    #[test]
    fn sif_body_resolves_character_references() {
        assert_eq!(
            sif_to_note("<note><Body>line1&#13;\nline2 &#60;x&#62;</Body></note>"),
            "line1\r\nline2 <x>"
        );
        assert_eq!(
            sif_to_note("<note><Subject>s</Subject><Body><![CDATA[a <b> & c]]></Body></note>"),
            "a <b> & c"
        );
        assert_eq!(sif_to_note("<note><Body/></note>"), "");
        assert_eq!(sif_to_note("<note><Subject>no body</Subject></note>"), "");
        assert_eq!(sif_to_note("<note><Body>cut off"), "");
    }

    #[test]
    fn sif_note_survives_markup_in_text() {
        let note = "1 < 2 & \"quoted\" 'x'\r\nsecond line";
        let sif = note_to_sif(note);
        assert!(sif.contains("<Subject>1 &lt; 2 &amp; &quot;quoted&quot; &apos;x&apos;</Subject>"));
        assert_eq!(sif_to_note(&sif), note);
    }
}
