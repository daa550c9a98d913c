//! Content and device-information fixtures.
//!
//! Line endings follow the formats: vCard and iCalendar use CRLF.

/// A vCard 2.1 contact without a UID.
pub fn vcard(name: &str) -> String {
    format!("BEGIN:VCARD\r\nVERSION:2.1\r\nN:{name};\r\nFN:{name}\r\nTEL;CELL:+4912345\r\nEND:VCARD\r\n")
}

/// A vCard 3.0 contact carrying a UID line.
pub fn vcard_with_uid(name: &str, uid: &str) -> String {
    format!("BEGIN:VCARD\r\nVERSION:3.0\r\nUID:{uid}\r\nFN:{name}\r\nEND:VCARD\r\n")
}

/// An iCalendar event with a UTC start time.
pub fn vevent(summary: &str, start_utc: &str) -> String {
    format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nSUMMARY:{summary}\r\nDTSTART:{start_utc}\r\nDTEND:{start_utc}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n"
    )
}

/// An iCalendar task.
pub fn vtodo(summary: &str) -> String {
    format!("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VTODO\r\nSUMMARY:{summary}\r\nEND:VTODO\r\nEND:VCALENDAR\r\n")
}

/// A vCalendar 1.0 task as sent by phones that keep tasks in the calendar.
pub fn vcalendar_todo(summary: &str) -> String {
    format!("BEGIN:VCALENDAR\r\nVERSION:1.0\r\nBEGIN:VTODO\r\nSUMMARY:{summary}\r\nSTATUS:NEEDS ACTION\r\nEND:VTODO\r\nEND:VCALENDAR\r\n")
}

/// A Sync4j SIF note.
pub fn sif_note(subject: &str, body: &str) -> String {
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?><note><Subject>{subject}</Subject><Body>{body}</Body></note>")
}

/// A `<DevInf>` document for a phone with one contacts store.
pub fn devinf(manufacturer: &str, model: &str) -> String {
    devinf_with_stores(manufacturer, model, &[("./contacts", "text/x-vcard", "2.1")])
}

/// A `<DevInf>` document with `(source_ref, rx_pref type, version)` stores.
pub fn devinf_with_stores(manufacturer: &str, model: &str, stores: &[(&str, &str, &str)]) -> String {
    let mut xml = format!(
        "<DevInf xmlns=\"syncml:devinf\"><VerDTD>1.1</VerDTD><Man>{manufacturer}</Man><Mod>{model}</Mod><DevID>IMEI:493005100592800</DevID><DevTyp>phone</DevTyp>"
    );
    for (source_ref, content_type, version) in stores {
        xml.push_str(&format!(
            "<DataStore><SourceRef>{source_ref}</SourceRef><Rx-Pref><CTType>{content_type}</CTType><VerCT>{version}</VerCT></Rx-Pref><Tx-Pref><CTType>{content_type}</CTType><VerCT>{version}</VerCT></Tx-Pref><SyncCap><SyncType>1</SyncType><SyncType>2</SyncType></SyncCap></DataStore>"
        ));
    }
    xml.push_str("</DevInf>");
    xml
}

/// Device information of a Nokia phone.
pub fn nokia_devinf() -> String {
    devinf_with_stores(
        "NOKIA",
        "6630",
        &[
            ("./contacts", "text/x-vcard", "2.1"),
            ("./calendar", "text/x-vcalendar", "1.0"),
        ],
    )
}

/// Device information of a Sony Ericsson P800.
pub fn p800_devinf() -> String {
    devinf_with_stores(
        "Sony Ericsson",
        "P800",
        &[("Calendar", "text/x-vcalendar", "1.0")],
    )
}
