//! Device information (`<DevInf>`).

use crate::element::ElementHandler;
use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A content type together with its version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTypeVersion {
    /// MIME type, e.g. `text/x-vcard`.
    pub content_type: String,
    /// Version string, e.g. `2.1`.
    pub version: String,
}

/// A property advertised in a `<CTCap>` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtProperty {
    /// Property name, e.g. `TEL`.
    pub name: String,
    /// Enumerated values.
    pub values: Vec<String>,
    /// Parameter names.
    pub params: Vec<String>,
}

/// One client data store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStore {
    /// Client-side database URI.
    pub source_ref: String,
    /// Human readable name.
    pub display_name: Option<String>,
    /// Maximum length of a client id.
    pub max_guid_size: Option<u32>,
    /// Preferred content type for receiving.
    pub rx_pref: Option<ContentTypeVersion>,
    /// Other receivable content types.
    pub rx: Vec<ContentTypeVersion>,
    /// Preferred content type for sending.
    pub tx_pref: Option<ContentTypeVersion>,
    /// Other content types the store sends.
    pub tx: Vec<ContentTypeVersion>,
    /// Supported sync types (1 = two-way … 7 = server alerted).
    pub sync_types: Vec<u32>,
}

impl DataStore {
    /// Returns the preferred receive content type.
    pub fn preferred_rx_content_type(&self) -> Option<&str> {
        self.rx_pref.as_ref().map(|ct| ct.content_type.as_str())
    }

    /// Returns the version of the preferred receive content type.
    pub fn preferred_rx_content_type_version(&self) -> Option<&str> {
        self.rx_pref.as_ref().map(|ct| ct.version.as_str())
    }
}

/// Capabilities of a SyncML device, sent with `Put` or `Results`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device information DTD version.
    pub ver_dtd: String,
    /// Manufacturer.
    pub manufacturer: String,
    /// Model.
    pub model: String,
    /// OEM.
    pub oem: String,
    /// Firmware version.
    pub firmware_version: String,
    /// Software version.
    pub software_version: String,
    /// Hardware version.
    pub hardware_version: String,
    /// Device identifier.
    pub device_id: String,
    /// Device type (`phone`, `pda`, `server`, …).
    pub device_type: String,
    /// Device understands UTC times.
    pub supports_utc: bool,
    /// Device supports chunked objects.
    pub supports_large_objects: bool,
    /// Device understands `<NumberOfChanges>`.
    pub supports_number_of_changes: bool,
    /// Data stores.
    pub data_stores: Vec<DataStore>,
    /// Content capabilities by content type.
    pub ct_caps: BTreeMap<String, Vec<CtProperty>>,
}

impl DeviceInfo {
    /// Looks up a data store by its client URI. A query string on either
    /// side is ignored.
    pub fn data_store(&self, source_ref: &str) -> Option<&DataStore> {
        let wanted = strip_query(source_ref);
        self.data_stores
            .iter()
            .find(|ds| strip_query(&ds.source_ref) == wanted)
    }

    /// Returns true if nothing identifies the device yet.
    pub fn is_empty(&self) -> bool {
        self.manufacturer.is_empty() && self.model.is_empty() && self.data_stores.is_empty()
    }
}

fn strip_query(uri: &str) -> &str {
    uri.split('?').next().unwrap_or(uri).trim_start_matches("./")
}

/// Builds a [`DeviceInfo`] from the element events of a `<DevInf>` tree.
///
/// Both the flat SyncML 1.0/1.1 `<CTCap>` layout (`CTType`, `PropName`,
/// `ValEnum`, `ParamName` siblings) and the nested 1.2 layout are accepted.
#[derive(Debug, Default)]
pub struct DevInfParser {
    info: DeviceInfo,
    path: Vec<String>,
    chars: String,
    current_ct: Option<String>,
}

impl DevInfParser {
    /// Creates a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collected device information.
    pub fn finish(self) -> DeviceInfo {
        self.info
    }

    fn within(&self, name: &str) -> bool {
        self.path.iter().any(|p| p == name)
    }

    fn parent(&self) -> Option<&str> {
        let len = self.path.len();
        if len >= 2 {
            Some(self.path[len - 2].as_str())
        } else {
            None
        }
    }

    fn last_property(&mut self) -> Option<&mut CtProperty> {
        let ct = self.current_ct.clone()?;
        self.info.ct_caps.get_mut(&ct).and_then(|props| props.last_mut())
    }

    fn handle_end(&mut self, name: &str, text: String) {
        if self.within("CTCap") {
            self.handle_ct_cap(name, text);
            return;
        }
        if self.within("DataStore") {
            self.handle_data_store(name, text);
            return;
        }
        let info = &mut self.info;
        match name {
            "VerDTD" => info.ver_dtd = text,
            "Man" => info.manufacturer = text,
            "Mod" => info.model = text,
            "OEM" => info.oem = text,
            "FwV" => info.firmware_version = text,
            "SwV" => info.software_version = text,
            "HwV" => info.hardware_version = text,
            "DevID" => info.device_id = text,
            "DevTyp" => info.device_type = text,
            "UTC" => info.supports_utc = true,
            "SupportLargeObjs" => info.supports_large_objects = true,
            "SupportNumberOfChanges" => info.supports_number_of_changes = true,
            _ => {}
        }
    }

    fn handle_data_store(&mut self, name: &str, text: String) {
        let parent = self.parent().map(str::to_string);
        let Some(store) = self.info.data_stores.last_mut() else {
            return;
        };
        match (parent.as_deref(), name) {
            (Some("DataStore"), "SourceRef") => store.source_ref = text,
            (Some("DataStore"), "DisplayName") => store.display_name = Some(text),
            (Some("DataStore"), "MaxGUIDSize") => store.max_guid_size = text.parse().ok(),
            (Some("SyncCap"), "SyncType") => {
                if let Ok(sync_type) = text.parse() {
                    store.sync_types.push(sync_type);
                }
            }
            (Some(list), "CTType") => {
                let entry = ContentTypeVersion {
                    content_type: text,
                    version: String::new(),
                };
                match list {
                    "Rx-Pref" => store.rx_pref = Some(entry),
                    "Rx" => store.rx.push(entry),
                    "Tx-Pref" => store.tx_pref = Some(entry),
                    "Tx" => store.tx.push(entry),
                    _ => {}
                }
            }
            (Some(list), "VerCT") => {
                let target = match list {
                    "Rx-Pref" => store.rx_pref.as_mut(),
                    "Rx" => store.rx.last_mut(),
                    "Tx-Pref" => store.tx_pref.as_mut(),
                    "Tx" => store.tx.last_mut(),
                    _ => None,
                };
                if let Some(entry) = target {
                    entry.version = text;
                }
            }
            _ => {}
        }
    }

    fn handle_ct_cap(&mut self, name: &str, text: String) {
        match name {
            "CTType" => {
                self.info.ct_caps.entry(text.clone()).or_default();
                self.current_ct = Some(text);
            }
            "PropName" if self.parent() != Some("PropParam") => {
                if let Some(ct) = self.current_ct.clone() {
                    self.info.ct_caps.entry(ct).or_default().push(CtProperty {
                        name: text,
                        ..Default::default()
                    });
                }
            }
            "ValEnum" => {
                if let Some(prop) = self.last_property() {
                    prop.values.push(text);
                }
            }
            "ParamName" => {
                if let Some(prop) = self.last_property() {
                    prop.params.push(text);
                }
            }
            _ => {}
        }
    }
}

impl ElementHandler for DevInfParser {
    fn start_element(&mut self, _namespace: &str, name: &str) -> ProtocolResult<()> {
        self.path.push(name.to_string());
        self.chars.clear();
        if name == "DataStore" {
            self.info.data_stores.push(DataStore::default());
        }
        Ok(())
    }

    fn characters(&mut self, text: &str) -> ProtocolResult<()> {
        self.chars.push_str(text);
        Ok(())
    }

    fn end_element(&mut self, _namespace: &str, name: &str) -> ProtocolResult<()> {
        let text = std::mem::take(&mut self.chars).trim().to_string();
        self.handle_end(name, text);
        self.path.pop();
        if name == "CTCap" {
            self.current_ct = None;
        }
        Ok(())
    }
}
