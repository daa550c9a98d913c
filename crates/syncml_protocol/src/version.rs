//! Protocol versions.

use serde::{Deserialize, Serialize};

/// A SyncML protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// SyncML 1.0.
    V1_0,
    /// SyncML 1.1.
    #[default]
    V1_1,
    /// SyncML 1.2.
    V1_2,
}

impl ProtocolVersion {
    /// Parses the `<VerDTD>` value of a header.
    pub fn from_ver_dtd(text: &str) -> Option<Self> {
        match text.trim() {
            "1.0" => Some(ProtocolVersion::V1_0),
            "1.1" => Some(ProtocolVersion::V1_1),
            "1.2" => Some(ProtocolVersion::V1_2),
            _ => None,
        }
    }

    /// Returns the `<VerDTD>` value.
    pub fn ver_dtd(self) -> &'static str {
        match self {
            ProtocolVersion::V1_0 => "1.0",
            ProtocolVersion::V1_1 => "1.1",
            ProtocolVersion::V1_2 => "1.2",
        }
    }

    /// Returns the `<VerProto>` value.
    pub fn proto_name(self) -> &'static str {
        match self {
            ProtocolVersion::V1_0 => "SyncML/1.0",
            ProtocolVersion::V1_1 => "SyncML/1.1",
            ProtocolVersion::V1_2 => "SyncML/1.2",
        }
    }

    /// Returns the namespace of SyncML elements.
    pub fn namespace(self) -> &'static str {
        match self {
            ProtocolVersion::V1_0 => "syncml:SYNCML1.0",
            ProtocolVersion::V1_1 => "syncml:SYNCML1.1",
            ProtocolVersion::V1_2 => "syncml:SYNCML1.2",
        }
    }

    /// Returns the namespace of meta information elements.
    pub fn meta_namespace(self) -> &'static str {
        "syncml:metinf"
    }

    /// Returns the namespace of device information elements.
    pub fn devinf_namespace(self) -> &'static str {
        "syncml:devinf"
    }

    /// Returns the URI under which device information is exchanged.
    pub fn devinf_uri(self) -> &'static str {
        match self {
            ProtocolVersion::V1_0 => "./devinf10",
            ProtocolVersion::V1_1 => "./devinf11",
            ProtocolVersion::V1_2 => "./devinf12",
        }
    }

    /// Returns true if this version requires `<MaxObjSize>` and supports
    /// large objects.
    pub fn has_large_objects(self) -> bool {
        self > ProtocolVersion::V1_0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_vocabulary() {
        let v = ProtocolVersion::from_ver_dtd("1.2").unwrap();
        assert_eq!(v.proto_name(), "SyncML/1.2");
        assert_eq!(v.devinf_uri(), "./devinf12");
        assert!(v.has_large_objects());
        assert!(!ProtocolVersion::V1_0.has_large_objects());
        assert_eq!(ProtocolVersion::from_ver_dtd("2.0"), None);
    }
}
