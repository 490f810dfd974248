// Common types shared between the flow-tagger loaders, tagger and exporter.
// Keep this crate dependency-free by default so the data model can be reused
// without pulling in the CLI stack.

use std::fmt;

/// Sentinel tag counted for records whose lookup key resolved to no tags.
pub const UNTAGGED: &str = "Untagged";

/// Field index of the destination port in a space-delimited flow-log record.
pub const DST_PORT_FIELD: usize = 6;
/// Field index of the numeric protocol in a space-delimited flow-log record.
pub const PROTOCOL_FIELD: usize = 7;
/// A record must reach the protocol field to be tagged.
pub const MIN_FLOW_FIELDS: usize = PROTOCOL_FIELD + 1;

/// Protocol-number rows need at least `<id>,<name>`.
pub const MIN_PROTOCOL_NUMBER_FIELDS: usize = 2;
/// Lookup rows are exactly `<port>,<protocol>,<tag>`.
pub const LOOKUP_FIELDS: usize = 3;

pub const REFERENCE_DELIMITER: char = ',';
pub const FLOW_LOG_DELIMITER: char = ' ';

/// Composite join key between flow records and the tag lookup table.
///
/// The port is compared verbatim; the protocol is stored lowercased. A key
/// built from a record whose numeric protocol could not be resolved carries
/// no protocol at all and therefore never equals a key built from a lookup
/// row, even one with an empty protocol column.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct LookupKey {
    pub port: String,
    pub protocol: Option<String>,
}

impl LookupKey {
    pub fn new(port: &str, protocol: &str) -> Self {
        Self {
            port: port.trim().to_string(),
            protocol: Some(protocol.trim().to_lowercase()),
        }
    }

    pub fn unresolved(port: &str) -> Self {
        Self {
            port: port.trim().to_string(),
            protocol: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.protocol.is_some()
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.port,
            REFERENCE_DELIMITER,
            self.protocol.as_deref().unwrap_or("")
        )
    }
}

/// Split `line` on a single delimiter character, dropping trailing empty
/// fields. Interior empty fields are kept, so `"a  b"` split on a space
/// yields three fields while `"a,b,,"` split on a comma yields two.
pub fn split_fields(line: &str, delimiter: char) -> Vec<&str> {
    let mut fields: Vec<&str> = line.split(delimiter).collect();
    while fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }
    fields
}

// Serialization is gated behind the `serde` feature so the default build
// stays dependency-free. Keys serialize as their `<port>,<protocol>` text.
#[cfg(feature = "serde")]
mod serde_impls {
    use super::LookupKey;
    use serde::{Serialize, Serializer};

    impl Serialize for LookupKey {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_fields_drops_trailing_empties_only() {
        assert_eq!(split_fields("443,tcp,email,", ','), vec!["443", "tcp", "email"]);
        assert_eq!(split_fields("443,tcp,,", ','), vec!["443", "tcp"]);
        assert_eq!(split_fields("a  b", ' '), vec!["a", "", "b"]);
        assert!(split_fields("", ',').is_empty());
        assert!(split_fields(",,,", ',').is_empty());
    }

    #[test]
    fn lookup_key_normalizes_components() {
        let key = LookupKey::new(" 443 ", " TCP ");
        assert_eq!(key.port, "443");
        assert_eq!(key.protocol.as_deref(), Some("tcp"));
        assert_eq!(key.to_string(), "443,tcp");
    }

    #[test]
    fn unresolved_key_never_matches_empty_protocol() {
        let unresolved = LookupKey::unresolved("80");
        let empty = LookupKey::new("80", "");
        assert_ne!(unresolved, empty);
        assert!(!unresolved.is_resolved());
        assert_eq!(unresolved.to_string(), "80,");
    }

    #[test]
    fn port_comparison_is_exact() {
        assert_ne!(LookupKey::new("0443", "tcp"), LookupKey::new("443", "tcp"));
        assert_eq!(LookupKey::new("443", "TCP"), LookupKey::new("443", "tcp"));
    }
}
