use std::path::Path;

use anyhow::Result;

use flow_tagger_common::{
    DST_PORT_FIELD, FLOW_LOG_DELIMITER, LookupKey, MIN_FLOW_FIELDS, PROTOCOL_FIELD, split_fields,
};

use crate::model::{LineReport, Tables, for_each_line};
use crate::store::Aggregates;

/// Stream a space-delimited flow log once, tagging every record into
/// `aggregates`. Records already counted stay counted if the read fails
/// halfway through.
pub fn process_flow_log(
    path: &Path,
    tables: &Tables,
    aggregates: &mut Aggregates,
) -> Result<LineReport> {
    for_each_line(path, "flow log", |line| tag_record(line, tables, aggregates))
}

/// Tag one flow-log line. Returns `false` for lines too short to carry a
/// destination port and protocol; those leave the aggregates untouched.
pub fn tag_record(line: &str, tables: &Tables, aggregates: &mut Aggregates) -> bool {
    let Some(key) = lookup_key(line, tables) else {
        return false;
    };
    let tags = tables.lookup.tags(&key);
    aggregates.record(key, tags);
    true
}

fn lookup_key(line: &str, tables: &Tables) -> Option<LookupKey> {
    let fields = split_fields(line, FLOW_LOG_DELIMITER);
    if fields.len() < MIN_FLOW_FIELDS {
        return None;
    }
    let dst_port = fields[DST_PORT_FIELD];
    let key = match tables.protocols.resolve(fields[PROTOCOL_FIELD]) {
        Some(name) => LookupKey::new(dst_port, name),
        None => LookupKey::unresolved(dst_port),
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_tagger_common::UNTAGGED;
    use std::fs;
    use tempfile::TempDir;

    const RECORD_443_TCP: &str = "2 123456789012 eni-0a1b2c3d 10.0.1.201 198.51.100.2 443 443 6 25 20000 1620140761 1620140821 ACCEPT OK";
    const RECORD_80_TCP: &str = "2 123456789012 eni-4d3c2b1a 192.168.1.100 203.0.113.101 23 80 6 15 12000 1620140761 1620140821 REJECT OK";

    fn tables() -> Tables {
        let mut tables = Tables::default();
        tables.protocols.insert_row("6,TCP");
        tables.protocols.insert_row("17,UDP");
        tables.lookup.insert_row("443,tcp,email");
        tables.lookup.insert_row("25,tcp,sv_P1");
        tables.lookup.insert_row("25,tcp,sv_P2");
        tables
    }

    #[test]
    fn matching_record_counts_its_tag() {
        let tables = tables();
        let mut agg = Aggregates::new();
        assert!(tag_record(RECORD_443_TCP, &tables, &mut agg));
        assert_eq!(agg.tag_count("email"), 1);
        assert_eq!(agg.tag_counts().len(), 1);
        assert_eq!(agg.port_protocol_count(&LookupKey::new("443", "tcp")), 1);
    }

    #[test]
    fn unmatched_record_counts_untagged() {
        let tables = tables();
        let mut agg = Aggregates::new();
        assert!(tag_record(RECORD_80_TCP, &tables, &mut agg));
        assert_eq!(agg.tag_count(UNTAGGED), 1);
        assert_eq!(agg.port_protocol_count(&LookupKey::new("80", "tcp")), 1);
    }

    #[test]
    fn multi_tag_key_counts_every_tag() {
        let tables = tables();
        let mut agg = Aggregates::new();
        tag_record("a b c d e f 25 6", &tables, &mut agg);
        assert_eq!(agg.tag_count("sv_p1"), 1);
        assert_eq!(agg.tag_count("sv_p2"), 1);
        assert_eq!(agg.port_protocol_count(&LookupKey::new("25", "tcp")), 1);
    }

    #[test]
    fn unresolved_protocol_is_untagged() {
        let mut tables = tables();
        tables.lookup.insert_row("443,,empty-protocol");
        let mut agg = Aggregates::new();
        assert!(tag_record("a b c d e f 443 253", &tables, &mut agg));
        assert_eq!(agg.tag_count(UNTAGGED), 1);
        assert_eq!(agg.tag_count("empty-protocol"), 0);
        assert_eq!(agg.port_protocol_count(&LookupKey::unresolved("443")), 1);
    }

    #[test]
    fn short_lines_are_skipped() {
        let tables = tables();
        let mut agg = Aggregates::new();
        assert!(!tag_record("2 123456789012 eni-1 10.0.0.1 10.0.0.2", &tables, &mut agg));
        // Six and seven fields used to reach past the end of the record.
        assert!(!tag_record("a b c d e f", &tables, &mut agg));
        assert!(!tag_record("a b c d e f 443", &tables, &mut agg));
        assert_eq!(agg.records(), 0);

        // A trailing delimiter does not add a field.
        assert!(tag_record("a b c d e f 443 6 ", &tables, &mut agg));
        assert_eq!(agg.records(), 1);
    }

    #[test]
    fn doubled_spaces_shift_fields() {
        let tables = tables();
        let mut agg = Aggregates::new();
        assert!(tag_record("a b c d e f  443 6", &tables, &mut agg));
        assert_eq!(agg.port_protocol_count(&LookupKey::unresolved("")), 1);
        assert_eq!(agg.port_protocol_count(&LookupKey::new("443", "tcp")), 0);
        assert_eq!(agg.tag_count(UNTAGGED), 1);
    }

    #[test]
    fn reprocessing_accumulates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flow.txt");
        fs::write(&path, format!("{RECORD_443_TCP}\n{RECORD_80_TCP}\nshort line\n")).unwrap();

        let tables = tables();
        let mut agg = Aggregates::new();
        let report = process_flow_log(&path, &tables, &mut agg).unwrap();
        assert_eq!(
            report,
            LineReport {
                lines: 3,
                accepted: 2,
                skipped: 1
            }
        );

        process_flow_log(&path, &tables, &mut agg).unwrap();
        assert_eq!(agg.tag_count("email"), 2);
        assert_eq!(agg.tag_count(UNTAGGED), 2);
        assert_eq!(agg.port_protocol_count(&LookupKey::new("443", "tcp")), 2);
        assert_eq!(agg.port_protocol_count(&LookupKey::new("80", "tcp")), 2);
    }

    #[test]
    fn invalid_utf8_line_does_not_end_the_pass() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flow.txt");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(RECORD_443_TCP.as_bytes());
        bytes.extend_from_slice(b"\n2 123456789012 eni-\xff 10.0.1.9 198.51.100.9 443 443 6 25 20000 1 2 ACCEPT OK\n");
        bytes.extend_from_slice(RECORD_443_TCP.as_bytes());
        bytes.push(b'\n');
        fs::write(&path, bytes).unwrap();

        let tables = tables();
        let mut agg = Aggregates::new();
        let report = process_flow_log(&path, &tables, &mut agg).unwrap();
        assert_eq!(report.lines, 3);
        assert_eq!(report.accepted, 3);
        assert_eq!(agg.records(), 3);
        assert_eq!(agg.tag_count("email"), 3);
    }

    #[test]
    fn blank_protocol_name_counts_as_unresolved() {
        let mut tables = tables();
        tables.protocols.insert_row("6, ");
        let mut agg = Aggregates::new();
        tag_record("a b c d e f 443 6", &tables, &mut agg);
        tag_record("a b c d e f 443 99", &tables, &mut agg);
        assert_eq!(agg.port_protocol_counts().len(), 1);
        assert_eq!(agg.port_protocol_count(&LookupKey::unresolved("443")), 2);
        assert_eq!(agg.tag_count(UNTAGGED), 2);
    }

    #[test]
    fn missing_log_keeps_previous_counts() {
        let dir = TempDir::new().unwrap();
        let tables = tables();
        let mut agg = Aggregates::new();
        tag_record(RECORD_443_TCP, &tables, &mut agg);
        assert!(process_flow_log(&dir.path().join("absent.txt"), &tables, &mut agg).is_err());
        assert_eq!(agg.records(), 1);
    }
}
