use std::{
    collections::{HashMap, HashSet},
    fmt,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::{Context, Result};
use serde::Serialize;

use flow_tagger_common::{
    LOOKUP_FIELDS, LookupKey, MIN_PROTOCOL_NUMBER_FIELDS, REFERENCE_DELIMITER, split_fields,
};

/// Line accounting for one pass over an input file.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct LineReport {
    pub lines: u64,
    pub accepted: u64,
    pub skipped: u64,
}

impl fmt::Display for LineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lines: {} accepted: {} skipped: {}",
            self.lines, self.accepted, self.skipped
        )
    }
}

/// Feed every line of `path` to `accept`, which reports whether the line was
/// used. Lines are handed over as they are read, so whatever `accept` built
/// before a read error is kept by the caller. Invalid UTF-8 is replaced with
/// U+FFFD rather than ending the pass.
pub(crate) fn for_each_line<F>(path: &Path, label: &str, mut accept: F) -> Result<LineReport>
where
    F: FnMut(&str) -> bool,
{
    let file = File::open(path)
        .with_context(|| format!("failed to open {label} at {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut report = LineReport::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf).with_context(|| {
            format!(
                "failed to read line {} of {} ({label})",
                report.lines + 1,
                path.display()
            )
        })?;
        if read == 0 {
            break;
        }
        let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw);
        report.lines += 1;
        if accept(&line) {
            report.accepted += 1;
        } else {
            report.skipped += 1;
        }
    }

    Ok(report)
}

/// Numeric protocol id to lowercase protocol name, e.g. `6` -> `tcp`.
#[derive(Debug, Default)]
pub struct ProtocolNumbers {
    entries: HashMap<String, String>,
}

impl ProtocolNumbers {
    /// Merge the rows of a `<id>,<name>[,...]` file into the table.
    pub fn load(&mut self, path: &Path) -> Result<LineReport> {
        for_each_line(path, "protocol numbers", |line| self.insert_row(line))
    }

    /// Insert one reference row; a repeated id overwrites the earlier name.
    pub fn insert_row(&mut self, line: &str) -> bool {
        let fields = split_fields(line, REFERENCE_DELIMITER);
        if fields.len() < MIN_PROTOCOL_NUMBER_FIELDS {
            return false;
        }
        self.entries
            .insert(fields[0].trim().to_string(), fields[1].trim().to_lowercase());
        true
    }

    /// A row with a blank name resolves to nothing, same as a missing id.
    pub fn resolve(&self, numeric: &str) -> Option<&str> {
        self.entries
            .get(numeric)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// (destination port, protocol) to the union of tags listed for it.
#[derive(Debug, Default)]
pub struct LookupTable {
    entries: HashMap<LookupKey, HashSet<String>>,
}

impl LookupTable {
    /// Merge the rows of a `<port>,<protocol>,<tag>` file into the table.
    pub fn load(&mut self, path: &Path) -> Result<LineReport> {
        for_each_line(path, "lookup table", |line| self.insert_row(line))
    }

    pub fn insert_row(&mut self, line: &str) -> bool {
        let fields = split_fields(line, REFERENCE_DELIMITER);
        if fields.len() != LOOKUP_FIELDS {
            return false;
        }
        let key = LookupKey::new(fields[0], fields[1]);
        self.entries
            .entry(key)
            .or_default()
            .insert(fields[2].trim().to_lowercase());
        true
    }

    pub fn tags(&self, key: &LookupKey) -> Option<&HashSet<String>> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Both reference tables, loaded once before the flow log is read.
#[derive(Debug, Default)]
pub struct Tables {
    pub protocols: ProtocolNumbers,
    pub lookup: LookupTable,
}
