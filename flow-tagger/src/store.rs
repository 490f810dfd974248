use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde_json::{Map as JsonMap, Number as JsonNumber, Value};
use tracing::info;

use flow_tagger_common::{LookupKey, UNTAGGED};

/// Running tag and port/protocol frequency tables.
///
/// Counts only grow while records are tagged. Feeding the same log twice
/// doubles every count; start from `Aggregates::default()` for an isolated
/// run.
#[derive(Debug, Default)]
pub struct Aggregates {
    tag_counts: HashMap<String, u64>,
    port_protocol_counts: HashMap<LookupKey, u64>,
}

impl Aggregates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one tagged record: one increment per tag, or a single
    /// `Untagged` increment when `tags` is empty or absent, plus exactly one
    /// increment for `key`.
    pub fn record(&mut self, key: LookupKey, tags: Option<&HashSet<String>>) {
        match tags {
            Some(tags) if !tags.is_empty() => {
                for tag in tags {
                    self.increment_tag(tag);
                }
            }
            _ => self.increment_tag(UNTAGGED),
        }
        *self.port_protocol_counts.entry(key).or_insert(0) += 1;
    }

    fn increment_tag(&mut self, tag: &str) {
        match self.tag_counts.get_mut(tag) {
            Some(count) => *count += 1,
            None => {
                self.tag_counts.insert(tag.to_string(), 1);
            }
        }
    }

    pub fn tag_counts(&self) -> &HashMap<String, u64> {
        &self.tag_counts
    }

    pub fn port_protocol_counts(&self) -> &HashMap<LookupKey, u64> {
        &self.port_protocol_counts
    }

    pub fn tag_count(&self, tag: &str) -> u64 {
        self.tag_counts.get(tag).copied().unwrap_or(0)
    }

    #[cfg(test)]
    pub fn port_protocol_count(&self, key: &LookupKey) -> u64 {
        self.port_protocol_counts.get(key).copied().unwrap_or(0)
    }

    /// Number of records accounted so far.
    pub fn records(&self) -> u64 {
        self.port_protocol_counts.values().sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.tag_counts.is_empty() && self.port_protocol_counts.is_empty()
    }

    #[cfg(test)]
    pub fn reset(&mut self) {
        self.tag_counts.clear();
        self.port_protocol_counts.clear();
    }

    /// Both tables as a JSON object with `tag_counts` and
    /// `port_protocol_counts` members, each mapping key text to its count.
    pub fn to_json(&self) -> Value {
        let mut tags = JsonMap::new();
        for (tag, count) in &self.tag_counts {
            tags.insert(tag.clone(), Value::Number(JsonNumber::from(*count)));
        }

        let mut pairs = JsonMap::new();
        for (key, count) in &self.port_protocol_counts {
            pairs.insert(key.to_string(), Value::Number(JsonNumber::from(*count)));
        }

        let mut obj = JsonMap::new();
        obj.insert("tag_counts".to_string(), Value::Object(tags));
        obj.insert("port_protocol_counts".to_string(), Value::Object(pairs));
        Value::Object(obj)
    }
}

pub fn log_snapshot(aggregates: &Aggregates) {
    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    info!(
        "[{timestamp}] records: {} untagged: {} tags: {} port/protocol pairs: {}",
        aggregates.records(),
        aggregates.tag_count(UNTAGGED),
        aggregates.tag_counts.len(),
        aggregates.port_protocol_counts.len()
    );
}
