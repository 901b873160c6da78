// src/recording/audit_log.rs
//! Bounded, filtered audit log
//!
//! One store per audit domain. Entries are keyed by a monotonically
//! increasing sequence number; the oldest entries are evicted once the store
//! exceeds its configured size. Rejected candidates never consume a
//! sequence number.

use crate::observability::names;
use crate::recording::domain::{is_reserved_host, AuditDomain};
use crate::recording::filter::FilterSet;
use crate::utils::config::AuditStoreSettings;
use crate::utils::errors::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::ops::Bound;
use tracing::{debug, info, trace};

/// Limits and filters of one store
#[derive(Debug, Clone, PartialEq)]
pub struct AuditConfig {
    /// Maximum number of retained entries (at least 1)
    pub max_entries: usize,

    /// Value field is cut to this many characters
    pub value_truncate_length: usize,

    pub key_filter: FilterSet,
    pub value_filter: FilterSet,

    /// Keep only the first N entries ever while no filter is configured
    pub countdown: Option<u64>,
}

impl AuditConfig {
    pub const DEFAULT_MAX_ENTRIES: usize = 2000;
    pub const DEFAULT_TRUNCATE_LENGTH: usize = 256;

    /// Build a config, clamping malformed input instead of failing
    pub fn new(
        max_entries: i64,
        value_truncate_length: i64,
        positive_key_filter: Option<Vec<String>>,
        negative_key_filter: Option<Vec<String>>,
        positive_value_filter: Option<Vec<String>>,
        negative_value_filter: Option<Vec<String>>,
    ) -> Self {
        Self {
            max_entries: usize::try_from(max_entries.max(1)).unwrap_or(usize::MAX),
            value_truncate_length: usize::try_from(value_truncate_length.max(0))
                .unwrap_or(usize::MAX),
            key_filter: FilterSet::from_lists(positive_key_filter, negative_key_filter),
            value_filter: FilterSet::from_lists(positive_value_filter, negative_value_filter),
            countdown: None,
        }
    }

    pub fn with_countdown(mut self, countdown: Option<u64>) -> Self {
        self.countdown = countdown;
        self
    }

    pub fn has_filters(&self) -> bool {
        !self.key_filter.is_empty() || !self.value_filter.is_empty()
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries: Self::DEFAULT_MAX_ENTRIES,
            value_truncate_length: Self::DEFAULT_TRUNCATE_LENGTH,
            key_filter: FilterSet::default(),
            value_filter: FilterSet::default(),
            countdown: None,
        }
    }
}

impl From<&AuditStoreSettings> for AuditConfig {
    fn from(settings: &AuditStoreSettings) -> Self {
        let mut config = AuditConfig::new(
            settings.max_entries,
            settings.value_truncate_length,
            None,
            None,
            None,
            None,
        );
        config.key_filter = FilterSet::parse(settings.key_filter.iter().flatten());
        config.value_filter = FilterSet::parse(settings.value_filter.iter().flatten());
        config.with_countdown(settings.countdown)
    }
}

/// Candidate entry handed to a store
///
/// Fields the domain doesn't know are ignored; missing ones export as empty.
#[derive(Debug, Clone, Default)]
pub struct AuditRecord {
    fields: Vec<(String, String)>,
}

impl AuditRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((name.into(), value.to_string()));
        self
    }

    pub fn optional<T: ToString>(self, name: impl Into<String>, value: Option<T>) -> Self {
        match value {
            Some(value) => self.field(name, value),
            None => self,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }
}

/// An accepted, immutable audit entry
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    columns: &'static [&'static str],
    values: Vec<String>,
}

impl AuditEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|column| *column == name)
            .map(|index| self.values[index].as_str())
    }

    /// Field values in column order
    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn columns(&self) -> &'static [&'static str] {
        self.columns
    }
}

impl Serialize for AuditEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len() + 2))?;
        map.serialize_entry("seq", &self.sequence)?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Why a candidate was not stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Loopback, unspecified or NTP pool host
    ReservedHost,

    /// Same host as the previously accepted entry
    Duplicate,

    /// Countdown budget used up
    CountdownExhausted,

    /// Matched a negative filter term
    NegativeFilter,

    /// Matched none of the positive filter terms
    PositiveFilter,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::ReservedHost => "reserved_host",
            DropReason::Duplicate => "duplicate",
            DropReason::CountdownExhausted => "countdown_exhausted",
            DropReason::NegativeFilter => "negative_filter",
            DropReason::PositiveFilter => "positive_filter",
        }
    }
}

/// Result of [`AuditLogStore::add_entry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Accepted(u64),
    Dropped(DropReason),
}

impl AddOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AddOutcome::Accepted(_))
    }
}

/// Counters since the store was created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    pub accepted: u64,
    pub evicted: u64,
    pub dropped: BTreeMap<&'static str, u64>,
}

/// Rows written by an export and where to resume from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub rows: usize,

    /// Highest sequence written, or the cursor passed in when nothing was
    pub last_sequence: u64,
}

struct StoreInner {
    config: AuditConfig,
    entries: BTreeMap<u64, AuditEntry>,
    last_sequence: u64,
    last_host: Option<String>,
    countdown_used: u64,
    stats: AuditStats,
}

impl StoreInner {
    fn evict_overflow(&mut self) {
        while self.entries.len() > self.config.max_entries {
            if self.entries.pop_first().is_none() {
                break;
            }
            self.stats.evicted += 1;
        }
    }
}

/// Bounded audit log for one domain
pub struct AuditLogStore {
    domain: AuditDomain,
    inner: Mutex<StoreInner>,
}

impl AuditLogStore {
    pub fn new(domain: AuditDomain, config: AuditConfig) -> Self {
        info!(
            domain = domain.as_str(),
            max_entries = config.max_entries,
            "Creating audit log store"
        );
        Self {
            domain,
            inner: Mutex::new(StoreInner {
                config,
                entries: BTreeMap::new(),
                last_sequence: 0,
                last_host: None,
                countdown_used: 0,
                stats: AuditStats::default(),
            }),
        }
    }

    pub fn domain(&self) -> AuditDomain {
        self.domain
    }

    /// Replace limits and filters
    ///
    /// Existing entries are kept, except the oldest ones beyond a lowered
    /// `max_entries`.
    pub fn configure(&self, config: AuditConfig) {
        debug!(domain = self.domain.as_str(), ?config, "Reconfiguring audit log store");
        let mut inner = self.inner.lock();
        inner.config = config;
        inner.evict_overflow();
    }

    pub fn config(&self) -> AuditConfig {
        self.inner.lock().config.clone()
    }

    /// Filter a candidate and store it if accepted
    pub fn add_entry(&self, record: AuditRecord) -> AddOutcome {
        let key = record.get(self.domain.key_column()).unwrap_or_default();
        let value = self
            .domain
            .value_column()
            .map(|column| record.get(column).unwrap_or_default());

        let mut inner = self.inner.lock();

        if let Err(reason) = self.admit(&inner, key, value) {
            *inner.stats.dropped.entry(reason.as_str()).or_insert(0) += 1;
            metrics::counter!(
                names::AUDIT_DROPPED_TOTAL,
                "domain" => self.domain.as_str(),
                "reason" => reason.as_str()
            )
            .increment(1);
            trace!(domain = self.domain.as_str(), key, "Dropped audit candidate: {:?}", reason);
            return AddOutcome::Dropped(reason);
        }

        let truncate_to = inner.config.value_truncate_length;
        let value_column = self.domain.value_column();
        let columns = self.domain.columns();
        let values = columns
            .iter()
            .map(|column| {
                let raw = record.get(column).unwrap_or_default();
                if Some(*column) == value_column {
                    truncate_chars(raw, truncate_to).into_owned()
                } else {
                    raw.to_string()
                }
            })
            .collect();

        inner.last_sequence += 1;
        let sequence = inner.last_sequence;
        inner.entries.insert(
            sequence,
            AuditEntry {
                sequence,
                timestamp: Utc::now(),
                columns,
                values,
            },
        );

        if self.domain == AuditDomain::Hosts {
            inner.last_host = Some(key.to_string());
        }
        if inner.config.countdown.is_some() && !inner.config.has_filters() {
            inner.countdown_used += 1;
        }
        inner.stats.accepted += 1;
        inner.evict_overflow();

        metrics::counter!(names::AUDIT_ACCEPTED_TOTAL, "domain" => self.domain.as_str())
            .increment(1);
        AddOutcome::Accepted(sequence)
    }

    fn admit(
        &self,
        inner: &StoreInner,
        key: &str,
        value: Option<&str>,
    ) -> std::result::Result<(), DropReason> {
        let config = &inner.config;

        if self.domain == AuditDomain::Hosts {
            if is_reserved_host(key) {
                return Err(DropReason::ReservedHost);
            }
            if inner.last_host.as_deref() == Some(key) {
                return Err(DropReason::Duplicate);
            }
        }

        if let Some(limit) = config.countdown {
            if !config.has_filters() && inner.countdown_used >= limit {
                return Err(DropReason::CountdownExhausted);
            }
        }

        if config.key_filter.rejects(key) || value.is_some_and(|v| config.value_filter.rejects(v)) {
            return Err(DropReason::NegativeFilter);
        }

        if !config.key_filter.admits(key) || value.is_some_and(|v| !config.value_filter.admits(v)) {
            return Err(DropReason::PositiveFilter);
        }

        Ok(())
    }

    /// Independent copy of all entries in sequence order
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.inner.lock().entries.values().cloned().collect()
    }

    /// Entries with a sequence strictly greater than `after`
    pub fn entries_after(&self, after: u64) -> Vec<AuditEntry> {
        self.inner
            .lock()
            .entries
            .range((Bound::Excluded(after), Bound::Unbounded))
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Highest sequence assigned since creation or the last clear
    pub fn last_sequence(&self) -> u64 {
        self.inner.lock().last_sequence
    }

    pub fn stats(&self) -> AuditStats {
        self.inner.lock().stats.clone()
    }

    /// Drop all entries and restart numbering at 1
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.last_sequence = 0;
        inner.last_host = None;
        info!(domain = self.domain.as_str(), "Cleared audit log store");
    }

    /// CSV header row for this domain
    pub fn csv_header(&self) -> String {
        let mut header = String::from("seq,timestamp");
        for column in self.domain.columns() {
            header.push(',');
            header.push_str(&csv_escape(column));
        }
        header
    }

    /// Write entries after `after` as CSV
    ///
    /// The rows are taken from a snapshot, so the store stays available
    /// while the writer blocks.
    pub fn export_csv<W: Write>(&self, writer: W, after: u64) -> Result<ExportSummary> {
        let entries = self.entries_after(after);
        let mut out = BufWriter::new(writer);

        writeln!(out, "{}", self.csv_header())?;
        for entry in &entries {
            write!(
                out,
                "{},{}",
                entry.sequence,
                entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
            )?;
            for value in entry.values() {
                write!(out, ",{}", csv_escape(value))?;
            }
            writeln!(out)?;
        }
        out.flush()?;

        Ok(summarize(&entries, after))
    }

    /// Write entries after `after` as JSON lines
    pub fn export_json_lines<W: Write>(&self, writer: W, after: u64) -> Result<ExportSummary> {
        let entries = self.entries_after(after);
        let mut out = BufWriter::new(writer);

        for entry in &entries {
            serde_json::to_writer(&mut out, entry)?;
            writeln!(out)?;
        }
        out.flush()?;

        Ok(summarize(&entries, after))
    }
}

fn summarize(entries: &[AuditEntry], after: u64) -> ExportSummary {
    ExportSummary {
        rows: entries.len(),
        last_sequence: entries.last().map(|e| e.sequence).unwrap_or(after),
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> Cow<'_, str> {
    match value.char_indices().nth(max_chars) {
        Some((cut, _)) => Cow::Borrowed(&value[..cut]),
        None => Cow::Borrowed(value),
    }
}

/// Quote a CSV field when it contains a comma, quote, CR or LF
pub fn csv_escape(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_host() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-d]\\.example\\.com",
            Just("localhost".to_string()),
            Just("ads.tracker.net".to_string()),
        ]
    }

    proptest! {
        #[test]
        fn size_bounded_and_oldest_evicted(
            max_entries in 1i64..20,
            hosts in proptest::collection::vec(arb_host(), 0..200),
        ) {
            let store = AuditLogStore::new(
                AuditDomain::Hosts,
                AuditConfig::new(max_entries, 16, None, Some(vec!["ads".into()]), None, None),
            );

            for host in &hosts {
                store.add_entry(AuditRecord::new().field("host", host).field("port", 443));
                prop_assert!(store.len() <= max_entries as usize);
            }

            // survivors are exactly the newest sequence numbers
            let entries = store.snapshot();
            let last = store.last_sequence();
            let expected: Vec<u64> = (last + 1 - entries.len() as u64..=last).collect();
            let actual: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
            if entries.is_empty() {
                prop_assert_eq!(last, 0);
            } else {
                prop_assert_eq!(actual, expected);
            }
        }

        #[test]
        fn csv_fields_round_trip(value in "[ -~\\n\\r]{0,40}") {
            let escaped = csv_escape(&value);
            let needs_quotes = value.contains([',', '"', '\r', '\n']);
            prop_assert_eq!(escaped.starts_with('"') && needs_quotes, needs_quotes);
            if needs_quotes {
                let inner = &escaped[1..escaped.len() - 1];
                prop_assert_eq!(inner.replace("\"\"", "\""), value);
            }
        }
    }
}
