//! Match/enrichment rule table.
//!
//! The rule table maps field values (exact literals, or prefixes written with
//! a trailing `*`) to enrichment fields. A record either matches exactly one
//! rule — the first satisfying one — or matches none and is dropped by the
//! pipeline.
//!
//! # Evaluation order
//!
//! The on-disk format is a JSON object of objects, which carries no reliable
//! ordering. To keep first-match-wins reproducible, the table is flattened at
//! load time into an explicitly ordered entry list: field name ascending,
//! then match text longest-first (most specific wins a tie on field), with
//! literals ahead of equally long prefixes.

use std::collections::{BTreeMap, HashMap};
use std::fs;

use tracing::debug;

use crate::error::InitError;
use crate::record::Record;

/// Marker that turns a rule-table key into a prefix pattern.
const WILDCARD: char = '*';

/// On-disk shape: `{ field: { pattern-or-literal: { enrichKey: enrichValue } } }`.
pub type RawMatchMap = BTreeMap<String, BTreeMap<String, HashMap<String, String>>>;

/// A value pattern from the rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Exact string match.
    Literal(String),
    /// Record value must start with this prefix.
    Prefix(String),
}

impl Pattern {
    fn parse(raw: &str) -> Self {
        raw.strip_suffix(WILDCARD).map_or_else(
            || Pattern::Literal(raw.to_string()),
            |prefix| Pattern::Prefix(prefix.to_string()),
        )
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Literal(text) => value == text,
            Pattern::Prefix(prefix) => value.starts_with(prefix),
        }
    }

    /// Length of the text that has to match; used for specificity ordering.
    fn match_len(&self) -> usize {
        match self {
            Pattern::Literal(text) => text.len(),
            Pattern::Prefix(prefix) => prefix.len(),
        }
    }

    /// Display form, with the wildcard marker restored for prefixes.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Pattern::Literal(text) => text.clone(),
            Pattern::Prefix(prefix) => format!("{prefix}{WILDCARD}"),
        }
    }
}

/// One flattened rule: field, pattern, and the enrichment it carries.
#[derive(Debug, Clone)]
pub struct MatchEntry {
    pub field: String,
    pub pattern: Pattern,
    pub enrichment: HashMap<String, String>,
}

/// The matched (field, pattern) pair and its enrichment mapping.
#[derive(Debug)]
pub struct MatchOutcome<'a> {
    pub field: &'a str,
    pub pattern: String,
    pub enrichment: &'a HashMap<String, String>,
}

/// Immutable, deterministically ordered rule table.
///
/// Loaded once per instance; evaluation is read-only and safe to share.
#[derive(Debug, Clone, Default)]
pub struct MatchTable {
    entries: Vec<MatchEntry>,
}

impl MatchTable {
    /// Loads and flattens the rule table from a JSON file.
    pub fn load(path: &str) -> Result<Self, InitError> {
        let raw = fs::read(path).map_err(|source| InitError::MatchMapLoad {
            path: path.to_string(),
            source,
        })?;
        let map: RawMatchMap =
            serde_json::from_slice(&raw).map_err(|source| InitError::MatchMapParse {
                path: path.to_string(),
                source,
            })?;
        let table = Self::from_map(map);
        debug!(entries = table.len(), path, "Loaded match map");
        Ok(table)
    }

    /// Flattens the nested map into the ordered entry list.
    #[must_use]
    pub fn from_map(raw: RawMatchMap) -> Self {
        let mut entries = Vec::new();
        for (field, patterns) in raw {
            let mut field_entries: Vec<MatchEntry> = patterns
                .into_iter()
                .map(|(raw_pattern, enrichment)| MatchEntry {
                    field: field.clone(),
                    pattern: Pattern::parse(&raw_pattern),
                    enrichment,
                })
                .collect();
            // Most specific first within a field: longest match text, then
            // literals ahead of prefixes, then lexicographic as a final tie-break.
            field_entries.sort_by(|a, b| {
                b.pattern
                    .match_len()
                    .cmp(&a.pattern.match_len())
                    .then_with(|| {
                        let rank = |p: &Pattern| usize::from(matches!(p, Pattern::Prefix(_)));
                        rank(&a.pattern).cmp(&rank(&b.pattern))
                    })
                    .then_with(|| a.pattern.text().cmp(&b.pattern.text()))
            });
            entries.extend(field_entries);
        }
        MatchTable { entries }
    }

    /// Evaluates the record against the table, first-match-wins.
    ///
    /// Returns `None` when no (field, pattern) pair is satisfied. No side
    /// effects; callable concurrently without coordination.
    #[must_use]
    pub fn evaluate(&self, record: &Record) -> Option<MatchOutcome<'_>> {
        for entry in &self.entries {
            if let Some(value) = record.get(&entry.field) {
                if entry.pattern.matches(value) {
                    return Some(MatchOutcome {
                        field: &entry.field,
                        pattern: entry.pattern.text(),
                        enrichment: &entry.enrichment,
                    });
                }
            }
        }
        None
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
