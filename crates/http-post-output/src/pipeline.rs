//! Per-record orchestration.
//!
//! One [`RecordPipeline`] per instance, invoked synchronously by the host for
//! every incoming record:
//!
//! ```text
//! received → stale/future check → normalize → match → dedup → strip fields
//!          → inject time field → serialize → enqueue (blocking)
//! ```
//!
//! Every failure short of a full queue resolves to a [`DropReason`]; nothing
//! a single record does can stop the pipeline. The push onto the record
//! queue blocks when the batcher is behind — deliberate backpressure, never
//! a silent drop.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::dedup::{DedupCache, Freshness};
use crate::error::InitError;
use crate::match_map::MatchTable;
use crate::record::{FieldValue, Record, TimeValue};

/// Tolerance for record timestamps ahead of processing time.
const MAX_FUTURE_DRIFT: TimeDelta = TimeDelta::hours(1);

/// Why a record was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// A field key or value could not be represented as text.
    Unparseable,
    /// Record timestamp older than the TTL or too far in the future.
    StaleOrFuture,
    /// No rule-table entry matched.
    NoMatch,
    /// Suppressed by the deduplication cache.
    Duplicate,
    /// JSON serialization failed.
    Serialize,
    /// The record queue is closed (instance shutting down).
    QueueClosed,
}

/// Outcome of processing one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Serialized and pushed onto the record queue.
    Queued,
    /// Discarded; the reason has already been logged.
    Dropped(DropReason),
}

/// Pre-parsed strftime-style output time format.
///
/// Parsed once at instance creation so an invalid pattern is a fatal init
/// error rather than a per-record surprise.
#[derive(Debug, Clone)]
pub struct TimeFormatter {
    items: Vec<Item<'static>>,
}

impl TimeFormatter {
    pub fn new(format: &str) -> Result<Self, InitError> {
        let items = StrftimeItems::new(format)
            .parse_to_owned()
            .map_err(|e| InitError::InvalidTimeFormat(format!("{format} ({e})")))?;
        Ok(TimeFormatter { items })
    }

    #[must_use]
    pub fn format(&self, timestamp: DateTime<Utc>) -> String {
        timestamp.format_with_items(self.items.iter()).to_string()
    }
}

/// Per-record orchestration stage; sole owner of the dedup cache.
pub struct RecordPipeline {
    config: Arc<Config>,
    match_table: MatchTable,
    cache: Option<DedupCache>,
    time_formatter: TimeFormatter,
    ttl: TimeDelta,
    tx: Sender<Vec<u8>>,
}

impl RecordPipeline {
    /// Builds the pipeline stage for one instance.
    pub fn new(
        config: Arc<Config>,
        match_table: MatchTable,
        tx: Sender<Vec<u8>>,
    ) -> Result<Self, InitError> {
        let time_formatter = TimeFormatter::new(&config.output_time_format)?;

        let cache = config.dedup_enabled().then(|| {
            DedupCache::new(
                config.deduplicate_size,
                Duration::from_secs(config.deduplicate_ttl),
            )
        });

        // A TTL beyond chrono's range clamps to the widest representable
        // window instead of panicking on a huge configured value.
        let ttl = i64::try_from(config.deduplicate_ttl)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);

        Ok(RecordPipeline {
            config,
            match_table,
            cache,
            time_formatter,
            ttl,
            tx,
        })
    }

    /// Processes one record end to end.
    ///
    /// `timestamp` is the record's original event time as supplied by the
    /// host. Returns [`Disposition::Queued`] once the serialized record is on
    /// the record queue; blocks while the queue is full.
    pub async fn process<I>(&mut self, raw: I, timestamp: DateTime<Utc>) -> Disposition
    where
        I: IntoIterator<Item = (String, FieldValue)>,
    {
        let now = Utc::now();

        // Cheap early rejection before any matching or dedup work.
        let age = now.signed_duration_since(timestamp);
        if age > self.ttl || timestamp > now + MAX_FUTURE_DRIFT {
            error!(%timestamp, age_secs = age.num_seconds(), "Record too old (or in future)");
            return Disposition::Dropped(DropReason::StaleOrFuture);
        }

        let mut record = match Record::normalize(raw) {
            Ok(record) => record,
            Err(e) => {
                error!(%timestamp, "Failed to normalize record: {e}");
                return Disposition::Dropped(DropReason::Unparseable);
            }
        };

        match self.match_table.evaluate(&record) {
            Some(outcome) => {
                debug!(
                    field = outcome.field,
                    pattern = %outcome.pattern,
                    "Record matched"
                );
                record.enrich(outcome.enrichment);
            }
            None => {
                debug!("Record did not match");
                return Disposition::Dropped(DropReason::NoMatch);
            }
        }

        if let Some(cache) = self.cache.as_mut() {
            let key = record.dedup_key(&self.config.deduplicate_key_fields);
            match cache.decide(&key, now.into()) {
                Freshness::Duplicate => {
                    debug!(key, "Skipping send, recent duplicate");
                    return Disposition::Dropped(DropReason::Duplicate);
                }
                Freshness::Fresh => {
                    // Stale hits land here too: refresh and ship.
                    if cache.insert(&key, SystemTime::from(timestamp)) {
                        info!("Dedup cache evicted least recently used entry");
                    }
                }
            }
        }

        record.remove_fields(&self.config.remove_fields);

        // Time injection comes after removal (the injected field cannot be
        // stripped) and after matching/dedup (it never participates in them).
        let time_key = self.config.output_time_key.trim();
        let time_field = if time_key.is_empty() {
            None
        } else if self.config.output_time_as_integer {
            Some((time_key, TimeValue::Epoch(timestamp.timestamp())))
        } else {
            Some((time_key, TimeValue::Text(self.time_formatter.format(timestamp))))
        };

        let json = match record.to_json(time_field) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize record as JSON: {e}");
                return Disposition::Dropped(DropReason::Serialize);
            }
        };

        debug!(bytes = json.len(), "Queueing record");
        if self.tx.send(json).await.is_err() {
            error!("Record queue closed, dropping record");
            return Disposition::Dropped(DropReason::QueueClosed);
        }
        Disposition::Queued
    }

    /// Current timestamp rendered in the configured output format.
    ///
    /// Logged at instance start so a misconfigured format is easy to spot.
    #[must_use]
    pub fn formatted_now(&self) -> String {
        self.time_formatter.format(Utc::now())
    }
}
