//! # HTTP POST Output
//!
//! Event-processing core of a log-shipping output: normalized records are
//! matched against a rule table, deduplicated within a time window, batched,
//! optionally gzip-compressed, and delivered over HTTP.
//!
//! ## Architecture
//!
//! Each configured output target is an independent [`instance::Instance`]
//! running a three-stage pipeline:
//!
//! ```text
//!   host process
//!       │  process(record, timestamp)
//!       v
//!   ┌──────────────┐
//!   │ RecordPipeline│  (normalize, match, dedup, strip, serialize)
//!   └──────┬───────┘
//!          │  bounded record queue
//!          v
//!   ┌──────────────┐
//!   │   Batcher    │  (count/time window, optional gzip)
//!   └──────┬───────┘
//!          │  bounded batch queue
//!          v
//!   ┌──────────────┐
//!   │   Flusher    │  (one HTTP POST per batch, no retry)
//!   └──────────────┘
//! ```
//!
//! Data flows strictly downstream; the bounded queues are the only
//! cross-stage state and provide blocking backpressure. Shutdown propagates
//! by closing the queues in order.
//!
//! ## Modules
//!
//! - [`config`]: per-instance configuration, defaults, and validation
//! - [`record`]: field-value normalization and record manipulation
//! - [`match_map`]: first-match-wins enrichment rule table
//! - [`dedup`]: bounded TTL-aware LRU deduplication cache
//! - [`pipeline`]: per-record orchestration
//! - [`batcher`]: count/time-windowed aggregation and compression
//! - [`flusher`]: HTTP delivery worker
//! - [`instance`]: instance lifecycle and registry

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

/// Count/time-windowed batch aggregation with optional gzip compression
pub mod batcher;

/// Per-instance configuration, defaults, and validation
pub mod config;

/// Bounded TTL-aware LRU deduplication cache
pub mod dedup;

/// Error types shared across the pipeline
pub mod error;

/// HTTP delivery worker
pub mod flusher;

/// HTTP client construction
pub mod http;

/// Instance lifecycle and registry
pub mod instance;

/// Logging infrastructure and tracing setup
pub mod logger;

/// Match/enrichment rule table
pub mod match_map;

/// Per-record orchestration
pub mod pipeline;

/// Record normalization and field manipulation
pub mod record;

/// Identifying header attached to every delivery request.
pub const USER_AGENT: &str = "http-post-output/0.1";
