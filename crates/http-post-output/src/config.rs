//! Per-instance configuration.
//!
//! Configuration arrives from the host process as string key/value pairs.
//! [`Config::from_lookup`] applies the lenient parsing rules (unparseable
//! numbers and booleans fall back to defaults) and [`Config::validate`]
//! enforces the fatal-error taxonomy: an instance with invalid configuration
//! never starts.

use std::collections::HashMap;

use crate::error::InitError;

/// Default extra header set attached to every delivery request.
const DEFAULT_CONTENT_TYPE: &str = "application/octets";

/// Configuration for a single output instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Instance identifier; registry key for the owning process.
    pub id: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Delivery target. Must be a valid absolute http(s) URL.
    pub post_url: String,
    /// Extra HTTP headers sent with every batch.
    pub headers: HashMap<String, String>,
    /// Gzip the batch body.
    pub gzip_body: bool,
    /// Maximum records per batch; also the capacity of both inter-stage queues.
    pub max_records: usize,
    /// Wall-clock bound for a batch, in milliseconds.
    pub max_period_ms: u64,
    /// Path to the JSON match map file.
    pub match_map_file: String,
    /// Ordered list of fields composing the deduplication key.
    pub deduplicate_key_fields: Vec<String>,
    /// LRU capacity of the deduplication cache.
    pub deduplicate_size: usize,
    /// Duplicate-suppression window, in seconds.
    pub deduplicate_ttl: u64,
    /// Fields stripped from the record before send.
    pub remove_fields: Vec<String>,
    /// Field to inject the formatted record time into. Empty disables injection.
    pub output_time_key: String,
    /// strftime-style pattern for the injected time field.
    pub output_time_format: String,
    /// Emit the injected time as epoch seconds instead of a formatted string.
    pub output_time_as_integer: bool,
    /// Seal and deliver a partial batch on shutdown instead of discarding it.
    pub flush_on_shutdown: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: String::new(),
            log_level: "info".to_string(),
            post_url: String::new(),
            headers: default_headers(),
            gzip_body: true,
            max_records: 20,
            max_period_ms: 2000,
            match_map_file: String::new(),
            deduplicate_key_fields: Vec::new(),
            deduplicate_size: 1024,
            deduplicate_ttl: 86400 * 7,
            remove_fields: Vec::new(),
            output_time_key: String::new(),
            output_time_format: String::new(),
            output_time_as_integer: false,
            flush_on_shutdown: false,
        }
    }
}

impl Config {
    /// Builds a configuration from a string key/value source.
    ///
    /// The lookup closure returns the raw value for a configuration key, or
    /// `None` when the key is absent. Numeric and boolean values that fail to
    /// parse fall back to their defaults; only structurally invalid
    /// configuration is rejected, via [`Config::validate`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, InitError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let id = lookup("id").unwrap_or_default();
        if id.is_empty() {
            return Err(InitError::InvalidConfig(
                "missing `id` in output configuration".to_string(),
            ));
        }

        let log_level = match lookup("log") {
            Some(level) if level.len() >= 4 => level.to_lowercase(),
            _ => defaults.log_level.clone(),
        };

        let deduplicate_key_fields = csv_list(lookup("deduplicate_key_fields"));
        let explicit_size = lookup("deduplicate_size");
        // A capacity without key fields cannot mean anything; the reverse
        // (fields with a zero capacity) is caught by `validate`. The default
        // capacity alone never enables deduplication.
        if explicit_size.is_some() && deduplicate_key_fields.is_empty() {
            return Err(InitError::InvalidConfig(
                "`deduplicate_size` set without `deduplicate_key_fields`".to_string(),
            ));
        }

        let config = Config {
            id,
            log_level,
            post_url: lookup("post_url").unwrap_or_default(),
            headers: default_headers(),
            gzip_body: parse_bool(lookup("gzip_body"), defaults.gzip_body),
            max_records: usize::try_from(parse_integer(lookup("max_records"), 20))
                .unwrap_or(defaults.max_records),
            max_period_ms: parse_integer(lookup("max_period"), defaults.max_period_ms),
            match_map_file: lookup("match_map_file").unwrap_or_default(),
            deduplicate_key_fields,
            deduplicate_size: usize::try_from(parse_integer(explicit_size, 1024))
                .unwrap_or(defaults.deduplicate_size),
            deduplicate_ttl: parse_integer(lookup("deduplicate_ttl"), defaults.deduplicate_ttl),
            remove_fields: csv_list(lookup("remove_fields")),
            output_time_key: lookup("output_time_key").unwrap_or_default(),
            output_time_format: lookup("output_time_format").unwrap_or_default(),
            output_time_as_integer: parse_bool(
                lookup("output_time_integer"),
                defaults.output_time_as_integer,
            ),
            flush_on_shutdown: parse_bool(
                lookup("flush_on_shutdown"),
                defaults.flush_on_shutdown,
            ),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), InitError> {
        let url = reqwest::Url::parse(&self.post_url)
            .map_err(|_| InitError::InvalidUrl(self.post_url.clone()))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(InitError::InvalidUrl(self.post_url.clone()));
        }

        // Key fields without a capacity to remember them in is a mistake we
        // refuse to guess around. An empty field list means deduplication is
        // off, whatever the capacity (the default is non-zero).
        if !self.deduplicate_key_fields.is_empty() && self.deduplicate_size == 0 {
            return Err(InitError::InvalidConfig(
                "`deduplicate_key_fields` set with a zero `deduplicate_size`".to_string(),
            ));
        }

        if self.max_records == 0 {
            return Err(InitError::InvalidConfig(
                "`max_records` must be greater than 0".to_string(),
            ));
        }

        if self.match_map_file.trim().is_empty() {
            return Err(InitError::InvalidConfig(
                "missing `match_map_file`".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error", "none"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(InitError::InvalidConfig(format!(
                "invalid log level '{}'",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Whether deduplication is enabled for this instance.
    #[must_use]
    pub fn dedup_enabled(&self) -> bool {
        self.deduplicate_size > 0 && !self.deduplicate_key_fields.is_empty()
    }
}

fn default_headers() -> HashMap<String, String> {
    HashMap::from([("Content-Type".to_string(), DEFAULT_CONTENT_TYPE.to_string())])
}

/// Parses an unsigned integer, falling back to `default` on absence or error.
fn parse_integer(value: Option<String>, default: u64) -> u64 {
    value
        .as_deref()
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

/// Parses a boolean, falling back to `default` on absence or error.
fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value.as_deref().map(str::trim) {
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => false,
        _ => default,
    }
}

/// Splits a comma-separated value into trimmed, non-empty items.
fn csv_list(value: Option<String>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
