//! Error taxonomy for the output pipeline.
//!
//! Fatal errors ([`InitError`]) occur only during instance construction and
//! prevent the instance from starting. Everything after startup is contained
//! within its stage: per-record problems surface as a
//! [`DropReason`](crate::pipeline::DropReason), per-batch delivery failures
//! are logged and the batch discarded.

/// Errors that prevent an instance from starting.
///
/// No records are ever processed by an instance that failed to initialize.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid `post_url`: {0}")]
    InvalidUrl(String),

    #[error("Invalid `output_time_format`: {0}")]
    InvalidTimeFormat(String),

    #[error("Failed to load match map file `{path}`: {source}")]
    MatchMapLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse match map file `{path}`: {source}")]
    MatchMapParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid header `{0}`")]
    InvalidHeader(String),

    #[error("Failed to initialize HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Per-record errors raised while normalizing or serializing a record.
///
/// These are always recoverable: the record is dropped and logged, the
/// pipeline keeps running.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Unable to represent value of field `{0}` as text")]
    NonTextValue(String),

    #[error("Failed to serialize record as JSON: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_error_display() {
        let error = InitError::InvalidConfig("missing `post_url`".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: missing `post_url`"
        );
    }

    #[test]
    fn test_record_error_display() {
        let error = RecordError::NonTextValue("payload".to_string());
        assert!(error.to_string().contains("payload"));
    }
}
