//! Logging infrastructure and tracing setup.
//!
//! All pipeline stages log through `tracing`. The custom formatter prefixes
//! every line with `HTTP_POST` so output-plugin logs are easy to separate
//! from the host process's own logging:
//!
//! ```text
//! HTTP_POST | LEVEL | [span_name{span_fields}:] message {event_fields}
//! ```

use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::error::InitError;

/// Line prefix identifying this output's logs.
const LOG_PREFIX: &str = "HTTP_POST";

/// Custom log formatter prefixing every line with [`LOG_PREFIX`].
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{LOG_PREFIX} | {} | ", metadata.level())?;

        // Include the full span hierarchy, root first, with span fields in
        // curly braces when present.
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs the global subscriber at the given level.
///
/// Intended to be called once by the host process at startup; the level is
/// the most verbose one configured across instances. Noisy transport crates
/// are filtered out. A level of `none` disables output entirely.
pub fn init(log_level: &str) -> Result<(), InitError> {
    let level = match log_level.to_lowercase().as_str() {
        "none" => "off".to_string(),
        l @ ("trace" | "debug" | "info" | "warn" | "error" | "off") => l.to_string(),
        other => {
            return Err(InitError::InvalidConfig(format!(
                "invalid log level '{other}'"
            )))
        }
    };
    let env_filter = format!("h2=off,hyper=off,rustls=off,{level}");
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter)
                .map_err(|e| InitError::InvalidConfig(format!("invalid log level: {e}")))?,
        )
        .event_format(Formatter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| InitError::InvalidConfig(format!("failed to set subscriber: {e}")))?;
    Ok(())
}
