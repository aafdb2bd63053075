//! Logging setup for slipbot.
//!
//! Components log through `tracing` macros only. The binary installs a
//! subscriber via [`init_logging`]; library code running without one (tests,
//! embedding) emits nothing.
//!
//! HTTP and TLS internals are capped at `warn` so directory and conversation
//! events stay readable at `info`. `RUST_LOG` replaces the computed filter.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Dependencies whose logs are capped at `warn`.
pub const QUIET_TARGETS: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
    "tower_http",
    "calamine",
    "zip",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Filter directives for a base level, e.g. `info,hyper=warn,...`.
pub fn filter_directives(log_level: &str) -> String {
    QUIET_TARGETS
        .iter()
        .fold(log_level.to_lowercase(), |mut acc, target| {
            acc.push(',');
            acc.push_str(target);
            acc.push_str("=warn");
            acc
        })
}

/// Install the global subscriber. Later calls are ignored.
///
/// `log_format` is `json` for one JSON object per line (with the current
/// message span) or anything else for human-readable output.
pub fn init_logging(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(log_level)));
    let format = LogFormat::parse(log_format);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init(),
    };

    if installed.is_ok() {
        tracing::info!(level = %log_level, format = ?format, "logging initialized");
    }
}

/// Fresh id correlating the log events of one inbound message.
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Span wrapping the handling of one inbound chat message.
///
/// ```ignore
/// let span = channel_span!("whatsapp", message.trace_id, contact);
/// async { /* ... */ }.instrument(span).await;
/// ```
#[macro_export]
macro_rules! channel_span {
    ($channel:expr, $trace_id:expr, $contact:expr) => {
        tracing::info_span!(
            "channel_message",
            channel = $channel,
            trace_id = %$trace_id,
            contact = %$contact
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives_quiet_dependencies() {
        let directives = filter_directives("DEBUG");
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains(",reqwest=warn"));
        assert!(directives.ends_with(",zip=warn"));
        assert_eq!(directives.matches("=warn").count(), QUIET_TARGETS.len());
        // Parses as a valid filter
        let _ = EnvFilter::new(directives);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Pretty);
    }

    #[test]
    fn test_trace_ids_are_unique_uuids() {
        let first = generate_trace_id();
        assert_ne!(first, generate_trace_id());
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }
}
