use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt::Write as _;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::build_info;

pub const SERVICE_NAME: &str = "sync_worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl LogFormat {
    /// Unknown values fall back to JSON.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("text") | Some("pretty") => Self::Text,
            _ => Self::Json,
        }
    }

    fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

/// Fields attached to the bootstrap event and every run span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingContext {
    pub service: String,
    /// `serve` or the one-shot job name.
    pub mode: String,
    pub environment: String,
    pub run_id: String,
    pub build_version: String,
    pub build_commit: String,
    pub format: LogFormat,
}

impl LoggingContext {
    pub fn new(service: &str, mode: &str) -> Self {
        Self {
            service: service.to_string(),
            mode: mode.to_string(),
            environment: std::env::var("APP_ENV")
                .or_else(|_| std::env::var("ENVIRONMENT"))
                .unwrap_or_else(|_| "dev".to_string()),
            run_id: build_run_id(service),
            build_version: build_info::VERSION.to_string(),
            build_commit: build_info::short_commit_hash().to_string(),
            format: LogFormat::from_env(),
        }
    }

    /// Root span for one process invocation.
    pub fn run_span(&self) -> tracing::Span {
        tracing::info_span!(
            "sync_worker_run",
            mode = %self.mode,
            run_id = %self.run_id,
            environment = %self.environment
        )
    }
}

/// Installs the global subscriber once and logs `logging_initialized`.
///
/// `RUST_LOG` wins over `default_level` when set. `log` records are bridged into `tracing`.
/// Logs go to stderr; stdout carries only command output.
pub fn init_logging(service: &str, mode: &str, default_level: &str) -> LoggingContext {
    let context = LoggingContext::new(service, mode);
    install_subscriber(context.format, default_level);

    tracing::info!(
        event = "logging_initialized",
        service = %context.service,
        environment = %context.environment,
        mode = %context.mode,
        run_id = %context.run_id,
        build_version = %context.build_version,
        build_commit = %context.build_commit,
        log_format = context.format.as_str(),
        "initialized logging"
    );
    context
}

fn install_subscriber(format: LogFormat, default_level: &str) {
    let _ = LogTracer::init();

    // A second init (tests, embedders) keeps the first subscriber.
    let _ = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter(default_level))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(false)
                    .flatten_event(true),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter(default_level))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init(),
    };
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn build_run_id(service: &str) -> String {
    let epoch_millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("{service}-{}-{epoch_millis}", process::id())
}

/// Error message, numbered `caused by` chain, then a backtrace captured here.
pub fn format_error_report(err: &(dyn StdError + 'static)) -> String {
    let mut report = format!("error: {err}");
    for (index, cause) in error_chain(err).enumerate() {
        let _ = write!(report, "\ncaused by ({}): {cause}", index + 1);
    }
    let _ = write!(report, "\nbacktrace:\n{}", Backtrace::force_capture());
    report
}

fn error_chain<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(err.source(), |cause: &&'a (dyn StdError + 'static)| {
        (*cause).source()
    })
}

#[cfg(test)]
mod tests {
    use super::{build_run_id, format_error_report, LogFormat};
    use thiserror::Error;

    #[derive(Error, Debug)]
    #[error("store unreachable")]
    struct Outer(#[source] std::io::Error);

    #[derive(Error, Debug)]
    #[error("listing job aborted")]
    struct Top(#[source] Outer);

    #[test]
    fn log_format_defaults_to_json() {
        assert_eq!(LogFormat::parse(None), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some(" TEXT ")), LogFormat::Text);
        assert_eq!(LogFormat::parse(Some("yaml")), LogFormat::Json);
    }

    #[test]
    fn run_id_carries_service_and_pid() {
        let run_id = build_run_id("sync_worker");
        assert!(run_id.starts_with(&format!("sync_worker-{}-", std::process::id())));
    }

    #[test]
    fn error_report_lists_causes_in_order() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let err = Outer(io);

        let report = format_error_report(&err);

        assert!(report.starts_with("error: store unreachable"));
        assert!(report.contains("caused by (1): connection refused"), "{report}");
        assert!(report.contains("\nbacktrace:\n"));
    }

    #[test]
    fn error_report_walks_nested_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = Top(Outer(io));

        let report = format_error_report(&err);

        assert!(report.starts_with("error: listing job aborted"));
        let first = report.find("caused by (1): store unreachable").expect("first cause");
        let second = report.find("caused by (2): timed out").expect("second cause");
        assert!(first < second, "{report}");
        assert!(!report.contains("caused by (3)"), "{report}");
    }
}
