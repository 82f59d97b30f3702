//! Diagnostics on stderr.
//!
//! stdout carries command output, and for a plugin started over stdio it
//! carries the session itself, so nothing here ever writes to it.

use clap::ValueEnum;
use plugrpc_rpc::Codec;
use tracing::level_filters::LevelFilter;
use tracing::{info_span, Span};
use tracing_subscriber::EnvFilter;

/// Extra filter directives, e.g. `plugrpc_mux=trace`.
pub const LOG_ENV: &str = "PLUGRPC_LOG";

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    /// Whether records should name the layer (`plugrpc_mux`, `plugrpc_rpc`,
    /// ...) that emitted them.
    fn shows_targets(self) -> bool {
        matches!(self, LogLevel::Debug | LogLevel::Trace)
    }
}

/// `level` for everything, refined by `directives` (comma separated, bad
/// entries skipped).
pub fn build_filter(level: LogLevel, directives: Option<&str>) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.as_filter().into())
        .parse_lossy(directives.unwrap_or_default())
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let directives = std::env::var(LOG_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(build_filter(level, directives.as_deref()))
        .with_ansi(false)
        .with_thread_names(true)
        .with_target(level.shows_targets());

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().with_span_list(false).try_init();
        }
    }
}

/// Span wrapping everything one side does for a session.
pub fn session_span(side: &'static str, session: usize, codec: Codec) -> Span {
    info_span!("session", side, session, codec = codec.name())
}
