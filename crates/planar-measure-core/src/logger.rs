//! Minimal logger.
//!
//! Lines look like `[  1.234s  INFO solve] message`: elapsed time since
//! installation, level, and the pipeline component that emitted the record
//! (`core`, `solve`, `calib`, or the crate name for anything else). Levels can
//! be raised or lowered per component with a directive string such as
//! `warn,solve=debug`, read from [`LOG_ENV`] by [`LogFilter::from_env_or`].

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter};

/// Environment variable holding per-component log directives.
pub const LOG_ENV: &str = "PLANAR_MEASURE_LOG";

const CRATE_PREFIX: &str = "planar_measure_";

/// Pipeline component a log target belongs to: `planar_measure_solve::refine`
/// is `solve`, `tokio::runtime` is `tokio`.
pub fn component(target: &str) -> &str {
    let root = target.split("::").next().unwrap_or_default();
    root.strip_prefix(CRATE_PREFIX).unwrap_or(root)
}

/// Default level plus per-component overrides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFilter {
    default: LevelFilter,
    components: Vec<(String, LevelFilter)>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid log directive '{0}'")]
pub struct LogDirectiveError(pub String);

impl LogFilter {
    pub fn new(default: LevelFilter) -> Self {
        Self {
            default,
            components: Vec::new(),
        }
    }

    pub fn with_component(mut self, component: &str, level: LevelFilter) -> Self {
        self.components.retain(|(name, _)| name != component);
        self.components.push((component.to_string(), level));
        self
    }

    /// Directives from [`LOG_ENV`] if set and valid, otherwise `default` alone.
    /// A bare level in the variable replaces `default`.
    pub fn from_env_or(default: LevelFilter) -> Self {
        std::env::var(LOG_ENV)
            .ok()
            .and_then(|value| Self::parse_with_default(&value, default).ok())
            .unwrap_or_else(|| Self::new(default))
    }

    fn parse_with_default(s: &str, default: LevelFilter) -> Result<Self, LogDirectiveError> {
        let mut filter = Self::new(default);
        for directive in s.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            let invalid = || LogDirectiveError(directive.to_string());
            match directive.split_once('=') {
                Some((name, level)) => {
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(invalid());
                    }
                    let level = LevelFilter::from_str(level.trim()).map_err(|_| invalid())?;
                    filter = filter.with_component(name, level);
                }
                None => {
                    filter.default = LevelFilter::from_str(directive).map_err(|_| invalid())?;
                }
            }
        }
        Ok(filter)
    }

    pub fn level_for(&self, component: &str) -> LevelFilter {
        self.components
            .iter()
            .find(|(name, _)| name == component)
            .map_or(self.default, |(_, level)| *level)
    }

    /// Most verbose level any component can reach.
    pub fn max_level(&self) -> LevelFilter {
        self.components
            .iter()
            .map(|(_, level)| *level)
            .fold(self.default, Ord::max)
    }

    pub fn enabled(&self, level: Level, target: &str) -> bool {
        level <= self.level_for(component(target))
    }
}

impl FromStr for LogFilter {
    type Err = LogDirectiveError;

    /// `warn,solve=debug`: a bare level sets the default (`error` when absent).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with_default(s, LevelFilter::Error)
    }
}

fn format_line(elapsed: f64, level: Level, component: &str, args: &fmt::Arguments<'_>) -> String {
    format!("[{elapsed:7.3}s {level:>5} {component}] {args}")
}

struct SimpleLogger {
    filter: LogFilter,
    started: Instant,
}

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.filter.enabled(metadata.level(), metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let target = component(record.target());
        let line = format_line(elapsed, record.level(), target, record.args());
        let _ = writeln!(std::io::stderr(), "{line}");
    }

    fn flush(&self) {}
}

static LOGGER: OnceLock<SimpleLogger> = OnceLock::new();

/// Install the stderr logger with a single level for every component.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    init_with_filter(LogFilter::new(level))
}

/// Install the stderr logger with per-component levels.
///
/// Calling this more than once is a no-op after the first successful
/// initialization.
pub fn init_with_filter(filter: LogFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let max_level = filter.max_level();
        let logger = LOGGER.get_or_init(|| SimpleLogger {
            filter,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(max_level);
    }
    Ok(())
}

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Span close events are emitted so solve durations show up in the output.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let _ = tracing_fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .json()
            .flatten_event(true)
            .finish()
            .try_init();
    } else {
        let _ = tracing_fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(tracing_fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}
