//! Logging setup.
//!
//! Every crate logs under a `chatbridge::<area>` target. A preset picks the
//! baseline level per area, `--log area=level` refines it, and `RUST_LOG`
//! replaces the whole thing when set.

use std::collections::BTreeMap;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const TARGET_PREFIX: &str = "chatbridge";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: '{}'. Use 'text' or 'json'.", s)),
        }
    }
}

/// Baseline verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogPreset {
    /// Joins, leaves, reconnects and failures; no per-fragment noise.
    #[default]
    Production,
    Verbose,
    Debug,
    /// Includes heartbeat and per-fragment traces.
    Trace,
    /// Warnings and errors only.
    Quiet,
}

impl LogPreset {
    fn directives(self) -> Vec<&'static str> {
        match self {
            LogPreset::Production => vec![
                "chatbridge::startup=info",
                "chatbridge::session=info",
                "chatbridge::client=info",
                "chatbridge::channel=info",
                "chatbridge::channel::heartbeat=warn",
                "chatbridge::parser=warn",
                "chatbridge::http=info",
                "chatbridge::store=warn",
                "chatbridge::events=info",
                "chatbridge::api=info",
                "chatbridge::ws=info",
                "tower_http=warn",
            ],
            LogPreset::Verbose => vec![
                "chatbridge=info",
                "chatbridge::store=info",
                "tower_http=info",
            ],
            LogPreset::Debug => vec![
                "chatbridge=debug",
                "chatbridge::channel::heartbeat=info",
                "tower_http=debug",
            ],
            LogPreset::Trace => vec!["chatbridge=trace", "tower_http=trace"],
            LogPreset::Quiet => vec!["chatbridge=warn", "tower_http=error"],
        }
    }
}

/// Logging configuration built from CLI arguments.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub preset: LogPreset,
    /// Full target name to level, e.g. `chatbridge::channel` -> DEBUG.
    pub overrides: BTreeMap<String, Level>,
    pub format: LogFormat,
}

impl LogConfig {
    /// Most specific flag wins: quiet, then trace, debug, verbose.
    pub fn from_cli(
        verbose: bool,
        debug: bool,
        trace: bool,
        quiet: bool,
        log_overrides: Vec<String>,
        format: LogFormat,
    ) -> Self {
        let preset = match (quiet, trace, debug, verbose) {
            (true, ..) => LogPreset::Quiet,
            (_, true, ..) => LogPreset::Trace,
            (_, _, true, _) => LogPreset::Debug,
            (_, _, _, true) => LogPreset::Verbose,
            _ => LogPreset::Production,
        };

        let overrides = log_overrides
            .iter()
            .flat_map(|arg| arg.split(','))
            .filter_map(|part| {
                let (target, level) = part.split_once('=')?;
                let level = level.trim().parse::<Level>().ok()?;
                Some((qualify_target(target.trim()), level))
            })
            .collect();

        Self {
            preset,
            overrides,
            format,
        }
    }

    /// `RUST_LOG` if set, otherwise preset plus overrides.
    pub fn build_filter(&self) -> EnvFilter {
        if let Ok(env_filter) = EnvFilter::try_from_default_env() {
            return env_filter;
        }
        EnvFilter::try_new(self.directives()).unwrap_or_else(|_| EnvFilter::new("info"))
    }

    fn directives(&self) -> String {
        let mut directives: Vec<String> = self
            .preset
            .directives()
            .into_iter()
            .map(String::from)
            .collect();
        for (target, level) in &self.overrides {
            directives.push(format!("{}={}", target, level.as_str().to_ascii_lowercase()));
        }
        directives.join(",")
    }
}

/// `channel` -> `chatbridge::channel`; full names and `tower_http` pass through.
fn qualify_target(target: &str) -> String {
    if target == TARGET_PREFIX
        || target.starts_with("chatbridge::")
        || target.starts_with("tower_http")
    {
        target.to_string()
    } else {
        format!("{}::{}", TARGET_PREFIX, target)
    }
}

/// Install the global subscriber.
pub fn init(config: &LogConfig) {
    let filter = config.build_filter();

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).with_thread_ids(false))
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .init();
        }
    }
}
