//! Logging setup for the harness binaries.
//!
//! Library code never installs a subscriber. Components receive a
//! [`tracing::Span`] at construction and emit their events with that span as
//! parent, so tests can hand them an isolated span and binaries decide the
//! output format here.

use std::path::PathBuf;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::EnvParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" | "jsonl" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `wqa_common=debug,info`.
    pub level: String,
    pub format: LogFormat,
    /// Optional file that receives a JSON copy of every event.
    pub file: Option<PathBuf>,
    pub stderr: bool,
}

impl LogConfig {
    /// Build from `WQA_LOG_LEVEL`, `WQA_LOG_FORMAT` and `WQA_LOG_FILE`.
    pub fn from_env(default_level: &str) -> anyhow::Result<Self> {
        Self::from_parser(&mut EnvParser::new(), default_level)
    }

    /// Like [`LogConfig::from_env`] over an explicit parser. A malformed
    /// variable is an error rather than a silent fallback.
    pub fn from_parser(env: &mut EnvParser, default_level: &str) -> anyhow::Result<Self> {
        let level = env
            .get_string("LOG_LEVEL")
            .unwrap_or_else(|| default_level.to_string());
        let format = env.get_log_format("LOG_FORMAT").unwrap_or(LogFormat::Pretty);
        let file = env.get_path("LOG_FILE");

        let errors = env.take_errors();
        if !errors.is_empty() {
            let listed: Vec<String> = errors.iter().map(ToString::to_string).collect();
            anyhow::bail!("invalid logging environment: {}", listed.join("; "));
        }
        Ok(Self {
            level,
            format,
            file,
            stderr: false,
        })
    }

    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// Keeps non-blocking writers alive; drop at process exit to flush.
#[must_use]
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<LoggingGuards> {
    let filter = EnvFilter::try_new(&config.level)
        .with_context(|| format!("invalid log filter '{}'", config.level))?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut guards = Vec::new();

    if config.stderr {
        let layer = match config.format {
            LogFormat::Pretty => fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .with_writer(std::io::stderr)
                .json()
                .with_current_span(true)
                .boxed(),
        };
        layers.push(layer);
    }

    if let Some(path) = &config.file {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create log directory {}", dir.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "wqa.log".into());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        layers.push(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json()
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(LoggingGuards { _guards: guards })
}
