//! Tracing bootstrap for hosts embedding the pipeline.
//!
//! The pipeline only emits events; a host calls [`init`] once to see them. Pipeline targets
//! are enabled at the configured level while dependencies stay at `warn`, unless
//! `READER_PIPELINE_LOG` or `RUST_LOG` carries an explicit directive.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const FILTER_ENV_VARS: [&str; 2] = ["READER_PIPELINE_LOG", "RUST_LOG"];
const FILE_PREFIX: &str = "reader-pipeline";

/// Every target the crate logs under.
pub const PIPELINE_TARGETS: &[&str] = &[
    "cache",
    "codec::image",
    "fs::folder",
    "memory",
    "pipeline::coordinator",
    "pipeline::loader",
    "pipeline::processor",
];

static LOG_HANDLE: OnceLock<LogHandle> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory for daily log files. `None` logs to stderr only.
    pub directory: Option<PathBuf>,
    /// Level applied to [`PIPELINE_TARGETS`].
    pub level: LevelFilter,
    /// Number of daily files kept on disk.
    pub retained_files: usize,
    /// Full filter directive overriding the per-target defaults.
    pub directive: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        let level = if cfg!(debug_assertions) { LevelFilter::DEBUG } else { LevelFilter::INFO };
        Self {
            directory: default_log_directory(),
            level,
            retained_files: 7,
            directive: directive_from_env(),
        }
    }
}

impl LogConfig {
    pub fn stderr_only() -> Self {
        Self { directory: None, ..Self::default() }
    }
}

/// Keeps the file writer alive for the life of the process.
#[derive(Debug)]
pub struct LogHandle {
    _guard: Option<WorkerGuard>,
    directory: Option<PathBuf>,
}

impl LogHandle {
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }
}

/// Install the global subscriber. The first successful call wins; later calls return the
/// handle it installed and ignore their configuration.
pub fn init(config: LogConfig) -> Result<&'static LogHandle> {
    if let Some(handle) = LOG_HANDLE.get() {
        return Ok(handle);
    }

    let handle = install(config)?;
    let _ = LOG_HANDLE.set(handle);
    LOG_HANDLE.get().ok_or_else(|| anyhow!("log handle was not stored"))
}

/// `warn` for everything, `level` for the pipeline's own targets.
pub fn default_directive(level: LevelFilter) -> String {
    let level = level.to_string().to_ascii_lowercase();
    let mut directive = String::from("warn");
    for target in PIPELINE_TARGETS {
        directive.push_str(&format!(",{target}={level}"));
    }
    directive
}

fn install(config: LogConfig) -> Result<LogHandle> {
    // `image` and friends log through the `log` facade.
    let _ = tracing_log::LogTracer::builder().with_max_level(log_level(config.level)).init();

    let directive = config.directive.unwrap_or_else(|| default_directive(config.level));
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("parsing log directive `{directive}`"))?;

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            fs::create_dir_all(directory)
                .with_context(|| format!("creating log directory at {}", directory.display()))?;
            let appender = RollingBuilder::new()
                .rotation(Rotation::DAILY)
                .filename_prefix(FILE_PREFIX)
                .filename_suffix("log")
                .max_log_files(config.retained_files.max(1))
                .build(directory)
                .context("creating rolling log appender")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(LogHandle { _guard: guard, directory: config.directory })
}

fn directive_from_env() -> Option<String> {
    FILTER_ENV_VARS
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .filter(|directive| !directive.trim().is_empty())
}

fn log_level(level: LevelFilter) -> log::LevelFilter {
    match level.into_level() {
        None => log::LevelFilter::Off,
        Some(level) if level == Level::ERROR => log::LevelFilter::Error,
        Some(level) if level == Level::WARN => log::LevelFilter::Warn,
        Some(level) if level == Level::INFO => log::LevelFilter::Info,
        Some(level) if level == Level::DEBUG => log::LevelFilter::Debug,
        Some(_) => log::LevelFilter::Trace,
    }
}

fn default_log_directory() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "ReaderPipeline", "reader-pipeline")
        .map(|dirs| dirs.data_dir().join("logs"))
}
