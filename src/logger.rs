//! Debug log for CLI runs
//!
//! A single tracing fmt layer writes to the file given with `--log-file`.
//! `tracing_subscriber`'s `try_init` also installs its `log` bridge, so
//! `log_*!` records emitted while a tender is being processed are prefixed
//! with the `tender{id=..}` span opened by the orchestrator.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{LazyLock, OnceLock};
use tracing_subscriber::{
    EnvFilter, Registry, fmt, fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Environment variable that enables HTTP stack debug output
pub const VERBOSE_ENV: &str = "PROCUREMENT_AI_VERBOSE";

const CRATE_TARGET: &str = "procurement_ai";
const HTTP_TARGETS: [&str; 5] = ["reqwest", "hyper", "hyper_util", "h2", "rustls"];

#[derive(Default)]
struct LogSink {
    enabled: bool,
    file: Option<File>,
}

static SINK: LazyLock<Mutex<LogSink>> = LazyLock::new(|| Mutex::new(LogSink::default()));

/// Writes formatted lines to the log file while logging is enabled
#[derive(Clone, Copy)]
struct SinkWriter;

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut sink = SINK.lock();
        if sink.enabled
            && let Some(file) = sink.file.as_mut()
        {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match SINK.lock().file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SinkWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

/// Filter used when `RUST_LOG` is unset
fn default_directives(verbose: bool) -> String {
    let mut directives = vec![format!("{CRATE_TARGET}=debug"), "warn".to_string()];
    if verbose {
        directives.extend(HTTP_TARGETS.iter().map(|target| format!("{target}=debug")));
    }
    directives.join(",")
}

fn verbose_from_env() -> bool {
    std::env::var_os(VERBOSE_ENV).is_some()
        || std::env::var("RUST_LOG").is_ok_and(|v| v.contains("debug") || v.contains("trace"))
}

fn install() -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose_from_env())));

    let layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(SinkWriter);

    Registry::default()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {e}"))
}

/// Install the global subscriber; later calls return the first outcome
pub fn init() -> anyhow::Result<()> {
    static INSTALLED: OnceLock<Result<(), String>> = OnceLock::new();
    INSTALLED
        .get_or_init(install)
        .clone()
        .map_err(anyhow::Error::msg)
}

pub fn enable_logging() {
    SINK.lock().enabled = true;
}

pub fn disable_logging() {
    SINK.lock().enabled = false;
}

/// Append to `path`, creating it if needed
pub fn set_log_file(path: impl AsRef<Path>) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    SINK.lock().file = Some(file);
    Ok(())
}

// Crate logging macros
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        log::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        log::error!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        log::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        log::warn!($($arg)*)
    };
}

// Structured events with fields
#[macro_export]
macro_rules! trace_info {
    ($($arg:tt)*) => {
        tracing::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! trace_warn {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}
