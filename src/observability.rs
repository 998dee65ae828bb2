//! Shared tracing configuration and the per-invocation log handle.
//!
//! Centralises the log target used by the crate so subscribers can filter
//! agent events, and owns the sink lifecycle: the handle is opened when the
//! process starts and closed (flushed) just before the exit code is returned.

use std::env;
use std::fmt;
use std::io::{self, ErrorKind};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::Level;
use tracing::dispatcher::DefaultGuard;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt as fmt_layer;
use tracing_subscriber::layer::SubscriberExt;

/// Target used by agent spans and logs.
pub(crate) const LOG_TARGET: &str = "pg_ha_agent::observability";

const LOGFILE_ENV: &str = "HA_LOGFILE";
const DEBUG_ENV: &str = "HA_debug";

/// Sink options read from the cluster manager's logging variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    /// Optional file that receives a copy of every log line.
    pub logfile: Option<Utf8PathBuf>,
    /// Enables DEBUG-level events.
    pub debug: bool,
}

impl LogSettings {
    /// Reads `HA_LOGFILE` and `HA_debug` from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let logfile = env::var(LOGFILE_ENV)
            .ok()
            .map(|raw| raw.trim().to_owned())
            .filter(|raw| !raw.is_empty())
            .map(Utf8PathBuf::from);
        let debug = env::var(DEBUG_ENV)
            .map(|raw| matches!(raw.trim(), "1" | "yes" | "true" | "on"))
            .unwrap_or(false);
        Self { logfile, debug }
    }

    const fn level(&self) -> Level {
        if self.debug { Level::DEBUG } else { Level::INFO }
    }
}

/// Installed log sink for one agent invocation.
///
/// Dropping the handle uninstalls the subscriber; call [`LogHandle::close`]
/// so the log file writer drains before the process exits.
#[must_use = "Hold the handle until the action has finished"]
pub struct LogHandle {
    file_guard: Option<WorkerGuard>,
    guard: DefaultGuard,
}

impl fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogHandle")
            .field("logfile", &self.file_guard.is_some())
            .finish_non_exhaustive()
    }
}

impl LogHandle {
    /// Installs a subscriber writing to stderr and, when configured, to the
    /// log file.
    pub fn open(settings: &LogSettings) -> Self {
        let (appender, open_error) = match settings.logfile.as_deref().map(file_appender) {
            Some(Ok(appender)) => (Some(appender), None),
            Some(Err(err)) => (None, Some(err)),
            None => (None, None),
        };
        let (file_layer, file_guard) = appender
            .map(|appender| {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt_layer::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(writer);
                (layer, guard)
            })
            .unzip();

        let stderr_layer = fmt_layer::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(io::stderr);
        let subscriber = tracing_subscriber::registry()
            .with(LevelFilter::from_level(settings.level()))
            .with(stderr_layer)
            .with(file_layer);
        let guard = tracing::subscriber::set_default(subscriber);

        if let (Some(err), Some(path)) = (open_error, settings.logfile.as_ref()) {
            tracing::warn!(
                target: LOG_TARGET,
                logfile = %path,
                error = %err,
                "failed to open log file; logging to stderr only"
            );
        }

        Self { file_guard, guard }
    }

    /// Drains the log file writer and uninstalls the subscriber.
    pub fn close(self) {
        let Self { file_guard, guard } = self;
        drop(file_guard);
        drop(guard);
    }
}

fn file_appender(path: &Utf8Path) -> io::Result<RollingFileAppender> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidInput,
            format!("{path} does not name a file"),
        )
    })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)
        .map_err(io::Error::other)
}
