//! Tracing configuration and log routing.
//!
//! Logs go to stdout through a compact formatter and to a log file. When `CLAIMS_QA_LOG_FILE`
//! is set, logs are appended to that path; otherwise a file logger is created under
//! `logs/claims-qa.log`. The file layer writes through a non-blocking worker.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_ENV: &str = "CLAIMS_QA_LOG_FILE";
const LOG_DIR: &str = "logs";
const LOG_FILE_NAME: &str = "claims-qa.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where the file layer writes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogTarget {
    /// Explicit file from the environment, opened in append mode.
    File(PathBuf),
    /// Default file under a directory created on demand.
    Directory { dir: PathBuf, file_name: String },
}

impl LogTarget {
    fn from_override(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(path) if !path.is_empty() => Self::File(PathBuf::from(path)),
            _ => Self::Directory {
                dir: PathBuf::from(LOG_DIR),
                file_name: LOG_FILE_NAME.to_string(),
            },
        }
    }

    fn open(&self) -> std::io::Result<NonBlocking> {
        match self {
            Self::File(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                Ok(install_writer(file))
            }
            Self::Directory { dir, file_name } => {
                std::fs::create_dir_all(dir)?;
                Ok(install_writer(tracing_appender::rolling::never(
                    dir,
                    Path::new(file_name),
                )))
            }
        }
    }
}

/// Configure tracing subscribers for stdout and file logging.
///
/// `RUST_LOG` controls filtering and defaults to `info`. The worker guard is held in a static
/// so buffered file output is flushed for the whole process lifetime.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    let target = LogTarget::from_override(std::env::var(LOG_FILE_ENV).ok().as_deref());
    match target.open() {
        Ok(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).init();
        }
        Err(err) => {
            // The subscriber is not installed yet.
            eprintln!("File logging disabled ({target:?}): {err}");
            registry.init();
        }
    }
}

fn install_writer<W>(writer: W) -> NonBlocking
where
    W: std::io::Write + Send + 'static,
{
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);
    let _ = LOG_GUARD.set(guard);
    non_blocking
}
