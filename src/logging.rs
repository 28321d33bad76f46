//! Logging setup on top of `tracing-subscriber`.
//!
//! The dashboard owns the terminal, so in that mode events go to a log file
//! under the user's cache directory. The one-shot commands log to stderr.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Environment variable holding filter directives, e.g. `CNO_LOG=debug`
pub const LOG_ENV: &str = "CNO_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File,
}

/// Build the `EnvFilter`: `CNO_LOG` if set, otherwise `info` for this crate
/// with the HTTP stack quietened.
fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new("warn,cno_query=info,hyper=warn,reqwest=warn,yup_oauth2=warn")
    })
}

/// Location of the dashboard log file
pub fn log_file_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cno-query")
        .join("cno-query.log")
}

/// Install the global subscriber. Call once, before any event is emitted.
pub fn init(target: LogTarget) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(build_env_filter());

    match target {
        LogTarget::Stderr => builder
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install logger: {e}")),
        LogTarget::File => {
            let path = log_file_path();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory: {parent:?}"))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file: {path:?}"))?;

            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to install logger: {e}"))
        }
    }
}
