//! Tracing subscriber setup.

use crate::config::LoggerConfig;
use std::fs::OpenOptions;
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("failed to open log file {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to install subscriber: {0}")]
    Init(String),
}

/// Default directive when `RUST_LOG` is unset.
pub fn default_filter(level: &str) -> String {
    format!("previewer={level},tower_http={level}")
}

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over the configured level. `output` is either `stdout`
/// or a file path that is appended to.
pub fn init(cfg: &LoggerConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(&cfg.level).into());

    let installed = if cfg.output.is_empty() || cfg.output == "stdout" {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.output)
            .map_err(|source| LoggingError::Open {
                path: cfg.output.clone(),
                source,
            })?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init()
    };

    installed.map_err(|e| LoggingError::Init(e.to_string()))
}
