pub mod aggregation;
pub mod config;
pub mod credentials;
pub mod db;
pub mod errors;
pub mod hierarchy;
pub mod models;
pub mod policy;
pub mod service;

pub use crate::config::ServiceConfig;
pub use crate::errors::{AppError, AppResult};
pub use crate::service::ScorecardService;

use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. `RUST_LOG` wins over `log.level`.
pub fn init_tracing(config: &ServiceConfig) -> AppResult<()> {
    let writer = if config.log.to_file {
        let log_dir = config.log_dir();
        std::fs::create_dir_all(&log_dir)?;
        let file_appender = tracing_appender::rolling::daily(log_dir, "scorecard.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);
        BoxMakeWriter::new(non_blocking)
    } else {
        BoxMakeWriter::new(std::io::stderr)
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer);

    let installed = if config.log.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|error| AppError::Internal(error.to_string()))
}
