mod file_config;

pub use file_config::FileConfig;

use crate::migration_jobs::DEFAULT_REQUIRED_FIELDS;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const DEFAULT_MAX_RESULTS_PER_JOB: usize = 100;

/// Verbosity used when `LOG_LEVEL` is not set in the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn level_filter(&self) -> LevelFilter {
        match self {
            LoggingLevel::Error => LevelFilter::ERROR,
            LoggingLevel::Warn => LevelFilter::WARN,
            LoggingLevel::Info => LevelFilter::INFO,
            LoggingLevel::Debug => LevelFilter::DEBUG,
            LoggingLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub logging_level: LoggingLevel,
    pub required_fields: Vec<String>,
    pub default_history_limit: usize,
    pub max_results_per_job: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            logging_level: LoggingLevel::default(),
            required_fields: Vec::new(),
            default_history_limit: DEFAULT_HISTORY_LIMIT,
            max_results_per_job: DEFAULT_MAX_RESULTS_PER_JOB,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub logging_level: LoggingLevel,
    pub required_fields: Vec<String>,
    pub default_history_limit: usize,
    pub max_results_per_job: usize,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db-path or in config file")
            })?;

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }
        if db_path.is_dir() {
            bail!("db_path is a directory: {:?}", db_path);
        }

        let logging_level = match file.logging_level {
            Some(s) => match parse_logging_level(&s) {
                Some(level) => level,
                None => bail!("Invalid logging_level in config file: {}", s),
            },
            None => cli.logging_level,
        };

        let required_fields = file
            .required_fields
            .or_else(|| (!cli.required_fields.is_empty()).then(|| cli.required_fields.clone()))
            .unwrap_or_else(|| {
                DEFAULT_REQUIRED_FIELDS
                    .iter()
                    .map(|f| f.to_string())
                    .collect()
            });
        if required_fields.iter().any(|f| f.trim().is_empty()) {
            bail!("required_fields must not contain empty names");
        }

        let default_history_limit = file
            .default_history_limit
            .unwrap_or(cli.default_history_limit);
        if default_history_limit == 0 {
            bail!("default_history_limit must be greater than 0");
        }

        let max_results_per_job = file.max_results_per_job.unwrap_or(cli.max_results_per_job);
        if max_results_per_job == 0 {
            bail!("max_results_per_job must be greater than 0");
        }

        Ok(Self {
            db_path,
            logging_level,
            required_fields,
            default_history_limit,
            max_results_per_job,
        })
    }
}

/// Parses a logging level string, case insensitive.
fn parse_logging_level(s: &str) -> Option<LoggingLevel> {
    LoggingLevel::from_str(s, true).ok()
}
