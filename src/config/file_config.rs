use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Settings read from an optional TOML file. Every field overrides the
/// matching command-line value when present.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub db_path: Option<String>,
    pub logging_level: Option<String>,
    pub required_fields: Option<Vec<String>>,
    pub default_history_limit: Option<usize>,
    pub max_results_per_job: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
