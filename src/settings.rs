//! Layered job configuration.
//!
//! `config/defaults.toml` is compiled in. On top of it go an optional
//! `report_pipeline.toml` (or the file passed with `--config`) and then
//! `REPORTS__`-prefixed environment variables.

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_TOML: &str = include_str!("../config/defaults.toml");
const LOCAL_FILE: &str = "report_pipeline.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub log: LogSettings,
    pub extract: ExtractSettings,
    pub remaining: RemainingSettings,
    pub classifier: ClassifierSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// report_desc_master + report_master
    pub source: PathBuf,
    /// report_market_metrics
    pub metrics: PathBuf,
    /// classified copy with the industry taxonomy
    pub target: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl LogSettings {
    /// Configured log file, treating an empty path as "stderr only".
    pub fn file(&self) -> Option<&Path> {
        self.file
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractSettings {
    pub output_dir: PathBuf,
    /// Rows fetched per page.
    pub fetch_size: usize,
    /// Rows per numbered export file.
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemainingSettings {
    pub report_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub industry_ids: Vec<i64>,
    pub industry_name: String,
    pub sub_industries: String,
    pub limit: usize,
    pub log_dir: PathBuf,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("OPENAI_API_KEY missing")]
    MissingApiKey,
    #[error("classifier.industry_ids missing")]
    MissingIndustryIds,
    #[error("industry config missing (classifier.industry_name / classifier.sub_industries)")]
    MissingIndustry,
}

impl ClassifierSettings {
    pub fn sub_industry_list(&self) -> Vec<String> {
        self.sub_industries
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// API key from settings, falling back to `OPENAI_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()))
    }

    /// Everything the classify job needs before it touches a database.
    pub fn validate(&self) -> Result<String, SettingsError> {
        let key = self.resolved_api_key().ok_or(SettingsError::MissingApiKey)?;
        if self.industry_ids.is_empty() {
            return Err(SettingsError::MissingIndustryIds);
        }
        if self.industry_name.trim().is_empty() || self.sub_industry_list().is_empty() {
            return Err(SettingsError::MissingIndustry);
        }
        Ok(key)
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::from(p).format(FileFormat::Toml).required(true),
            None => File::with_name(LOCAL_FILE)
                .format(FileFormat::Toml)
                .required(false),
        };
        Config::builder()
            .add_source(File::from_str(DEFAULT_TOML, FileFormat::Toml))
            .add_source(file)
            .add_source(
                Environment::with_prefix("REPORTS")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("classifier.industry_ids")
                    .with_list_parse_key("remaining.report_ids")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Embedded defaults only.
    #[cfg(test)]
    pub fn defaults() -> Self {
        Config::builder()
            .add_source(File::from_str(DEFAULT_TOML, FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .unwrap()
    }
}
