// ⚙️ Configuration - JSON settings with defaults for every field
//
// Lookup order for the binaries: $PROVIDER_FUNDS_CONFIG, then
// ./provider-funds.json, then built-in defaults.

use crate::estimator::{EstimatorConfig, FundEstimator};
use crate::normalizer::SpecialtyMap;
use crate::ranker::{SuggestionRanker, DEFAULT_SUGGESTION_LIMIT, MIN_QUERY_CHARS};
use crate::reports::ReportPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

pub const CONFIG_ENV_VAR: &str = "PROVIDER_FUNDS_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "provider-funds.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: String,

    /// Specialty variant mapping; built-in table when unset
    pub specialty_map_path: Option<String>,

    /// EnvFilter directive ("info", "provider_funds=debug")
    pub log_level: String,

    pub server_bind: String,

    /// Mixed into submitter fingerprints
    pub fingerprint_salt: String,

    pub suggestion_limit: usize,
    pub min_query_len: usize,
    pub report_cooldown_hours: i64,

    pub estimator: EstimatorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: "provider_funds.db".to_string(),
            specialty_map_path: None,
            log_level: "info".to_string(),
            server_bind: "127.0.0.1:3000".to_string(),
            fingerprint_salt: "provider-funds".to_string(),
            suggestion_limit: DEFAULT_SUGGESTION_LIMIT,
            min_query_len: MIN_QUERY_CHARS,
            report_cooldown_hours: 24,
            estimator: EstimatorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load and validate a config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config JSON: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Resolve the config the binaries run with
    pub fn load() -> Result<Self> {
        match Self::locate() {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        local.exists().then_some(local)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_path.trim().is_empty() {
            anyhow::bail!("database_path must be non-empty");
        }
        if self.suggestion_limit == 0 {
            anyhow::bail!("suggestion_limit must be greater than zero");
        }
        if self.report_cooldown_hours < 0 {
            anyhow::bail!("report_cooldown_hours must not be negative");
        }
        let est = &self.estimator;
        if !(est.window_hours > 0.0) {
            anyhow::bail!("estimator.window_hours must be greater than zero");
        }
        if !(0.0..1.0).contains(&est.available_ratio_threshold) {
            anyhow::bail!("estimator.available_ratio_threshold must be in [0, 1)");
        }
        if !(est.pull_margin > 0.0) {
            anyhow::bail!("estimator.pull_margin must be greater than zero");
        }
        Ok(())
    }

    /// Specialty mapping from the configured file, or the built-in table
    pub fn specialty_map(&self) -> Result<SpecialtyMap> {
        match &self.specialty_map_path {
            Some(path) => SpecialtyMap::from_file(path),
            None => Ok(SpecialtyMap::with_defaults()),
        }
    }

    pub fn estimator(&self) -> FundEstimator {
        FundEstimator::new(self.estimator.clone())
    }

    pub fn ranker(&self) -> SuggestionRanker {
        SuggestionRanker::new(self.suggestion_limit, self.min_query_len)
    }

    pub fn report_policy(&self) -> ReportPolicy {
        ReportPolicy::new(self.report_cooldown_hours)
    }
}

/// Install the fmt subscriber; RUST_LOG wins over the configured level
pub fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.suggestion_limit, 8);
        assert_eq!(config.min_query_len, 2);
        assert_eq!(config.report_cooldown_hours, 24);
        assert_eq!(config.estimator.window_hours, 48.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_temp(r#"{"database_path": "/tmp/x.db", "estimator": {"pull_margin": 2.0}}"#);
        let config = AppConfig::from_file(file.path()).unwrap();

        assert_eq!(config.database_path, "/tmp/x.db");
        assert_eq!(config.estimator.pull_margin, 2.0);
        assert_eq!(config.estimator.available_ratio_threshold, 0.15);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = write_temp(r#"{"suggestion_limit": 0}"#);
        assert!(AppConfig::from_file(file.path()).is_err());

        let file = write_temp(r#"{"estimator": {"window_hours": -1}}"#);
        assert!(AppConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_malformed_json_rejected() {
        let file = write_temp("{ not json");
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config JSON"));
    }

    #[test]
    fn test_missing_file_rejected() {
        assert!(AppConfig::from_file("/nonexistent/provider-funds.json").is_err());
    }

    #[test]
    fn test_specialty_map_from_config() {
        let map_file = write_temp(r#"{"variants": {"orl": "otorinolaringologie"}, "categories": {}}"#);
        let config = AppConfig {
            specialty_map_path: Some(map_file.path().display().to_string()),
            ..AppConfig::default()
        };

        let map = config.specialty_map().unwrap();
        assert_eq!(map.normalize("ORL").as_deref(), Some("otorinolaringologie"));
    }

    #[test]
    fn test_component_builders_use_settings() {
        let config = AppConfig {
            suggestion_limit: 3,
            report_cooldown_hours: 6,
            ..AppConfig::default()
        };
        assert_eq!(config.ranker().limit, 3);
        assert_eq!(config.report_policy().cooldown, chrono::Duration::hours(6));
        assert_eq!(config.estimator().config().window_hours, 48.0);
    }
}
