use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for dealflow
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DealflowConfig {
    /// Observability settings
    pub observability: ObservabilityConfig,
    /// Approval transaction settings
    pub approval: ApprovalConfig,
    /// Database settings (optional; in-memory store when absent)
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable tracing initialization at startup
    pub tracing_enabled: bool,
    /// Log level
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            tracing_enabled: true,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Where generated approval artifacts are addressed
    pub artifact_base_uri: String,
    /// Timeout for a single artifact generation call, in seconds
    pub artifact_timeout_seconds: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            artifact_base_uri: "artifact://deals".to_string(),
            artifact_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl DealflowConfig {
    /// Load configuration with precedence:
    /// 1. Default values
    /// 2. Configuration file (dealflow.toml)
    /// 3. Environment variables (prefixed with DEALFLOW_)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder();

        if Path::new("dealflow.toml").exists() {
            builder = builder.add_source(File::with_name("dealflow"));
        }

        builder = builder.add_source(
            Environment::with_prefix("DEALFLOW")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to a TOML file (used by `dealflow init`).
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<DealflowConfig, anyhow::Error>> =
    std::sync::LazyLock::new(DealflowConfig::load);

/// Get the global configuration
pub fn config() -> Result<&'static DealflowConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}
