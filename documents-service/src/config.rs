//! Configuration for documents-service.
//!
//! Loaded from an optional `configuration` file and `APP__` prefixed
//! environment variables, e.g. `APP__DATABASE__URL`, `APP__COMMON__PORT`.

use secrecy::Secret;
use serde::Deserialize;
use service_core::config::Config as CommonConfig;
use service_core::error::AppError;

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default)]
    pub common: CommonConfig,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub compliance: ComplianceConfig,
    #[serde(default)]
    pub numbering: NumberingConfig,
    pub issuer: IssuerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Tax authority endpoint and credentials.
#[derive(Debug, Deserialize, Clone)]
pub struct ComplianceConfig {
    pub base_url: String,
    #[serde(default)]
    pub user_id: String,
    pub subscription_key: Secret<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Age after which an unfinished submission claim may be taken over.
    #[serde(default = "default_stale_pending_secs")]
    pub stale_pending_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NumberingConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl Default for NumberingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

/// The business issuing documents, as reported to the authority.
#[derive(Debug, Deserialize, Clone)]
pub struct IssuerConfig {
    pub vat_number: String,
    pub country: String,
    #[serde(default)]
    pub branch: u32,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_service_name() -> String {
    "documents-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_stale_pending_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    10
}

impl DocumentsConfig {
    pub fn load() -> Result<Self, AppError> {
        let config = service_core::config::builder().build()?;
        Ok(config.try_deserialize()?)
    }
}
