//! Configuration model for a report-exchange deployment.
//!
//! One explicit struct, loaded from a TOML file and passed at construction.
//! There is no global mutable configuration state; components receive the
//! sections they need.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Error types for configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Identity of the local organization in the federation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationConfig {
    /// Organization identifier value, e.g. `Test_DIC1`
    pub identifier: String,
    /// Identifier of the local endpoint
    pub endpoint_identifier: String,
    /// Address of the local endpoint
    pub endpoint_address: String,
}

/// Counterpart selection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TargetConfig {
    /// Identifier of the parent consortium both parties belong to
    #[serde(default)]
    pub consortium_identifier: String,
    /// Configured default counterpart, consulted when the initiating task
    /// carries no explicit identifier
    #[serde(default)]
    pub default_hrp_identifier: Option<String>,
}

/// Report initiation cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// ISO-8601 duration between report sends
    #[serde(default = "default_timer_interval")]
    pub interval: String,
    /// Optional clock time (`HH:MM:SS`) of the first execution
    #[serde(default)]
    pub first_execution: Option<String>,
}

fn default_timer_interval() -> String {
    "P7D".to_string()
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            interval: default_timer_interval(),
            first_execution: None,
        }
    }
}

/// Bounded retry settings for collaborator calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_interval_secs")]
    pub interval_secs: u64,
}

fn default_retry_attempts() -> u32 {
    6
}

fn default_retry_interval_secs() -> u64 {
    300
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            interval_secs: default_retry_interval_secs(),
        }
    }
}

/// Validation and execution policy knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Query policy revision, `1.0` or `1.1`
    #[serde(default = "default_policy_version")]
    pub version: String,
    /// When true, a report whose every query errored fails the transaction
    /// instead of being sent with error outcomes only
    #[serde(default)]
    pub strict_execution: bool,
}

fn default_policy_version() -> String {
    "1.1".to_string()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            version: default_policy_version(),
            strict_execution: false,
        }
    }
}

/// SMTP settings; absent means notifications go to the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from: String,
    pub to: String,
}

fn default_smtp_port() -> u16 {
    587
}

/// Local clinical data store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DataStoreConfig {
    #[serde(default)]
    pub base_url: String,
}

/// Root configuration of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportConfig {
    pub organization: OrganizationConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub data_store: DataStoreConfig,
    #[serde(default)]
    pub mail: Option<MailConfig>,
}

impl ReportConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Parse and validate TOML configuration content.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings the type system cannot.
    pub fn validate(&self) -> Result<()> {
        if self.organization.identifier.is_empty() {
            return Err(ConfigError::validation("organization.identifier is empty"));
        }
        if self.organization.endpoint_address.is_empty() {
            return Err(ConfigError::validation(
                "organization.endpoint_address is empty",
            ));
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::validation("retry.attempts must be >= 1"));
        }
        match self.policy.version.as_str() {
            "1.0" | "1.1" => {}
            other => {
                return Err(ConfigError::validation(format!(
                    "policy.version must be 1.0 or 1.1, got {other}"
                )));
            }
        }
        if !self.timer.interval.starts_with('P') {
            return Err(ConfigError::validation(format!(
                "timer.interval must be an ISO-8601 duration, got {}",
                self.timer.interval
            )));
        }
        Ok(())
    }
}
