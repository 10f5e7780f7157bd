//! Configuration
//!
//! YAML settings describing the monitored appliances, notification sinks and
//! job polling. Loaded once at startup and validated before any cycle runs.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::warn;

// =============================================================================
// Settings
// =============================================================================

/// Top-level settings file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Appliances processed each cycle, in order
    pub appliances: Vec<ApplianceConfig>,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub job_poll: JobPollConfig,
}

impl Settings {
    /// Parse settings from YAML text
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.appliances.is_empty() {
            return Err(Error::Configuration(
                "At least one appliance must be configured".into(),
            ));
        }

        let mut names = BTreeSet::new();
        for appliance in &self.appliances {
            appliance.validate()?;
            if !names.insert(appliance.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "Duplicate appliance name: {}",
                    appliance.name
                )));
            }
        }

        self.job_poll.validate()
    }
}

// =============================================================================
// Appliance Configuration
// =============================================================================

/// One monitored appliance / file system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplianceConfig {
    /// Display name
    pub name: String,
    /// File-system identifier used by the capacity API
    pub file_system_id: String,
    /// Management endpoint (host or host:port) of the storage REST API
    pub management_endpoint: String,
    /// Management API user
    #[serde(default = "default_username")]
    pub username: String,
    /// Environment variable holding the management API password
    pub password_env: String,
    /// Region of the file-system capacity API
    #[serde(default = "default_region")]
    pub region: String,
    /// Aggregate whose raw capacity bounds the volumes
    #[serde(default = "default_aggregate_name")]
    pub aggregate_name: String,
    /// Accept self-signed management certificates
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
    /// Per-request timeout against the management API
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Utilization percent above which a layer is grown
    #[serde(default = "default_resize_threshold")]
    pub resize_threshold: f64,
    /// Emit warnings between 75% and the resize threshold
    #[serde(default)]
    pub warn_notification: bool,
    /// Delete expired snapshots
    #[serde(default)]
    pub enable_snapshot_deletion: bool,
    /// Snapshots older than this are eligible for deletion
    #[serde(default = "default_snapshot_age_threshold")]
    pub snapshot_age_threshold_in_days: u32,
}

impl ApplianceConfig {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Configuration("Appliance name must not be empty".into()));
        }
        if self.management_endpoint.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "Appliance {}: management_endpoint must not be empty",
                self.name
            )));
        }
        if !(self.resize_threshold > 0.0 && self.resize_threshold < 100.0) {
            return Err(Error::Configuration(format!(
                "Appliance {}: resize_threshold must be between 0 and 100, got {}",
                self.name, self.resize_threshold
            )));
        }
        if self.resize_threshold <= crate::capacity::policy::WARN_THRESHOLD_PERCENT {
            warn!(
                appliance = %self.name,
                resize_threshold = self.resize_threshold,
                "Resize threshold is at or below the warn threshold; no warnings will be raised"
            );
        }
        Ok(())
    }

    /// Resolve the management password from the environment
    pub fn password(&self) -> Result<String> {
        std::env::var(&self.password_env).map_err(|_| {
            Error::Configuration(format!(
                "Appliance {}: environment variable {} is not set",
                self.name, self.password_env
            ))
        })
    }
}

fn default_username() -> String {
    "fsxadmin".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_aggregate_name() -> String {
    "aggr1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_resize_threshold() -> f64 {
    80.0
}

fn default_snapshot_age_threshold() -> u32 {
    30
}

// =============================================================================
// Notification Configuration
// =============================================================================

/// Where cycle reports are delivered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Write the report to the log
    #[serde(default = "default_true")]
    pub log: bool,
    /// POST the report as JSON to this URL
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Environment variable holding the HMAC key used to sign webhook bodies
    #[serde(default)]
    pub webhook_secret_env: Option<String>,
    /// Subject line attached to the report
    #[serde(default = "default_subject")]
    pub subject: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            log: true,
            webhook_url: None,
            webhook_secret_env: None,
            subject: default_subject(),
        }
    }
}

impl NotificationConfig {
    /// Resolve the webhook signing key, if one is configured
    pub fn webhook_secret(&self) -> Result<Option<String>> {
        match &self.webhook_secret_env {
            Some(name) => std::env::var(name).map(Some).map_err(|_| {
                Error::Configuration(format!(
                    "notification: environment variable {} is not set",
                    name
                ))
            }),
            None => Ok(None),
        }
    }
}

fn default_subject() -> String {
    "Storage Capacity Monitoring Notification".to_string()
}

// =============================================================================
// Job Poll Configuration
// =============================================================================

/// Cadence and bound of job-status polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPollConfig {
    pub interval_secs: u64,
    pub max_interval_secs: u64,
    /// 1.0 keeps the interval fixed
    pub multiplier: f64,
    pub timeout_secs: u64,
}

impl Default for JobPollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            max_interval_secs: 30,
            multiplier: 1.0,
            timeout_secs: 300,
        }
    }
}

impl JobPollConfig {
    fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(Error::Configuration(
                "job_poll.interval_secs must be positive".into(),
            ));
        }
        if self.timeout_secs < self.interval_secs {
            return Err(Error::Configuration(
                "job_poll.timeout_secs must not be shorter than interval_secs".into(),
            ));
        }
        if self.multiplier < 1.0 {
            return Err(Error::Configuration(
                "job_poll.multiplier must be at least 1.0".into(),
            ));
        }
        Ok(())
    }
}
