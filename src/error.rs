//! Error types for the Capacity Autoscaler
//!
//! Provides structured error types for the management API adapters, job
//! tracking, the resize engine, and notification delivery.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the autoscaler
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("Management API transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Management API returned {status} for {endpoint}: {body}")]
    ApiStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Authentication to appliance {appliance} failed")]
    Authentication { appliance: String },

    #[error("Request signing failed: {0}")]
    Signing(String),

    // =========================================================================
    // Job Errors
    // =========================================================================
    #[error("Job {job} failed: {message}")]
    JobFailed { job: String, message: String },

    #[error("Job {job} did not complete within {elapsed:?}")]
    JobTimeout { job: String, elapsed: Duration },

    #[error("Wait for job {job} was cancelled")]
    JobCancelled { job: String },

    // =========================================================================
    // Engine Errors
    // =========================================================================
    #[error("Cannot evaluate {subject}: {reason}")]
    Precondition { subject: String, reason: String },

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Notification Errors
    // =========================================================================
    #[error("Notification via {sink} failed: {reason}")]
    Notification { sink: String, reason: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Timestamp parse error: {0}")]
    TimestampParse(#[from] chrono::ParseError),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the cycle does with an error raised while handling one item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Abandon the current LUN/volume/pool/snapshot step and continue
    SkipItem,
    /// Stop processing the current appliance; other appliances still run
    AbortAppliance,
    /// Log and carry on, the cycle outcome is unaffected
    Ignore,
}

impl Error {
    /// Determine what the cycle should do with this error
    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            // Without credentials nothing else on the appliance can succeed
            Error::Authentication { .. } | Error::Configuration(_) | Error::Signing(_) => {
                ErrorDisposition::AbortAppliance
            }

            // Shutdown requested; issue no further mutations
            Error::JobCancelled { .. } => ErrorDisposition::AbortAppliance,

            // Delivery problems never fail a cycle
            Error::Notification { .. } => ErrorDisposition::Ignore,

            // Everything else is scoped to the step that raised it
            _ => ErrorDisposition::SkipItem,
        }
    }

    /// Check if a later cycle may succeed without operator intervention
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(_) | Error::JobTimeout { .. } | Error::JobCancelled { .. } => true,
            Error::ApiStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Build an `ApiStatus` error, truncating very long response bodies
    pub fn api_status(endpoint: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        const MAX_BODY: usize = 512;
        let mut body = body.into();
        if body.len() > MAX_BODY {
            let mut cut = MAX_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
            body.push_str("...");
        }
        Error::ApiStatus {
            endpoint: endpoint.into(),
            status,
            body,
        }
    }

    /// Shorthand for a precondition failure on a named subject
    pub fn precondition(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Precondition {
            subject: subject.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for the autoscaler
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_dispositions() {
        let err = Error::Authentication {
            appliance: "fsx-prod".into(),
        };
        assert_eq!(err.disposition(), ErrorDisposition::AbortAppliance);

        let err = Error::JobFailed {
            job: "job-1".into(),
            message: "volume is offline".into(),
        };
        assert_eq!(err.disposition(), ErrorDisposition::SkipItem);

        let err = Error::Notification {
            sink: "webhook".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(err.disposition(), ErrorDisposition::Ignore);

        let err = Error::precondition("lun1", "size is zero");
        assert_eq!(err.disposition(), ErrorDisposition::SkipItem);
    }

    #[test]
    fn test_error_transient() {
        assert!(Error::api_status("/api/storage/luns", 503, "busy").is_transient());
        assert!(!Error::api_status("/api/storage/luns", 400, "bad field").is_transient());
        assert!(Error::JobTimeout {
            job: "job-1".into(),
            elapsed: Duration::from_secs(300),
        }
        .is_transient());
        assert!(!Error::Configuration("invalid".into()).is_transient());
    }

    #[test]
    fn test_api_status_truncates_body() {
        let err = Error::api_status("/api/cluster/jobs/x", 500, "x".repeat(2000));
        match err {
            Error::ApiStatus { body, .. } => {
                assert!(body.len() <= 515);
                assert!(body.ends_with("..."));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
