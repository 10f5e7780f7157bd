//! Resize and Retention Policies
//!
//! Explicit policy values handed to the engine for one appliance and one
//! cycle. Nothing in the engine reads configuration from anywhere else.

use crate::capacity::convergence::{CAPACITY_STEP, GROWTH_STEP};
use crate::config::ApplianceConfig;
use serde::{Deserialize, Serialize};

/// Utilization above which a warning may be raised
pub const WARN_THRESHOLD_PERCENT: f64 = 75.0;

// =============================================================================
// Usage Band
// =============================================================================

/// Tri-state gate applied to every layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsageBand {
    /// At or below the warn threshold, or exactly at the resize threshold
    Healthy,
    /// Strictly between the warn and resize thresholds
    Warn,
    /// Strictly above the resize threshold
    MustGrow,
}

impl std::fmt::Display for UsageBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsageBand::Healthy => write!(f, "healthy"),
            UsageBand::Warn => write!(f, "warn"),
            UsageBand::MustGrow => write!(f, "must-grow"),
        }
    }
}

// =============================================================================
// Resize Policy
// =============================================================================

/// Thresholds and margins for the cascade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizePolicy {
    /// Hard trigger, percent
    pub resize_threshold: f64,
    /// Warn threshold, percent
    pub warn_threshold: f64,
    /// Emit warn records
    pub warn_notification: bool,
    /// Headroom a volume must keep over its reserved LUN footprint
    pub volume_headroom: f64,
    /// Safety margin applied to pool-level figures
    pub pool_margin: f64,
}

impl Default for ResizePolicy {
    fn default() -> Self {
        Self {
            resize_threshold: 80.0,
            warn_threshold: WARN_THRESHOLD_PERCENT,
            warn_notification: false,
            volume_headroom: GROWTH_STEP,
            pool_margin: CAPACITY_STEP,
        }
    }
}

impl ResizePolicy {
    /// Policy for one appliance
    pub fn for_appliance(config: &ApplianceConfig) -> Self {
        Self {
            resize_threshold: config.resize_threshold,
            warn_notification: config.warn_notification,
            ..Default::default()
        }
    }

    /// Classify a utilization percentage
    pub fn classify(&self, utilization_percent: f64) -> UsageBand {
        if utilization_percent > self.resize_threshold {
            UsageBand::MustGrow
        } else if utilization_percent > self.warn_threshold
            && utilization_percent < self.resize_threshold
        {
            UsageBand::Warn
        } else {
            UsageBand::Healthy
        }
    }

    /// A reserved footprint fits a volume when it leaves the headroom free
    pub fn volume_can_absorb(&self, footprint_bytes: f64, volume_size_bytes: f64) -> bool {
        footprint_bytes * self.volume_headroom < volume_size_bytes
    }

    /// A pool footprint fits the raw aggregate when it leaves the margin free
    pub fn pool_can_absorb(&self, footprint_gib: f64, aggregate_total_gib: f64) -> bool {
        footprint_gib * self.pool_margin < aggregate_total_gib
    }
}

// =============================================================================
// Retention Policy
// =============================================================================

/// Snapshot retention rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Delete eligible snapshots
    pub enabled: bool,
    /// Snapshots strictly older than this many days are eligible
    pub age_threshold_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            age_threshold_days: 30,
        }
    }
}

impl RetentionPolicy {
    /// Policy for one appliance
    pub fn for_appliance(config: &ApplianceConfig) -> Self {
        Self {
            enabled: config.enable_snapshot_deletion,
            age_threshold_days: i64::from(config.snapshot_age_threshold_in_days),
        }
    }

    /// Age test only; clone protection is checked separately
    pub fn is_expired(&self, age_days: i64) -> bool {
        age_days > self.age_threshold_days
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(threshold: f64) -> ResizePolicy {
        ResizePolicy {
            resize_threshold: threshold,
            warn_notification: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_bands() {
        let p = policy(90.0);
        assert_eq!(p.classify(10.0), UsageBand::Healthy);
        assert_eq!(p.classify(75.0), UsageBand::Healthy);
        assert_eq!(p.classify(80.0), UsageBand::Warn);
        assert_eq!(p.classify(89.99), UsageBand::Warn);
        assert_eq!(p.classify(90.0), UsageBand::Healthy);
        assert_eq!(p.classify(90.01), UsageBand::MustGrow);
        assert_eq!(p.classify(100.0), UsageBand::MustGrow);
    }

    #[test]
    fn test_low_threshold_has_no_warn_window() {
        let p = policy(70.0);
        assert_eq!(p.classify(72.0), UsageBand::MustGrow);
        assert_eq!(p.classify(69.0), UsageBand::Healthy);
    }

    #[test]
    fn test_pool_margin_boundary() {
        let p = policy(90.0);
        // 68% with margin is 74.8%, 69% is 75.9%
        assert_eq!(p.classify(68.0 * p.pool_margin), UsageBand::Healthy);
        assert_eq!(p.classify(69.0 * p.pool_margin), UsageBand::Warn);
    }

    #[test]
    fn test_feasibility_checks() {
        let p = policy(90.0);
        assert!(p.volume_can_absorb(180.0, 200.0));
        assert!(!p.volume_can_absorb(195.0, 200.0));
        assert!(p.pool_can_absorb(900.0, 1024.0));
        assert!(!p.pool_can_absorb(950.0, 1024.0));
    }

    #[test]
    fn test_retention_boundary_is_strict() {
        let r = RetentionPolicy {
            enabled: true,
            age_threshold_days: 30,
        };
        assert!(!r.is_expired(30));
        assert!(r.is_expired(31));
    }
}
