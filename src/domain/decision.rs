//! Decision records
//!
//! Every warning raised and every mutation attempted by the engine is
//! captured as a [`ResizeDecision`]. Notification sinks consume the records
//! grouped per appliance in a [`CycleReport`].

use crate::domain::ports::{GIB, MIB};
use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Decision Kind
// =============================================================================

/// Discriminator for decision records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    LunWarn,
    LunResize,
    VolWarn,
    VolResize,
    PoolWarn,
    PoolResizeBlocked,
    PoolResize,
    SnapshotDeleted,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::LunWarn => "lun_warn",
            DecisionKind::LunResize => "lun_resize",
            DecisionKind::VolWarn => "vol_warn",
            DecisionKind::VolResize => "vol_resize",
            DecisionKind::PoolWarn => "pool_warn",
            DecisionKind::PoolResizeBlocked => "pool_resize_blocked",
            DecisionKind::PoolResize => "pool_resize",
            DecisionKind::SnapshotDeleted => "snapshot_deleted",
        }
    }

    /// Warnings carry no mutation
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            DecisionKind::LunWarn | DecisionKind::VolWarn | DecisionKind::PoolWarn
        )
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Sizes
// =============================================================================

/// Unit a computed size is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    Bytes,
    Mib,
    Gib,
}

/// A computed target size in the unit the mutation was issued with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeValue {
    pub value: u64,
    pub unit: SizeUnit,
}

impl SizeValue {
    pub fn bytes(value: u64) -> Self {
        Self {
            value,
            unit: SizeUnit::Bytes,
        }
    }

    pub fn mib(value: u64) -> Self {
        Self {
            value,
            unit: SizeUnit::Mib,
        }
    }

    pub fn gib(value: u64) -> Self {
        Self {
            value,
            unit: SizeUnit::Gib,
        }
    }

    /// Size in GiB for display
    pub fn as_gib(&self) -> f64 {
        match self.unit {
            SizeUnit::Bytes => self.value as f64 / GIB as f64,
            SizeUnit::Mib => self.value as f64 * MIB as f64 / GIB as f64,
            SizeUnit::Gib => self.value as f64,
        }
    }
}

impl std::fmt::Display for SizeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.unit {
            SizeUnit::Gib => write!(f, "{} GB", self.value),
            _ => write!(f, "{:.2} GB", self.as_gib()),
        }
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// What happened to the mutation behind a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    /// The mutation completed (or was previewed in dry-run mode)
    Applied,
    /// The provider reported a failure
    Failed(String),
    /// The mutation was issued but completion could not be confirmed
    Unconfirmed(String),
    /// No mutation attached (warnings)
    Advisory,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Failed(_) => "failed",
            Outcome::Unconfirmed(_) => "unconfirmed",
            Outcome::Advisory => "advisory",
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }
}

impl From<&Error> for Outcome {
    /// A provider-reported rejection is a failure; anything that leaves the
    /// mutation's fate unknown is unconfirmed
    fn from(err: &Error) -> Self {
        match err {
            Error::JobFailed { message, .. } => Outcome::Failed(message.clone()),
            Error::Transport(_) | Error::JobTimeout { .. } | Error::JobCancelled { .. } => {
                Outcome::Unconfirmed(err.to_string())
            }
            other => Outcome::Failed(other.to_string()),
        }
    }
}

// =============================================================================
// Resize Decision
// =============================================================================

/// Details of a deleted snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDeletion {
    pub volume: String,
    pub age_days: i64,
    pub size_bytes: u64,
}

/// One normalized decision record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResizeDecision {
    pub kind: DecisionKind,
    /// LUN, volume or snapshot name; `None` for the pool itself
    pub subject: Option<String>,
    /// Observed utilization that triggered the decision
    pub utilization_percent: f64,
    /// Computed target size
    pub new_size: Option<SizeValue>,
    /// The intended resize is blocked behind a higher layer
    pub blocked: bool,
    pub outcome: Outcome,
    pub snapshot: Option<SnapshotDeletion>,
    pub recorded_at: DateTime<Utc>,
}

impl ResizeDecision {
    fn new(kind: DecisionKind, subject: Option<String>, utilization_percent: f64) -> Self {
        Self {
            kind,
            subject,
            utilization_percent,
            new_size: None,
            blocked: false,
            outcome: Outcome::Advisory,
            snapshot: None,
            recorded_at: Utc::now(),
        }
    }

    /// Warning for a LUN or volume inside the warn window
    pub fn warning(kind: DecisionKind, subject: impl Into<String>, utilization_percent: f64) -> Self {
        Self::new(kind, Some(subject.into()), utilization_percent)
    }

    /// Warning for the storage capacity as a whole
    pub fn pool_warning(utilization_percent: f64) -> Self {
        Self::new(DecisionKind::PoolWarn, None, utilization_percent)
    }

    /// An attempted LUN or volume resize
    pub fn resize(
        kind: DecisionKind,
        subject: impl Into<String>,
        utilization_percent: f64,
        new_size: SizeValue,
        outcome: Outcome,
    ) -> Self {
        Self {
            new_size: Some(new_size),
            outcome,
            ..Self::new(kind, Some(subject.into()), utilization_percent)
        }
    }

    /// An attempted storage-capacity quota increase from the pool pass
    pub fn pool_resize(utilization_percent: f64, new_capacity_gib: u64, outcome: Outcome) -> Self {
        Self {
            new_size: Some(SizeValue::gib(new_capacity_gib)),
            outcome,
            ..Self::new(DecisionKind::PoolResize, None, utilization_percent)
        }
    }

    /// A quota increase forced by a volume that could not grow
    pub fn pool_resize_blocked(
        volume: impl Into<String>,
        utilization_percent: f64,
        new_capacity_gib: u64,
        outcome: Outcome,
    ) -> Self {
        Self {
            new_size: Some(SizeValue::gib(new_capacity_gib)),
            blocked: true,
            outcome,
            ..Self::new(DecisionKind::PoolResizeBlocked, Some(volume.into()), utilization_percent)
        }
    }

    /// A snapshot deletion attempt
    pub fn snapshot_deleted(
        snapshot: impl Into<String>,
        deletion: SnapshotDeletion,
        outcome: Outcome,
    ) -> Self {
        Self {
            snapshot: Some(deletion),
            outcome,
            ..Self::new(DecisionKind::SnapshotDeleted, Some(snapshot.into()), 0.0)
        }
    }

    /// Subject name, or `"storage capacity"` for pool-level records
    pub fn subject_name(&self) -> &str {
        self.subject.as_deref().unwrap_or("storage capacity")
    }

    /// Human readable sentence describing the decision
    pub fn message(&self) -> String {
        let pct = self.utilization_percent;
        let size = self
            .new_size
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let name = self.subject_name();

        let mut message = match self.kind {
            DecisionKind::LunWarn => format!("LUN {} is {:.2}% used", name, pct),
            DecisionKind::VolWarn => format!("Volume {} is {:.2}% used", name, pct),
            DecisionKind::PoolWarn => format!(
                "Storage capacity is {:.2}% used including growth margin and will be resized once it crosses the resize threshold",
                pct
            ),
            DecisionKind::LunResize => {
                format!("LUN {} is {:.2}% used; resized to {}", name, pct, size)
            }
            DecisionKind::VolResize => {
                format!("Volume {} is {:.2}% used; resized to {}", name, pct, size)
            }
            DecisionKind::PoolResize => format!(
                "Storage capacity is {:.2}% used including growth margin; capacity resized to {}",
                pct, size
            ),
            DecisionKind::PoolResizeBlocked => format!(
                "Volume {} needs to be resized but storage capacity is out of space; capacity resized to {}. \
                 The volume is resized on a later run once the capacity update has completed",
                name, size
            ),
            DecisionKind::SnapshotDeleted => match &self.snapshot {
                Some(s) => format!(
                    "Snapshot {} of volume {} deleted at {} days old, freeing {} KB",
                    name,
                    s.volume,
                    s.age_days,
                    s.size_bytes / 1024
                ),
                None => format!("Snapshot {} deleted", name),
            },
        };

        match &self.outcome {
            Outcome::Failed(reason) => message.push_str(&format!(" (FAILED: {})", reason)),
            Outcome::Unconfirmed(reason) => {
                message.push_str(&format!(" (UNCONFIRMED: {})", reason))
            }
            _ => {}
        }
        message
    }
}

// =============================================================================
// Clone Lineage
// =============================================================================

/// A clone volume and the snapshot it depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneLineage {
    pub clone_volume: String,
    /// Volume that owns the parent snapshot
    pub parent_volume: String,
    pub parent_snapshot: String,
    pub snapshot_size_bytes: u64,
}

// =============================================================================
// Reports
// =============================================================================

/// Decisions produced for one appliance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplianceReport {
    pub appliance: String,
    pub decisions: Vec<ResizeDecision>,
    pub clone_lineage: Vec<CloneLineage>,
}

/// An appliance whose cycle was aborted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplianceFailure {
    pub appliance: String,
    pub error: String,
}

/// Everything that happened in one scheduled cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub appliances: Vec<ApplianceReport>,
    pub failures: Vec<ApplianceFailure>,
}

impl CycleReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            appliances: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Iterate every decision across appliances
    pub fn decisions(&self) -> impl Iterator<Item = &ResizeDecision> {
        self.appliances.iter().flat_map(|a| a.decisions.iter())
    }

    /// Whether there is anything worth notifying about
    pub fn has_content(&self) -> bool {
        !self.failures.is_empty()
            || self
                .appliances
                .iter()
                .any(|a| !a.decisions.is_empty() || !a.clone_lineage.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(DecisionKind::PoolResizeBlocked.as_str(), "pool_resize_blocked");
        assert_eq!(format!("{}", DecisionKind::SnapshotDeleted), "snapshot_deleted");
        assert!(DecisionKind::VolWarn.is_warning());
        assert!(!DecisionKind::VolResize.is_warning());
    }

    #[test]
    fn test_size_display() {
        assert_eq!(SizeValue::bytes(2 * GIB).to_string(), "2.00 GB");
        assert_eq!(SizeValue::mib(1536).to_string(), "1.50 GB");
        assert_eq!(SizeValue::gib(1100).to_string(), "1100 GB");
    }

    #[test]
    fn test_messages_reflect_outcome() {
        let ok = ResizeDecision::resize(
            DecisionKind::LunResize,
            "lun1",
            92.0,
            SizeValue::bytes(103 * GIB),
            Outcome::Applied,
        );
        assert_eq!(ok.message(), "LUN lun1 is 92.00% used; resized to 103.00 GB");

        let failed = ResizeDecision::resize(
            DecisionKind::VolResize,
            "vol1",
            91.5,
            SizeValue::mib(2048),
            Outcome::Failed("aggregate offline".into()),
        );
        assert!(failed.message().ends_with("(FAILED: aggregate offline)"));

        let blocked = ResizeDecision::pool_resize_blocked("vol1", 95.0, 1210, Outcome::Applied);
        assert!(blocked.blocked);
        assert!(blocked.message().contains("out of space"));
        assert_eq!(ResizeDecision::pool_warning(76.0).subject_name(), "storage capacity");
    }

    #[test]
    fn test_outcome_from_error() {
        let failed = Error::JobFailed {
            job: "cluster-job/1".into(),
            message: "volume is offline".into(),
        };
        assert_eq!(Outcome::from(&failed), Outcome::Failed("volume is offline".into()));

        let timeout = Error::JobTimeout {
            job: "cluster-job/2".into(),
            elapsed: std::time::Duration::from_secs(300),
        };
        assert_eq!(Outcome::from(&timeout).as_str(), "unconfirmed");

        let rejected = Error::api_status("/api/storage/luns/x", 400, "size too small");
        assert_eq!(Outcome::from(&rejected).as_str(), "failed");
    }

    #[test]
    fn test_report_content() {
        let mut report = CycleReport::new(Utc::now());
        assert!(!report.has_content());

        report.appliances.push(ApplianceReport {
            appliance: "fsx-a".into(),
            ..Default::default()
        });
        assert!(!report.has_content());

        report.appliances[0]
            .decisions
            .push(ResizeDecision::warning(DecisionKind::LunWarn, "lun1", 80.0));
        report.appliances[0]
            .decisions
            .push(ResizeDecision::warning(DecisionKind::LunWarn, "lun2", 81.0));
        assert!(report.has_content());
        assert_eq!(report.decisions().count(), 2);
    }
}
