//! Retention Evaluator
//!
//! Decides which snapshots are old enough to delete, never touching a
//! snapshot that backs a clone volume, and reports clone lineage for the
//! notification.

use crate::capacity::jobs::JobWaiter;
use crate::capacity::policy::RetentionPolicy;
use crate::domain::decision::{CloneLineage, Outcome, ResizeDecision, SnapshotDeletion};
use crate::domain::ports::{ApplianceBackend, SnapshotRecord, VolumeUsage};
use crate::error::{ErrorDisposition, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

/// Retention outcome for one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionVerdict {
    /// Not old enough
    Keep { age_days: i64 },
    /// A clone volume was created from this snapshot
    BacksClone { clone_volume: String },
    /// Eligible for deletion
    Expired { age_days: i64 },
}

/// Evaluate one snapshot against the policy and the live clone references
pub fn evaluate(
    snapshot: &SnapshotRecord,
    volumes: &[VolumeUsage],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> RetentionVerdict {
    if let Some(clone) = volumes
        .iter()
        .find(|v| v.parent_snapshot.as_deref() == Some(snapshot.name.as_str()))
    {
        return RetentionVerdict::BacksClone {
            clone_volume: clone.name.clone(),
        };
    }

    let age_days = snapshot.age_days(now);
    if policy.is_expired(age_days) {
        RetentionVerdict::Expired { age_days }
    } else {
        RetentionVerdict::Keep { age_days }
    }
}

/// Pair every clone volume with the snapshot it was created from
pub fn clone_lineage(volumes: &[VolumeUsage], snapshots: &[SnapshotRecord]) -> Vec<CloneLineage> {
    volumes
        .iter()
        .filter(|v| v.is_clone)
        .flat_map(|clone| {
            let parent = clone.parent_snapshot.as_deref();
            snapshots
                .iter()
                .filter(move |s| Some(s.name.as_str()) == parent)
                .map(move |s| CloneLineage {
                    clone_volume: clone.name.clone(),
                    parent_volume: s.volume_name.clone(),
                    parent_snapshot: s.name.clone(),
                    snapshot_size_bytes: s.size_bytes,
                })
        })
        .collect()
}

// =============================================================================
// Snapshot Reaper
// =============================================================================

/// Lists snapshots and deletes the expired ones for one appliance
pub struct SnapshotReaper<'a> {
    appliance: &'a str,
    policy: &'a RetentionPolicy,
    backend: &'a dyn ApplianceBackend,
    jobs: &'a JobWaiter,
}

impl<'a> SnapshotReaper<'a> {
    pub fn new(
        appliance: &'a str,
        policy: &'a RetentionPolicy,
        backend: &'a dyn ApplianceBackend,
        jobs: &'a JobWaiter,
    ) -> Self {
        Self {
            appliance,
            policy,
            backend,
            jobs,
        }
    }

    /// Snapshots of every volume; a volume whose listing fails is skipped
    pub async fn collect(&self, volumes: &[VolumeUsage]) -> Result<Vec<SnapshotRecord>> {
        let mut snapshots = Vec::new();
        for volume in volumes {
            match self.backend.list_snapshots(volume).await {
                Ok(mut listed) => snapshots.append(&mut listed),
                Err(e) if e.disposition() == ErrorDisposition::AbortAppliance => return Err(e),
                Err(e) => {
                    warn!(appliance = %self.appliance, volume = %volume.name, "Skipping snapshots: {}", e);
                }
            }
        }
        Ok(snapshots)
    }

    /// Delete every expired snapshot, recording one decision per attempt
    pub async fn reap(
        &self,
        snapshots: &[SnapshotRecord],
        volumes: &[VolumeUsage],
        now: DateTime<Utc>,
    ) -> Result<Vec<ResizeDecision>> {
        let mut decisions = Vec::new();

        for snapshot in snapshots {
            let age_days = match evaluate(snapshot, volumes, self.policy, now) {
                RetentionVerdict::Keep { age_days } => {
                    debug!(appliance = %self.appliance, snapshot = %snapshot.name, "Keeping snapshot, {} days old", age_days);
                    continue;
                }
                RetentionVerdict::BacksClone { clone_volume } => {
                    debug!(appliance = %self.appliance, snapshot = %snapshot.name, clone = %clone_volume, "Keeping snapshot backing clone");
                    continue;
                }
                RetentionVerdict::Expired { age_days } => age_days,
            };

            let outcome = match self.delete(snapshot).await {
                Ok(()) => {
                    info!(
                        appliance = %self.appliance,
                        snapshot = %snapshot.name,
                        volume = %snapshot.volume_name,
                        "Deleted snapshot {} days old (threshold {} days)",
                        age_days, self.policy.age_threshold_days
                    );
                    Outcome::Applied
                }
                Err(e) if e.disposition() == ErrorDisposition::AbortAppliance => return Err(e),
                Err(e) => {
                    error!(appliance = %self.appliance, snapshot = %snapshot.name, "Snapshot deletion did not complete: {}", e);
                    Outcome::from(&e)
                }
            };

            decisions.push(ResizeDecision::snapshot_deleted(
                snapshot.name.clone(),
                SnapshotDeletion {
                    volume: snapshot.volume_name.clone(),
                    age_days,
                    size_bytes: snapshot.size_bytes,
                },
                outcome,
            ));
        }

        Ok(decisions)
    }

    async fn delete(&self, snapshot: &SnapshotRecord) -> Result<()> {
        let handle = self
            .backend
            .delete_snapshot(&snapshot.volume_id, &snapshot.id)
            .await?;
        self.jobs.wait(self.backend, &handle).await
    }
}
