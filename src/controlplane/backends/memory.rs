//! In-Memory Appliance
//!
//! A self-contained [`ApplianceBackend`] holding LUNs, volumes, snapshots and
//! pool figures in memory. Mutations are journaled and take effect when their
//! job reports success, so the cascade can be driven end to end without a
//! storage cluster. Failures are scripted per object.

use crate::domain::ports::{
    ApplianceBackend, CapacityMutator, JobHandle, JobMonitor, JobSource, JobStatus, LunUsage,
    PoolCapacity, SnapshotRecord, UsageCollector, UsageSnapshot, VolumeUsage, GIB, MIB,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

// =============================================================================
// Journal
// =============================================================================

/// A mutation request received by the appliance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    LunResized { lun_id: String, new_size_bytes: u64 },
    VolumeResized { volume_id: String, new_size_mib: u64 },
    StorageCapacityResized { new_capacity_gib: u64 },
    SnapshotDeleted { volume_id: String, snapshot_id: String },
}

#[derive(Debug, Clone)]
struct ScriptedJob {
    pending_polls: u32,
    status: JobStatus,
    effect: Mutation,
}

#[derive(Debug, Default)]
struct FailureScript {
    auth: bool,
    rejected_luns: BTreeMap<String, String>,
    volume_jobs: BTreeMap<String, String>,
    capacity_job: Option<String>,
    snapshot_jobs: BTreeMap<String, String>,
}

// =============================================================================
// In-Memory Appliance
// =============================================================================

/// Appliance backed by in-process state
pub struct InMemoryAppliance {
    name: String,
    luns: RwLock<BTreeMap<String, LunUsage>>,
    volumes: RwLock<BTreeMap<String, VolumeUsage>>,
    snapshots: RwLock<BTreeMap<String, SnapshotRecord>>,
    pool: RwLock<PoolCapacity>,
    jobs: RwLock<BTreeMap<String, ScriptedJob>>,
    journal: RwLock<Vec<Mutation>>,
    failures: RwLock<FailureScript>,
    /// Polls answered with `Pending` before a job settles
    pending_polls: u32,
    next_job: AtomicU64,
}

impl InMemoryAppliance {
    /// Create an empty appliance with the given pool figures
    pub fn new(name: impl Into<String>, pool: PoolCapacity) -> Self {
        Self {
            name: name.into(),
            luns: RwLock::new(BTreeMap::new()),
            volumes: RwLock::new(BTreeMap::new()),
            snapshots: RwLock::new(BTreeMap::new()),
            pool: RwLock::new(pool),
            jobs: RwLock::new(BTreeMap::new()),
            journal: RwLock::new(Vec::new()),
            failures: RwLock::new(FailureScript::default()),
            pending_polls: 1,
            next_job: AtomicU64::new(1),
        }
    }

    pub fn with_lun(mut self, lun: LunUsage) -> Self {
        self.luns.get_mut().insert(lun.id.clone(), lun);
        self
    }

    pub fn with_volume(mut self, volume: VolumeUsage) -> Self {
        self.volumes.get_mut().insert(volume.id.clone(), volume);
        self
    }

    pub fn with_snapshot(mut self, snapshot: SnapshotRecord) -> Self {
        self.snapshots.get_mut().insert(snapshot.id.clone(), snapshot);
        self
    }

    /// Number of `Pending` answers before each job settles
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Reject every query as unauthenticated
    pub fn fail_authentication(mut self) -> Self {
        self.failures.get_mut().auth = true;
        self
    }

    /// Reject resizes of one LUN with an API error
    pub fn reject_lun_resize(mut self, lun_id: &str, reason: &str) -> Self {
        self.failures
            .get_mut()
            .rejected_luns
            .insert(lun_id.to_string(), reason.to_string());
        self
    }

    /// Let resize jobs of one volume end in failure
    pub fn fail_volume_job(mut self, volume_id: &str, message: &str) -> Self {
        self.failures
            .get_mut()
            .volume_jobs
            .insert(volume_id.to_string(), message.to_string());
        self
    }

    /// Let storage-capacity updates end in failure
    pub fn fail_capacity_job(mut self, message: &str) -> Self {
        self.failures.get_mut().capacity_job = Some(message.to_string());
        self
    }

    /// Let deletion of one snapshot end in failure
    pub fn fail_snapshot_job(mut self, snapshot_id: &str, message: &str) -> Self {
        self.failures
            .get_mut()
            .snapshot_jobs
            .insert(snapshot_id.to_string(), message.to_string());
        self
    }

    /// Mutations received so far, in order
    pub fn journal(&self) -> Vec<Mutation> {
        self.journal.read().clone()
    }

    pub fn lun(&self, lun_id: &str) -> Option<LunUsage> {
        self.luns.read().get(lun_id).cloned()
    }

    pub fn volume(&self, volume_id: &str) -> Option<VolumeUsage> {
        self.volumes.read().get(volume_id).cloned()
    }

    pub fn pool(&self) -> PoolCapacity {
        *self.pool.read()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.read().len()
    }

    fn check_auth(&self) -> Result<()> {
        if self.failures.read().auth {
            return Err(Error::Authentication {
                appliance: self.name.clone(),
            });
        }
        Ok(())
    }

    fn start_job(
        &self,
        source: JobSource,
        effect: Mutation,
        failure: Option<String>,
    ) -> JobHandle {
        let id = format!("job-{}", self.next_job.fetch_add(1, Ordering::SeqCst));
        self.journal.write().push(effect.clone());

        let status = match failure {
            Some(message) => JobStatus::Failure(message),
            None => JobStatus::Success,
        };
        self.jobs.write().insert(
            id.clone(),
            ScriptedJob {
                pending_polls: self.pending_polls,
                status,
                effect,
            },
        );

        debug!("In-memory appliance {} started {}", self.name, id);
        JobHandle { id, source }
    }

    fn apply(&self, effect: &Mutation) {
        match effect {
            Mutation::LunResized {
                lun_id,
                new_size_bytes,
            } => {
                if let Some(lun) = self.luns.write().get_mut(lun_id) {
                    lun.size_bytes = *new_size_bytes;
                }
            }
            Mutation::VolumeResized {
                volume_id,
                new_size_mib,
            } => {
                if let Some(volume) = self.volumes.write().get_mut(volume_id) {
                    volume.resize_to(new_size_mib * MIB);
                }
            }
            Mutation::StorageCapacityResized { new_capacity_gib } => {
                let mut pool = self.pool.write();
                let grown = new_capacity_gib.saturating_sub(pool.storage_capacity_gib);
                pool.storage_capacity_gib = *new_capacity_gib;
                pool.aggregate_total_bytes += grown * GIB;
            }
            Mutation::SnapshotDeleted { snapshot_id, .. } => {
                self.snapshots.write().remove(snapshot_id);
            }
        }
    }
}

#[async_trait]
impl UsageCollector for InMemoryAppliance {
    async fn fetch_usage(&self) -> Result<UsageSnapshot> {
        self.check_auth()?;
        Ok(UsageSnapshot {
            luns: self.luns.read().values().cloned().collect(),
            volumes: self.volumes.read().values().cloned().collect(),
            pool: *self.pool.read(),
            collected_at: Utc::now(),
        })
    }

    async fn list_snapshots(&self, volume: &VolumeUsage) -> Result<Vec<SnapshotRecord>> {
        self.check_auth()?;
        Ok(self
            .snapshots
            .read()
            .values()
            .filter(|s| s.volume_id == volume.id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CapacityMutator for InMemoryAppliance {
    async fn resize_lun(&self, lun_id: &str, new_size_bytes: u64) -> Result<()> {
        self.check_auth()?;
        if !self.luns.read().contains_key(lun_id) {
            return Err(Error::ResourceNotFound {
                kind: "lun".into(),
                name: lun_id.to_string(),
            });
        }

        let effect = Mutation::LunResized {
            lun_id: lun_id.to_string(),
            new_size_bytes,
        };
        self.journal.write().push(effect.clone());

        if let Some(reason) = self.failures.read().rejected_luns.get(lun_id) {
            return Err(Error::api_status(
                format!("/api/storage/luns/{}", lun_id),
                400,
                reason.clone(),
            ));
        }

        self.apply(&effect);
        Ok(())
    }

    async fn resize_volume(&self, volume_id: &str, new_size_mib: u64) -> Result<JobHandle> {
        self.check_auth()?;
        if !self.volumes.read().contains_key(volume_id) {
            return Err(Error::ResourceNotFound {
                kind: "volume".into(),
                name: volume_id.to_string(),
            });
        }

        let failure = self.failures.read().volume_jobs.get(volume_id).cloned();
        let effect = Mutation::VolumeResized {
            volume_id: volume_id.to_string(),
            new_size_mib,
        };
        Ok(self.start_job(JobSource::Cluster, effect, failure))
    }

    async fn resize_storage_capacity(&self, new_capacity_gib: u64) -> Result<JobHandle> {
        self.check_auth()?;
        let failure = self.failures.read().capacity_job.clone();
        let effect = Mutation::StorageCapacityResized { new_capacity_gib };
        Ok(self.start_job(JobSource::FileSystem, effect, failure))
    }

    async fn delete_snapshot(&self, volume_id: &str, snapshot_id: &str) -> Result<JobHandle> {
        self.check_auth()?;
        if !self.snapshots.read().contains_key(snapshot_id) {
            return Err(Error::ResourceNotFound {
                kind: "snapshot".into(),
                name: snapshot_id.to_string(),
            });
        }

        let failure = self
            .failures
            .read()
            .snapshot_jobs
            .get(snapshot_id)
            .cloned();
        let effect = Mutation::SnapshotDeleted {
            volume_id: volume_id.to_string(),
            snapshot_id: snapshot_id.to_string(),
        };
        Ok(self.start_job(JobSource::Cluster, effect, failure))
    }
}

#[async_trait]
impl JobMonitor for InMemoryAppliance {
    async fn poll_job(&self, handle: &JobHandle) -> Result<JobStatus> {
        self.check_auth()?;

        let settled = {
            let mut jobs = self.jobs.write();
            let job = jobs.get_mut(&handle.id).ok_or_else(|| Error::ResourceNotFound {
                kind: "job".into(),
                name: handle.id.clone(),
            })?;

            if job.pending_polls > 0 {
                job.pending_polls -= 1;
                return Ok(JobStatus::Pending);
            }
            job.clone()
        };

        if settled.status == JobStatus::Success {
            // Applied once; a settled job is forgotten
            if self.jobs.write().remove(&handle.id).is_some() {
                self.apply(&settled.effect);
            }
        }
        Ok(settled.status)
    }
}

impl ApplianceBackend for InMemoryAppliance {
    fn backend_name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Provisioning;
    use assert_matches::assert_matches;

    fn appliance() -> InMemoryAppliance {
        InMemoryAppliance::new(
            "fsx-test",
            PoolCapacity {
                aggregate_total_bytes: 1024 * GIB,
                storage_capacity_gib: 1024,
            },
        )
        .with_volume(VolumeUsage {
            id: "vol-1".into(),
            name: "vol1".into(),
            size_bytes: 100 * GIB,
            available_bytes: 10 * GIB,
            provisioning: Provisioning::Thin,
            is_clone: false,
            parent_snapshot: None,
        })
    }

    #[tokio::test]
    async fn test_volume_resize_applies_on_success() {
        let appliance = appliance();
        let handle = appliance.resize_volume("vol-1", 150 * 1024).await.unwrap();
        assert_eq!(handle.source, JobSource::Cluster);

        assert_eq!(appliance.poll_job(&handle).await.unwrap(), JobStatus::Pending);
        assert_eq!(appliance.volume("vol-1").unwrap().size_bytes, 100 * GIB);

        assert_eq!(appliance.poll_job(&handle).await.unwrap(), JobStatus::Success);
        let volume = appliance.volume("vol-1").unwrap();
        assert_eq!(volume.size_bytes, 150 * GIB);
        assert_eq!(volume.used_bytes(), 90 * GIB);
    }

    #[tokio::test]
    async fn test_scripted_volume_failure() {
        let appliance = appliance().with_pending_polls(0).fail_volume_job("vol-1", "offline");
        let handle = appliance.resize_volume("vol-1", 200 * 1024).await.unwrap();
        assert_eq!(
            appliance.poll_job(&handle).await.unwrap(),
            JobStatus::Failure("offline".into())
        );
        assert_eq!(appliance.volume("vol-1").unwrap().size_bytes, 100 * GIB);
        assert_eq!(appliance.journal().len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_resize_grows_aggregate() {
        let appliance = appliance().with_pending_polls(0);
        let handle = appliance.resize_storage_capacity(1127).await.unwrap();
        assert_eq!(handle.source, JobSource::FileSystem);
        appliance.poll_job(&handle).await.unwrap();

        let pool = appliance.pool();
        assert_eq!(pool.storage_capacity_gib, 1127);
        assert_eq!(pool.aggregate_total_bytes, 1127 * GIB);
    }

    #[tokio::test]
    async fn test_unknown_objects_and_auth() {
        let appliance = appliance();
        assert_matches!(
            appliance.resize_lun("missing", 1).await,
            Err(Error::ResourceNotFound { .. })
        );

        let appliance = appliance.fail_authentication();
        assert_matches!(appliance.fetch_usage().await, Err(Error::Authentication { .. }));
    }
}
