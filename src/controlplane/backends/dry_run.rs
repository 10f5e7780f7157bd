//! Dry-Run Backend
//!
//! Wraps a real backend: reads go through, mutations are logged and answered
//! with an already-completed job so the cascade records what it would do.

use crate::domain::ports::{
    ApplianceBackend, ApplianceBackendRef, CapacityMutator, JobHandle, JobMonitor, JobStatus,
    SnapshotRecord, UsageCollector, UsageSnapshot, VolumeUsage,
};
use crate::error::Result;
use async_trait::async_trait;
use tracing::info;

/// Read-through, write-nothing wrapper
pub struct DryRunBackend {
    inner: ApplianceBackendRef,
    name: String,
}

impl DryRunBackend {
    pub fn new(inner: ApplianceBackendRef) -> Self {
        let name = format!("dry-run({})", inner.backend_name());
        Self { inner, name }
    }
}

#[async_trait]
impl UsageCollector for DryRunBackend {
    async fn fetch_usage(&self) -> Result<UsageSnapshot> {
        self.inner.fetch_usage().await
    }

    async fn list_snapshots(&self, volume: &VolumeUsage) -> Result<Vec<SnapshotRecord>> {
        self.inner.list_snapshots(volume).await
    }
}

#[async_trait]
impl CapacityMutator for DryRunBackend {
    async fn resize_lun(&self, lun_id: &str, new_size_bytes: u64) -> Result<()> {
        info!("[dry-run] would resize LUN {} to {} bytes", lun_id, new_size_bytes);
        Ok(())
    }

    async fn resize_volume(&self, volume_id: &str, new_size_mib: u64) -> Result<JobHandle> {
        info!("[dry-run] would resize volume {} to {} MiB", volume_id, new_size_mib);
        Ok(JobHandle::completed(format!("dry-run/volume/{}", volume_id)))
    }

    async fn resize_storage_capacity(&self, new_capacity_gib: u64) -> Result<JobHandle> {
        info!("[dry-run] would raise storage capacity to {} GiB", new_capacity_gib);
        Ok(JobHandle::completed("dry-run/storage-capacity"))
    }

    async fn delete_snapshot(&self, volume_id: &str, snapshot_id: &str) -> Result<JobHandle> {
        info!("[dry-run] would delete snapshot {} of volume {}", snapshot_id, volume_id);
        Ok(JobHandle::completed(format!("dry-run/snapshot/{}", snapshot_id)))
    }
}

#[async_trait]
impl JobMonitor for DryRunBackend {
    async fn poll_job(&self, handle: &JobHandle) -> Result<JobStatus> {
        if handle.is_immediate() {
            return Ok(JobStatus::Success);
        }
        self.inner.poll_job(handle).await
    }
}

impl ApplianceBackend for DryRunBackend {
    fn backend_name(&self) -> &str {
        &self.name
    }
}
