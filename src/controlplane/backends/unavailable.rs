//! Unavailable Backend
//!
//! Stands in for an appliance whose live backend could not be built, for
//! example because its password variable is unset. Every call fails with the
//! construction error, so the appliance is reported as failed each cycle
//! while the other appliances run normally.

use crate::domain::ports::{
    ApplianceBackend, CapacityMutator, JobHandle, JobMonitor, JobStatus, SnapshotRecord,
    UsageCollector, UsageSnapshot, VolumeUsage,
};
use crate::error::{Error, Result};
use async_trait::async_trait;

/// Backend that answers every call with the error that prevented its creation
pub struct UnavailableBackend {
    appliance: String,
    reason: String,
}

impl UnavailableBackend {
    pub fn new(appliance: impl Into<String>, cause: &Error) -> Self {
        Self {
            appliance: appliance.into(),
            reason: cause.to_string(),
        }
    }

    fn error(&self) -> Error {
        Error::Configuration(format!(
            "appliance {} is unavailable: {}",
            self.appliance, self.reason
        ))
    }
}

#[async_trait]
impl UsageCollector for UnavailableBackend {
    async fn fetch_usage(&self) -> Result<UsageSnapshot> {
        Err(self.error())
    }

    async fn list_snapshots(&self, _volume: &VolumeUsage) -> Result<Vec<SnapshotRecord>> {
        Err(self.error())
    }
}

#[async_trait]
impl CapacityMutator for UnavailableBackend {
    async fn resize_lun(&self, _lun_id: &str, _new_size_bytes: u64) -> Result<()> {
        Err(self.error())
    }

    async fn resize_volume(&self, _volume_id: &str, _new_size_mib: u64) -> Result<JobHandle> {
        Err(self.error())
    }

    async fn resize_storage_capacity(&self, _new_capacity_gib: u64) -> Result<JobHandle> {
        Err(self.error())
    }

    async fn delete_snapshot(&self, _volume_id: &str, _snapshot_id: &str) -> Result<JobHandle> {
        Err(self.error())
    }
}

#[async_trait]
impl JobMonitor for UnavailableBackend {
    async fn poll_job(&self, _handle: &JobHandle) -> Result<JobStatus> {
        Err(self.error())
    }
}

impl ApplianceBackend for UnavailableBackend {
    fn backend_name(&self) -> &str {
        "unavailable"
    }
}
