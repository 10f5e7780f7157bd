//! Appliance Backend Adapters
//!
//! Provides adapters behind the appliance ports:
//! - ONTAP: LUN, volume, aggregate and snapshot management REST API
//! - FSx: logical storage-capacity quota (SigV4-signed JSON API)
//! - Dry-run: read-through wrapper that issues no mutations
//! - Unavailable: placeholder for an appliance whose backend could not be built
//! - In-memory: simulated appliance for tests and embedders

pub mod dry_run;
pub mod fsx;
pub mod memory;
pub mod ontap;
pub mod sigv4;
pub mod unavailable;

pub use dry_run::DryRunBackend;
pub use fsx::{FsxClient, FsxConfig};
pub use memory::{InMemoryAppliance, Mutation};
pub use ontap::{OntapClient, OntapConfig};
pub use sigv4::Credentials;
pub use unavailable::UnavailableBackend;

use crate::config::ApplianceConfig;
use crate::domain::ports::{
    ApplianceBackend, ApplianceBackendRef, CapacityMutator, JobHandle, JobMonitor, JobSource,
    JobStatus, PoolCapacity, SnapshotRecord, UsageCollector, UsageSnapshot, VolumeUsage,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error};

// =============================================================================
// Composite Backend
// =============================================================================

/// One appliance: the management REST API plus the file-system capacity API
pub struct ApplianceClient {
    ontap: OntapClient,
    fsx: FsxClient,
}

impl ApplianceClient {
    pub fn new(ontap: OntapClient, fsx: FsxClient) -> Self {
        Self { ontap, fsx }
    }
}

#[async_trait]
impl UsageCollector for ApplianceClient {
    async fn fetch_usage(&self) -> Result<UsageSnapshot> {
        let luns = self.ontap.list_luns().await?;
        let volumes = self.ontap.list_volumes().await?;
        let aggregate_total_bytes = self.ontap.aggregate_total_bytes().await?;
        let storage_capacity_gib = self.fsx.storage_capacity_gib().await?;

        debug!(
            appliance = %self.ontap.appliance(),
            luns = luns.len(),
            volumes = volumes.len(),
            "Collected usage"
        );

        Ok(UsageSnapshot {
            luns,
            volumes,
            pool: PoolCapacity {
                aggregate_total_bytes,
                storage_capacity_gib,
            },
            collected_at: Utc::now(),
        })
    }

    async fn list_snapshots(&self, volume: &VolumeUsage) -> Result<Vec<SnapshotRecord>> {
        self.ontap.list_snapshots(volume).await
    }
}

#[async_trait]
impl CapacityMutator for ApplianceClient {
    async fn resize_lun(&self, lun_id: &str, new_size_bytes: u64) -> Result<()> {
        self.ontap.patch_lun_size(lun_id, new_size_bytes).await
    }

    async fn resize_volume(&self, volume_id: &str, new_size_mib: u64) -> Result<JobHandle> {
        self.ontap.patch_volume_size(volume_id, new_size_mib).await
    }

    async fn resize_storage_capacity(&self, new_capacity_gib: u64) -> Result<JobHandle> {
        self.fsx.update_storage_capacity(new_capacity_gib).await
    }

    async fn delete_snapshot(&self, volume_id: &str, snapshot_id: &str) -> Result<JobHandle> {
        self.ontap.delete_snapshot(volume_id, snapshot_id).await
    }
}

#[async_trait]
impl JobMonitor for ApplianceClient {
    async fn poll_job(&self, handle: &JobHandle) -> Result<JobStatus> {
        match handle.source {
            JobSource::Cluster => self.ontap.job_status(&handle.id).await,
            JobSource::FileSystem => self.fsx.update_status(handle).await,
            JobSource::Immediate => Ok(JobStatus::Success),
        }
    }
}

impl ApplianceBackend for ApplianceClient {
    fn backend_name(&self) -> &str {
        "ontap+fsx"
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Factory for appliance backends
pub struct BackendFactory;

impl BackendFactory {
    /// Build the live backend for an appliance, wrapped for dry runs
    pub fn for_appliance(config: &ApplianceConfig, dry_run: bool) -> Result<ApplianceBackendRef> {
        let ontap = OntapClient::new(OntapConfig::from_appliance(config)?)?;
        let fsx = FsxClient::new(FsxConfig::from_appliance(config), Credentials::from_env()?)?;
        let client: ApplianceBackendRef = Arc::new(ApplianceClient::new(ontap, fsx));

        Ok(Self::wrap(client, dry_run))
    }

    /// Build the live backend, or a placeholder that fails every cycle with
    /// the construction error
    pub fn for_appliance_or_unavailable(config: &ApplianceConfig, dry_run: bool) -> ApplianceBackendRef {
        match Self::for_appliance(config, dry_run) {
            Ok(backend) => backend,
            Err(e) => {
                error!(appliance = %config.name, "Cannot build appliance backend: {}", e);
                Arc::new(UnavailableBackend::new(&config.name, &e))
            }
        }
    }

    /// Apply the dry-run wrapper when requested
    pub fn wrap(backend: ApplianceBackendRef, dry_run: bool) -> ApplianceBackendRef {
        if dry_run {
            Arc::new(DryRunBackend::new(backend))
        } else {
            backend
        }
    }
}
