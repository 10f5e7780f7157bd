//! Domain Ports - Core trait definitions for the capacity autoscaler
//!
//! These traits define the boundaries between the resize engine and the
//! storage appliance. Adapters implement these traits to provide concrete
//! functionality; every value passed across them is rebuilt each cycle.

use crate::domain::decision::CycleReport;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Bytes per mebibyte
pub const MIB: u64 = 1024 * 1024;

/// Bytes per gibibyte
pub const GIB: u64 = 1024 * 1024 * 1024;

// =============================================================================
// Provisioning
// =============================================================================

/// Space guarantee of a LUN or volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provisioning {
    /// Space is reserved up front at the full size
    Thick,
    /// Space is drawn from the parent as data is written
    Thin,
}

impl Provisioning {
    /// Map a LUN's `space.guarantee.reserved` flag
    pub fn from_reserved(reserved: bool) -> Self {
        if reserved {
            Provisioning::Thick
        } else {
            Provisioning::Thin
        }
    }

    /// Map a volume's `guarantee.type`; only `"volume"` is thick
    pub fn from_volume_guarantee(guarantee: &str) -> Self {
        if guarantee.eq_ignore_ascii_case("volume") {
            Provisioning::Thick
        } else {
            Provisioning::Thin
        }
    }

    pub fn is_thick(self) -> bool {
        matches!(self, Provisioning::Thick)
    }
}

impl std::fmt::Display for Provisioning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provisioning::Thick => write!(f, "thick"),
            Provisioning::Thin => write!(f, "thin"),
        }
    }
}

// =============================================================================
// Usage Figures
// =============================================================================

/// Usage of a single LUN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LunUsage {
    /// LUN UUID
    pub id: String,
    /// Logical unit name
    pub name: String,
    /// Owning volume UUID
    pub volume_id: String,
    /// Owning volume name
    pub volume_name: String,
    /// Provisioned size in bytes
    pub size_bytes: u64,
    /// Bytes written
    pub used_bytes: u64,
    /// Space reservation
    pub provisioning: Provisioning,
}

impl LunUsage {
    /// Used space as a percentage of size, `None` for a zero-sized LUN
    pub fn utilization_percent(&self) -> Option<f64> {
        percent(self.used_bytes as f64, self.size_bytes as f64)
    }

    /// Space this LUN holds inside its volume: the full size when reserved,
    /// the written bytes otherwise
    pub fn volume_footprint(&self) -> u64 {
        match self.provisioning {
            Provisioning::Thick => self.size_bytes,
            Provisioning::Thin => self.used_bytes,
        }
    }
}

/// Usage of a single volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeUsage {
    /// Volume UUID
    pub id: String,
    /// Volume name
    pub name: String,
    /// Provisioned size in bytes
    pub size_bytes: u64,
    /// Free bytes reported by the appliance
    pub available_bytes: u64,
    /// Space guarantee
    pub provisioning: Provisioning,
    /// Whether this volume is a writable clone
    pub is_clone: bool,
    /// Snapshot the clone was created from
    pub parent_snapshot: Option<String>,
}

impl VolumeUsage {
    /// Bytes in use (`size - available`)
    pub fn used_bytes(&self) -> u64 {
        self.size_bytes.saturating_sub(self.available_bytes)
    }

    /// Used space as a percentage of size, `None` for a zero-sized volume
    pub fn utilization_percent(&self) -> Option<f64> {
        percent(self.used_bytes() as f64, self.size_bytes as f64)
    }

    /// Space this volume draws from the pool: the full size when thick,
    /// the used bytes when thin
    pub fn pool_footprint(&self) -> u64 {
        match self.provisioning {
            Provisioning::Thick => self.size_bytes,
            Provisioning::Thin => self.used_bytes(),
        }
    }

    /// Record a new size while keeping the used byte count unchanged
    pub fn resize_to(&mut self, new_size_bytes: u64) {
        let used = self.used_bytes();
        self.size_bytes = new_size_bytes;
        self.available_bytes = new_size_bytes.saturating_sub(used);
    }
}

/// The two capacity ceilings above the volumes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolCapacity {
    /// Raw usable capacity of the backing aggregate, in bytes
    pub aggregate_total_bytes: u64,
    /// Provisioned logical storage-capacity quota, in GiB
    pub storage_capacity_gib: u64,
}

impl PoolCapacity {
    /// Raw aggregate capacity normalized to GiB
    pub fn aggregate_total_gib(&self) -> f64 {
        bytes_to_gib(self.aggregate_total_bytes as f64)
    }
}

/// Everything the engine needs from one appliance for one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub luns: Vec<LunUsage>,
    pub volumes: Vec<VolumeUsage>,
    pub pool: PoolCapacity,
    pub collected_at: DateTime<Utc>,
}

/// A point-in-time snapshot of a volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Snapshot UUID
    pub id: String,
    /// Snapshot name
    pub name: String,
    /// Owning volume UUID
    pub volume_id: String,
    /// Owning volume name
    pub volume_name: String,
    /// Creation timestamp
    pub create_time: DateTime<Utc>,
    /// Space held by the snapshot in bytes
    pub size_bytes: u64,
}

impl SnapshotRecord {
    /// Whole days elapsed since creation
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.create_time).num_days()
    }
}

/// Convert bytes to GiB without rounding
pub fn bytes_to_gib(bytes: f64) -> f64 {
    bytes / GIB as f64
}

/// Convert bytes to whole MiB, rounding up
pub fn bytes_to_mib_ceil(bytes: f64) -> u64 {
    (bytes / MIB as f64).ceil() as u64
}

fn percent(part: f64, whole: f64) -> Option<f64> {
    if whole > 0.0 {
        Some(part / whole * 100.0)
    } else {
        None
    }
}

// =============================================================================
// Jobs
// =============================================================================

/// Which subsystem issued an asynchronous job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    /// Storage cluster job (`/api/cluster/jobs`)
    Cluster,
    /// File-system administrative action
    FileSystem,
    /// The mutation finished synchronously; nothing to poll
    Immediate,
}

/// Handle to an asynchronous mutation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
    pub source: JobSource,
}

impl JobHandle {
    pub fn cluster(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: JobSource::Cluster,
        }
    }

    pub fn file_system(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: JobSource::FileSystem,
        }
    }

    pub fn completed(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: JobSource::Immediate,
        }
    }

    pub fn is_immediate(&self) -> bool {
        self.source == JobSource::Immediate
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.source {
            JobSource::Cluster => write!(f, "cluster-job/{}", self.id),
            JobSource::FileSystem => write!(f, "fs-action/{}", self.id),
            JobSource::Immediate => write!(f, "immediate/{}", self.id),
        }
    }
}

/// Status reported by a job poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Success,
    /// Provider-reported failure message
    Failure(String),
}

// =============================================================================
// Usage Collector Port
// =============================================================================

/// Read-only queries against one appliance
#[async_trait]
pub trait UsageCollector: Send + Sync {
    /// Fetch current LUN, volume and pool figures
    async fn fetch_usage(&self) -> Result<UsageSnapshot>;

    /// List the snapshots of one volume
    async fn list_snapshots(&self, volume: &VolumeUsage) -> Result<Vec<SnapshotRecord>>;
}

// =============================================================================
// Capacity Mutator Port
// =============================================================================

/// Mutations issued by the engine
#[async_trait]
pub trait CapacityMutator: Send + Sync {
    /// Resize a LUN; synchronous on the appliance but may fail
    async fn resize_lun(&self, lun_id: &str, new_size_bytes: u64) -> Result<()>;

    /// Resize a volume to a size in MiB
    async fn resize_volume(&self, volume_id: &str, new_size_mib: u64) -> Result<JobHandle>;

    /// Raise the logical storage-capacity quota to a size in GiB
    async fn resize_storage_capacity(&self, new_capacity_gib: u64) -> Result<JobHandle>;

    /// Delete a snapshot
    async fn delete_snapshot(&self, volume_id: &str, snapshot_id: &str) -> Result<JobHandle>;
}

// =============================================================================
// Job Monitor Port
// =============================================================================

/// Status queries for asynchronous mutations
#[async_trait]
pub trait JobMonitor: Send + Sync {
    async fn poll_job(&self, handle: &JobHandle) -> Result<JobStatus>;
}

// =============================================================================
// Appliance Backend
// =============================================================================

/// Everything the cycle needs from one appliance
pub trait ApplianceBackend: UsageCollector + CapacityMutator + JobMonitor {
    /// Backend name for logging
    fn backend_name(&self) -> &str;
}

// =============================================================================
// Notifier Port
// =============================================================================

/// Sink for cycle reports; failures are logged by the caller, never fatal
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn emit(&self, report: &CycleReport) -> Result<()>;

    /// Sink name for logging
    fn sink_name(&self) -> &str;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ApplianceBackendRef = Arc<dyn ApplianceBackend>;
pub type NotifierRef = Arc<dyn Notifier>;
