//! Capacity Autoscaler - Storage Appliance Capacity Control Loop
//!
//! Inspects LUN, volume and storage-pool usage on managed storage
//! appliances, grows whichever layer is running out of space, retires old
//! snapshots that back no clone, and reports every decision.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Cycle Orchestrator                             │
//! │        (per-appliance isolation, metrics, notification fan-out)         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────────┐   ┌────────────────────────────────┐  │
//! │  │      Cascade Resolver        │   │       Snapshot Reaper          │  │
//! │  │  LUN → Volume → Storage Cap  │   │  age + clone-parent retention  │  │
//! │  └──────────────┬───────────────┘   └───────────────┬────────────────┘  │
//! │                 │      Convergence Calculator        │                   │
//! │                 │      Job Waiter (backoff/timeout)  │                   │
//! │                 └──────────────────┬─────────────────┘                   │
//! ├────────────────────────────────────┼────────────────────────────────────┤
//! │                          Appliance Ports                                │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌───────────┐  ┌────────┐  │
//! │  │  Management REST │  │  FS Capacity API │  │  Dry-Run  │  │ Memory │  │
//! │  │  (LUN/Vol/Snap)  │  │  (SigV4 JSON)    │  │  wrapper  │  │  sim   │  │
//! │  └──────────────────┘  └──────────────────┘  └───────────┘  └────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`capacity`]: Convergence, policies, cascade, job waiting, retention
//! - [`controlplane`]: Orchestrator, notification sinks, backends
//! - [`domain`]: Usage figures, decision records, ports
//! - [`config`]: YAML settings
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod capacity;
pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use capacity::{
    CascadeOutcome, CascadeResolver, JobWaiter, ResizePolicy, RetentionPolicy, SnapshotReaper,
    UsageBand,
};

pub use config::{ApplianceConfig, JobPollConfig, NotificationConfig, Settings};

pub use controlplane::{
    BackendFactory, DryRunBackend, InMemoryAppliance, LogNotifier, ManagedAppliance,
    Orchestrator, UnavailableBackend, WebhookNotifier,
};

pub use domain::decision::{
    ApplianceReport, CloneLineage, CycleReport, DecisionKind, Outcome, ResizeDecision, SizeValue,
};

pub use domain::ports::{
    ApplianceBackend, ApplianceBackendRef, CapacityMutator, JobHandle, JobMonitor, JobStatus,
    LunUsage, Notifier, NotifierRef, PoolCapacity, Provisioning, SnapshotRecord, UsageCollector,
    UsageSnapshot, VolumeUsage,
};

pub use error::{Error, ErrorDisposition, Result};

pub use metrics::Metrics;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
