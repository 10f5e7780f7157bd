//! Capacity Engine
//!
//! Growth arithmetic, usage policies, the LUN → volume → pool cascade, job
//! waiting and snapshot retention.

pub mod cascade;
pub mod convergence;
pub mod jobs;
pub mod policy;
pub mod retention;

pub use cascade::{CascadeOutcome, CascadeResolver, LunPlan, VolumeGrowth, VolumePlan};
pub use jobs::JobWaiter;
pub use policy::{ResizePolicy, RetentionPolicy, UsageBand};
pub use retention::{clone_lineage, RetentionVerdict, SnapshotReaper};
