//! Cascade Resolver
//!
//! Runs the three capacity passes for one appliance in a fixed order:
//! LUNs, then volumes, then the storage-capacity pool. Each LUN and volume is
//! first classified into a [`LunPlan`] or [`VolumePlan`]; executing a plan may
//! escalate to the layer above it.
//!
//! The resolver works on a private copy of the usage snapshot. Sizes that a
//! confirmed mutation changed are written back into that copy, so later
//! footprints in the same cycle see them:
//!
//! ```text
//!   LUN pass            volume pass          pool pass
//!   ┌────────────┐      ┌────────────┐      ┌────────────────────┐
//!   │ thin: grow │      │ grow volume│      │ footprint / aggr   │
//!   │ thick: fit?├─no──▶│ pool fits? ├─no──▶│ raise quota,       │
//!   │  yes: grow │      │  yes: grow │      │ defer volume + LUN │
//!   └────────────┘      └────────────┘      └────────────────────┘
//! ```

use crate::capacity::convergence::{
    grow_to_floor, grow_to_threshold, storage_capacity_target, CAPACITY_STEP, GROWTH_STEP,
};
use crate::capacity::jobs::JobWaiter;
use crate::capacity::policy::{ResizePolicy, UsageBand};
use crate::domain::decision::{DecisionKind, Outcome, ResizeDecision, SizeValue};
use crate::domain::ports::{
    bytes_to_gib, bytes_to_mib_ceil, ApplianceBackend, LunUsage, PoolCapacity, UsageSnapshot,
    VolumeUsage, MIB,
};
use crate::error::{Error, ErrorDisposition, Result};
use tracing::{debug, error, info, warn};

// =============================================================================
// Plans
// =============================================================================

/// What to do with one LUN
#[derive(Debug, Clone, PartialEq)]
pub enum LunPlan {
    Healthy { utilization: f64 },
    Warn { utilization: f64 },
    /// The LUN can grow without touching its volume
    Grow { utilization: f64, new_size_bytes: u64 },
    /// The owning volume must grow before the LUN can
    GrowVolumeFirst {
        utilization: f64,
        new_size_bytes: u64,
        volume_index: usize,
        /// Reserved LUN bytes on the volume after the resize
        footprint_bytes: u64,
    },
}

/// What to do with one volume
#[derive(Debug, Clone, PartialEq)]
pub enum VolumePlan {
    Healthy { utilization: f64 },
    Warn { utilization: f64 },
    Grow { utilization: f64, new_size_bytes: u64 },
}

/// Result of trying to grow a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeGrowth {
    /// The resize job completed
    Grown,
    /// The pool could not absorb the volume; a quota increase was requested
    /// and the volume waits for a later cycle
    Deferred,
    /// The resize was rejected or its completion could not be confirmed
    NotConfirmed,
}

/// Decisions and end state of one cascade run
#[derive(Debug)]
pub struct CascadeOutcome {
    pub decisions: Vec<ResizeDecision>,
    /// Volumes with confirmed new sizes applied
    pub volumes: Vec<VolumeUsage>,
    /// Set when an error stopped the run before all passes finished
    pub aborted: Option<Error>,
}

#[derive(Debug, Clone)]
struct CapacityRequest {
    gib: u64,
    outcome: Outcome,
}

// =============================================================================
// Cascade Resolver
// =============================================================================

/// Resolves the LUN → volume → pool cascade for one appliance
pub struct CascadeResolver<'a> {
    appliance: &'a str,
    policy: &'a ResizePolicy,
    backend: &'a dyn ApplianceBackend,
    jobs: &'a JobWaiter,
    luns: Vec<LunUsage>,
    volumes: Vec<VolumeUsage>,
    pool: PoolCapacity,
    capacity_request: Option<CapacityRequest>,
    decisions: Vec<ResizeDecision>,
}

impl<'a> CascadeResolver<'a> {
    pub fn new(
        appliance: &'a str,
        policy: &'a ResizePolicy,
        backend: &'a dyn ApplianceBackend,
        jobs: &'a JobWaiter,
        usage: UsageSnapshot,
    ) -> Self {
        Self {
            appliance,
            policy,
            backend,
            jobs,
            luns: usage.luns,
            volumes: usage.volumes,
            pool: usage.pool,
            capacity_request: None,
            decisions: Vec::new(),
        }
    }

    /// Run the LUN, volume and storage-capacity passes in order
    pub async fn run(mut self) -> CascadeOutcome {
        info!(
            appliance = %self.appliance,
            luns = self.luns.len(),
            volumes = self.volumes.len(),
            "Resolving capacity cascade"
        );

        let aborted = match self.run_passes().await {
            Ok(()) => None,
            Err(e) => {
                error!(appliance = %self.appliance, "Cascade aborted: {}", e);
                Some(e)
            }
        };

        CascadeOutcome {
            decisions: self.decisions,
            volumes: self.volumes,
            aborted,
        }
    }

    async fn run_passes(&mut self) -> Result<()> {
        self.resolve_luns().await?;
        self.resolve_volumes().await?;
        self.resolve_storage_capacity().await
    }

    // =========================================================================
    // LUN Pass
    // =========================================================================

    async fn resolve_luns(&mut self) -> Result<()> {
        for index in 0..self.luns.len() {
            let plan = match self.plan_lun(index) {
                Ok(plan) => plan,
                Err(e) => {
                    warn!(appliance = %self.appliance, "Skipping LUN: {}", e);
                    continue;
                }
            };
            self.execute_lun_plan(index, plan).await?;
        }
        Ok(())
    }

    /// Classify one LUN against the current working state
    pub fn plan_lun(&self, index: usize) -> Result<LunPlan> {
        let lun = &self.luns[index];
        let utilization = lun
            .utilization_percent()
            .ok_or_else(|| Error::precondition(&lun.name, "reported size is zero"))?;

        match self.policy.classify(utilization) {
            UsageBand::Healthy => return Ok(LunPlan::Healthy { utilization }),
            UsageBand::Warn => return Ok(LunPlan::Warn { utilization }),
            UsageBand::MustGrow => {}
        }

        let new_size_bytes = grow_to_threshold(
            lun.size_bytes as f64,
            lun.used_bytes as f64,
            self.policy.resize_threshold,
        );

        if !lun.provisioning.is_thick() {
            return Ok(LunPlan::Grow {
                utilization,
                new_size_bytes,
            });
        }

        let volume_index = self
            .volumes
            .iter()
            .position(|v| v.id == lun.volume_id)
            .ok_or_else(|| {
                Error::precondition(
                    &lun.name,
                    format!("owning volume {} was not reported", lun.volume_name),
                )
            })?;

        let footprint_bytes = self.reserved_footprint(&lun.volume_id, index, new_size_bytes);
        let volume_size = self.volumes[volume_index].size_bytes;

        if self
            .policy
            .volume_can_absorb(footprint_bytes as f64, volume_size as f64)
        {
            Ok(LunPlan::Grow {
                utilization,
                new_size_bytes,
            })
        } else {
            Ok(LunPlan::GrowVolumeFirst {
                utilization,
                new_size_bytes,
                volume_index,
                footprint_bytes,
            })
        }
    }

    /// Bytes held inside a volume by all of its LUNs, with one LUN's
    /// contribution replaced by its proposed size
    fn reserved_footprint(&self, volume_id: &str, resized: usize, new_size_bytes: u64) -> u64 {
        self.luns
            .iter()
            .enumerate()
            .filter(|(_, lun)| lun.volume_id == volume_id)
            .map(|(i, lun)| {
                if i == resized {
                    new_size_bytes
                } else {
                    lun.volume_footprint()
                }
            })
            .sum()
    }

    async fn execute_lun_plan(&mut self, index: usize, plan: LunPlan) -> Result<()> {
        let name = self.luns[index].name.clone();

        match plan {
            LunPlan::Healthy { utilization } => {
                debug!(appliance = %self.appliance, lun = %name, "LUN healthy at {:.2}%", utilization);
            }
            LunPlan::Warn { utilization } => {
                if self.policy.warn_notification {
                    info!(appliance = %self.appliance, lun = %name, "LUN in warn band at {:.2}%", utilization);
                    self.decisions
                        .push(ResizeDecision::warning(DecisionKind::LunWarn, name, utilization));
                }
            }
            LunPlan::Grow {
                utilization,
                new_size_bytes,
            } => {
                self.resize_lun(index, utilization, new_size_bytes).await?;
            }
            LunPlan::GrowVolumeFirst {
                utilization,
                new_size_bytes,
                volume_index,
                footprint_bytes,
            } => {
                let volume = &self.volumes[volume_index];
                info!(
                    appliance = %self.appliance,
                    lun = %name,
                    volume = %volume.name,
                    "Volume cannot hold LUN growth ({} reserved bytes in {} bytes)",
                    footprint_bytes, volume.size_bytes
                );

                let volume_target = grow_to_floor(
                    volume.size_bytes as f64,
                    footprint_bytes as f64,
                    GROWTH_STEP,
                );

                match self.grow_volume(volume_index, volume_target).await? {
                    VolumeGrowth::Grown => {
                        self.resize_lun(index, utilization, new_size_bytes).await?;
                    }
                    VolumeGrowth::Deferred => {
                        info!(appliance = %self.appliance, lun = %name, "LUN resize deferred until storage capacity grows");
                    }
                    VolumeGrowth::NotConfirmed => {
                        warn!(appliance = %self.appliance, lun = %name, "LUN resize skipped; owning volume did not grow");
                    }
                }
            }
        }
        Ok(())
    }

    async fn resize_lun(&mut self, index: usize, utilization: f64, new_size_bytes: u64) -> Result<()> {
        let lun = &self.luns[index];
        let (id, name) = (lun.id.clone(), lun.name.clone());

        let outcome = match self.backend.resize_lun(&id, new_size_bytes).await {
            Ok(()) => {
                info!(
                    appliance = %self.appliance,
                    lun = %name,
                    "Resized LUN from {} to {} bytes",
                    lun.size_bytes, new_size_bytes
                );
                self.luns[index].size_bytes = new_size_bytes;
                Outcome::Applied
            }
            Err(e) => self.outcome_or_abort(e)?,
        };

        self.decisions.push(ResizeDecision::resize(
            DecisionKind::LunResize,
            name,
            utilization,
            SizeValue::bytes(new_size_bytes),
            outcome,
        ));
        Ok(())
    }

    // =========================================================================
    // Volume Pass
    // =========================================================================

    async fn resolve_volumes(&mut self) -> Result<()> {
        for index in 0..self.volumes.len() {
            let name = self.volumes[index].name.clone();
            let plan = match self.plan_volume(index) {
                Ok(plan) => plan,
                Err(e) => {
                    warn!(appliance = %self.appliance, "Skipping volume: {}", e);
                    continue;
                }
            };

            match plan {
                VolumePlan::Healthy { utilization } => {
                    debug!(appliance = %self.appliance, volume = %name, "Volume healthy at {:.2}%", utilization);
                }
                VolumePlan::Warn { utilization } => {
                    if self.policy.warn_notification {
                        info!(appliance = %self.appliance, volume = %name, "Volume in warn band at {:.2}%", utilization);
                        self.decisions
                            .push(ResizeDecision::warning(DecisionKind::VolWarn, name, utilization));
                    }
                }
                VolumePlan::Grow { new_size_bytes, .. } => {
                    self.grow_volume(index, new_size_bytes).await?;
                }
            }
        }
        Ok(())
    }

    /// Classify one volume against the current working state
    pub fn plan_volume(&self, index: usize) -> Result<VolumePlan> {
        let volume = &self.volumes[index];
        let utilization = volume
            .utilization_percent()
            .ok_or_else(|| Error::precondition(&volume.name, "reported size is zero"))?;

        Ok(match self.policy.classify(utilization) {
            UsageBand::Healthy => VolumePlan::Healthy { utilization },
            UsageBand::Warn => VolumePlan::Warn { utilization },
            UsageBand::MustGrow => VolumePlan::Grow {
                utilization,
                new_size_bytes: grow_to_threshold(
                    volume.size_bytes as f64,
                    volume.used_bytes() as f64,
                    self.policy.resize_threshold,
                ),
            },
        })
    }

    /// Grow a volume, escalating to the pool when it is thick and the pool
    /// cannot take it
    async fn grow_volume(&mut self, index: usize, target_bytes: u64) -> Result<VolumeGrowth> {
        let new_size_mib = bytes_to_mib_ceil(target_bytes as f64);
        let volume = &self.volumes[index];

        if volume.provisioning.is_thick() {
            let aggregate_gib = self.pool.aggregate_total_gib();
            let footprint_gib = bytes_to_gib(self.pool_footprint(Some((index, new_size_mib * MIB))) as f64);

            if aggregate_gib <= 0.0 || !self.policy.pool_can_absorb(footprint_gib, aggregate_gib) {
                info!(
                    appliance = %self.appliance,
                    volume = %volume.name,
                    "Pool cannot absorb volume growth ({:.2} GiB of {:.2} GiB)",
                    footprint_gib, aggregate_gib
                );
                self.escalate_storage_capacity(index, footprint_gib).await?;
                return Ok(VolumeGrowth::Deferred);
            }
        }

        self.resize_volume(index, new_size_mib).await
    }

    async fn resize_volume(&mut self, index: usize, new_size_mib: u64) -> Result<VolumeGrowth> {
        let volume = &self.volumes[index];
        let (id, name) = (volume.id.clone(), volume.name.clone());
        let utilization = volume.utilization_percent().unwrap_or_default();

        let result = match self.backend.resize_volume(&id, new_size_mib).await {
            Ok(handle) => {
                info!(appliance = %self.appliance, volume = %name, job = %handle, "Volume resize to {} MiB issued", new_size_mib);
                self.jobs.wait(self.backend, &handle).await
            }
            Err(e) => Err(e),
        };

        let (outcome, growth) = match result {
            Ok(()) => {
                info!(appliance = %self.appliance, volume = %name, "Volume resized to {} MiB", new_size_mib);
                self.volumes[index].resize_to(new_size_mib * MIB);
                (Outcome::Applied, VolumeGrowth::Grown)
            }
            Err(e) => (self.outcome_or_abort(e)?, VolumeGrowth::NotConfirmed),
        };

        self.decisions.push(ResizeDecision::resize(
            DecisionKind::VolResize,
            name,
            utilization,
            SizeValue::mib(new_size_mib),
            outcome,
        ));
        Ok(growth)
    }

    /// Bytes the volumes draw from the pool, optionally with one volume at a
    /// proposed size
    fn pool_footprint(&self, proposed: Option<(usize, u64)>) -> u64 {
        self.volumes
            .iter()
            .enumerate()
            .map(|(i, volume)| match proposed {
                Some((index, size)) if index == i => size,
                _ => volume.pool_footprint(),
            })
            .sum()
    }

    // =========================================================================
    // Storage Capacity
    // =========================================================================

    /// Raise the quota on behalf of a volume the pool cannot absorb.
    ///
    /// One blocked record is kept per quota request; a volume covered by a
    /// request already made this cycle only waits for it.
    async fn escalate_storage_capacity(&mut self, index: usize, footprint_gib: f64) -> Result<()> {
        let volume = &self.volumes[index];
        let name = volume.name.clone();
        let utilization = volume.utilization_percent().unwrap_or_default();
        let target = grow_to_floor(
            self.pool.storage_capacity_gib.max(1) as f64,
            footprint_gib,
            CAPACITY_STEP,
        );

        if let Some(request) = self.capacity_request.as_ref().filter(|r| r.gib >= target) {
            info!(
                appliance = %self.appliance,
                volume = %name,
                "Volume waits for the {} GiB storage capacity already requested",
                request.gib
            );
            return Ok(());
        }

        let outcome = self.request_storage_capacity(target).await?;
        self.decisions.push(ResizeDecision::pool_resize_blocked(
            name,
            utilization,
            target,
            outcome,
        ));
        Ok(())
    }

    async fn resolve_storage_capacity(&mut self) -> Result<()> {
        let aggregate_gib = self.pool.aggregate_total_gib();
        if aggregate_gib <= 0.0 {
            warn!(appliance = %self.appliance, "Skipping storage capacity: aggregate size is unknown");
            return Ok(());
        }

        let footprint_gib = bytes_to_gib(self.pool_footprint(None) as f64);
        let utilization = footprint_gib / aggregate_gib * 100.0 * self.policy.pool_margin;

        match self.policy.classify(utilization) {
            UsageBand::Healthy => {
                debug!(appliance = %self.appliance, "Storage capacity healthy at {:.2}%", utilization);
            }
            UsageBand::Warn => {
                if self.policy.warn_notification {
                    info!(appliance = %self.appliance, "Storage capacity in warn band at {:.2}%", utilization);
                    self.decisions.push(ResizeDecision::pool_warning(utilization));
                }
            }
            UsageBand::MustGrow => {
                let target = storage_capacity_target(
                    self.pool.storage_capacity_gib,
                    aggregate_gib,
                    self.policy.pool_margin,
                );

                if let Some(request) = &self.capacity_request {
                    if request.gib >= target && request.outcome.is_applied() {
                        info!(
                            appliance = %self.appliance,
                            "Storage capacity of {} GiB already granted this cycle",
                            request.gib
                        );
                        return Ok(());
                    }
                }

                let outcome = self.request_storage_capacity(target).await?;
                self.decisions
                    .push(ResizeDecision::pool_resize(utilization, target, outcome));
            }
        }
        Ok(())
    }

    async fn request_storage_capacity(&mut self, new_capacity_gib: u64) -> Result<Outcome> {
        let result = match self.backend.resize_storage_capacity(new_capacity_gib).await {
            Ok(handle) => {
                info!(
                    appliance = %self.appliance,
                    job = %handle,
                    "Storage capacity update from {} GiB to {} GiB issued",
                    self.pool.storage_capacity_gib, new_capacity_gib
                );
                self.jobs.wait(self.backend, &handle).await
            }
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(()) => Outcome::Applied,
            Err(e) => self.outcome_or_abort(e)?,
        };

        self.capacity_request = Some(CapacityRequest {
            gib: new_capacity_gib,
            outcome: outcome.clone(),
        });
        Ok(outcome)
    }

    /// Item-scoped errors become the outcome of the attempt; anything else
    /// stops the run
    fn outcome_or_abort(&self, err: Error) -> Result<Outcome> {
        if err.disposition() == ErrorDisposition::AbortAppliance {
            return Err(err);
        }
        error!(appliance = %self.appliance, "Mutation did not complete: {}", err);
        Ok(Outcome::from(&err))
    }
}
