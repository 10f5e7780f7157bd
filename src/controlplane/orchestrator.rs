//! Cycle Orchestrator
//!
//! Runs one capacity cycle across every configured appliance:
//! - Usage collection
//! - LUN → volume → storage-capacity cascade
//! - Snapshot retention and clone lineage
//! - Metrics and notification
//!
//! Appliances are processed one after another and isolated from each
//! other: an error that aborts one appliance is recorded in the report and
//! the next appliance still runs.

use crate::capacity::{
    clone_lineage, CascadeResolver, JobWaiter, ResizePolicy, RetentionPolicy, SnapshotReaper,
};
use crate::config::{ApplianceConfig, Settings};
use crate::controlplane::backends::BackendFactory;
use crate::controlplane::notify::build_notifiers;
use crate::domain::decision::{ApplianceFailure, ApplianceReport, CycleReport};
use crate::domain::ports::{ApplianceBackendRef, NotifierRef};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Managed Appliance
// =============================================================================

/// An appliance together with the policies derived from its configuration
pub struct ManagedAppliance {
    pub name: String,
    pub resize_policy: ResizePolicy,
    pub retention_policy: RetentionPolicy,
    pub backend: ApplianceBackendRef,
}

impl ManagedAppliance {
    pub fn new(config: &ApplianceConfig, backend: ApplianceBackendRef) -> Self {
        Self {
            name: config.name.clone(),
            resize_policy: ResizePolicy::for_appliance(config),
            retention_policy: RetentionPolicy::for_appliance(config),
            backend,
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives capacity cycles
pub struct Orchestrator {
    appliances: Vec<ManagedAppliance>,
    notifiers: Vec<NotifierRef>,
    jobs: JobWaiter,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(jobs: JobWaiter, metrics: Arc<Metrics>) -> Self {
        Self {
            appliances: Vec::new(),
            notifiers: Vec::new(),
            jobs,
            metrics,
        }
    }

    /// Build an orchestrator with live backends for every configured appliance.
    ///
    /// An appliance whose backend cannot be built is still registered; it
    /// fails every cycle with the construction error.
    pub fn from_settings(
        settings: &Settings,
        dry_run: bool,
        cancel: CancellationToken,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let mut orchestrator = Self::new(JobWaiter::from_config(&settings.job_poll, cancel), metrics);

        for config in &settings.appliances {
            let backend = BackendFactory::for_appliance_or_unavailable(config, dry_run);
            info!(
                appliance = %config.name,
                backend = backend.backend_name(),
                "Registered appliance"
            );
            orchestrator.add_appliance(ManagedAppliance::new(config, backend));
        }
        for notifier in build_notifiers(&settings.notification)? {
            orchestrator.add_notifier(notifier);
        }

        Ok(orchestrator)
    }

    pub fn add_appliance(&mut self, appliance: ManagedAppliance) {
        self.appliances.push(appliance);
    }

    pub fn add_notifier(&mut self, notifier: NotifierRef) {
        self.notifiers.push(notifier);
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run one cycle over all appliances and deliver the report
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::new(Utc::now());
        info!(appliances = self.appliances.len(), "Starting capacity cycle");

        for appliance in &self.appliances {
            if self.jobs.cancel_token().is_cancelled() {
                warn!("Cycle cancelled; skipping remaining appliances");
                break;
            }

            let (appliance_report, failure) = self.run_appliance(appliance).await;
            if let Some(err) = failure {
                error!(
                    appliance = %appliance.name,
                    transient = err.is_transient(),
                    "Appliance cycle aborted: {}",
                    err
                );
                report.failures.push(ApplianceFailure {
                    appliance: appliance.name.clone(),
                    error: err.to_string(),
                });
            }
            report.appliances.push(appliance_report);
        }

        report.finished_at = Utc::now();
        self.metrics.record_report(&report);

        info!(
            decisions = report.decisions().count(),
            failures = report.failures.len(),
            "Capacity cycle finished"
        );

        if report.has_content() {
            self.notify(&report).await;
        } else {
            debug!("Nothing to report this cycle");
        }
        report
    }

    /// Process one appliance; the error, if any, is what aborted it
    async fn run_appliance(&self, appliance: &ManagedAppliance) -> (ApplianceReport, Option<Error>) {
        let mut report = ApplianceReport {
            appliance: appliance.name.clone(),
            ..Default::default()
        };
        let backend = appliance.backend.as_ref();

        let usage = match backend.fetch_usage().await {
            Ok(usage) => usage,
            Err(e) => return (report, Some(e)),
        };

        let outcome = CascadeResolver::new(
            &appliance.name,
            &appliance.resize_policy,
            backend,
            &self.jobs,
            usage,
        )
        .run()
        .await;
        report.decisions = outcome.decisions;
        if let Some(err) = outcome.aborted {
            return (report, Some(err));
        }

        if !appliance.retention_policy.enabled {
            return (report, None);
        }

        let reaper = SnapshotReaper::new(
            &appliance.name,
            &appliance.retention_policy,
            backend,
            &self.jobs,
        );
        let snapshots = match reaper.collect(&outcome.volumes).await {
            Ok(snapshots) => snapshots,
            Err(e) => return (report, Some(e)),
        };
        report.clone_lineage = clone_lineage(&outcome.volumes, &snapshots);

        match reaper.reap(&snapshots, &outcome.volumes, Utc::now()).await {
            Ok(mut deleted) => {
                report.decisions.append(&mut deleted);
                (report, None)
            }
            Err(e) => (report, Some(e)),
        }
    }

    async fn notify(&self, report: &CycleReport) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.emit(report).await {
                warn!(sink = notifier.sink_name(), "Notification failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::memory::{InMemoryAppliance, Mutation};
    use crate::domain::decision::{DecisionKind, Outcome};
    use crate::domain::ports::{
        LunUsage, Notifier, PoolCapacity, Provisioning, SnapshotRecord, VolumeUsage, GIB,
    };
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Keeps every report it is handed
    #[derive(Default)]
    struct RecordingNotifier {
        reports: Mutex<Vec<CycleReport>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn emit(&self, report: &CycleReport) -> Result<()> {
            self.reports.lock().push(report.clone());
            if self.fail {
                return Err(Error::Notification {
                    sink: "recording".into(),
                    reason: "mailbox full".into(),
                });
            }
            Ok(())
        }

        fn sink_name(&self) -> &str {
            "recording"
        }
    }

    fn config(name: &str, snapshot_deletion: bool) -> ApplianceConfig {
        ApplianceConfig {
            name: name.into(),
            file_system_id: format!("fs-{}", name),
            management_endpoint: "198.19.255.10".into(),
            username: "fsxadmin".into(),
            password_env: "UNUSED".into(),
            region: "us-east-1".into(),
            aggregate_name: "aggr1".into(),
            accept_invalid_certs: true,
            request_timeout_secs: 30,
            resize_threshold: 90.0,
            warn_notification: true,
            enable_snapshot_deletion: snapshot_deletion,
            snapshot_age_threshold_in_days: 30,
        }
    }

    fn orchestrator(cancel: CancellationToken) -> Orchestrator {
        let jobs = JobWaiter::new(
            Duration::from_millis(1),
            Duration::from_millis(2),
            1.0,
            Duration::from_secs(5),
            cancel,
        );
        Orchestrator::new(jobs, Arc::new(Metrics::new().unwrap()))
    }

    fn pool() -> PoolCapacity {
        PoolCapacity {
            aggregate_total_bytes: 1024 * GIB,
            storage_capacity_gib: 1024,
        }
    }

    fn volume(id: &str, parent_snapshot: Option<&str>) -> VolumeUsage {
        VolumeUsage {
            id: id.into(),
            name: id.into(),
            size_bytes: 100 * GIB,
            available_bytes: 60 * GIB,
            provisioning: Provisioning::Thin,
            is_clone: parent_snapshot.is_some(),
            parent_snapshot: parent_snapshot.map(String::from),
        }
    }

    fn warn_lun() -> LunUsage {
        LunUsage {
            id: "lun-1".into(),
            name: "/vol/vol1/lun1".into(),
            volume_id: "vol1".into(),
            volume_name: "vol1".into(),
            size_bytes: 100 * GIB,
            used_bytes: 80 * GIB,
            provisioning: Provisioning::Thin,
        }
    }

    fn snapshot(id: &str, name: &str, age_days: i64) -> SnapshotRecord {
        SnapshotRecord {
            id: id.into(),
            name: name.into(),
            volume_id: "vol1".into(),
            volume_name: "vol1".into(),
            create_time: Utc::now() - chrono::Duration::days(age_days) - chrono::Duration::hours(1),
            size_bytes: 4 * 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn test_failed_appliance_does_not_stop_the_next() {
        let mut orch = orchestrator(CancellationToken::new());
        let broken = InMemoryAppliance::new("fsx-dr", pool()).fail_authentication();
        let healthy = InMemoryAppliance::new("fsx-prod", pool())
            .with_volume(volume("vol1", None))
            .with_lun(warn_lun());
        orch.add_appliance(ManagedAppliance::new(&config("fsx-dr", false), Arc::new(broken)));
        orch.add_appliance(ManagedAppliance::new(&config("fsx-prod", false), Arc::new(healthy)));
        let notifier = Arc::new(RecordingNotifier::default());
        orch.add_notifier(notifier.clone());

        let report = orch.run_cycle().await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].appliance, "fsx-dr");
        assert!(report.failures[0].error.contains("Authentication"));

        let prod = &report.appliances[1];
        assert_eq!(prod.appliance, "fsx-prod");
        assert_eq!(prod.decisions.len(), 1);
        assert_eq!(prod.decisions[0].kind, DecisionKind::LunWarn);

        assert_eq!(notifier.reports.lock().len(), 1);
        assert_eq!(orch.metrics().cycles(), 1);
    }

    #[tokio::test]
    async fn test_unbuildable_backend_fails_only_its_appliance() {
        let mut broken = config("fsx-dr", false);
        broken.password_env = "CAPACITY_AUTOSCALER_TEST_UNSET_PASSWORD".into();
        let settings = Settings {
            appliances: vec![broken],
            notification: Default::default(),
            job_poll: Default::default(),
        };

        let mut orch = Orchestrator::from_settings(
            &settings,
            false,
            CancellationToken::new(),
            Arc::new(Metrics::new().unwrap()),
        )
        .unwrap();
        let healthy = InMemoryAppliance::new("fsx-prod", pool())
            .with_volume(volume("vol1", None))
            .with_lun(warn_lun());
        orch.add_appliance(ManagedAppliance::new(&config("fsx-prod", false), Arc::new(healthy)));

        let report = orch.run_cycle().await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].appliance, "fsx-dr");
        assert!(report.failures[0]
            .error
            .contains("CAPACITY_AUTOSCALER_TEST_UNSET_PASSWORD"));

        let prod = &report.appliances[1];
        assert_eq!(prod.appliance, "fsx-prod");
        assert_eq!(prod.decisions.len(), 1);
        assert_eq!(prod.decisions[0].kind, DecisionKind::LunWarn);
    }

    #[tokio::test]
    async fn test_quiet_cycle_sends_nothing() {
        let mut orch = orchestrator(CancellationToken::new());
        let appliance = InMemoryAppliance::new("fsx-prod", pool()).with_volume(volume("vol1", None));
        orch.add_appliance(ManagedAppliance::new(&config("fsx-prod", false), Arc::new(appliance)));
        let notifier = Arc::new(RecordingNotifier::default());
        orch.add_notifier(notifier.clone());

        let report = orch.run_cycle().await;

        assert!(!report.has_content());
        assert!(notifier.reports.lock().is_empty());
        assert_eq!(orch.metrics().cycles(), 1);
    }

    #[tokio::test]
    async fn test_retention_and_lineage() {
        let mut orch = orchestrator(CancellationToken::new());
        let appliance = Arc::new(
            InMemoryAppliance::new("fsx-prod", pool())
                .with_volume(volume("vol1", None))
                .with_volume(volume("vol1_clone", Some("weekly.0")))
                .with_snapshot(snapshot("s1", "weekly.0", 90))
                .with_snapshot(snapshot("s2", "daily.31", 31))
                .with_snapshot(snapshot("s3", "daily.30", 30)),
        );
        orch.add_appliance(ManagedAppliance::new(&config("fsx-prod", true), appliance.clone()));

        let report = orch.run_cycle().await;
        let prod = &report.appliances[0];

        assert_eq!(prod.decisions.len(), 1);
        assert_eq!(prod.decisions[0].kind, DecisionKind::SnapshotDeleted);
        assert_eq!(prod.decisions[0].subject.as_deref(), Some("daily.31"));
        assert_eq!(prod.decisions[0].outcome, Outcome::Applied);

        assert_eq!(prod.clone_lineage.len(), 1);
        assert_eq!(prod.clone_lineage[0].clone_volume, "vol1_clone");
        assert_eq!(prod.clone_lineage[0].parent_snapshot, "weekly.0");

        assert_eq!(
            appliance.journal(),
            vec![Mutation::SnapshotDeleted {
                volume_id: "vol1".into(),
                snapshot_id: "s2".into(),
            }]
        );
        assert_eq!(appliance.snapshot_count(), 2);
    }

    #[tokio::test]
    async fn test_retention_disabled_lists_nothing() {
        let mut orch = orchestrator(CancellationToken::new());
        let appliance = Arc::new(
            InMemoryAppliance::new("fsx-prod", pool())
                .with_volume(volume("vol1", None))
                .with_snapshot(snapshot("s2", "daily.31", 31)),
        );
        orch.add_appliance(ManagedAppliance::new(&config("fsx-prod", false), appliance.clone()));

        let report = orch.run_cycle().await;

        assert!(report.appliances[0].decisions.is_empty());
        assert!(report.appliances[0].clone_lineage.is_empty());
        assert_eq!(appliance.snapshot_count(), 1);
    }

    #[tokio::test]
    async fn test_notifier_failure_is_not_fatal() {
        let mut orch = orchestrator(CancellationToken::new());
        let appliance = InMemoryAppliance::new("fsx-prod", pool())
            .with_volume(volume("vol1", None))
            .with_lun(warn_lun());
        orch.add_appliance(ManagedAppliance::new(&config("fsx-prod", false), Arc::new(appliance)));
        let failing = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let second = Arc::new(RecordingNotifier::default());
        orch.add_notifier(failing.clone());
        orch.add_notifier(second.clone());

        let report = orch.run_cycle().await;

        assert!(report.failures.is_empty());
        assert_eq!(failing.reports.lock().len(), 1);
        assert_eq!(second.reports.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_skips_appliances() {
        let cancel = CancellationToken::new();
        let mut orch = orchestrator(cancel.clone());
        let appliance = Arc::new(
            InMemoryAppliance::new("fsx-prod", pool())
                .with_volume(volume("vol1", None))
                .with_lun(warn_lun()),
        );
        orch.add_appliance(ManagedAppliance::new(&config("fsx-prod", false), appliance.clone()));
        cancel.cancel();

        let report = orch.run_cycle().await;

        assert!(report.appliances.is_empty());
        assert_matches!(report.failures.as_slice(), []);
        assert!(appliance.journal().is_empty());
    }
}
