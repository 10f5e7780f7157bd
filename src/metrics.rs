//! Prometheus Metrics
//!
//! Counters and the cycle-duration histogram, kept in a registry owned by
//! [`Metrics`] and exposed in text format on `/metrics`.

use crate::domain::decision::CycleReport;
use crate::error::{Error, Result};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

fn metrics_error(err: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", err))
}

/// Autoscaler metrics
pub struct Metrics {
    registry: Registry,
    decisions: IntCounterVec,
    cycles: IntCounter,
    appliance_failures: IntCounterVec,
    cycle_duration: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let decisions = IntCounterVec::new(
            Opts::new("capacity_decisions_total", "Decision records by kind and outcome"),
            &["kind", "outcome"],
        )
        .map_err(metrics_error)?;
        let cycles = IntCounter::new("capacity_cycles_total", "Completed capacity cycles")
            .map_err(metrics_error)?;
        let appliance_failures = IntCounterVec::new(
            Opts::new(
                "capacity_appliance_failures_total",
                "Appliance cycles aborted by an error",
            ),
            &["appliance"],
        )
        .map_err(metrics_error)?;
        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new(
                "capacity_cycle_duration_seconds",
                "Wall time of one capacity cycle",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(decisions.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(cycles.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(appliance_failures.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(cycle_duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            decisions,
            cycles,
            appliance_failures,
            cycle_duration,
        })
    }

    /// Fold a finished cycle into the counters
    pub fn record_report(&self, report: &CycleReport) {
        for decision in report.decisions() {
            self.decisions
                .with_label_values(&[decision.kind.as_str(), decision.outcome.as_str()])
                .inc();
        }
        for failure in &report.failures {
            self.appliance_failures
                .with_label_values(&[failure.appliance.as_str()])
                .inc();
        }

        let elapsed = report.finished_at - report.started_at;
        let seconds = elapsed.num_milliseconds().max(0) as f64 / 1000.0;
        self.cycle_duration.observe(seconds);
        self.cycles.inc();
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.get()
    }

    /// Render the registry in the text exposition format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}
