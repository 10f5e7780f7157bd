//! Notification Sinks
//!
//! Cycle reports are rendered once and handed to every configured sink. A
//! sink failure is logged by the orchestrator and never fails the cycle.

use crate::config::NotificationConfig;
use crate::domain::decision::{CycleReport, DecisionKind, ResizeDecision};
use crate::domain::ports::{Notifier, NotifierRef};
use crate::error::{Error, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Header carrying the body signature when a webhook secret is configured
pub const SIGNATURE_HEADER: &str = "X-Capacity-Signature";

// =============================================================================
// Rendering
// =============================================================================

struct Section {
    title: &'static str,
    kinds: &'static [DecisionKind],
}

const SECTIONS: &[Section] = &[
    Section {
        title: "File System Storage Capacity",
        kinds: &[
            DecisionKind::PoolWarn,
            DecisionKind::PoolResize,
            DecisionKind::PoolResizeBlocked,
        ],
    },
    Section {
        title: "Volumes",
        kinds: &[DecisionKind::VolWarn, DecisionKind::VolResize],
    },
    Section {
        title: "LUNs",
        kinds: &[DecisionKind::LunWarn, DecisionKind::LunResize],
    },
    Section {
        title: "Snapshots",
        kinds: &[DecisionKind::SnapshotDeleted],
    },
];

/// Plain-text view of a cycle report
struct ReportText<'a> {
    subject: &'a str,
    report: &'a CycleReport,
}

impl fmt::Display for ReportText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report;
        writeln!(f, "{}", self.subject)?;
        writeln!(
            f,
            "Cycle {} .. {}",
            report.started_at.to_rfc3339(),
            report.finished_at.to_rfc3339()
        )?;

        for appliance in &report.appliances {
            if appliance.decisions.is_empty() && appliance.clone_lineage.is_empty() {
                continue;
            }
            writeln!(f, "\n== {} ==", appliance.appliance)?;

            for section in SECTIONS {
                let entries: Vec<&ResizeDecision> = appliance
                    .decisions
                    .iter()
                    .filter(|d| section.kinds.contains(&d.kind))
                    .collect();
                if entries.is_empty() {
                    continue;
                }
                writeln!(f, "{}:", section.title)?;
                for decision in entries {
                    writeln!(f, "  - [{}] {}", decision.kind, decision.message())?;
                }
            }

            if !appliance.clone_lineage.is_empty() {
                writeln!(f, "Clones:")?;
                for lineage in &appliance.clone_lineage {
                    writeln!(
                        f,
                        "  - {} <- {}@{} ({} KB)",
                        lineage.clone_volume,
                        lineage.parent_volume,
                        lineage.parent_snapshot,
                        lineage.snapshot_size_bytes / 1024
                    )?;
                }
            }
        }

        if !report.failures.is_empty() {
            writeln!(f, "\nFailed appliances:")?;
            for failure in &report.failures {
                writeln!(f, "  - {}: {}", failure.appliance, failure.error)?;
            }
        }
        Ok(())
    }
}

/// Render a cycle report as plain text, one block per appliance
pub fn render_report(subject: &str, report: &CycleReport) -> String {
    ReportText { subject, report }.to_string()
}

// =============================================================================
// Log Sink
// =============================================================================

/// Writes every record to the structured log
pub struct LogNotifier {
    subject: String,
}

impl LogNotifier {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn emit(&self, report: &CycleReport) -> Result<()> {
        for appliance in &report.appliances {
            for decision in &appliance.decisions {
                if decision.kind.is_warning() {
                    warn!(
                        appliance = %appliance.appliance,
                        kind = %decision.kind,
                        subject = %decision.subject_name(),
                        "{}",
                        decision.message()
                    );
                } else {
                    info!(
                        appliance = %appliance.appliance,
                        kind = %decision.kind,
                        subject = %decision.subject_name(),
                        outcome = decision.outcome.as_str(),
                        "{}",
                        decision.message()
                    );
                }
            }
            for lineage in &appliance.clone_lineage {
                info!(
                    appliance = %appliance.appliance,
                    clone = %lineage.clone_volume,
                    parent_snapshot = %lineage.parent_snapshot,
                    "Clone {} depends on snapshot {} of volume {}",
                    lineage.clone_volume,
                    lineage.parent_snapshot,
                    lineage.parent_volume
                );
            }
        }
        for failure in &report.failures {
            warn!(appliance = %failure.appliance, "Appliance cycle aborted: {}", failure.error);
        }
        info!(
            decisions = report.decisions().count(),
            failures = report.failures.len(),
            "{}",
            self.subject
        );
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "log"
    }
}

// =============================================================================
// Webhook Sink
// =============================================================================

#[derive(Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    text: String,
    report: &'a CycleReport,
}

type HmacSha256 = Hmac<Sha256>;

fn compute_signature(payload: &[u8], secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Signing(e.to_string()))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// POSTs the report as JSON
pub struct WebhookNotifier {
    url: String,
    subject: String,
    secret: Option<String>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, subject: impl Into<String>, secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            url: url.into(),
            subject: subject.into(),
            secret,
            client,
        })
    }

    fn failure(&self, reason: impl Into<String>) -> Error {
        Error::Notification {
            sink: self.sink_name().to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn emit(&self, report: &CycleReport) -> Result<()> {
        let body = serde_json::to_vec(&WebhookPayload {
            subject: &self.subject,
            text: render_report(&self.subject, report),
            report,
        })?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        if let Some(secret) = &self.secret {
            let signature = compute_signature(&body, secret)?;
            request = request.header(SIGNATURE_HEADER, format!("sha256={}", signature));
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| self.failure(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.failure(format!("HTTP {}: {}", status.as_u16(), text)));
        }
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "webhook"
    }
}

/// Build the configured sinks
pub fn build_notifiers(config: &NotificationConfig) -> Result<Vec<NotifierRef>> {
    let mut notifiers: Vec<NotifierRef> = Vec::new();
    if config.log {
        notifiers.push(Arc::new(LogNotifier::new(&config.subject)));
    }
    if let Some(url) = &config.webhook_url {
        notifiers.push(Arc::new(WebhookNotifier::new(
            url,
            &config.subject,
            config.webhook_secret()?,
        )?));
    }
    if notifiers.is_empty() {
        warn!("No notification sink configured; cycle reports are discarded");
    }
    Ok(notifiers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::{
        ApplianceFailure, ApplianceReport, CloneLineage, Outcome, SizeValue, SnapshotDeletion,
    };
    use assert_matches::assert_matches;
    use chrono::Utc;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    fn sample_report() -> CycleReport {
        let mut report = CycleReport::new(Utc::now());
        report.appliances.push(ApplianceReport {
            appliance: "fsx-prod".into(),
            decisions: vec![
                ResizeDecision::resize(
                    DecisionKind::VolResize,
                    "vol1",
                    91.0,
                    SizeValue::mib(215_040),
                    Outcome::Applied,
                ),
                ResizeDecision::resize(
                    DecisionKind::LunResize,
                    "lun1",
                    92.0,
                    SizeValue::bytes(110 * 1024 * 1024 * 1024),
                    Outcome::Failed("LUN is offline".into()),
                ),
                ResizeDecision::snapshot_deleted(
                    "daily.2024-01-01",
                    SnapshotDeletion {
                        volume: "vol1".into(),
                        age_days: 31,
                        size_bytes: 4096,
                    },
                    Outcome::Applied,
                ),
            ],
            clone_lineage: vec![CloneLineage {
                clone_volume: "vol1_clone".into(),
                parent_volume: "vol1".into(),
                parent_snapshot: "weekly.1".into(),
                snapshot_size_bytes: 8192,
            }],
        });
        report.failures.push(ApplianceFailure {
            appliance: "fsx-dr".into(),
            error: "Authentication to appliance fsx-dr failed".into(),
        });
        report
    }

    #[test]
    fn test_render_groups_by_section() {
        let text = render_report("Subject line", &sample_report());

        assert!(text.starts_with("Subject line\n"));
        let volumes = text.find("Volumes:").unwrap();
        let luns = text.find("LUNs:").unwrap();
        let snapshots = text.find("Snapshots:").unwrap();
        assert!(volumes < luns && luns < snapshots);
        assert!(!text.contains("File System Storage Capacity:"));
        assert!(text.contains("Volume vol1 is 91.00% used; resized to 210.00 GB"));
        assert!(text.contains("(FAILED: LUN is offline)"));
        assert!(text.contains("vol1_clone <- vol1@weekly.1 (8 KB)"));
        assert!(text.contains("fsx-dr: Authentication to appliance fsx-dr failed"));
    }

    #[test]
    fn test_signature_is_hex_hmac() {
        let signature = compute_signature(b"{}", "secret").unwrap();
        assert_eq!(signature.len(), 64);
        assert_eq!(signature, compute_signature(b"{}", "secret").unwrap());
        assert_ne!(signature, compute_signature(b"{}", "other").unwrap());
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let notifier = LogNotifier::new("subject");
        assert!(notifier.emit(&sample_report()).await.is_ok());
        assert_eq!(notifier.sink_name(), "log");
    }

    #[test]
    fn test_build_notifiers() {
        let config = NotificationConfig {
            log: true,
            webhook_url: Some("http://127.0.0.1:9/hook".into()),
            webhook_secret_env: None,
            subject: "s".into(),
        };
        let names: Vec<String> = build_notifiers(&config)
            .unwrap()
            .iter()
            .map(|n| n.sink_name().to_string())
            .collect();
        assert_eq!(names, vec!["log", "webhook"]);

        let missing = NotificationConfig {
            webhook_secret_env: Some("CAPACITY_AUTOSCALER_TEST_UNSET_SECRET".into()),
            ..config
        };
        assert_matches!(build_notifiers(&missing).err(), Some(Error::Configuration(_)));
    }

    /// Start a one-route HTTP server that forwards each request body and
    /// signature to the test and answers with `status`
    async fn capture_server(status: StatusCode) -> (SocketAddr, mpsc::UnboundedReceiver<(Option<String>, Vec<u8>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let make_svc = make_service_fn(move |_conn| {
            let tx = tx.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let tx = tx.clone();
                    async move {
                        let signature = req
                            .headers()
                            .get(SIGNATURE_HEADER)
                            .and_then(|v| v.to_str().ok())
                            .map(String::from);
                        let body = hyper::body::to_bytes(req.into_body()).await.unwrap();
                        let _ = tx.send((signature, body.to_vec()));
                        Ok::<_, Infallible>(
                            Response::builder().status(status).body(Body::empty()).unwrap(),
                        )
                    }
                }))
            }
        });
        let server = Server::bind(&"127.0.0.1:0".parse().unwrap()).serve(make_svc);
        let addr = server.local_addr();
        tokio::spawn(server);
        (addr, rx)
    }

    #[tokio::test]
    async fn test_webhook_posts_signed_report() {
        let (addr, mut rx) = capture_server(StatusCode::OK).await;
        let notifier =
            WebhookNotifier::new(format!("http://{}/hook", addr), "subject", Some("k".into()))
                .unwrap();

        notifier.emit(&sample_report()).await.unwrap();

        let (signature, body) = rx.recv().await.unwrap();
        let expected = format!("sha256={}", compute_signature(&body, "k").unwrap());
        assert_eq!(signature.as_deref(), Some(expected.as_str()));

        let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload["subject"], "subject");
        assert_eq!(payload["report"]["appliances"][0]["appliance"], "fsx-prod");
        assert_eq!(
            payload["report"]["appliances"][0]["decisions"][1]["outcome"]["status"],
            "failed"
        );
    }

    #[tokio::test]
    async fn test_webhook_error_status() {
        let (addr, _rx) = capture_server(StatusCode::INTERNAL_SERVER_ERROR).await;
        let notifier = WebhookNotifier::new(format!("http://{}/hook", addr), "subject", None).unwrap();

        let err = notifier.emit(&sample_report()).await.unwrap_err();
        assert_matches!(err, Error::Notification { ref sink, ref reason } if sink == "webhook" && reason.starts_with("HTTP 500"));
    }
}
