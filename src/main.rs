//! Capacity Autoscaler
//!
//! Runs capacity cycles against the appliances listed in the settings file.
//! By default a single cycle runs and the process exits, leaving scheduling
//! to an external timer; `--watch-interval-secs` keeps it running instead.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use capacity_autoscaler::{Error, Metrics, Orchestrator, Result, Settings};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Capacity Autoscaler - grows LUNs, volumes and storage capacity before they fill up
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (YAML)
    #[arg(long, env = "CONFIG_PATH", default_value = "/etc/capacity-autoscaler/config.yaml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Compute and report decisions without issuing any mutation
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    /// Run a cycle every N seconds instead of once
    #[arg(long, env = "WATCH_INTERVAL_SECS")]
    watch_interval_secs: Option<u64>,

    /// Health and metrics bind address (watch mode only)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    info!("Starting Capacity Autoscaler");
    info!("  Version: {}", capacity_autoscaler::VERSION);
    info!("  Config: {}", args.config);
    info!("  Dry run: {}", args.dry_run);

    let settings = Settings::load(&args.config)?;
    info!("Loaded {} appliance(s)", settings.appliances.len());

    let cancel = CancellationToken::new();
    let metrics = Arc::new(Metrics::new()?);
    let orchestrator = Orchestrator::from_settings(&settings, args.dry_run, cancel.clone(), metrics.clone())?;

    // Ctrl-C aborts in-flight job waits and stops the watch loop
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let Some(interval_secs) = args.watch_interval_secs else {
        let report = orchestrator.run_cycle().await;
        info!(
            decisions = report.decisions().count(),
            failures = report.failures.len(),
            "Single cycle complete"
        );
        return Ok(());
    };

    if interval_secs == 0 {
        return Err(Error::Configuration(
            "--watch-interval-secs must be positive".into(),
        ));
    }

    if let Some(addr) = &args.metrics_addr {
        let addr: SocketAddr = addr.parse().map_err(|e| {
            Error::Configuration(format!("Invalid metrics address: {}", e))
        })?;
        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    info!("Watching every {}s", interval_secs);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                orchestrator.run_cycle().await;
            }
        }
    }

    info!("Autoscaler shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let directive = |text: &str| -> Result<Directive> {
        text.parse::<Directive>()
            .map_err(|e| Error::Configuration(format!("Invalid log directive {}: {}", text, e)))
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("reqwest=warn")?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health & Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<()> {
    use hyper::header::CONTENT_TYPE;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use std::convert::Infallible;

    fn respond(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
        let mut response = Response::new(body.into());
        *response.status_mut() = status;
        response
    }

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => respond(StatusCode::OK, "ok"),
                        "/metrics" => match metrics.encode() {
                            Ok((content_type, buffer)) => {
                                let mut response = respond(StatusCode::OK, buffer);
                                if let Ok(value) = content_type.parse() {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                        },
                        _ => respond(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Metrics server bind error: {}", e)))?
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
