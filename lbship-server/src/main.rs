// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  lbship: load-balancer access-log shipper
//
//  Intake:    syslog UDP/TCP on tokio
//  Workers:   std threads, one batch each, shared bounded queue
//  Storage:   Elasticsearch _bulk
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

mod admin;
mod intake;

use anyhow::Context;
use clap::Parser;
use lbship_core::ShipperConfig;
use lbship_enrich::{Enricher, MaxMindLookup};
use lbship_observability::PipelineMetrics;
use lbship_pipeline::{Pipeline, PipelineDeps};
use lbship_sink::{ElasticClient, Forwarder};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "lbship", version, about = "Load-balancer access-log shipper")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "lbship.toml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "lbship starting");

    // ── Config ──
    info!(path = %cli.config.display(), "Loading config file");
    let config = ShipperConfig::load(&cli.config)
        .inspect_err(|e| error!(error = %e, "Invalid configuration"))?;

    let num_workers = config.effective_workers();
    info!(workers = num_workers, "Worker count");

    // ── Runtime for intake, admin, and storage I/O ──
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("lbship-io")
        .build()
        .context("failed to build tokio runtime")?;

    // ── Metrics ──
    let metrics = Arc::new(PipelineMetrics::new(config.admin.enabled)?);

    // ── Enrichment ──
    let geo = MaxMindLookup::open(&config.enrich.geoip_path)
        .inspect_err(|e| error!(error = %e, "GeoIP database unavailable"))?;
    let enricher = Enricher::from_config(&config.enrich, Arc::new(geo), Arc::clone(&metrics))?;

    // ── Storage ──
    let storage = ElasticClient::new(&config.elasticsearch)
        .inspect_err(|e| error!(error = %e, "Storage client unavailable"))?;
    info!(nodes = ?storage.nodes(), index = %config.elasticsearch.index, "Storage client ready");

    // ── Forwarder ──
    let forwarder = match config.forward.target {
        Some(ref target) => {
            Forwarder::spawn(target, config.forward.queue_capacity, Arc::clone(&metrics))?
        }
        None => Forwarder::disabled(),
    };

    // ── Workers ──
    let pipeline = Pipeline::start(
        &config,
        PipelineDeps {
            enricher: Arc::new(enricher),
            storage: Arc::new(storage),
            forwarder: Arc::new(forwarder),
            metrics: Arc::clone(&metrics),
            runtime: runtime.handle().clone(),
        },
    )
    .context("failed to spawn workers")?;

    // ── Intake + admin, then wait for a shutdown signal ──
    let served = runtime.block_on(async {
        intake::start(&config.listen, pipeline.dispatcher(), pipeline.stop_signal())
            .await
            .context("failed to bind syslog listener")?;

        if config.admin.enabled {
            let state = Arc::new(admin::AdminState {
                metrics: Arc::clone(&metrics),
                dispatcher: pipeline.dispatcher(),
                stop: pipeline.stop_signal(),
            });
            let addr = config.admin.addr.clone();
            tokio::spawn(async move {
                if let Err(e) = admin::serve(addr, state).await {
                    error!(error = %e, "Admin endpoint failed");
                }
            });
        }

        info!(
            listen = %config.listen.bind_addr(),
            workers = num_workers,
            "lbship is ready"
        );

        wait_for_signal().await;
        anyhow::Ok(())
    });

    match served {
        Ok(()) => info!("Shutdown signal received, draining"),
        Err(ref e) => error!(error = %e, "Startup failed, draining"),
    }

    // Workers flush through the runtime, so it must outlive this call.
    pipeline.shutdown();
    runtime.shutdown_timeout(Duration::from_secs(5));

    served?;
    info!("lbship stopped");
    Ok(())
}

/// SIGINT or SIGTERM. Later signals are absorbed by the installed handlers.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
