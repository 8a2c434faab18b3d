mod aggregator;
mod classify;
mod collectors;
mod config;
mod http;
mod metrics;
mod state;
mod store;

use aggregator::{Aggregator, AggregatorSettings, ProbeTarget};
use axum::serve;
use clap::Parser;
use collectors::checks::probe_for;
use collectors::simulated::SimulatedCollector;
use collectors::system::SystemCollector;
use collectors::{GuardedCollector, MetricsCollector};
use config::Config;
use metrics::Metrics;
use reqwest::Client;
use state::HealthSnapshot;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use store::SnapshotStore;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "healthd")]
#[command(version)]
struct Cli {
    /// YAML config; defaults plus HEALTH_* variables when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
    /// Serve random nominal readings instead of host telemetry.
    #[arg(long)]
    simulated_metrics: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match Config::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "invalid listen address");
            std::process::exit(1);
        }
    };

    info!(
        listen = %cfg.listen,
        interval_ms = cfg.interval_ms,
        services = cfg.services.len(),
        environment = %cfg.environment,
        simulated = cli.simulated_metrics,
        "starting healthd"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };

    let client = Client::builder()
        .user_agent(concat!("healthd/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new());

    let targets: Vec<ProbeTarget> = cfg
        .services
        .iter()
        .map(|service| ProbeTarget {
            name: service.name.clone(),
            probe: probe_for(service, &client, cfg.slow_response()),
            timeout: cfg.service_timeout(service),
        })
        .collect();

    let source: Arc<dyn MetricsCollector> = if cli.simulated_metrics {
        Arc::new(SimulatedCollector)
    } else {
        Arc::new(SystemCollector::new(
            (&cfg.thresholds).into(),
            cfg.latency_target.clone(),
            cfg.latency_timeout(),
        ))
    };

    let store = SnapshotStore::new(HealthSnapshot::initial(
        cfg.version.clone(),
        cfg.environment.clone(),
    ));
    let aggregator = Aggregator::new(
        targets,
        GuardedCollector::new(source, cfg.collect_timeout()),
        cfg.collect_timeout(),
        store.clone(),
        metrics.clone(),
        AggregatorSettings {
            version: cfg.version.clone(),
            environment: cfg.environment.clone(),
            critical_services: cfg.critical_service_names(),
            thresholds: (&cfg.thresholds).into(),
            interval: cfg.interval(),
        },
    );
    debug!(ceiling_ms = aggregator.ceiling().as_millis() as u64, "cycle ceiling");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, listen = %addr, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };

    let http_task = {
        let app = http::build_router(aggregator.clone(), metrics.clone());
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let metrics_task = {
        let metrics = metrics.clone();
        let store = store.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut updates = store.subscribe();
            debug!(subscribers = store.subscriber_count(), "metrics exporter subscribed");
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    next = updates.next() => match next {
                        Some(snapshot) => metrics.update_from_snapshot(&snapshot),
                        None => break,
                    },
                }
            }
        })
    };

    let aggregator_task = tokio::spawn(aggregator.clone().run(shutdown_rx));

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for Ctrl+C");
    }
    info!("Ctrl+C received, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = aggregator_task.await;
    let _ = metrics_task.await;
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
