//! veidemann-exporter binary.
//!
//! # Usage
//!
//! ```text
//! veidemann-exporter --db-host rethinkdb-proxy --frontier-host veidemann-frontier
//! ```

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use veidemann_exporter::{AppState, Config, FrontierQueue, VERSION, build_router, logging};
use veidemann_frontier::FrontierClient;
use veidemann_metrics::{ChangeStreamConsumer, CollectError, JobStatusAggregator, Registry};
use veidemann_store::{DocumentStore, RethinkStore, Table};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    config.validate()?;
    logging::init(&config.log_level, config.log_formatter, config.log_method)?;

    if let Err(e) = run(config).await {
        error!(error = %format!("{e:#}"), "veidemann-exporter terminated");
        return Err(e);
    }
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let addr = config.listen_addr()?;
    info!(version = VERSION, %addr, metrics_path = %config.metrics_path, "starting veidemann-exporter");

    // ── Connect to backends ────────────────────────────────────

    let store = RethinkStore::connect_with_retry(config.store_options(), config.connect_backoff())
        .await
        .context("connecting to RethinkDB")?;
    store.verify().await.context("verifying database schema")?;
    let store: Arc<dyn DocumentStore> = Arc::new(store);

    let frontier = FrontierClient::connect_with_retry(
        &config.frontier_host,
        config.frontier_port,
        config.query_timeout(),
        config.connect_backoff(),
    )
    .await
    .context("connecting to Frontier")?;

    let registry = Arc::new(
        Registry::new(VERSION)
            .with_queue_length(Arc::new(FrontierQueue::new(frontier)), config.query_timeout()),
    );

    // ── Start background tasks ─────────────────────────────────

    let consumer = Arc::new(ChangeStreamConsumer::new(registry.clone()));
    let crawl_log = consumer.clone().spawn(store.clone(), Table::CrawlLog);
    let page_log = consumer.spawn(store.clone(), Table::PageLog);

    let aggregator = Arc::new(JobStatusAggregator::new(
        store,
        registry.clone(),
        config.query_timeout(),
    ))
    .run(config.poll_interval());

    // ── Start HTTP server ──────────────────────────────────────

    let (fatal_tx, mut fatal_rx) = mpsc::channel::<CollectError>(1);
    let router = build_router(AppState::new(registry, &config.metrics_path, fatal_tx));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    // ── Wait for the first thing to end ────────────────────────

    tokio::select! {
        res = server => {
            res.context("HTTP server task panicked")?.context("HTTP server failed")?;
            info!("veidemann-exporter stopped");
            Ok(())
        }
        res = crawl_log => Err(task_exit("crawl_log consumer", res)),
        res = page_log => Err(task_exit("page_log consumer", res)),
        res = aggregator => Err(task_exit("job status aggregator", res)),
        Some(e) = fatal_rx.recv() => Err(anyhow::Error::new(e).context("scrape failed")),
    }
}

/// Background tasks only end on failure; turn their exit into the cause.
fn task_exit(task: &'static str, res: Result<Result<(), CollectError>, JoinError>) -> anyhow::Error {
    match res {
        Ok(Err(e)) => anyhow::Error::new(e).context(format!("{task} failed")),
        Ok(Ok(())) => anyhow::anyhow!("{task} stopped unexpectedly"),
        Err(e) => anyhow::Error::new(e).context(format!("{task} panicked")),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
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
    info!("shutdown signal received");
}
