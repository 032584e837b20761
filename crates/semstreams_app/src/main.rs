//! # semstreams — the semantic streaming daemon
//!
//! ## Startup sequence
//!
//! 1. Load and validate the TOML config (`--config <path>`); exit non-zero
//!    on validation failure.
//! 2. Connect to NATS and open the JetStream KV buckets.
//! 3. Register the configured vocabulary and wire the core.
//! 4. Probe the embedding provider (degrading to BM25 is not fatal).
//! 5. Start background jobs, the worker pool, and the ingest/API/rules
//!    loops.
//! 6. On SIGINT: stop intake, drain the queue within the deadline, cancel
//!    workers and background jobs, exit 0.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use semstreams_app::api::run_api;
use semstreams_app::ingest::run_ingest;
use semstreams_app::rules_runtime::run_rules;
use semstreams_app::{AppConfig, AppMetrics, Core, CoreBuckets, DeadLetterSink, Pipeline, WorkerPool};
use semstreams_net::NatsConnection;
use semstreams_rules::{RuleRegistry, RulesEngine};

/// Edge-deployable semantic streaming engine.
#[derive(Debug, Parser)]
#[command(name = "semstreams", version)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("semstreams=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AppConfig::load(path).context("loading configuration")?,
        None => AppConfig::default(),
    };
    info!("semstreams starting");

    let conn = NatsConnection::connect_to(&config.nats.url).await?;
    let jetstream = async_nats::jetstream::new(conn.client().clone());
    let buckets = CoreBuckets::open_jetstream(&jetstream)
        .await
        .context("opening KV buckets")?;

    let metrics = Arc::new(AppMetrics::new().context("registering metrics")?);
    let core = Core::build(&config, buckets, metrics.clone())?;
    core.embedder.probe().await;

    let cancel = CancellationToken::new();
    let intake_cancel = CancellationToken::new();

    // Ingest pipeline: workers, embedding queue, downstream events.
    let (pipeline, embed_worker) = Pipeline::new(
        core.entities.clone(),
        core.index.clone(),
        core.embedder.clone(),
        core.detector.clone(),
        metrics.clone(),
        Some(conn.clone()),
    );
    tokio::spawn(embed_worker.run(cancel.clone()));
    tokio::spawn(
        core.embedder
            .clone()
            .run_sweeper(Duration::from_secs(60), cancel.clone()),
    );
    tokio::spawn(core.detector.clone().run(cancel.clone()));

    let pool = Arc::new(WorkerPool::spawn(
        &config.workers,
        pipeline,
        DeadLetterSink::Nats(conn.clone()),
        metrics.clone(),
    ));

    let rules = RuleRegistry::with_builtins().build_all(&config.rules);
    info!(rules = rules.len(), "rules engine configured");
    let engine = Arc::new(RulesEngine::new(rules, metrics.rules.clone()));

    let rules_handle = tokio::spawn(run_rules(conn.clone(), engine, cancel.clone()));
    let api_handle = tokio::spawn(run_api(conn.clone(), core.clone(), cancel.clone()));
    let ingest_handle = tokio::spawn(run_ingest(
        conn.clone(),
        config.ingest_subjects(),
        pool.clone(),
        DeadLetterSink::Nats(conn.clone()),
        metrics.clone(),
        intake_cancel.clone(),
    ));

    info!("semstreams ready");
    tokio::signal::ctrl_c().await?;

    // Shutdown: stop accepting, drain within the deadline, cancel the rest.
    info!("shutdown requested, stopping intake");
    intake_cancel.cancel();
    let _ = ingest_handle.await;

    pool.shutdown().await;
    cancel.cancel();
    let _ = api_handle.await;
    let _ = rules_handle.await;

    info!("semstreams shut down");
    Ok(())
}
