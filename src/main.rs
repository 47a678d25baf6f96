//! Invoice Validation Pipeline - Main Entry Point
//!
//! Consumes invoice submissions from NATS, runs each through the pipeline on
//! a bounded worker pool, streams progress per session and publishes the
//! final outcome.

use anyhow::{Context, Result};
use futures::StreamExt;
use invoice_pipeline::{
    config::{AppConfig, LoggingConfig},
    consumer::{Submission, SubmissionConsumer},
    metrics::{MetricsReporter, PipelineMetrics},
    producer::{DecisionProducer, NatsProgressPublisher},
    InMemoryHistory, KeyedLocks, PipelineOrchestrator, StructuredDocumentAdapter, WorkerPool,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    info!("Starting Invoice Validation Pipeline");
    info!(
        risk_low = config.risk_levels.low,
        risk_medium = config.risk_levels.medium,
        risk_high = config.risk_levels.high,
        manager = config.policy.approval_thresholds.manager,
        director = config.policy.approval_thresholds.director,
        cfo = config.policy.approval_thresholds.cfo,
        board = config.policy.approval_thresholds.board,
        "Configuration loaded"
    );

    let metrics = Arc::new(PipelineMetrics::new());
    let history = Arc::new(InMemoryHistory::new(
        chrono::Duration::hours(config.pipeline.history_window_hours),
        config.pipeline.history_capacity,
    ));

    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = SubmissionConsumer::new(client.clone(), &config.nats.submission_subject);
    let decisions = Arc::new(DecisionProducer::new(
        client.clone(),
        &config.nats.decision_subject,
    ));
    let progress = Arc::new(NatsProgressPublisher::new(
        client.clone(),
        &config.nats.progress_subject,
    ));

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        config.assessment(),
        Arc::new(StructuredDocumentAdapter::new()),
        history.clone(),
        progress,
    )?);

    let pool = WorkerPool::new(config.pipeline.workers);
    info!(
        workers = pool.workers(),
        submissions = %consumer.subject(),
        decisions = %decisions.subject(),
        progress = %config.nats.progress_subject,
        "Starting submission loop"
    );

    let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs);
    tokio::spawn(reporter.start());

    let in_flight = KeyedLocks::new();
    let processed_count = Arc::new(AtomicU64::new(0));
    let mut subscription = consumer.subscribe().await?;

    while let Some(message) = subscription.next().await {
        let submission = match Submission::decode(&message.payload) {
            Ok(submission) => submission,
            Err(e) => {
                warn!(error = %e, "Dropping submission");
                continue;
            }
        };

        let invoice_key = submission.invoice_key();
        let in_flight = in_flight.clone();
        let orchestrator = orchestrator.clone();
        let history = history.clone();
        let decisions = decisions.clone();
        let metrics = metrics.clone();
        let processed_count = processed_count.clone();

        // Waits for a free worker before the next message is read.
        pool.spawn(async move {
            let started = Instant::now();
            let Submission {
                session_id,
                document,
            } = submission;

            // Held until the history record is written, so a resubmission
            // of the same invoice is scored against it.
            let invoice_guard = match &invoice_key {
                Some(key) => Some(in_flight.lock(key).await),
                None => None,
            };

            match orchestrator.run(&document, &session_id).await {
                Ok(outcome) => {
                    metrics.record_outcome(&outcome, started.elapsed());
                    history.record(&outcome.fields, chrono::Utc::now());
                    drop(invoice_guard);

                    if let Err(e) = decisions.publish(&outcome).await {
                        error!(session_id = %session_id, error = %e, "Failed to publish decision");
                    }

                    let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
                    if count % 100 == 0 {
                        let stats = metrics.processing_stats();
                        info!(
                            processed = count,
                            throughput = format!("{:.1} runs/s", metrics.throughput()),
                            avg_latency_ms = stats.mean_ms,
                            "Processing milestone"
                        );
                    }
                }
                Err(e) => {
                    metrics.record_failure(&e);
                    error!(session_id = %session_id, error = %e, "Pipeline run failed");
                }
            }
            debug!(session_id = %session_id, "Worker released");
        })
        .await;
    }

    info!("Pipeline shutting down...");
    metrics.print_summary();

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("invoice_pipeline={}", logging.level)))
        .context("Invalid log level")?;

    if logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}
