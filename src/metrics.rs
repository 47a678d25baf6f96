//! Throughput and outcome statistics for the invoice pipeline.

use crate::error::PipelineError;
use crate::orchestrator::PipelineOutcome;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for pipeline runs
pub struct PipelineMetrics {
    /// Runs that reached a decision
    pub runs_completed: AtomicU64,
    /// Runs stopped by an extraction failure or timeout
    pub extraction_failures: AtomicU64,
    /// Runs stopped for any other reason
    pub runs_failed: AtomicU64,
    decisions: RwLock<HashMap<String, u64>>,
    tiers: RwLock<HashMap<String, u64>>,
    /// Processing times in milliseconds
    processing_times: RwLock<Vec<u64>>,
    score_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            runs_completed: AtomicU64::new(0),
            extraction_failures: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            decisions: RwLock::new(HashMap::new()),
            tiers: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a run that reached a decision
    pub fn record_outcome(&self, outcome: &PipelineOutcome, processing_time: Duration) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut decisions) = self.decisions.write() {
            *decisions
                .entry(outcome.decision.outcome.as_str().to_string())
                .or_insert(0) += 1;
        }
        if let Ok(mut tiers) = self.tiers.write() {
            *tiers
                .entry(outcome.policy.approval_tier.as_str().to_string())
                .or_insert(0) += 1;
        }

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_millis() as u64);
            // Keep only the most recent samples
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }

        let bucket = (outcome.fraud.risk_score * 10.0).clamp(0.0, 9.0) as usize;
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    /// Record a run that ended without a decision
    pub fn record_failure(&self, error: &PipelineError) {
        let counter = match error {
            PipelineError::ExtractionFailed { .. }
            | PipelineError::EmptyExtraction { .. }
            | PipelineError::ExtractionTimeout { .. } => &self.extraction_failures,
            PipelineError::Session(_) => &self.runs_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processing_stats(&self) -> ProcessingStats {
        let Ok(times) = self.processing_times.read() else {
            return ProcessingStats::default();
        };
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted = times.clone();
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_ms: sum / count as u64,
            p50_ms: at(0.5),
            p95_ms: at(0.95),
            p99_ms: at(0.99),
            max_ms: sorted[count - 1],
        }
    }

    /// Completed runs per second since start
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.runs_completed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn decisions(&self) -> HashMap<String, u64> {
        self.decisions.read().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn tiers(&self) -> HashMap<String, u64> {
        self.tiers.read().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or([0; 10])
    }

    /// Log summary statistics
    pub fn print_summary(&self) {
        let completed = self.runs_completed.load(Ordering::Relaxed);
        let extraction_failed = self.extraction_failures.load(Ordering::Relaxed);
        let failed = self.runs_failed.load(Ordering::Relaxed);
        let processing = self.processing_stats();

        info!(
            runs_completed = completed,
            extraction_failures = extraction_failed,
            runs_failed = failed,
            throughput = format!("{:.2} runs/s", self.throughput()),
            mean_ms = processing.mean_ms,
            p50_ms = processing.p50_ms,
            p95_ms = processing.p95_ms,
            p99_ms = processing.p99_ms,
            max_ms = processing.max_ms,
            "Pipeline metrics"
        );

        let mut decisions: Vec<_> = self.decisions().into_iter().collect();
        decisions.sort();
        for (outcome, count) in decisions {
            let pct = if completed > 0 {
                count as f64 / completed as f64 * 100.0
            } else {
                0.0
            };
            info!(outcome = %outcome, count, share = format!("{:.1}%", pct), "Decisions");
        }

        let mut tiers: Vec<_> = self.tiers().into_iter().collect();
        tiers.sort();
        for (tier, count) in tiers {
            info!(tier = %tier, count, "Approval tiers");
        }

        let distribution = self.score_distribution();
        let total: u64 = distribution.iter().sum();
        for (i, &count) in distribution.iter().enumerate() {
            let pct = if total > 0 {
                count as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            info!(
                "  risk {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                "#".repeat(((pct / 2.0) as usize).min(20))
            );
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default, PartialEq)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
}

/// Logs a metrics summary at a fixed interval
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Run the reporting loop forever
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
