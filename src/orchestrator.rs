//! Drives one document through extraction, fraud scoring, policy evaluation
//! and the final decision, publishing a progress snapshot after every
//! transition.

use crate::assess::Assessors;
use crate::config::AssessmentConfig;
use crate::error::{ConfigError, LookupError, PipelineError};
use crate::extraction::ExtractionAdapter;
use crate::history::{HistoryLookup, HistorySnapshot};
use crate::progress::ProgressSink;
use crate::types::{
    Decision, ExtractedDocument, FraudAssessment, InvoiceFields, PolicyAssessment,
    ProcessingSession, Stage,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Stage error recorded when no usable extraction was produced.
pub const EXTRACTION_FAILED: &str = "extraction failed";

/// Text length and confidence of the extraction stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub text_length: usize,
    pub confidence: f64,
}

/// Everything a completed run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub session_id: String,
    pub extraction: ExtractionSummary,
    pub fields: InvoiceFields,
    pub fraud: FraudAssessment,
    pub policy: PolicyAssessment,
    pub decision: Decision,
    pub processing_time_ms: u64,
}

/// Rule set and the assessors built from it, swapped as a unit.
struct RuleSet {
    config: AssessmentConfig,
    assessors: Assessors,
}

/// Runs invoice documents through the pipeline
pub struct PipelineOrchestrator {
    rules: RwLock<Arc<RuleSet>>,
    extractor: Arc<dyn ExtractionAdapter>,
    history: Arc<dyn HistoryLookup>,
    progress: Arc<dyn ProgressSink>,
}

impl PipelineOrchestrator {
    /// Validate `config` and wire the orchestrator to its collaborators.
    pub fn new(
        config: AssessmentConfig,
        extractor: Arc<dyn ExtractionAdapter>,
        history: Arc<dyn HistoryLookup>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self, ConfigError> {
        let rules = RuleSet::build(config)?;

        Ok(Self {
            rules: RwLock::new(Arc::new(rules)),
            extractor,
            history,
            progress,
        })
    }

    /// Replace the rule set. Runs already in flight keep the old one.
    pub fn reload_config(&self, config: AssessmentConfig) -> Result<(), ConfigError> {
        let rules = Arc::new(RuleSet::build(config)?);
        match self.rules.write() {
            Ok(mut current) => *current = rules,
            Err(poisoned) => *poisoned.into_inner() = rules,
        }
        info!("Assessment rules reloaded");
        Ok(())
    }

    /// Rule set currently handed to new runs.
    pub fn config(&self) -> AssessmentConfig {
        self.rules().config.clone()
    }

    /// Process one document.
    pub async fn run(
        &self,
        document: &[u8],
        session_id: &str,
    ) -> Result<PipelineOutcome, PipelineError> {
        self.run_at(document, session_id, Utc::now()).await
    }

    /// Process one document as of `now`, which anchors history windows and
    /// date checks.
    pub async fn run_at(
        &self,
        document: &[u8],
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PipelineOutcome, PipelineError> {
        let rules = self.rules();
        let started = Instant::now();
        let mut session = ProcessingSession::new(session_id);

        session.start_stage(Stage::Extraction)?;
        self.emit(&session).await;

        let extracted = match self
            .extract(document, session_id, rules.config.extraction_timeout)
            .await
        {
            Ok(extracted) => extracted,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Extraction stage failed");
                session.fail_stage(Stage::Extraction, EXTRACTION_FAILED)?;
                self.emit(&session).await;
                self.progress.close(session_id).await;
                return Err(e);
            }
        };

        let ExtractedDocument { extraction, fields } = extracted;
        let summary = ExtractionSummary {
            text_length: extraction.text.len(),
            confidence: extraction.confidence,
        };
        let low_confidence = extraction.confidence < rules.config.min_extraction_confidence;
        if low_confidence {
            warn!(
                session_id = %session_id,
                confidence = extraction.confidence,
                threshold = rules.config.min_extraction_confidence,
                "Low extraction confidence"
            );
        }
        session.complete_stage(
            Stage::Extraction,
            json!({
                "text_length": summary.text_length,
                "confidence": summary.confidence,
                "low_confidence": low_confidence,
                "fields": payload(&fields),
            }),
        )?;
        self.emit(&session).await;

        session.start_stage(Stage::FraudScoring)?;
        self.emit(&session).await;
        let history = self
            .history_snapshot(&fields, now, rules.config.history_timeout)
            .await;
        if let HistorySnapshot::Unavailable { reason } = &history {
            warn!(
                session_id = %session_id,
                reason = %reason,
                "History unavailable, partial fraud check"
            );
        }
        let fraud = rules.assessors.fraud.assess(&fields, &history);
        info!(
            session_id = %session_id,
            risk_score = fraud.risk_score,
            risk_level = %fraud.risk_level,
            flags = fraud.flags.len(),
            "Fraud scoring complete"
        );
        session.complete_stage(Stage::FraudScoring, payload(&fraud))?;
        self.emit(&session).await;

        session.start_stage(Stage::PolicyEvaluation)?;
        self.emit(&session).await;
        let policy = rules
            .assessors
            .policy
            .evaluate(&fields, &fraud, now.date_naive());
        info!(
            session_id = %session_id,
            compliant = policy.compliant,
            violations = policy.violations.len(),
            approval_tier = %policy.approval_tier,
            "Policy evaluation complete"
        );
        session.complete_stage(Stage::PolicyEvaluation, payload(&policy))?;
        self.emit(&session).await;

        session.start_stage(Stage::Decision)?;
        self.emit(&session).await;
        let decision = rules.assessors.decision.decide(&fraud, &policy);
        session.complete_stage(Stage::Decision, payload(&decision))?;
        self.emit(&session).await;
        self.progress.close(session_id).await;

        let processing_time = started.elapsed();
        info!(
            session_id = %session_id,
            outcome = %decision.outcome,
            confidence = decision.confidence,
            reason = %decision.reason,
            processing_time_ms = processing_time.as_millis() as u64,
            "Decision reached"
        );

        Ok(PipelineOutcome {
            session_id: session_id.to_string(),
            extraction: summary,
            fields,
            fraud,
            policy,
            decision,
            processing_time_ms: processing_time.as_millis() as u64,
        })
    }

    fn rules(&self) -> Arc<RuleSet> {
        match self.rules.read() {
            Ok(rules) => rules.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn extract(
        &self,
        document: &[u8],
        session_id: &str,
        timeout: Duration,
    ) -> Result<ExtractedDocument, PipelineError> {
        let extracted = tokio::time::timeout(timeout, self.extractor.extract(document))
            .await
            .map_err(|_| PipelineError::ExtractionTimeout {
                session_id: session_id.to_string(),
                timeout,
            })?
            .map_err(|source| PipelineError::ExtractionFailed {
                session_id: session_id.to_string(),
                source,
            })?;

        if extracted.extraction.text.trim().is_empty() {
            return Err(PipelineError::EmptyExtraction {
                session_id: session_id.to_string(),
            });
        }

        debug!(
            session_id = %session_id,
            text_length = extracted.extraction.text.len(),
            "Document extracted"
        );
        Ok(extracted)
    }

    async fn history_snapshot(
        &self,
        fields: &InvoiceFields,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> HistorySnapshot {
        let fetch = HistorySnapshot::fetch(self.history.as_ref(), fields, now);
        match tokio::time::timeout(timeout, fetch).await {
            Ok(snapshot) => snapshot,
            Err(_) => HistorySnapshot::Unavailable {
                reason: LookupError::Timeout(timeout).to_string(),
            },
        }
    }

    async fn emit(&self, session: &ProcessingSession) {
        if let Err(e) = self.progress.publish(&session.snapshot()).await {
            warn!(
                session_id = %session.session_id(),
                error = %e,
                "Failed to publish progress"
            );
        }
    }
}

impl RuleSet {
    fn build(config: AssessmentConfig) -> Result<Self, ConfigError> {
        let assessors = Assessors::new(&config)?;
        Ok(Self { config, assessors })
    }
}

fn payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assess::HISTORY_UNAVAILABLE_FLAG;
    use crate::error::{ExtractionError, LookupError, ProgressError};
    use crate::history::{HistoryLookup, InMemoryHistory, VendorStatistics};
    use crate::types::{DecisionOutcome, ProgressMessage, RiskLevel, StageStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<ProgressMessage>>,
        closed: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn progress(&self) -> Vec<f64> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .map(|m| m.overall_progress())
                .collect()
        }

        fn last(&self) -> ProgressMessage {
            self.messages.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn publish(&self, message: &ProgressMessage) -> Result<(), ProgressError> {
            self.messages.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn close(&self, session_id: &str) {
            self.closed.lock().unwrap().push(session_id.to_string());
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl ProgressSink for BrokenSink {
        async fn publish(&self, _: &ProgressMessage) -> Result<(), ProgressError> {
            Err(ProgressError::Publish("observer gone".to_string()))
        }

        async fn close(&self, _: &str) {}
    }

    struct FailingAdapter;

    #[async_trait]
    impl ExtractionAdapter for FailingAdapter {
        async fn extract(&self, _: &[u8]) -> Result<ExtractedDocument, ExtractionError> {
            Err(ExtractionError::Unavailable("ocr offline".to_string()))
        }
    }

    struct HangingAdapter;

    #[async_trait]
    impl ExtractionAdapter for HangingAdapter {
        async fn extract(&self, _: &[u8]) -> Result<ExtractedDocument, ExtractionError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ExtractedDocument::default())
        }
    }

    struct HangingHistory;

    #[async_trait]
    impl HistoryLookup for HangingHistory {
        async fn find_by_invoice_number(&self, _: &str, _: &str) -> Result<bool, LookupError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(false)
        }

        async fn vendor_statistics(
            &self,
            _: &str,
            _: DateTime<Utc>,
        ) -> Result<VendorStatistics, LookupError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(VendorStatistics::default())
        }
    }

    fn document(fields: Value) -> Vec<u8> {
        json!({ "text": "INVOICE", "confidence": 0.95, "fields": fields })
            .to_string()
            .into_bytes()
    }

    fn clean_fields(now: DateTime<Utc>) -> Value {
        json!({
            "vendor": "TechSupplies Inc",
            "invoice_number": "TS-2024-0417",
            "issue_date": now.format("%Y-%m-%d").to_string(),
            "currency": "USD",
            "total_amount": 850.0,
            "tax_amount": 68.0,
            "po_number": "PO-7781",
        })
    }

    fn orchestrator(
        extractor: Arc<dyn ExtractionAdapter>,
        sink: Arc<dyn ProgressSink>,
    ) -> PipelineOrchestrator {
        let config = AssessmentConfig {
            extraction_timeout: Duration::from_millis(50),
            ..AssessmentConfig::default()
        };
        PipelineOrchestrator::new(
            config,
            extractor,
            Arc::new(InMemoryHistory::default()),
            sink,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_clean_invoice_is_approved() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = orchestrator(
            Arc::new(crate::extraction::StructuredDocumentAdapter::new()),
            sink.clone(),
        );
        let now = Utc::now();

        let outcome = pipeline
            .run_at(&document(clean_fields(now)), "s-1", now)
            .await
            .unwrap();

        assert_eq!(outcome.fraud.risk_level, RiskLevel::Minimal);
        assert!(outcome.policy.compliant);
        assert_eq!(outcome.decision.outcome, DecisionOutcome::Approve);
        assert_eq!(outcome.extraction.text_length, 7);

        assert_eq!(
            sink.progress(),
            vec![0.0, 25.0, 25.0, 50.0, 50.0, 75.0, 75.0, 100.0]
        );
        let last = sink.last();
        assert!(last.steps().iter().all(|s| s.status == StageStatus::Complete));
        assert!(last.steps().iter().all(|s| s.result.is_some()));
        assert_eq!(*sink.closed.lock().unwrap(), vec!["s-1".to_string()]);
    }

    #[tokio::test]
    async fn test_adapter_failure_stops_the_run() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = orchestrator(Arc::new(FailingAdapter), sink.clone());

        let err = pipeline.run(b"anything", "s-2").await.unwrap_err();
        assert!(matches!(err, PipelineError::ExtractionFailed { .. }));
        assert_eq!(err.session_id(), Some("s-2"));

        let last = sink.last();
        assert_eq!(last.steps()[0].status, StageStatus::Error);
        assert_eq!(last.steps()[0].error.as_deref(), Some(EXTRACTION_FAILED));
        assert!(last.steps()[1..]
            .iter()
            .all(|s| s.status == StageStatus::Pending));
        assert_eq!(*sink.closed.lock().unwrap(), vec!["s-2".to_string()]);
    }

    #[tokio::test]
    async fn test_blank_text_is_an_extraction_failure() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = orchestrator(
            Arc::new(crate::extraction::StructuredDocumentAdapter::new()),
            sink.clone(),
        );
        let doc = json!({ "text": "   ", "confidence": 0.9, "fields": {} }).to_string();

        let err = pipeline.run(doc.as_bytes(), "s-3").await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyExtraction { .. }));
        assert_eq!(sink.last().steps()[0].status, StageStatus::Error);
    }

    #[tokio::test]
    async fn test_hanging_extraction_times_out() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = orchestrator(Arc::new(HangingAdapter), sink.clone());

        let err = pipeline.run(b"slow", "s-4").await.unwrap_err();
        assert!(matches!(err, PipelineError::ExtractionTimeout { .. }));
        assert_eq!(sink.last().steps()[0].status, StageStatus::Error);
    }

    #[tokio::test]
    async fn test_history_timeout_degrades_to_partial_check() {
        let config = AssessmentConfig {
            history_timeout: Duration::from_millis(50),
            ..AssessmentConfig::default()
        };
        let pipeline = PipelineOrchestrator::new(
            config,
            Arc::new(crate::extraction::StructuredDocumentAdapter::new()),
            Arc::new(HangingHistory),
            Arc::new(RecordingSink::default()),
        )
        .unwrap();
        let now = Utc::now();

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.run_at(&document(clean_fields(now)), "s-7", now),
        )
        .await
        .expect("run must not wait on the hanging lookup")
        .unwrap();

        assert!(!outcome.fraud.history_available);
        assert!(!outcome.fraud.duplicate_detected);
        assert!(outcome
            .fraud
            .flags
            .iter()
            .any(|f| f == HISTORY_UNAVAILABLE_FLAG));
        assert_eq!(outcome.decision.outcome, DecisionOutcome::Approve);
    }

    #[tokio::test]
    async fn test_low_confidence_is_reported_in_extraction_result() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = orchestrator(
            Arc::new(crate::extraction::StructuredDocumentAdapter::new()),
            sink.clone(),
        );
        let now = Utc::now();
        let doc = json!({ "text": "INVOICE", "confidence": 0.3, "fields": clean_fields(now) })
            .to_string();

        let outcome = pipeline.run_at(doc.as_bytes(), "s-8", now).await.unwrap();
        assert_eq!(outcome.extraction.confidence, 0.3);

        let extraction = sink.last().steps()[0].result.clone().unwrap();
        assert_eq!(extraction["low_confidence"], true);
        assert_eq!(extraction["confidence"], 0.3);
    }

    #[tokio::test]
    async fn test_sink_failures_do_not_cancel_the_run() {
        let pipeline = orchestrator(
            Arc::new(crate::extraction::StructuredDocumentAdapter::new()),
            Arc::new(BrokenSink),
        );
        let now = Utc::now();

        let outcome = pipeline
            .run_at(&document(clean_fields(now)), "s-5", now)
            .await
            .unwrap();
        assert_eq!(outcome.decision.outcome, DecisionOutcome::Approve);
    }

    #[tokio::test]
    async fn test_reload_applies_to_new_runs() {
        let pipeline = orchestrator(
            Arc::new(crate::extraction::StructuredDocumentAdapter::new()),
            Arc::new(RecordingSink::default()),
        );
        let now = Utc::now();

        let mut strict = pipeline.config();
        strict.policy.approval_thresholds.manager = 500.0;
        pipeline.reload_config(strict).unwrap();

        let outcome = pipeline
            .run_at(&document(clean_fields(now)), "s-6", now)
            .await
            .unwrap();
        assert_eq!(outcome.decision.outcome, DecisionOutcome::OnHold);
        assert_eq!(outcome.decision.reason, "requires manager approval");

        let mut broken = pipeline.config();
        broken.risk_levels.medium = 0.9;
        assert!(pipeline.reload_config(broken).is_err());
        assert_eq!(pipeline.config().risk_levels.medium, 0.4);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = AssessmentConfig::default();
        config.extraction_timeout = Duration::ZERO;

        let result = PipelineOrchestrator::new(
            config,
            Arc::new(FailingAdapter),
            Arc::new(InMemoryHistory::default()),
            Arc::new(RecordingSink::default()),
        );
        assert!(matches!(result, Err(ConfigError::Zero(_))));
    }
}
