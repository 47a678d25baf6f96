//! Configuration management for the invoice pipeline
//!
//! Everything the assessment stages depend on (weights, cutoffs, vendor
//! lists, tier thresholds) lives here and is handed to the orchestrator as
//! one immutable value.

use crate::error::ConfigError;
use crate::types::{ApprovalThresholds, RiskLevelThresholds};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Weight of a duplicate invoice number for the same vendor.
pub const DUPLICATE_WEIGHT: f64 = 0.5;
/// Weight of an amount far outside the vendor's history.
pub const AMOUNT_ANOMALY_WEIGHT: f64 = 0.25;
/// Weight of a vendor outside the known set, or marked untrusted.
pub const UNKNOWN_VENDOR_WEIGHT: f64 = 0.25;
/// Weight of a burst of submissions from one vendor.
pub const FREQUENCY_WEIGHT: f64 = 0.15;
/// Weight of a milder deviation from the vendor's typical invoice size.
pub const VARIANCE_WEIGHT: f64 = 0.1;
/// Weight of a strictly sequential run of invoice numbers from an unfamiliar vendor.
pub const SEQUENTIAL_WEIGHT: f64 = 0.1;
/// Score of a blacklisted vendor or invoice number. Short-circuits scoring.
pub const BLACKLIST_SCORE: f64 = 1.0;
/// Weight of missing critical fields.
pub const MISSING_FIELDS_WEIGHT: f64 = 0.2;
/// Weight of a suspiciously round amount.
pub const ROUND_AMOUNT_WEIGHT: f64 = 0.1;
/// Weight of a trivially simple invoice number.
pub const SIMPLE_NUMBER_WEIGHT: f64 = 0.1;
/// Weight of a tax amount inconsistent with the total.
pub const TAX_MISMATCH_WEIGHT: f64 = 0.1;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub risk_levels: RiskLevelThresholds,
    #[serde(default)]
    pub fraud: FraudConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming invoice submissions
    pub submission_subject: String,
    /// Subject prefix for progress snapshots; the session id is appended
    pub progress_subject: String,
    /// Subject for completed pipeline outcomes
    pub decision_subject: String,
}

/// Pipeline execution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of sessions processed in parallel
    pub workers: usize,
    /// Extraction adapter timeout in milliseconds
    pub extraction_timeout_ms: u64,
    /// History lookup timeout in milliseconds
    #[serde(default = "default_history_timeout_ms")]
    pub history_timeout_ms: u64,
    /// Window used to count recent submissions per vendor, in hours
    #[serde(default = "default_history_window_hours")]
    pub history_window_hours: i64,
    /// Maximum invoices kept by the in-memory history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Extraction confidence below which a warning is logged
    #[serde(default = "default_min_extraction_confidence")]
    pub min_extraction_confidence: f64,
    /// Seconds between metrics summaries
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

fn default_history_timeout_ms() -> u64 {
    2_000
}

fn default_history_window_hours() -> i64 {
    24
}

fn default_history_capacity() -> usize {
    10_000
}

fn default_min_extraction_confidence() -> f64 {
    0.5
}

fn default_metrics_interval_secs() -> u64 {
    30
}

/// Per-check weights of the fraud score
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FraudWeights {
    pub duplicate: f64,
    pub amount_anomaly: f64,
    pub unknown_vendor: f64,
    pub frequency: f64,
    pub variance: f64,
    pub sequential: f64,
    pub missing_fields: f64,
    pub round_amount: f64,
    pub simple_number: f64,
    pub tax_mismatch: f64,
}

impl FraudWeights {
    fn named(&self) -> [(&'static str, f64); 10] {
        [
            ("fraud.weights.duplicate", self.duplicate),
            ("fraud.weights.amount_anomaly", self.amount_anomaly),
            ("fraud.weights.unknown_vendor", self.unknown_vendor),
            ("fraud.weights.frequency", self.frequency),
            ("fraud.weights.variance", self.variance),
            ("fraud.weights.sequential", self.sequential),
            ("fraud.weights.missing_fields", self.missing_fields),
            ("fraud.weights.round_amount", self.round_amount),
            ("fraud.weights.simple_number", self.simple_number),
            ("fraud.weights.tax_mismatch", self.tax_mismatch),
        ]
    }
}

impl Default for FraudWeights {
    fn default() -> Self {
        Self {
            duplicate: DUPLICATE_WEIGHT,
            amount_anomaly: AMOUNT_ANOMALY_WEIGHT,
            unknown_vendor: UNKNOWN_VENDOR_WEIGHT,
            frequency: FREQUENCY_WEIGHT,
            variance: VARIANCE_WEIGHT,
            sequential: SEQUENTIAL_WEIGHT,
            missing_fields: MISSING_FIELDS_WEIGHT,
            round_amount: ROUND_AMOUNT_WEIGHT,
            simple_number: SIMPLE_NUMBER_WEIGHT,
            tax_mismatch: TAX_MISMATCH_WEIGHT,
        }
    }
}

/// Fraud scoring configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FraudConfig {
    pub weights: FraudWeights,
    /// Vendors seen before outside the approved list
    pub known_vendors: Vec<String>,
    pub untrusted_vendors: Vec<String>,
    pub blacklisted_vendors: Vec<String>,
    pub blacklisted_invoice_numbers: Vec<String>,
    /// Standard deviations from the vendor mean before an amount is anomalous
    pub amount_stddev_limit: f64,
    /// Vendor invoices needed before the standard deviation is trusted
    pub min_history_samples: u64,
    /// Multiple of the vendor mean used while history is sparse
    pub sparse_amount_multiple: f64,
    /// Relative deviation from the vendor mean flagged as a variance anomaly
    pub variance_ratio_limit: f64,
    /// Recent submissions from one vendor that count as a burst
    pub max_recent_submissions: u32,
    /// Consecutive prior invoice numbers needed to flag a sequential run
    pub sequential_run_length: usize,
    /// Vendors with fewer invoices than this are unfamiliar
    pub familiar_vendor_invoices: u64,
    /// Round amounts below this are not flagged
    pub round_amount_min: f64,
    /// Accepted tax-to-total ratio range
    pub tax_ratio_min: f64,
    pub tax_ratio_max: f64,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            weights: FraudWeights::default(),
            known_vendors: Vec::new(),
            untrusted_vendors: Vec::new(),
            blacklisted_vendors: Vec::new(),
            blacklisted_invoice_numbers: Vec::new(),
            amount_stddev_limit: 3.0,
            min_history_samples: 3,
            sparse_amount_multiple: 3.0,
            variance_ratio_limit: 0.75,
            max_recent_submissions: 3,
            sequential_run_length: 2,
            familiar_vendor_invoices: 5,
            round_amount_min: 5_000.0,
            tax_ratio_min: 0.03,
            tax_ratio_max: 0.25,
        }
    }
}

/// Policy compliance configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub approved_vendors: Vec<String>,
    pub approval_thresholds: ApprovalThresholds,
    /// Amounts above this need a purchase order
    pub po_required_above: f64,
    /// Tax information is always required
    pub tax_required: bool,
    /// Tax information is required above this amount
    pub tax_required_above: Option<f64>,
    pub min_amount: f64,
    /// Hard cap; exceeding it is always a violation
    pub max_amount: f64,
    /// Days an invoice may be dated in the future
    pub future_tolerance_days: i64,
    /// Invoices older than this are rejected
    pub max_invoice_age_days: Option<i64>,
    /// Invoices older than this get a warning
    pub stale_warning_days: i64,
    pub accepted_currencies: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            approved_vendors: [
                "Acme Corp",
                "TechSupplies Inc",
                "TechSolutions Inc",
                "OfficeSupplies Co",
                "GlobalServices Ltd",
                "DataSystems Inc",
                "CloudTech Solutions",
            ]
            .iter()
            .map(|v| v.to_string())
            .collect(),
            approval_thresholds: ApprovalThresholds::default(),
            po_required_above: 1_000.0,
            tax_required: false,
            tax_required_above: Some(10_000.0),
            min_amount: 0.01,
            max_amount: 100_000.0,
            future_tolerance_days: 1,
            max_invoice_age_days: Some(90),
            stale_warning_days: 30,
            accepted_currencies: ["USD", "EUR", "GBP", "CAD", "AUD", "JPY", "INR"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

/// Decision confidence configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Floor for the confidence of a policy rejection
    pub min_rejection_confidence: f64,
    /// Confidence of a hold for higher-tier approval
    pub approval_hold_confidence: f64,
    /// Deducted from the hold confidence per outstanding policy flag
    pub policy_flag_penalty: f64,
    /// Floor for the confidence of an automatic approval
    pub min_approval_confidence: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            min_rejection_confidence: 0.5,
            approval_hold_confidence: 0.9,
            policy_flag_penalty: 0.05,
            min_approval_confidence: 0.85,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

/// Immutable rule set consumed by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentConfig {
    pub risk_levels: RiskLevelThresholds,
    pub fraud: FraudConfig,
    pub policy: PolicyConfig,
    pub decision: DecisionConfig,
    pub extraction_timeout: Duration,
    pub history_timeout: Duration,
    pub min_extraction_confidence: f64,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            risk_levels: RiskLevelThresholds::default(),
            fraud: FraudConfig::default(),
            policy: PolicyConfig::default(),
            decision: DecisionConfig::default(),
            extraction_timeout: Duration::from_secs(30),
            history_timeout: Duration::from_millis(default_history_timeout_ms()),
            min_extraction_confidence: default_min_extraction_confidence(),
        }
    }
}

impl AssessmentConfig {
    /// Reject thresholds and rules that would make the stages meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let risk = vec![self.risk_levels.low, self.risk_levels.medium, self.risk_levels.high];
        check_ascending("risk_levels", &risk)?;
        for (name, value) in [
            ("risk_levels.low", self.risk_levels.low),
            ("risk_levels.high", self.risk_levels.high),
        ] {
            check_unit(name, value)?;
        }

        let tiers = self.policy.approval_thresholds.as_vec();
        check_ascending("policy.approval_thresholds", &tiers)?;
        if tiers[0] <= 0.0 {
            return Err(ConfigError::Zero("policy.approval_thresholds.manager"));
        }

        for (name, weight) in self.fraud.weights.named() {
            check_unit(name, weight)?;
        }

        let fraud = &self.fraud;
        for (name, value) in [
            ("fraud.amount_stddev_limit", fraud.amount_stddev_limit),
            ("fraud.sparse_amount_multiple", fraud.sparse_amount_multiple),
            ("fraud.variance_ratio_limit", fraud.variance_ratio_limit),
        ] {
            if value <= 0.0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if fraud.sequential_run_length == 0 {
            return Err(ConfigError::Zero("fraud.sequential_run_length"));
        }
        if fraud.max_recent_submissions == 0 {
            return Err(ConfigError::Zero("fraud.max_recent_submissions"));
        }
        check_ascending("fraud.tax_ratio", &[fraud.tax_ratio_min, fraud.tax_ratio_max])?;

        let policy = &self.policy;
        if policy.min_amount < 0.0 || policy.min_amount >= policy.max_amount {
            return Err(ConfigError::Rules(format!(
                "policy.min_amount ({}) must be non-negative and below policy.max_amount ({})",
                policy.min_amount, policy.max_amount
            )));
        }
        if policy.future_tolerance_days < 0 {
            return Err(ConfigError::Rules(
                "policy.future_tolerance_days must not be negative".to_string(),
            ));
        }
        if policy.accepted_currencies.is_empty() {
            return Err(ConfigError::Rules(
                "policy.accepted_currencies must not be empty".to_string(),
            ));
        }

        let decision = &self.decision;
        for (name, value) in [
            ("decision.min_rejection_confidence", decision.min_rejection_confidence),
            ("decision.approval_hold_confidence", decision.approval_hold_confidence),
            ("decision.policy_flag_penalty", decision.policy_flag_penalty),
            ("decision.min_approval_confidence", decision.min_approval_confidence),
        ] {
            check_unit(name, value)?;
        }

        if self.extraction_timeout.is_zero() {
            return Err(ConfigError::Zero("pipeline.extraction_timeout_ms"));
        }
        if self.history_timeout.is_zero() {
            return Err(ConfigError::Zero("pipeline.history_timeout_ms"));
        }
        check_unit("pipeline.min_extraction_confidence", self.min_extraction_confidence)?;

        Ok(())
    }
}

fn check_ascending(name: &'static str, values: &[f64]) -> Result<(), ConfigError> {
    if values.windows(2).all(|pair| pair[0] < pair[1]) {
        Ok(())
    } else {
        Err(ConfigError::UnorderedThresholds {
            name,
            values: values.to_vec(),
        })
    }
}

fn check_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min: 0.0,
            max: 1.0,
        })
    }
}

impl AppConfig {
    /// Load configuration from file, honouring `INVOICE_PIPELINE_CONFIG`
    pub fn load() -> Result<Self> {
        let path = std::env::var("INVOICE_PIPELINE_CONFIG")
            .unwrap_or_else(|_| "config/config.toml".to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path.
    ///
    /// `INVOICE__SECTION__KEY` environment variables override file values.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("INVOICE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app.validate().context("Invalid configuration")?;
        Ok(app)
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.workers == 0 {
            return Err(ConfigError::Zero("pipeline.workers"));
        }
        if self.pipeline.history_capacity == 0 {
            return Err(ConfigError::Zero("pipeline.history_capacity"));
        }
        if self.pipeline.history_window_hours <= 0 {
            return Err(ConfigError::Zero("pipeline.history_window_hours"));
        }
        self.assessment().validate()
    }

    /// Rule set handed to the orchestrator.
    pub fn assessment(&self) -> AssessmentConfig {
        AssessmentConfig {
            risk_levels: self.risk_levels.clone(),
            fraud: self.fraud.clone(),
            policy: self.policy.clone(),
            decision: self.decision.clone(),
            extraction_timeout: Duration::from_millis(self.pipeline.extraction_timeout_ms),
            history_timeout: Duration::from_millis(self.pipeline.history_timeout_ms),
            min_extraction_confidence: self.pipeline.min_extraction_confidence,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                submission_subject: "invoices.submit".to_string(),
                progress_subject: "invoices.progress".to_string(),
                decision_subject: "invoices.decisions".to_string(),
            },
            pipeline: PipelineConfig {
                workers: 4,
                extraction_timeout_ms: 30_000,
                history_timeout_ms: default_history_timeout_ms(),
                history_window_hours: default_history_window_hours(),
                history_capacity: default_history_capacity(),
                min_extraction_confidence: default_min_extraction_confidence(),
                metrics_interval_secs: default_metrics_interval_secs(),
            },
            risk_levels: RiskLevelThresholds::default(),
            fraud: FraudConfig::default(),
            policy: PolicyConfig::default(),
            decision: DecisionConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}
