//! Fraud scoring, policy evaluation and the decision table.
//!
//! All three stages are pure: given the same fields, history snapshot and
//! date they always produce the same result.

pub mod decision;
pub mod fraud;
pub mod policy;

pub use decision::DecisionEngine;
pub use fraud::{FraudScorer, HISTORY_UNAVAILABLE_FLAG};
pub use policy::{parse_invoice_date, PolicyEvaluator, POLICY_CHECK_COUNT};

use crate::config::AssessmentConfig;
use crate::error::ConfigError;

/// The three assessment stages built from one validated rule set
#[derive(Debug, Clone)]
pub struct Assessors {
    pub fraud: FraudScorer,
    pub policy: PolicyEvaluator,
    pub decision: DecisionEngine,
}

impl Assessors {
    pub fn new(config: &AssessmentConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            fraud: FraudScorer::new(
                &config.fraud,
                &config.risk_levels,
                &config.policy.approved_vendors,
            ),
            policy: PolicyEvaluator::new(&config.policy),
            decision: DecisionEngine::new(&config.decision),
        })
    }
}
