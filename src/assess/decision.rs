//! Final decision table.
//!
//! Rules are evaluated in priority order and the first match wins:
//! high fraud risk, policy violations, medium fraud risk, approval tier,
//! then automatic approval. Every decision also carries a short
//! recommendation naming the leading fraud flags and policy violations.

use crate::config::DecisionConfig;
use crate::types::{
    ApprovalTier, Decision, DecisionOutcome, FraudAssessment, PolicyAssessment, RiskLevel,
};

/// Reason given for a medium-risk hold.
pub const MEDIUM_RISK_REASON: &str = "requires human review: medium fraud risk";
/// Reason given for an automatic approval.
pub const AUTO_APPROVE_REASON: &str = "auto-approved: compliant, minimal risk";

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    config: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(config: &DecisionConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn decide(&self, fraud: &FraudAssessment, policy: &PolicyAssessment) -> Decision {
        let decision = self.verdict(fraud, policy);
        let recommendation = recommendation(decision.outcome, fraud, policy);
        decision.with_recommendation(recommendation)
    }

    fn verdict(&self, fraud: &FraudAssessment, policy: &PolicyAssessment) -> Decision {
        if fraud.risk_level == RiskLevel::High {
            return Decision::new(
                DecisionOutcome::Reject,
                fraud.risk_score,
                format!(
                    "High fraud risk (score {:.2}): {}",
                    fraud.risk_score,
                    fraud.flags.join("; ")
                ),
            );
        }

        if !policy.compliant {
            let checks = policy.checks_performed.max(policy.violations.len()).max(1);
            let confidence = (1.0 - policy.violations.len() as f64 / checks as f64)
                .max(self.config.min_rejection_confidence);
            return Decision::new(
                DecisionOutcome::Reject,
                confidence,
                format!("Policy violations: {}", policy.violations.join("; ")),
            );
        }

        if fraud.risk_level == RiskLevel::Medium {
            return Decision::new(
                DecisionOutcome::OnHold,
                1.0 - fraud.risk_score,
                MEDIUM_RISK_REASON,
            );
        }

        if policy.approval_tier != ApprovalTier::AutoApprove {
            let confidence = self.config.approval_hold_confidence
                - self.config.policy_flag_penalty * policy.violations.len() as f64;
            return Decision::new(
                DecisionOutcome::OnHold,
                confidence,
                format!("requires {} approval", policy.approval_tier.approver()),
            );
        }

        Decision::new(
            DecisionOutcome::Approve,
            (1.0 - fraud.risk_score).max(self.config.min_approval_confidence),
            AUTO_APPROVE_REASON,
        )
    }
}

/// Verdict line, then at most two fraud flags and two violations, then the
/// warning count.
fn recommendation(
    outcome: DecisionOutcome,
    fraud: &FraudAssessment,
    policy: &PolicyAssessment,
) -> String {
    let mut parts = vec![match outcome {
        DecisionOutcome::Approve => "Recommended for approval.".to_string(),
        DecisionOutcome::OnHold => "Recommended to hold for manual review.".to_string(),
        DecisionOutcome::Reject => "Recommended to reject.".to_string(),
    }];

    if fraud.is_suspicious && !fraud.flags.is_empty() {
        parts.push(format!("Fraud concerns: {}.", leading(&fraud.flags)));
    }
    if !policy.compliant {
        parts.push(format!("Policy issues: {}.", leading(&policy.violations)));
    }
    match policy.warnings.len() {
        0 => {}
        1 => parts.push("Note: 1 warning flagged.".to_string()),
        n => parts.push(format!("Note: {} warnings flagged.", n)),
    }

    parts.join(" ")
}

fn leading(items: &[String]) -> String {
    items.iter().take(2).map(String::as_str).collect::<Vec<_>>().join(", ")
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(&DecisionConfig::default())
    }
}
