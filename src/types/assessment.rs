//! Assessment and decision data structures

use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Determine risk level from score and thresholds
    pub fn from_score(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.medium {
            RiskLevel::Medium
        } else if score >= thresholds.low {
            RiskLevel::Low
        } else {
            RiskLevel::Minimal
        }
    }

    /// Medium and high risk invoices are suspicious.
    pub fn is_suspicious(self) -> bool {
        self >= RiskLevel::Medium
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Minimal => "MINIMAL",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bounds of the LOW, MEDIUM and HIGH buckets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLevelThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            low: 0.2,
            medium: 0.4,
            high: 0.6,
        }
    }
}

/// Outcome of the fraud scoring stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAssessment {
    /// Summed check weights, clamped to 0.0 - 1.0
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    /// Human-readable description of every triggered check, in check order
    pub flags: Vec<String>,
    pub is_suspicious: bool,
    /// The invoice number was already seen for this vendor
    pub duplicate_detected: bool,
    /// False when history could not be consulted and history checks were skipped
    pub history_available: bool,
    pub checks_performed: usize,
}

impl FraudAssessment {
    /// Build an assessment; level and suspicion are derived from the score.
    pub fn new(
        risk_score: f64,
        thresholds: &RiskLevelThresholds,
        flags: Vec<String>,
        duplicate_detected: bool,
        history_available: bool,
        checks_performed: usize,
    ) -> Self {
        let risk_score = risk_score.clamp(0.0, 1.0);
        let risk_level = RiskLevel::from_score(risk_score, thresholds);

        Self {
            risk_score,
            risk_level,
            flags,
            is_suspicious: risk_level.is_suspicious(),
            duplicate_detected,
            history_available,
            checks_performed,
        }
    }
}

/// Organisational sign-off level an invoice amount requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalTier {
    AutoApprove,
    Manager,
    Director,
    Cfo,
    Board,
}

impl ApprovalTier {
    /// Step function of the amount; each tier includes its lower bound.
    pub fn for_amount(amount: f64, thresholds: &ApprovalThresholds) -> Self {
        if amount >= thresholds.board {
            ApprovalTier::Board
        } else if amount >= thresholds.cfo {
            ApprovalTier::Cfo
        } else if amount >= thresholds.director {
            ApprovalTier::Director
        } else if amount >= thresholds.manager {
            ApprovalTier::Manager
        } else {
            ApprovalTier::AutoApprove
        }
    }

    /// Who has to sign off.
    pub fn approver(self) -> &'static str {
        match self {
            ApprovalTier::AutoApprove => "system",
            ApprovalTier::Manager => "manager",
            ApprovalTier::Director => "director",
            ApprovalTier::Cfo => "CFO",
            ApprovalTier::Board => "board",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalTier::AutoApprove => "AUTO_APPROVE",
            ApprovalTier::Manager => "MANAGER",
            ApprovalTier::Director => "DIRECTOR",
            ApprovalTier::Cfo => "CFO",
            ApprovalTier::Board => "BOARD",
        }
    }
}

impl fmt::Display for ApprovalTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bounds (inclusive) of the MANAGER, DIRECTOR, CFO and BOARD tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalThresholds {
    pub manager: f64,
    pub director: f64,
    pub cfo: f64,
    pub board: f64,
}

impl ApprovalThresholds {
    pub fn as_vec(&self) -> Vec<f64> {
        vec![self.manager, self.director, self.cfo, self.board]
    }
}

impl Default for ApprovalThresholds {
    fn default() -> Self {
        Self {
            manager: 1_000.0,
            director: 5_000.0,
            cfo: 15_000.0,
            board: 50_000.0,
        }
    }
}

/// Outcome of the policy compliance stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyAssessment {
    /// True iff no violation was recorded
    pub compliant: bool,
    pub violations: Vec<String>,
    /// Notes that never block approval
    pub warnings: Vec<String>,
    pub approval_tier: ApprovalTier,
    pub checks_performed: usize,
}

impl PolicyAssessment {
    pub fn new(
        violations: Vec<String>,
        warnings: Vec<String>,
        approval_tier: ApprovalTier,
        checks_performed: usize,
    ) -> Self {
        Self {
            compliant: violations.is_empty(),
            violations,
            warnings,
            approval_tier,
            checks_performed,
        }
    }
}

/// Final verdict on an invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOutcome {
    Approve,
    Reject,
    OnHold,
}

impl DecisionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionOutcome::Approve => "APPROVE",
            DecisionOutcome::Reject => "REJECT",
            DecisionOutcome::OnHold => "ON_HOLD",
        }
    }
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal artifact of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: DecisionOutcome,
    /// Heuristic confidence (0.0 - 1.0)
    pub confidence: f64,
    pub reason: String,
    /// Reviewer-facing summary of the verdict and its main causes
    #[serde(default)]
    pub recommendation: String,
}

impl Decision {
    pub fn new(outcome: DecisionOutcome, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            outcome,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            recommendation: String::new(),
        }
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }
}
