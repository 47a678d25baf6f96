//! Type definitions for the invoice pipeline

pub mod assessment;
pub mod invoice;
pub mod session;

pub use assessment::{
    ApprovalThresholds, ApprovalTier, Decision, DecisionOutcome, FraudAssessment,
    PolicyAssessment, RiskLevel, RiskLevelThresholds,
};
pub use invoice::{ExtractedDocument, ExtractionResult, InvoiceFields, InvoiceSubmission};
pub use session::{
    PipelineState, ProcessingSession, ProgressMessage, Stage, StageRecord, StageStatus,
};
