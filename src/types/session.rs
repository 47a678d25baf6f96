//! Processing session state machine and progress snapshots

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one pipeline run.
///
/// Moves strictly forward through the stages; `Error` is reachable from any
/// non-terminal state. `Done` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Pending,
    Extracting,
    ScoringFraud,
    EvaluatingPolicy,
    Deciding,
    Done,
    Error,
}

impl PipelineState {
    /// Successor on the happy path.
    pub fn next(self) -> Option<Self> {
        match self {
            PipelineState::Pending => Some(PipelineState::Extracting),
            PipelineState::Extracting => Some(PipelineState::ScoringFraud),
            PipelineState::ScoringFraud => Some(PipelineState::EvaluatingPolicy),
            PipelineState::EvaluatingPolicy => Some(PipelineState::Deciding),
            PipelineState::Deciding => Some(PipelineState::Done),
            PipelineState::Done | PipelineState::Error => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Error)
    }

    pub fn can_transition_to(self, to: PipelineState) -> bool {
        match to {
            PipelineState::Error => !self.is_terminal(),
            _ => self.next() == Some(to),
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Pending => "PENDING",
            PipelineState::Extracting => "EXTRACTING",
            PipelineState::ScoringFraud => "SCORING_FRAUD",
            PipelineState::EvaluatingPolicy => "EVALUATING_POLICY",
            PipelineState::Deciding => "DECIDING",
            PipelineState::Done => "DONE",
            PipelineState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// The four fixed stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Extraction,
    FraudScoring,
    PolicyEvaluation,
    Decision,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Extraction,
        Stage::FraudScoring,
        Stage::PolicyEvaluation,
        Stage::Decision,
    ];

    pub fn index(self) -> usize {
        match self {
            Stage::Extraction => 0,
            Stage::FraudScoring => 1,
            Stage::PolicyEvaluation => 2,
            Stage::Decision => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Extraction => "Extraction",
            Stage::FraudScoring => "Fraud Scoring",
            Stage::PolicyEvaluation => "Policy Evaluation",
            Stage::Decision => "Decision",
        }
    }

    /// Session state while this stage runs.
    pub fn state(self) -> PipelineState {
        match self {
            Stage::Extraction => PipelineState::Extracting,
            Stage::FraudScoring => PipelineState::ScoringFraud,
            Stage::PolicyEvaluation => PipelineState::EvaluatingPolicy,
            Stage::Decision => PipelineState::Deciding,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Processing,
    Complete,
    Error,
}

/// Per-stage progress record as shown to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub status: StageStatus,
    /// Stage progress percentage (0 - 100)
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageRecord {
    fn pending(stage: Stage) -> Self {
        Self {
            name: stage.name().to_string(),
            status: StageStatus::Pending,
            progress: 0,
            result: None,
            error: None,
        }
    }
}

/// Progress stream message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressMessage {
    Progress {
        session_id: String,
        steps: Vec<StageRecord>,
        current_step: usize,
        overall_progress: f64,
    },
}

impl ProgressMessage {
    pub fn session_id(&self) -> &str {
        match self {
            ProgressMessage::Progress { session_id, .. } => session_id,
        }
    }

    pub fn overall_progress(&self) -> f64 {
        match self {
            ProgressMessage::Progress {
                overall_progress, ..
            } => *overall_progress,
        }
    }

    pub fn steps(&self) -> &[StageRecord] {
        match self {
            ProgressMessage::Progress { steps, .. } => steps,
        }
    }
}

/// Mutable state of one run, owned by the orchestrator for its duration.
#[derive(Debug, Clone)]
pub struct ProcessingSession {
    session_id: String,
    state: PipelineState,
    stages: Vec<StageRecord>,
    current_stage: usize,
}

impl ProcessingSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: PipelineState::Pending,
            stages: Stage::ALL.iter().map(|&s| StageRecord::pending(s)).collect(),
            current_stage: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    pub fn current_stage(&self) -> usize {
        self.current_stage
    }

    /// Completed stages over total stages, as a rounded percentage.
    pub fn overall_progress(&self) -> f64 {
        let completed = self
            .stages
            .iter()
            .filter(|s| s.status == StageStatus::Complete)
            .count();
        ((completed as f64 / self.stages.len() as f64) * 100.0).round()
    }

    /// Enter `stage`; the session must be in the state preceding it.
    pub fn start_stage(&mut self, stage: Stage) -> Result<(), SessionError> {
        self.transition(stage.state())?;

        let record = &mut self.stages[stage.index()];
        record.status = StageStatus::Processing;
        record.progress = 50;
        self.current_stage = stage.index();
        Ok(())
    }

    /// Mark the running `stage` complete with its result payload.
    pub fn complete_stage(
        &mut self,
        stage: Stage,
        result: serde_json::Value,
    ) -> Result<(), SessionError> {
        if self.state != stage.state() {
            return Err(self.invalid(stage.state()));
        }

        let record = &mut self.stages[stage.index()];
        record.status = StageStatus::Complete;
        record.progress = 100;
        record.result = Some(result);

        if stage == Stage::Decision {
            self.transition(PipelineState::Done)?;
        }
        Ok(())
    }

    /// Mark the running `stage` failed and move the session to `Error`.
    pub fn fail_stage(&mut self, stage: Stage, error: impl Into<String>) -> Result<(), SessionError> {
        self.transition(PipelineState::Error)?;

        let record = &mut self.stages[stage.index()];
        record.status = StageStatus::Error;
        record.error = Some(error.into());
        self.current_stage = stage.index();
        Ok(())
    }

    /// Snapshot for observers.
    pub fn snapshot(&self) -> ProgressMessage {
        ProgressMessage::Progress {
            session_id: self.session_id.clone(),
            steps: self.stages.clone(),
            current_step: self.current_stage,
            overall_progress: self.overall_progress(),
        }
    }

    fn transition(&mut self, to: PipelineState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(to) {
            return Err(self.invalid(to));
        }
        self.state = to;
        Ok(())
    }

    fn invalid(&self, to: PipelineState) -> SessionError {
        SessionError::InvalidTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_happy_path_progress() {
        let mut session = ProcessingSession::new("s-1");
        let mut progress = vec![session.overall_progress()];

        for stage in Stage::ALL {
            session.start_stage(stage).unwrap();
            progress.push(session.overall_progress());
            session.complete_stage(stage, json!({})).unwrap();
            progress.push(session.overall_progress());
        }

        assert_eq!(session.state(), PipelineState::Done);
        assert_eq!(progress, vec![0.0, 0.0, 25.0, 25.0, 50.0, 50.0, 75.0, 75.0, 100.0]);
        assert!(session
            .stages()
            .iter()
            .all(|s| s.status == StageStatus::Complete && s.progress == 100));
    }

    #[test]
    fn test_cannot_skip_or_go_back() {
        let mut session = ProcessingSession::new("s-2");
        assert!(session.start_stage(Stage::FraudScoring).is_err());

        session.start_stage(Stage::Extraction).unwrap();
        session.complete_stage(Stage::Extraction, json!(null)).unwrap();
        assert!(session.start_stage(Stage::Extraction).is_err());
        assert!(session.complete_stage(Stage::PolicyEvaluation, json!(null)).is_err());
        // Completing a stage keeps the state until the next one starts.
        assert_eq!(session.state(), PipelineState::Extracting);

        session.start_stage(Stage::FraudScoring).unwrap();
        assert_eq!(session.state(), PipelineState::ScoringFraud);
        assert!(session.start_stage(Stage::Extraction).is_err());
    }

    #[test]
    fn test_error_is_terminal() {
        let mut session = ProcessingSession::new("s-3");
        session.start_stage(Stage::Extraction).unwrap();
        session.fail_stage(Stage::Extraction, "extraction failed").unwrap();

        assert_eq!(session.state(), PipelineState::Error);
        assert_eq!(session.stages()[0].status, StageStatus::Error);
        assert_eq!(session.stages()[0].error.as_deref(), Some("extraction failed"));
        assert!(session.start_stage(Stage::FraudScoring).is_err());
        assert!(session.fail_stage(Stage::Extraction, "again").is_err());
    }

    #[test]
    fn test_snapshot_shape() {
        let mut session = ProcessingSession::new("s-4");
        session.start_stage(Stage::Extraction).unwrap();

        let json = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["session_id"], "s-4");
        assert_eq!(json["current_step"], 0);
        assert_eq!(json["steps"].as_array().unwrap().len(), 4);
        assert_eq!(json["steps"][0]["status"], "processing");
        assert!(json["steps"][0].get("result").is_none());
    }
}
