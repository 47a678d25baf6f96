//! Typed failures surfaced by the invoice pipeline.
//!
//! Only extraction failures abort a run. Lookup and progress failures are
//! absorbed by the stage that meets them; configuration failures surface at
//! construction time.

use std::time::Duration;
use thiserror::Error;

/// Failure returned by an extraction adapter.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("document could not be read: {0}")]
    InvalidDocument(String),

    #[error("extraction service unavailable: {0}")]
    Unavailable(String),
}

/// Failure returned by a history backend.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("history unavailable: {0}")]
    Unavailable(String),

    #[error("history lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure to deliver a progress snapshot to an observer.
#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("failed to encode progress message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to publish progress message: {0}")]
    Publish(String),
}

/// Invalid thresholds or rule set, detected before any run starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} thresholds must be strictly ascending: {values:?}")]
    UnorderedThresholds { name: &'static str, values: Vec<f64> },

    #[error("{name} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("invalid rule set: {0}")]
    Rules(String),
}

/// Illegal move of a processing session's state machine.
#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("invalid stage transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Failure of a whole pipeline run. No decision is produced.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("extraction failed for session {session_id}: {source}")]
    ExtractionFailed {
        session_id: String,
        #[source]
        source: ExtractionError,
    },

    #[error("extraction failed for session {session_id}: no text recovered")]
    EmptyExtraction { session_id: String },

    #[error("extraction timed out for session {session_id} after {timeout:?}")]
    ExtractionTimeout {
        session_id: String,
        timeout: Duration,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl PipelineError {
    /// Session the failed run belonged to, when known.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            PipelineError::ExtractionFailed { session_id, .. }
            | PipelineError::EmptyExtraction { session_id }
            | PipelineError::ExtractionTimeout { session_id, .. } => Some(session_id),
            PipelineError::Session(_) => None,
        }
    }
}
