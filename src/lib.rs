//! Invoice Validation Pipeline Library
//!
//! Takes an invoice document through extraction, rule-based fraud scoring,
//! policy compliance and a final APPROVE / REJECT / ON_HOLD decision,
//! reporting live progress per session.

pub mod assess;
pub mod config;
pub mod consumer;
pub mod error;
pub mod extraction;
pub mod history;
pub mod metrics;
pub mod orchestrator;
pub mod pool;
pub mod producer;
pub mod progress;
pub mod types;

pub use config::{AppConfig, AssessmentConfig};
pub use error::PipelineError;
pub use extraction::{ExtractionAdapter, StructuredDocumentAdapter};
pub use history::{HistoryLookup, InMemoryHistory};
pub use orchestrator::{PipelineOrchestrator, PipelineOutcome};
pub use pool::{KeyedLocks, WorkerPool};
pub use progress::{ProgressHub, ProgressSink};
pub use types::{Decision, DecisionOutcome, InvoiceFields};
