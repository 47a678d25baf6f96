//! NATS publishers for progress snapshots and pipeline outcomes

use crate::error::ProgressError;
use crate::orchestrator::PipelineOutcome;
use crate::progress::ProgressSink;
use crate::types::ProgressMessage;
use anyhow::Result;
use async_nats::Client;
use async_trait::async_trait;
use tracing::debug;

/// Publishes each progress snapshot to `<prefix>.<session_id>`
#[derive(Clone)]
pub struct NatsProgressPublisher {
    client: Client,
    prefix: String,
}

impl NatsProgressPublisher {
    pub fn new(client: Client, prefix: &str) -> Self {
        Self {
            client,
            prefix: prefix.trim_end_matches('.').to_string(),
        }
    }

    /// Subject carrying the snapshots of one session.
    pub fn subject_for(&self, session_id: &str) -> String {
        session_subject(&self.prefix, session_id)
    }
}

#[async_trait]
impl ProgressSink for NatsProgressPublisher {
    async fn publish(&self, message: &ProgressMessage) -> Result<(), ProgressError> {
        let payload = serde_json::to_vec(message)?;

        self.client
            .publish(self.subject_for(message.session_id()), payload.into())
            .await
            .map_err(|e| ProgressError::Publish(e.to_string()))?;

        debug!(
            session_id = %message.session_id(),
            overall_progress = message.overall_progress(),
            "Published progress"
        );
        Ok(())
    }

    async fn close(&self, session_id: &str) {
        // Subjects need no teardown; make sure the terminal snapshot is out.
        if let Err(e) = self.client.flush().await {
            debug!(session_id = %session_id, error = %e, "Progress flush failed");
        }
    }
}

/// Producer for completed pipeline outcomes
#[derive(Clone)]
pub struct DecisionProducer {
    client: Client,
    subject: String,
}

impl DecisionProducer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Publish an outcome as JSON
    pub async fn publish(&self, outcome: &PipelineOutcome) -> Result<()> {
        let payload = serde_json::to_vec(outcome)?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            session_id = %outcome.session_id,
            outcome = %outcome.decision.outcome,
            "Published decision"
        );

        Ok(())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

fn session_subject(prefix: &str, session_id: &str) -> String {
    // NATS subject tokens cannot contain separators or wildcards.
    let token: String = session_id
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' => '_',
            c => c,
        })
        .collect();
    format!("{}.{}", prefix, token)
}
