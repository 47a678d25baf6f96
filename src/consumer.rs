//! NATS consumer for incoming invoice submissions

use crate::history::invoice_key;
use crate::types::{ExtractedDocument, InvoiceSubmission};
use anyhow::{Context, Result};
use async_nats::{Client, Subscriber};
use tracing::info;
use uuid::Uuid;

/// Submission ready for the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub session_id: String,
    /// Bytes handed to the extraction adapter
    pub document: Vec<u8>,
}

impl Submission {
    /// Decode a submission message, assigning a session id when absent.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let submission: InvoiceSubmission =
            serde_json::from_slice(payload).context("Malformed invoice submission")?;

        let session_id = submission
            .session_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let document = match submission.document {
            serde_json::Value::String(raw) => raw.into_bytes(),
            other => serde_json::to_vec(&other)?,
        };

        Ok(Self {
            session_id,
            document,
        })
    }

    /// Vendor and invoice number of a structured document, used to keep
    /// resubmissions of the same invoice from running side by side.
    pub fn invoice_key(&self) -> Option<String> {
        let document: ExtractedDocument = serde_json::from_slice(&self.document).ok()?;
        invoice_key(&document.fields)
    }
}

/// Consumer for receiving invoice submissions from NATS
pub struct SubmissionConsumer {
    client: Client,
    subject: String,
}

impl SubmissionConsumer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Subscribe to the submission subject
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(subject = %self.subject, "Subscribed to submission subject");
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_keeps_session_id() {
        let payload = json!({
            "session_id": "abc-123",
            "document": { "text": "INVOICE", "confidence": 0.9, "fields": {} }
        })
        .to_string();

        let submission = Submission::decode(payload.as_bytes()).unwrap();
        assert_eq!(submission.session_id, "abc-123");

        let document: serde_json::Value = serde_json::from_slice(&submission.document).unwrap();
        assert_eq!(document["text"], "INVOICE");
    }

    #[test]
    fn test_decode_assigns_session_id() {
        let payload = json!({ "session_id": "  ", "document": "raw text" }).to_string();

        let submission = Submission::decode(payload.as_bytes()).unwrap();
        assert!(Uuid::parse_str(&submission.session_id).is_ok());
        assert_eq!(submission.document, b"raw text");
    }

    #[test]
    fn test_invoice_key_from_structured_document() {
        let payload = json!({
            "document": {
                "text": "INVOICE",
                "confidence": 0.9,
                "fields": { "vendor": "Acme Corp", "invoice_number": "inv-9" }
            }
        })
        .to_string();
        let submission = Submission::decode(payload.as_bytes()).unwrap();
        assert_eq!(submission.invoice_key().as_deref(), Some("acme corp|INV-9"));

        let raw = Submission::decode(br#"{"document":"scanned text"}"#).unwrap();
        assert!(raw.invoice_key().is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Submission::decode(b"not json").is_err());
        assert!(Submission::decode(br#"{"session_id":"x"}"#).is_err());
    }
}
