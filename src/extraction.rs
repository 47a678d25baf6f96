//! Boundary to the text recognition / field parsing service

use crate::error::ExtractionError;
use crate::types::ExtractedDocument;
use async_trait::async_trait;
use tracing::debug;

/// Turns raw document bytes into text and parsed invoice fields.
#[async_trait]
pub trait ExtractionAdapter: Send + Sync {
    async fn extract(&self, document: &[u8]) -> Result<ExtractedDocument, ExtractionError>;
}

/// Adapter for documents that arrive already recognised and parsed.
///
/// Expects the JSON shape `{ "text": .., "confidence": .., "fields": { .. } }`
/// emitted by the upstream OCR service. Confidence is clamped to 0.0 - 1.0.
#[derive(Debug, Default, Clone)]
pub struct StructuredDocumentAdapter;

impl StructuredDocumentAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExtractionAdapter for StructuredDocumentAdapter {
    async fn extract(&self, document: &[u8]) -> Result<ExtractedDocument, ExtractionError> {
        if document.is_empty() {
            return Err(ExtractionError::InvalidDocument("empty document".to_string()));
        }

        let mut extracted: ExtractedDocument = serde_json::from_slice(document)
            .map_err(|e| ExtractionError::InvalidDocument(e.to_string()))?;
        extracted.extraction.confidence = extracted.extraction.confidence.clamp(0.0, 1.0);

        debug!(
            text_length = extracted.extraction.text.len(),
            confidence = extracted.extraction.confidence,
            "Structured document decoded"
        );

        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_structured_document() {
        let adapter = StructuredDocumentAdapter::new();
        let doc = br#"{"text":"INVOICE #42","confidence":1.4,"fields":{"vendor":"Acme Corp","total_amount":42.0}}"#;

        let extracted = adapter.extract(doc).await.unwrap();
        assert_eq!(extracted.extraction.text, "INVOICE #42");
        assert_eq!(extracted.extraction.confidence, 1.0);
        assert_eq!(extracted.fields.total_amount, Some(42.0));
    }

    #[tokio::test]
    async fn test_malformed_document() {
        let adapter = StructuredDocumentAdapter::new();

        assert!(matches!(
            adapter.extract(b"").await,
            Err(ExtractionError::InvalidDocument(_))
        ));
        assert!(matches!(
            adapter.extract(b"%PDF-1.4 binary").await,
            Err(ExtractionError::InvalidDocument(_))
        ));
    }
}
