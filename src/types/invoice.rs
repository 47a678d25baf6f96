//! Invoice data structures produced by the extraction stage

use serde::{Deserialize, Serialize};

/// Fields parsed from an invoice document.
///
/// Every field is optional because extraction may miss any of them.
/// Produced once per document and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceFields {
    /// Vendor (issuer) name as printed on the invoice
    #[serde(default, alias = "vendor_name")]
    pub vendor: Option<String>,

    /// Vendor-assigned invoice number
    #[serde(default)]
    pub invoice_number: Option<String>,

    /// Issue date in the raw form found on the document
    #[serde(default, alias = "date")]
    pub issue_date: Option<String>,

    /// ISO currency code
    #[serde(default)]
    pub currency: Option<String>,

    /// Invoice total including tax
    #[serde(default)]
    pub total_amount: Option<f64>,

    /// Purchase-order reference
    #[serde(default)]
    pub po_number: Option<String>,

    /// Tax portion of the total
    #[serde(default)]
    pub tax_amount: Option<f64>,
}

impl InvoiceFields {
    /// Create fields for a vendor/number/amount triple, the minimum most
    /// checks need.
    pub fn new(vendor: &str, invoice_number: &str, total_amount: f64) -> Self {
        Self {
            vendor: Some(vendor.to_string()),
            invoice_number: Some(invoice_number.to_string()),
            total_amount: Some(total_amount),
            ..Self::default()
        }
    }

    pub fn with_issue_date(mut self, date: &str) -> Self {
        self.issue_date = Some(date.to_string());
        self
    }

    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = Some(currency.to_string());
        self
    }

    pub fn with_po_number(mut self, po_number: &str) -> Self {
        self.po_number = Some(po_number.to_string());
        self
    }

    pub fn with_tax_amount(mut self, tax_amount: f64) -> Self {
        self.tax_amount = Some(tax_amount);
        self
    }

    /// Vendor name with surrounding whitespace removed, `None` when blank.
    pub fn vendor_name(&self) -> Option<&str> {
        non_blank(self.vendor.as_deref())
    }

    /// Invoice number with surrounding whitespace removed, `None` when blank.
    pub fn number(&self) -> Option<&str> {
        non_blank(self.invoice_number.as_deref())
    }

    /// Total amount, treating a missing total as zero.
    pub fn amount(&self) -> f64 {
        self.total_amount.unwrap_or(0.0)
    }

    /// Names of the critical fields that are missing or empty.
    pub fn missing_critical_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.vendor_name().is_none() {
            missing.push("vendor");
        }
        if self.number().is_none() {
            missing.push("invoice_number");
        }
        if non_blank(self.issue_date.as_deref()).is_none() {
            missing.push("issue_date");
        }
        if self.total_amount.map_or(true, |amount| amount <= 0.0) {
            missing.push("total_amount");
        }
        missing
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Raw output of text recognition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Recognised document text
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f64,
}

/// Everything the extraction adapter returns for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    #[serde(flatten)]
    pub extraction: ExtractionResult,
    #[serde(default)]
    pub fields: InvoiceFields,
}

/// Message accepted on the submission subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSubmission {
    /// Correlation id for progress events; generated when absent
    #[serde(default)]
    pub session_id: Option<String>,
    /// Document payload handed verbatim to the extraction adapter
    pub document: serde_json::Value,
}
