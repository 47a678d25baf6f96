//! Read-only view of previously processed invoices.
//!
//! The pipeline only ever reads history. Recording invoices is the job of
//! whatever owns persistence; [`InMemoryHistory::record`] exists for the
//! service binary and tests.

use crate::error::LookupError;
use crate::types::InvoiceFields;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::RwLock;

/// Aggregate view of a vendor's past invoices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VendorStatistics {
    /// Invoices on record for the vendor
    pub invoice_count: u64,
    pub mean_amount: f64,
    /// Population standard deviation of amounts
    pub stddev_amount: f64,
    /// Submissions inside the recent window
    pub recent_submission_count: u32,
    /// Invoice numbers inside the recent window, newest first
    pub recent_invoice_numbers: Vec<String>,
}

/// Questions the fraud stage asks about past invoices
#[async_trait]
pub trait HistoryLookup: Send + Sync {
    /// Does an invoice with this number already exist for this vendor?
    async fn find_by_invoice_number(&self, vendor: &str, number: &str)
        -> Result<bool, LookupError>;

    /// Amount distribution and recent activity of a vendor as of `as_of`.
    async fn vendor_statistics(
        &self,
        vendor: &str,
        as_of: DateTime<Utc>,
    ) -> Result<VendorStatistics, LookupError>;
}

/// History answers gathered before scoring, so scoring stays pure.
#[derive(Debug, Clone, PartialEq)]
pub enum HistorySnapshot {
    Available {
        duplicate: bool,
        statistics: VendorStatistics,
    },
    Unavailable {
        reason: String,
    },
}

impl HistorySnapshot {
    /// Snapshot for an invoice with no history at all.
    pub fn empty() -> Self {
        HistorySnapshot::Available {
            duplicate: false,
            statistics: VendorStatistics::default(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, HistorySnapshot::Available { .. })
    }

    /// Query `lookup` for everything the fraud stage needs about `fields`.
    ///
    /// Never fails: a lookup error yields `Unavailable`.
    pub async fn fetch(
        lookup: &dyn HistoryLookup,
        fields: &InvoiceFields,
        as_of: DateTime<Utc>,
    ) -> Self {
        let Some(vendor) = fields.vendor_name() else {
            return Self::empty();
        };

        let duplicate = match fields.number() {
            Some(number) => lookup.find_by_invoice_number(vendor, number).await,
            None => Ok(false),
        };

        match duplicate {
            Ok(duplicate) => match lookup.vendor_statistics(vendor, as_of).await {
                Ok(statistics) => HistorySnapshot::Available {
                    duplicate,
                    statistics,
                },
                Err(e) => HistorySnapshot::Unavailable {
                    reason: e.to_string(),
                },
            },
            Err(e) => HistorySnapshot::Unavailable {
                reason: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct HistoryRecord {
    vendor_key: String,
    invoice_number: Option<String>,
    amount: f64,
    submitted_at: DateTime<Utc>,
}

/// Bounded in-process history
pub struct InMemoryHistory {
    records: RwLock<VecDeque<HistoryRecord>>,
    window: Duration,
    capacity: usize,
}

impl InMemoryHistory {
    /// Create a history keeping at most `capacity` invoices and counting
    /// submissions within `window` as recent.
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            window,
            capacity: capacity.max(1),
        }
    }

    /// Remember a processed invoice. Invoices without a vendor are ignored.
    pub fn record(&self, fields: &InvoiceFields, submitted_at: DateTime<Utc>) {
        let Some(vendor) = fields.vendor_name() else {
            return;
        };

        let record = HistoryRecord {
            vendor_key: vendor_key(vendor),
            invoice_number: fields.number().map(normalize_number),
            amount: fields.amount(),
            submitted_at,
        };

        if let Ok(mut records) = self.records.write() {
            records.push_back(record);
            while records.len() > self.capacity {
                records.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new(Duration::hours(24), 10_000)
    }
}

#[async_trait]
impl HistoryLookup for InMemoryHistory {
    async fn find_by_invoice_number(
        &self,
        vendor: &str,
        number: &str,
    ) -> Result<bool, LookupError> {
        let records = self
            .records
            .read()
            .map_err(|e| LookupError::Unavailable(format!("lock poisoned: {}", e)))?;

        let key = vendor_key(vendor);
        let number = normalize_number(number);
        Ok(records
            .iter()
            .any(|r| r.vendor_key == key && r.invoice_number.as_deref() == Some(number.as_str())))
    }

    async fn vendor_statistics(
        &self,
        vendor: &str,
        as_of: DateTime<Utc>,
    ) -> Result<VendorStatistics, LookupError> {
        let records = self
            .records
            .read()
            .map_err(|e| LookupError::Unavailable(format!("lock poisoned: {}", e)))?;

        let key = vendor_key(vendor);
        let vendor_records: Vec<&HistoryRecord> =
            records.iter().filter(|r| r.vendor_key == key).collect();

        if vendor_records.is_empty() {
            return Ok(VendorStatistics::default());
        }

        let count = vendor_records.len() as f64;
        let mean = vendor_records.iter().map(|r| r.amount).sum::<f64>() / count;
        let variance = vendor_records
            .iter()
            .map(|r| (r.amount - mean).powi(2))
            .sum::<f64>()
            / count;

        let window_start = as_of - self.window;
        let recent: Vec<&&HistoryRecord> = vendor_records
            .iter()
            .rev()
            .filter(|r| r.submitted_at > window_start && r.submitted_at <= as_of)
            .collect();

        Ok(VendorStatistics {
            invoice_count: vendor_records.len() as u64,
            mean_amount: mean,
            stddev_amount: variance.sqrt(),
            recent_submission_count: recent.len() as u32,
            recent_invoice_numbers: recent
                .iter()
                .filter_map(|r| r.invoice_number.clone())
                .collect(),
        })
    }
}

/// Identity under which two submissions count as the same invoice.
pub fn invoice_key(fields: &InvoiceFields) -> Option<String> {
    let vendor = fields.vendor_name()?;
    let number = fields.number()?;
    Some(format!("{}|{}", vendor_key(vendor), normalize_number(number)))
}

fn vendor_key(vendor: &str) -> String {
    vendor.trim().to_lowercase()
}

fn normalize_number(number: &str) -> String {
    number.trim().to_uppercase()
}
