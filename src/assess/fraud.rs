//! Rule-based fraud risk scoring.
//!
//! Every check contributes an independent weight; the sum is clamped to
//! 0.0 - 1.0 and bucketed into a risk level. A blacklist hit skips the other
//! checks and scores 1.0. Output depends only on the fields, the history
//! snapshot and the configuration.

use crate::config::{FraudConfig, BLACKLIST_SCORE};
use crate::history::{HistorySnapshot, VendorStatistics};
use crate::types::{FraudAssessment, InvoiceFields, RiskLevelThresholds};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Flag appended when history could not be consulted.
pub const HISTORY_UNAVAILABLE_FLAG: &str = "history unavailable - partial check";

/// Scores invoices against a fixed fraud configuration
#[derive(Debug, Clone)]
pub struct FraudScorer {
    config: FraudConfig,
    risk_levels: RiskLevelThresholds,
    known_vendors: HashSet<String>,
    untrusted_vendors: HashSet<String>,
    blacklisted_vendors: HashSet<String>,
    blacklisted_numbers: HashSet<String>,
}

/// Running total of triggered checks
#[derive(Default)]
struct Tally {
    score: f64,
    flags: Vec<String>,
    checks: usize,
}

impl Tally {
    fn check(&mut self, weight: f64, flag: Option<String>) {
        self.checks += 1;
        if let Some(flag) = flag {
            self.score += weight;
            self.flags.push(flag);
        }
    }
}

impl FraudScorer {
    /// Build a scorer. Approved vendors count as known vendors.
    pub fn new(
        config: &FraudConfig,
        risk_levels: &RiskLevelThresholds,
        approved_vendors: &[String],
    ) -> Self {
        let known_vendors = config
            .known_vendors
            .iter()
            .chain(approved_vendors)
            .map(|v| vendor_key(v))
            .collect();

        Self {
            config: config.clone(),
            risk_levels: risk_levels.clone(),
            known_vendors,
            untrusted_vendors: config.untrusted_vendors.iter().map(|v| vendor_key(v)).collect(),
            blacklisted_vendors: config.blacklisted_vendors.iter().map(|v| vendor_key(v)).collect(),
            blacklisted_numbers: config
                .blacklisted_invoice_numbers
                .iter()
                .map(|n| number_key(n))
                .collect(),
        }
    }

    /// Assess one invoice.
    pub fn assess(&self, fields: &InvoiceFields, history: &HistorySnapshot) -> FraudAssessment {
        if let Some(flag) = self.blacklist_hit(fields) {
            debug!(flag = %flag, "Blacklist hit, skipping remaining fraud checks");
            return FraudAssessment::new(
                BLACKLIST_SCORE,
                &self.risk_levels,
                vec![flag],
                false,
                history.is_available(),
                1,
            );
        }

        let weights = &self.config.weights;
        let mut tally = Tally {
            checks: 1,
            ..Tally::default()
        };
        let mut duplicate_detected = false;

        match history {
            HistorySnapshot::Available {
                duplicate,
                statistics,
            } => {
                duplicate_detected = *duplicate;
                tally.check(weights.duplicate, self.duplicate_flag(fields, *duplicate));

                let anomaly = self.amount_anomaly(fields, statistics);
                let anomalous = anomaly.is_some();
                tally.check(weights.amount_anomaly, anomaly);
                tally.check(weights.unknown_vendor, self.vendor_flag(fields));
                tally.check(weights.frequency, self.frequency_flag(fields, statistics));
                let variance = if anomalous {
                    None
                } else {
                    self.variance_flag(fields, statistics)
                };
                tally.check(weights.variance, variance);
                tally.check(weights.sequential, self.sequential_flag(fields, statistics));
            }
            HistorySnapshot::Unavailable { reason } => {
                debug!(reason = %reason, "History unavailable, skipping history checks");
                tally.flags.push(HISTORY_UNAVAILABLE_FLAG.to_string());
                tally.check(weights.unknown_vendor, self.vendor_flag(fields));
            }
        }

        tally.check(weights.missing_fields, missing_fields_flag(fields));
        tally.check(weights.round_amount, self.round_amount_flag(fields));
        tally.check(weights.simple_number, simple_number_flag(fields));
        tally.check(weights.tax_mismatch, self.tax_flag(fields));

        let assessment = FraudAssessment::new(
            tally.score,
            &self.risk_levels,
            tally.flags,
            duplicate_detected,
            history.is_available(),
            tally.checks,
        );

        debug!(
            risk_score = assessment.risk_score,
            risk_level = %assessment.risk_level,
            flags = assessment.flags.len(),
            "Fraud assessment complete"
        );

        assessment
    }

    fn blacklist_hit(&self, fields: &InvoiceFields) -> Option<String> {
        if let Some(vendor) = fields.vendor_name() {
            if self.blacklisted_vendors.contains(&vendor_key(vendor)) {
                return Some(format!("Vendor '{}' is blacklisted", vendor));
            }
        }
        if let Some(number) = fields.number() {
            if self.blacklisted_numbers.contains(&number_key(number)) {
                return Some(format!("Invoice number {} is blacklisted", number));
            }
        }
        None
    }

    fn duplicate_flag(&self, fields: &InvoiceFields, duplicate: bool) -> Option<String> {
        if !duplicate {
            return None;
        }
        Some(format!(
            "Invoice #{} is a duplicate of one already processed for {}",
            fields.number().unwrap_or("?"),
            fields.vendor_name().unwrap_or("unknown vendor")
        ))
    }

    fn amount_anomaly(&self, fields: &InvoiceFields, stats: &VendorStatistics) -> Option<String> {
        let amount = positive_amount(fields)?;
        if stats.invoice_count == 0 || stats.mean_amount <= 0.0 {
            return None;
        }

        let trusted = stats.invoice_count >= self.config.min_history_samples
            && stats.stddev_amount > 0.0;

        if trusted {
            let deviations = (amount - stats.mean_amount) / stats.stddev_amount;
            (deviations > self.config.amount_stddev_limit).then(|| {
                format!(
                    "Amount {} is {:.1} standard deviations above the vendor mean of {:.2}",
                    money(fields, amount),
                    deviations,
                    stats.mean_amount
                )
            })
        } else {
            let limit = stats.mean_amount * self.config.sparse_amount_multiple;
            (amount > limit).then(|| {
                format!(
                    "Amount {} exceeds {:.1}x the vendor mean of {:.2} (sparse history)",
                    money(fields, amount),
                    self.config.sparse_amount_multiple,
                    stats.mean_amount
                )
            })
        }
    }

    fn vendor_flag(&self, fields: &InvoiceFields) -> Option<String> {
        let vendor = fields.vendor_name()?;
        let key = vendor_key(vendor);

        if self.untrusted_vendors.contains(&key) {
            Some(format!("Vendor '{}' is marked untrusted", vendor))
        } else if !self.known_vendors.contains(&key) {
            Some(format!("Vendor '{}' is not a known vendor", vendor))
        } else {
            None
        }
    }

    fn frequency_flag(&self, fields: &InvoiceFields, stats: &VendorStatistics) -> Option<String> {
        let vendor = fields.vendor_name()?;
        (stats.recent_submission_count >= self.config.max_recent_submissions).then(|| {
            format!(
                "High submission frequency: {} recent invoices from {} ({} total with this one)",
                stats.recent_submission_count,
                vendor,
                stats.recent_submission_count + 1
            )
        })
    }

    fn variance_flag(&self, fields: &InvoiceFields, stats: &VendorStatistics) -> Option<String> {
        let amount = positive_amount(fields)?;
        if stats.invoice_count == 0 || stats.mean_amount <= 0.0 {
            return None;
        }

        let deviation = (amount - stats.mean_amount).abs() / stats.mean_amount;
        (deviation > self.config.variance_ratio_limit).then(|| {
            format!(
                "Amount {} deviates {:.0}% from the vendor's typical invoice of {:.2}",
                money(fields, amount),
                deviation * 100.0,
                stats.mean_amount
            )
        })
    }

    fn sequential_flag(&self, fields: &InvoiceFields, stats: &VendorStatistics) -> Option<String> {
        if stats.invoice_count >= self.config.familiar_vendor_invoices {
            return None;
        }
        let number = fields.number()?;
        let (prefix, value) = split_numeric_suffix(number)?;

        let recent: BTreeSet<u64> = stats
            .recent_invoice_numbers
            .iter()
            .filter_map(|n| split_numeric_suffix(n))
            .filter(|(p, _)| *p == prefix)
            .map(|(_, v)| v)
            .collect();

        let run = self.config.sequential_run_length as u64;
        let sequential = value >= run && (1..=run).all(|step| recent.contains(&(value - step)));

        sequential.then(|| {
            format!(
                "Invoice #{} continues a sequential run of {} recent invoices from unfamiliar vendor {}",
                number,
                run,
                fields.vendor_name().unwrap_or("unknown vendor")
            )
        })
    }

    fn round_amount_flag(&self, fields: &InvoiceFields) -> Option<String> {
        let amount = positive_amount(fields)?;
        let round = amount >= self.config.round_amount_min && (amount % 1_000.0).abs() < 1e-9;
        round.then(|| format!("Suspicious round amount: {}", money(fields, amount)))
    }

    fn tax_flag(&self, fields: &InvoiceFields) -> Option<String> {
        let total = positive_amount(fields)?;
        let tax = fields.tax_amount.filter(|t| *t > 0.0)?;

        let ratio = tax / total;
        let consistent = ratio >= self.config.tax_ratio_min && ratio <= self.config.tax_ratio_max;
        (!consistent).then(|| {
            format!(
                "Tax amount {:.2} is {:.1}% of the total, outside the expected {:.0}%-{:.0}%",
                tax,
                ratio * 100.0,
                self.config.tax_ratio_min * 100.0,
                self.config.tax_ratio_max * 100.0
            )
        })
    }
}

fn missing_fields_flag(fields: &InvoiceFields) -> Option<String> {
    let missing = fields.missing_critical_fields();
    (!missing.is_empty()).then(|| format!("Missing critical fields: {}", missing.join(", ")))
}

fn simple_number_flag(fields: &InvoiceFields) -> Option<String> {
    let number = fields.number()?;
    let all_digits = number.chars().all(|c| c.is_ascii_digit());
    let repeated = number.chars().all(|c| c == '0') || number.chars().all(|c| c == '1');

    if all_digits && number.len() <= 3 {
        Some(format!("Suspiciously simple invoice number: {}", number))
    } else if repeated {
        Some(format!("Invalid invoice number pattern: {}", number))
    } else {
        None
    }
}

fn positive_amount(fields: &InvoiceFields) -> Option<f64> {
    fields.total_amount.filter(|a| *a > 0.0)
}

fn money(fields: &InvoiceFields, amount: f64) -> String {
    format!("{} {:.2}", fields.currency.as_deref().unwrap_or("USD"), amount)
}

/// Split `INV-2024-0042` into (`INV-2024-`, 42).
fn split_numeric_suffix(number: &str) -> Option<(String, u64)> {
    let number = number_key(number);
    let digits = number.chars().rev().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let (prefix, suffix) = number.split_at(number.len() - digits);
    suffix.parse().ok().map(|value| (prefix.to_string(), value))
}

fn vendor_key(vendor: &str) -> String {
    vendor.trim().to_lowercase()
}

fn number_key(number: &str) -> String {
    number.trim().to_uppercase()
}
