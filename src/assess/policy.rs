//! Policy compliance and approval tiering

use crate::config::PolicyConfig;
use crate::types::{ApprovalTier, FraudAssessment, InvoiceFields, PolicyAssessment};
use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::debug;

/// Pass/fail checks behind `PolicyAssessment::checks_performed`.
pub const POLICY_CHECK_COUNT: usize = 7;

const DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%d %B %Y",
];

/// Parse an invoice date in any of the commonly printed formats.
///
/// Ambiguous day/month dates resolve month-first.
pub fn parse_invoice_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Evaluates invoices against company policy
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    config: PolicyConfig,
    accepted_currencies: HashSet<String>,
}

enum VendorMatch {
    Exact,
    Similar(String),
    None,
}

impl PolicyEvaluator {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            config: config.clone(),
            accepted_currencies: config
                .accepted_currencies
                .iter()
                .map(|c| c.trim().to_uppercase())
                .collect(),
        }
    }

    /// Approval tier for an amount under the configured thresholds.
    pub fn tier_for(&self, amount: f64) -> ApprovalTier {
        ApprovalTier::for_amount(amount, &self.config.approval_thresholds)
    }

    /// Evaluate one invoice. `today` anchors the date checks.
    pub fn evaluate(
        &self,
        fields: &InvoiceFields,
        fraud: &FraudAssessment,
        today: NaiveDate,
    ) -> PolicyAssessment {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();
        let amount = fields.amount();
        let policy = &self.config;

        let missing = fields.missing_critical_fields();
        if !missing.is_empty() {
            violations.push(format!("Missing required fields: {}", missing.join(", ")));
        }

        if let Some(vendor) = fields.vendor_name() {
            match self.match_vendor(vendor) {
                VendorMatch::Exact => {}
                VendorMatch::Similar(approved) => warnings.push(format!(
                    "Vendor '{}' matched approved vendor '{}' by similarity - verify exact match",
                    vendor, approved
                )),
                VendorMatch::None => violations.push(format!(
                    "Vendor '{}' is not on the approved vendor list",
                    vendor
                )),
            }
        }

        if amount > policy.po_required_above && is_blank(fields.po_number.as_deref()) {
            violations.push(format!(
                "Purchase order number required for invoices above {:.2} (amount: {:.2})",
                policy.po_required_above, amount
            ));
        }

        let tax_required = policy.tax_required
            || policy.tax_required_above.map_or(false, |limit| amount > limit);
        if tax_required && fields.tax_amount.map_or(true, |tax| tax <= 0.0) {
            violations.push(format!("Tax amount required for this invoice (amount: {:.2})", amount));
        }

        if let Some(total) = fields.total_amount {
            if total > policy.max_amount {
                violations.push(format!(
                    "Amount {:.2} exceeds the hard cap of {:.2}",
                    total, policy.max_amount
                ));
            } else if total > 0.0 && total < policy.min_amount {
                violations.push(format!(
                    "Amount {:.2} is below the minimum of {:.2}",
                    total, policy.min_amount
                ));
            }
        }

        if fraud.duplicate_detected {
            violations.push(format!(
                "Unresolved duplicate: invoice #{} was already submitted by {}",
                fields.number().unwrap_or("?"),
                fields.vendor_name().unwrap_or("unknown vendor")
            ));
        }

        if let Some(raw) = fields.issue_date.as_deref().filter(|d| !d.trim().is_empty()) {
            self.check_date(raw, today, &mut violations, &mut warnings);
        }

        if let Some(currency) = fields.currency.as_deref().map(str::trim) {
            if !self.accepted_currencies.contains(&currency.to_uppercase()) {
                warnings.push(format!(
                    "Unusual currency: {} - may need additional review",
                    currency
                ));
            }
        }

        if let Some(number) = fields.number() {
            let usual = number
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '#' | '/' | '_'));
            if !usual {
                warnings.push(format!("Invoice number '{}' contains unusual characters", number));
            }
        }

        let approval_tier = self.tier_for(amount);
        if approval_tier != ApprovalTier::AutoApprove {
            warnings.push(format!(
                "Amount {:.2} requires {} approval",
                amount,
                approval_tier.approver()
            ));
        }

        let assessment =
            PolicyAssessment::new(violations, warnings, approval_tier, POLICY_CHECK_COUNT);

        debug!(
            compliant = assessment.compliant,
            violations = assessment.violations.len(),
            warnings = assessment.warnings.len(),
            approval_tier = %assessment.approval_tier,
            "Policy assessment complete"
        );

        assessment
    }

    fn match_vendor(&self, vendor: &str) -> VendorMatch {
        let wanted = vendor.trim().to_lowercase();

        if self
            .config
            .approved_vendors
            .iter()
            .any(|approved| approved.trim().to_lowercase() == wanted)
        {
            return VendorMatch::Exact;
        }

        self.config
            .approved_vendors
            .iter()
            .find(|approved| {
                let approved = approved.trim().to_lowercase();
                let shorter = approved.len().min(wanted.len());
                shorter >= 4 && (approved.contains(&wanted) || wanted.contains(&approved))
            })
            .map_or(VendorMatch::None, |approved| {
                VendorMatch::Similar(approved.clone())
            })
    }

    fn check_date(
        &self,
        raw: &str,
        today: NaiveDate,
        violations: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) {
        let Some(date) = parse_invoice_date(raw) else {
            violations.push(format!("Invoice date '{}' could not be parsed", raw.trim()));
            return;
        };

        let age_days = (today - date).num_days();
        if -age_days > self.config.future_tolerance_days {
            violations.push(format!("Invoice date {} is in the future", date));
        } else if let Some(max_age) = self
            .config
            .max_invoice_age_days
            .filter(|max_age| age_days > *max_age)
        {
            violations.push(format!(
                "Invoice date {} is {} days old (max: {} days)",
                date, age_days, max_age
            ));
        } else if age_days > self.config.stale_warning_days {
            warnings.push(format!(
                "Invoice is {} days old - verify it hasn't been paid already",
                age_days
            ));
        }
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApprovalThresholds, RiskLevelThresholds};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn evaluator() -> PolicyEvaluator {
        PolicyEvaluator::new(&PolicyConfig {
            approved_vendors: vec!["TechSupplies Inc".to_string(), "Acme Corp".to_string()],
            ..PolicyConfig::default()
        })
    }

    fn no_fraud() -> FraudAssessment {
        FraudAssessment::new(0.0, &RiskLevelThresholds::default(), vec![], false, true, 11)
    }

    fn invoice(amount: f64) -> InvoiceFields {
        InvoiceFields::new("TechSupplies Inc", "TS-1001", amount)
            .with_issue_date("2024-06-10")
            .with_currency("USD")
            .with_po_number("PO-55")
            .with_tax_amount(amount * 0.08)
    }

    #[test]
    fn test_compliant_invoice() {
        let assessment = evaluator().evaluate(&invoice(850.0), &no_fraud(), today());

        assert!(assessment.compliant);
        assert!(assessment.violations.is_empty());
        assert!(assessment.warnings.is_empty());
        assert_eq!(assessment.approval_tier, ApprovalTier::AutoApprove);
        assert_eq!(assessment.checks_performed, POLICY_CHECK_COUNT);
    }

    #[test]
    fn test_tier_boundaries() {
        let evaluator = evaluator();
        let cases = [
            (999.99, ApprovalTier::AutoApprove),
            (1000.00, ApprovalTier::Manager),
            (5000.00, ApprovalTier::Director),
            (15000.00, ApprovalTier::Cfo),
            (50000.00, ApprovalTier::Board),
        ];
        for (amount, tier) in cases {
            let assessment = evaluator.evaluate(&invoice(amount), &no_fraud(), today());
            assert_eq!(assessment.approval_tier, tier, "amount {amount}");
        }
    }

    #[test]
    fn test_tiers_follow_configuration() {
        let evaluator = PolicyEvaluator::new(&PolicyConfig {
            approval_thresholds: ApprovalThresholds {
                manager: 100.0,
                director: 200.0,
                cfo: 300.0,
                board: 400.0,
            },
            ..PolicyConfig::default()
        });

        assert_eq!(evaluator.tier_for(99.0), ApprovalTier::AutoApprove);
        assert_eq!(evaluator.tier_for(250.0), ApprovalTier::Director);
        assert_eq!(evaluator.tier_for(400.0), ApprovalTier::Board);
    }

    #[test]
    fn test_missing_fields_and_unknown_vendor() {
        let fields = InvoiceFields {
            vendor: Some("Globex".to_string()),
            invoice_number: None,
            issue_date: None,
            ..invoice(500.0)
        };

        let assessment = evaluator().evaluate(&fields, &no_fraud(), today());
        assert!(!assessment.compliant);
        assert_eq!(
            assessment.violations,
            vec![
                "Missing required fields: invoice_number, issue_date".to_string(),
                "Vendor 'Globex' is not on the approved vendor list".to_string(),
            ]
        );
    }

    #[test]
    fn test_similar_vendor_is_a_warning() {
        let fields = InvoiceFields {
            vendor: Some("TechSupplies Inc.".to_string()),
            ..invoice(850.0)
        };

        let assessment = evaluator().evaluate(&fields, &no_fraud(), today());
        assert!(assessment.compliant);
        assert!(assessment.warnings[0].contains("by similarity"));
    }

    #[test]
    fn test_po_and_tax_requirements() {
        let fields = InvoiceFields {
            po_number: None,
            tax_amount: None,
            ..invoice(12_000.0)
        };

        let assessment = evaluator().evaluate(&fields, &no_fraud(), today());
        assert_eq!(assessment.violations.len(), 2);
        assert!(assessment.violations[0].starts_with("Purchase order number required"));
        assert!(assessment.violations[1].starts_with("Tax amount required"));

        // Exactly at the PO threshold nothing is required.
        let at_threshold = InvoiceFields {
            po_number: None,
            ..invoice(1_000.0)
        };
        assert!(evaluator().evaluate(&at_threshold, &no_fraud(), today()).compliant);

        let strict = PolicyEvaluator::new(&PolicyConfig {
            approved_vendors: vec!["TechSupplies Inc".to_string()],
            tax_required: true,
            ..PolicyConfig::default()
        });
        let untaxed = InvoiceFields {
            tax_amount: None,
            ..invoice(100.0)
        };
        assert!(!strict.evaluate(&untaxed, &no_fraud(), today()).compliant);
    }

    #[test]
    fn test_hard_cap_always_violates() {
        let assessment = evaluator().evaluate(&invoice(150_000.0), &no_fraud(), today());
        assert!(!assessment.compliant);
        assert!(assessment
            .violations
            .contains(&"Amount 150000.00 exceeds the hard cap of 100000.00".to_string()));
        assert_eq!(assessment.approval_tier, ApprovalTier::Board);
    }

    #[test]
    fn test_duplicate_cross_check() {
        let fraud = FraudAssessment::new(
            0.5,
            &RiskLevelThresholds::default(),
            vec!["duplicate".to_string()],
            true,
            true,
            11,
        );

        let assessment = evaluator().evaluate(&invoice(850.0), &fraud, today());
        assert_eq!(
            assessment.violations,
            vec!["Unresolved duplicate: invoice #TS-1001 was already submitted by TechSupplies Inc"
                .to_string()]
        );
    }

    #[test]
    fn test_date_checks() {
        let evaluator = evaluator();
        let with_date = |date: &str| InvoiceFields {
            issue_date: Some(date.to_string()),
            ..invoice(850.0)
        };

        assert!(evaluator.evaluate(&with_date("06/16/2024"), &no_fraud(), today()).compliant);

        let future = evaluator.evaluate(&with_date("2024-06-20"), &no_fraud(), today());
        assert_eq!(future.violations, vec!["Invoice date 2024-06-20 is in the future".to_string()]);

        let garbage = evaluator.evaluate(&with_date("sometime soon"), &no_fraud(), today());
        assert_eq!(
            garbage.violations,
            vec!["Invoice date 'sometime soon' could not be parsed".to_string()]
        );

        let old = evaluator.evaluate(&with_date("2024-01-01"), &no_fraud(), today());
        assert!(old.violations[0].contains("days old (max: 90 days)"));

        let stale = evaluator.evaluate(&with_date("May 1, 2024"), &no_fraud(), today());
        assert!(stale.compliant);
        assert!(stale.warnings[0].starts_with("Invoice is 45 days old"));
    }

    #[test]
    fn test_currency_and_number_warnings() {
        let fields = InvoiceFields {
            currency: Some("XAU".to_string()),
            invoice_number: Some("TS 1001!".to_string()),
            ..invoice(850.0)
        };

        let assessment = evaluator().evaluate(&fields, &no_fraud(), today());
        assert!(assessment.compliant);
        assert_eq!(assessment.warnings.len(), 2);
    }

    #[test]
    fn test_parse_invoice_date() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(parse_invoice_date("2024-03-07"), Some(expected));
        assert_eq!(parse_invoice_date(" 03/07/2024 "), Some(expected));
        assert_eq!(parse_invoice_date("2024/03/07"), Some(expected));
        assert_eq!(parse_invoice_date("07.03.2024"), Some(expected));
        assert_eq!(parse_invoice_date("March 7, 2024"), Some(expected));
        assert_eq!(parse_invoice_date("7 March 2024"), Some(expected));
        assert_eq!(parse_invoice_date("31/12/2024"), NaiveDate::from_ymd_opt(2024, 12, 31));
        assert_eq!(parse_invoice_date("yesterday"), None);
    }
}
