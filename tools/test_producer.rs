//! Test Invoice Producer
//!
//! Generates invoice submissions and publishes them to NATS for pipeline
//! testing. Falls back to printing samples when NATS is unreachable.

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
struct Fields {
    vendor: String,
    invoice_number: String,
    issue_date: String,
    currency: String,
    total_amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    po_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tax_amount: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
struct Document {
    text: String,
    confidence: f64,
    fields: Fields,
}

/// Message shape accepted on the submission subject
#[derive(Debug, Clone, Serialize)]
struct Submission {
    session_id: String,
    document: Document,
}

const APPROVED_VENDORS: [&str; 4] = [
    "Acme Corp",
    "TechSupplies Inc",
    "OfficeSupplies Co",
    "GlobalServices Ltd",
];

const UNKNOWN_VENDORS: [&str; 3] = ["Shell Holdings LLC", "QuickPay Consulting", "Nexus Trading"];

struct InvoiceGenerator {
    rng: rand::rngs::ThreadRng,
    counter: u64,
    /// Last regular invoice, replayed to exercise duplicate detection
    last_regular: Option<Document>,
}

impl InvoiceGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            counter: 0,
            last_regular: None,
        }
    }

    /// An approved vendor, plausible amount, PO and tax present
    fn generate_regular(&mut self) -> Submission {
        let vendor = self.random_choice(&APPROVED_VENDORS);
        let amount = (self.rng.gen_range(50.0..20_000.0_f64) * 100.0).round() / 100.0;
        let days_old = self.rng.gen_range(0..20);
        let po_number = if amount > 1_000.0 || self.rng.gen_bool(0.5) {
            Some(format!("PO-{}", self.rng.gen_range(1000..9999)))
        } else {
            None
        };

        let submission = self.build(vendor, amount, days_old, po_number, Some(amount * 0.08));
        self.last_regular = Some(submission.document.clone());
        submission
    }

    /// One of: replayed invoice, amount above the hard cap, or unknown
    /// vendor with a round amount and no PO or tax
    fn generate_suspicious(&mut self) -> Submission {
        match self.rng.gen_range(0..3) {
            0 => match self.last_regular.clone() {
                Some(document) => Submission {
                    session_id: uuid::Uuid::new_v4().to_string(),
                    document,
                },
                None => self.generate_unknown_vendor(),
            },
            1 => {
                let vendor = self.random_choice(&APPROVED_VENDORS);
                let amount = self.rng.gen_range(100_001.0..250_000.0_f64).round();
                let po_number = Some(format!("PO-{}", self.rng.gen_range(1000..9999)));
                self.build(vendor, amount, 2, po_number, Some(amount * 0.08))
            }
            _ => self.generate_unknown_vendor(),
        }
    }

    fn generate_unknown_vendor(&mut self) -> Submission {
        let vendor = self.random_choice(&UNKNOWN_VENDORS);
        let amount = (self.rng.gen_range(5..60) * 1_000) as f64;
        let days_old = self.rng.gen_range(0..120);

        self.build(vendor, amount, days_old, None, None)
    }

    fn build(
        &mut self,
        vendor: &str,
        amount: f64,
        days_old: i64,
        po_number: Option<String>,
        tax_amount: Option<f64>,
    ) -> Submission {
        self.counter += 1;
        let invoice_number = format!("INV-{:06}", self.counter);
        let issue_date = (Utc::now() - ChronoDuration::days(days_old))
            .format("%Y-%m-%d")
            .to_string();

        Submission {
            session_id: uuid::Uuid::new_v4().to_string(),
            document: Document {
                text: format!(
                    "INVOICE {}\n{}\nDate: {}\nTotal: {:.2} USD",
                    invoice_number, vendor, issue_date, amount
                ),
                confidence: self.rng.gen_range(0.6..0.99),
                fields: Fields {
                    vendor: vendor.to_string(),
                    invoice_number,
                    issue_date,
                    currency: "USD".to_string(),
                    total_amount: amount,
                    po_number,
                    tax_amount: tax_amount.map(|t| (t * 100.0).round() / 100.0),
                },
            },
        }
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Invoice Producer");

    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("invoices.submit");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let suspicious_rate: f64 = args
        .get(4)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.1_f64)
        .clamp(0.0, 1.0);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count,
        suspicious_rate,
        delay_ms,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, suspicious_rate, delay_ms).await;
        }
    };

    let mut generator = InvoiceGenerator::new();
    let mut rng = rand::thread_rng();
    let mut regular = 0;
    let mut suspicious = 0;

    for i in 0..count {
        let submission = if rng.gen_bool(suspicious_rate) {
            suspicious += 1;
            generator.generate_suspicious()
        } else {
            regular += 1;
            generator.generate_regular()
        };

        let payload = serde_json::to_vec(&submission)?;
        client.publish(subject.to_string(), payload.into()).await?;

        if (i + 1) % 10 == 0 {
            info!(
                "Published {}/{} invoices ({} regular, {} suspicious)",
                i + 1,
                count,
                regular,
                suspicious
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    client.flush().await?;

    info!(
        "Completed! Published {} invoices ({} regular, {} suspicious)",
        count, regular, suspicious
    );

    Ok(())
}

async fn run_dry_mode(count: u64, suspicious_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = InvoiceGenerator::new();
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let submission = if rng.gen_bool(suspicious_rate) {
            generator.generate_suspicious()
        } else {
            generator.generate_regular()
        };

        if (i + 1) % 10 == 0 || i == 0 {
            info!(
                "Sample invoice {}:\n{}",
                i + 1,
                serde_json::to_string_pretty(&submission)?
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
