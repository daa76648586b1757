//! Shared test utilities for recibo integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use recibo::classify::{ClassificationFailure, ModelClassifier, ModelVerdict, ReceiptSummary};
use recibo::config::{builtin_config, Config};
use recibo::db::{receipt_repo, Database};
use recibo::pipeline::Orchestrator;
use recibo::receipt::{LineItem, Receipt, ReceiptStatus};
use recibo::taxonomy::CategoryId;

/// What the mock model answers with.
pub enum MockResponse {
    Verdict { category: CategoryId, confidence: f64 },
    Timeout,
    InvalidJson,
    UnknownCategory(String),
    UpstreamError,
}

/// Scripted model classifier with call counting, so tests can assert the
/// model stage was (or was not) invoked.
pub struct MockClassifier {
    response: MockResponse,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockClassifier {
    pub fn verdict(category: CategoryId, confidence: f64) -> Self {
        Self::new(MockResponse::Verdict {
            category,
            confidence,
        })
    }

    pub fn new(response: MockResponse) -> Self {
        Self {
            response,
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ModelClassifier for MockClassifier {
    fn classify(
        &self,
        _summary: &ReceiptSummary,
    ) -> Result<ModelVerdict, ClassificationFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        match &self.response {
            MockResponse::Verdict {
                category,
                confidence,
            } => Ok(ModelVerdict {
                category: *category,
                confidence: *confidence,
            }),
            MockResponse::Timeout => Err(ClassificationFailure::Timeout),
            MockResponse::InvalidJson => Err(ClassificationFailure::InvalidJson(
                "no JSON object in response".to_string(),
            )),
            MockResponse::UnknownCategory(name) => {
                Err(ClassificationFailure::UnknownCategory(name.clone()))
            }
            MockResponse::UpstreamError => Err(ClassificationFailure::UpstreamError(
                "503 Service Unavailable".to_string(),
            )),
        }
    }
}

/// Builder for test receipts, inserted in `ocr_done` status by default.
pub struct ReceiptBuilder {
    merchant: String,
    total: f64,
    raw_text: Option<String>,
    line_items: Vec<LineItem>,
    status: ReceiptStatus,
}

impl ReceiptBuilder {
    pub fn new(merchant: &str) -> Self {
        Self {
            merchant: merchant.to_string(),
            total: 25.0,
            raw_text: None,
            line_items: Vec::new(),
            status: ReceiptStatus::OcrDone,
        }
    }

    pub fn total(mut self, total: f64) -> Self {
        self.total = total;
        self
    }

    pub fn raw_text(mut self, text: &str) -> Self {
        self.raw_text = Some(text.to_string());
        self
    }

    pub fn line_item(mut self, description: &str, amount: f64) -> Self {
        self.line_items.push(LineItem {
            description: description.to_string(),
            amount,
            quantity: None,
        });
        self
    }

    pub fn status(mut self, status: ReceiptStatus) -> Self {
        self.status = status;
        self
    }

    /// Builds the receipt and persists it.
    pub fn insert(self, db: &Database) -> Receipt {
        let mut receipt = Receipt::extracted(
            "user-1",
            &self.merchant,
            self.total,
            self.total,
            0.0,
            None,
            self.raw_text,
            self.line_items,
        );
        receipt.status = self.status;
        receipt_repo::insert(db, &receipt).expect("Failed to insert test receipt");
        receipt
    }
}

pub fn test_config() -> Config {
    builtin_config().expect("Built-in config must load")
}

pub fn test_db() -> Database {
    Database::open_in_memory().expect("Failed to create test database")
}

/// Orchestrator over an in-memory database, the built-in rule tables, and
/// the given mock model.
pub fn orchestrator_with(db: &Database, mock: Arc<MockClassifier>) -> Orchestrator {
    Orchestrator::with_classifier(db.clone(), &test_config(), mock)
}
