//! Receipt, prediction, and status machine types.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::taxonomy::CategoryId;

/// Receipt lifecycle status. Transitions are monotonic forward only:
/// `pending → ocr_done → categorized`, with `failed` as the terminal state
/// of an attempt. A `failed` receipt can be re-queued but never moves
/// backwards through the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Pending,
    OcrDone,
    Categorized,
    Failed,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Pending => "pending",
            ReceiptStatus::OcrDone => "ocr_done",
            ReceiptStatus::Categorized => "categorized",
            ReceiptStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReceiptStatus::Pending),
            "ocr_done" => Some(ReceiptStatus::OcrDone),
            "categorized" => Some(ReceiptStatus::Categorized),
            "failed" => Some(ReceiptStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which classification stage produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Rule,
    Heuristic,
    Model,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Rule => "rule",
            Method::Heuristic => "heuristic",
            Method::Model => "model",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rule" => Some(Method::Rule),
            "heuristic" => Some(Method::Heuristic),
            "model" => Some(Method::Model),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted line item on a receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
}

/// The unit of work: a user-submitted receipt with extraction output and,
/// once the orchestrator has run, the assigned category fields.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub id: String,
    pub owner_id: String,
    pub merchant: String,
    pub total: f64,
    pub subtotal: f64,
    pub tax: f64,
    /// Calendar date of purchase as "YYYY-MM-DD", when extraction found one.
    pub receipt_date: Option<String>,
    pub raw_text: Option<String>,
    pub line_items: Vec<LineItem>,
    pub status: ReceiptStatus,
    pub category_id: Option<CategoryId>,
    pub category_confidence: Option<f64>,
    pub category_method: Option<Method>,
    pub created_at: String,
    pub updated_at: String,
}

impl Receipt {
    /// Creates a receipt already populated by extraction, in `ocr_done`
    /// status and ready for categorization.
    #[allow(clippy::too_many_arguments)]
    pub fn extracted(
        owner_id: &str,
        merchant: &str,
        total: f64,
        subtotal: f64,
        tax: f64,
        receipt_date: Option<String>,
        raw_text: Option<String>,
        line_items: Vec<LineItem>,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            merchant: merchant.to_string(),
            total,
            subtotal,
            tax,
            receipt_date,
            raw_text,
            line_items,
            status: ReceiptStatus::OcrDone,
            category_id: None,
            category_confidence: None,
            category_method: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Append-only audit record of one categorization stage attempt.
///
/// The orchestrator writes one prediction per stage it runs, winners and
/// non-winners alike, so "why did this receipt get (or not get) a category"
/// is answerable after the fact. Predictions are never mutated or deleted.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub id: String,
    pub subject_id: String,
    pub method: Method,
    pub category_id: Option<CategoryId>,
    pub confidence: Option<f64>,
    pub details: String,
    pub created_at: String,
}

impl Prediction {
    pub fn new(
        subject_id: &str,
        method: Method,
        category_id: Option<CategoryId>,
        confidence: Option<f64>,
        details: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: subject_id.to_string(),
            method,
            category_id,
            confidence,
            details,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}
