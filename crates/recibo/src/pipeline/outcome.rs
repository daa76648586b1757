//! Structured result of one categorization attempt, including the per-stage
//! trace needed to debug silent wrong categorization.

use serde::Serialize;

use crate::receipt::Method;
use crate::taxonomy::CategoryId;

/// What one stage did during an attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTrace {
    /// Which stage ran.
    pub stage: Method,
    /// Short human-readable result ("matched vendor 'shell'", "timeout", ...).
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<CategoryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// True when this stage's result was persisted as the final category.
    pub accepted: bool,
}

/// Result returned by `Orchestrator::categorize`. Never an error for the
/// "all stages exhausted" case; `ok: false` plus a reason code is the
/// contract there.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizeOutcome {
    pub receipt_id: String,
    pub ok: bool,
    /// Display name of the assigned category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<CategoryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,
    /// Reason code when `ok` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// True when the receipt was already categorized and this call was a
    /// redundant (idempotent) invocation.
    pub already_categorized: bool,
    /// Stages attempted this call, in order. Empty on idempotent returns.
    pub trace: Vec<StageTrace>,
}

impl CategorizeOutcome {
    pub fn assigned(
        receipt_id: &str,
        category_id: CategoryId,
        confidence: f64,
        method: Method,
        trace: Vec<StageTrace>,
    ) -> Self {
        Self {
            receipt_id: receipt_id.to_string(),
            ok: true,
            category: Some(category_id.name().to_string()),
            category_id: Some(category_id),
            confidence: Some(confidence),
            method: Some(method),
            reason: None,
            already_categorized: false,
            trace,
        }
    }

    pub fn not_categorized(receipt_id: &str, reason: &str, trace: Vec<StageTrace>) -> Self {
        Self {
            receipt_id: receipt_id.to_string(),
            ok: false,
            category: None,
            category_id: None,
            confidence: None,
            method: None,
            reason: Some(reason.to_string()),
            already_categorized: false,
            trace,
        }
    }
}
