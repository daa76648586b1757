//! Last-resort classification via an external model endpoint.
//!
//! The adapter owns the timeout and converts every failure mode into a
//! `ClassificationFailure` with a stable reason code; nothing here raises
//! an uncaught fault to the orchestrator. The response is validated at the
//! boundary: the category name must resolve against the closed taxonomy
//! and the confidence is clamped to [0, 1] before anything downstream
//! sees it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::schema::ModelConfig;
use crate::error::ConfigError;
use crate::receipt::Receipt;
use crate::taxonomy::CategoryId;

#[derive(Error, Debug)]
pub enum ClassificationFailure {
    #[error("Model call timed out")]
    Timeout,

    #[error("Model returned unparseable output: {0}")]
    InvalidJson(String),

    #[error("Model returned unknown category '{0}'")]
    UnknownCategory(String),

    #[error("Model upstream error: {0}")]
    UpstreamError(String),
}

impl ClassificationFailure {
    /// Stable reason code recorded in prediction details and surfaced in
    /// the categorize result.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ClassificationFailure::Timeout => "timeout",
            ClassificationFailure::InvalidJson(_) => "invalid_json",
            ClassificationFailure::UnknownCategory(_) => "unknown_category",
            ClassificationFailure::UpstreamError(_) => "upstream_error",
        }
    }
}

/// Compact receipt summary sent to the model. Caps on item count, item
/// length, and text length bound cost and latency; the full raw payload
/// never leaves the process.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSummary {
    pub merchant: String,
    pub total: f64,
    pub line_items: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
}

impl ReceiptSummary {
    pub fn from_receipt(receipt: &Receipt, config: &ModelConfig) -> Self {
        let line_items = receipt
            .line_items
            .iter()
            .take(config.max_line_items)
            .map(|item| truncate(&item.description, config.max_item_chars))
            .collect();

        let raw_text = receipt
            .raw_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| truncate(t, config.max_text_chars));

        Self {
            merchant: receipt.merchant.trim().to_string(),
            total: receipt.total,
            line_items,
            raw_text,
        }
    }

    /// True when the summary carries no usable signal at all. A model
    /// failure on an empty summary is reported as `insufficient_data`
    /// rather than blamed on the model.
    pub fn is_empty(&self) -> bool {
        let merchant_known =
            !self.merchant.is_empty() && !self.merchant.eq_ignore_ascii_case("unknown");
        !merchant_known && self.raw_text.is_none() && self.line_items.is_empty()
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Validated model answer: a category from the closed taxonomy and a
/// confidence already clamped to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelVerdict {
    pub category: CategoryId,
    pub confidence: f64,
}

pub trait ModelClassifier: Send + Sync {
    fn classify(&self, summary: &ReceiptSummary)
        -> Result<ModelVerdict, ClassificationFailure>;
}

/// Stand-in used when no model endpoint is configured. The model stage
/// still runs and records its prediction; it just always fails upstream.
pub struct UnconfiguredClassifier;

impl ModelClassifier for UnconfiguredClassifier {
    fn classify(
        &self,
        _summary: &ReceiptSummary,
    ) -> Result<ModelVerdict, ClassificationFailure> {
        Err(ClassificationFailure::UpstreamError(
            "No model endpoint configured".to_string(),
        ))
    }
}

pub struct HttpModelClassifier {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClassifyRequest<'a> {
    model: &'a str,
    categories: Vec<&'static str>,
    receipt: &'a ReceiptSummary,
}

impl HttpModelClassifier {
    /// Builds the blocking client with the configured timeout. The API key
    /// is read from the environment once here, never per call.
    pub fn new(config: &ModelConfig, endpoint: String) -> Result<Self, ConfigError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Validation {
                message: format!("Failed to build model HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
        })
    }
}

impl ModelClassifier for HttpModelClassifier {
    fn classify(
        &self,
        summary: &ReceiptSummary,
    ) -> Result<ModelVerdict, ClassificationFailure> {
        let request = ClassifyRequest {
            model: &self.model,
            categories: CategoryId::ALL.iter().map(|c| c.name()).collect(),
            receipt: summary,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                ClassificationFailure::Timeout
            } else {
                ClassificationFailure::UpstreamError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassificationFailure::UpstreamError(format!(
                "Model endpoint returned {}",
                status
            )));
        }

        let body = response.text().map_err(|e| {
            if e.is_timeout() {
                ClassificationFailure::Timeout
            } else {
                ClassificationFailure::UpstreamError(e.to_string())
            }
        })?;

        parse_verdict(&body)
    }
}

#[derive(Deserialize)]
struct RawVerdict {
    category: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

/// Parses a model response into a validated verdict. The model may wrap
/// the JSON object in prose, so the first balanced object is extracted
/// before deserializing. An unknown category name is a failure, never
/// accepted verbatim.
pub fn parse_verdict(body: &str) -> Result<ModelVerdict, ClassificationFailure> {
    let json = extract_json(body).ok_or_else(|| {
        ClassificationFailure::InvalidJson(format!(
            "No JSON object found in response: {}",
            truncate(body, 120)
        ))
    })?;

    let raw: RawVerdict = serde_json::from_str(json)
        .map_err(|e| ClassificationFailure::InvalidJson(e.to_string()))?;

    let category = CategoryId::from_name_or_id(&raw.category)
        .ok_or_else(|| ClassificationFailure::UnknownCategory(raw.category.clone()))?;

    let confidence = if raw.confidence.is_finite() {
        raw.confidence.clamp(0.0, 1.0)
    } else {
        default_confidence()
    };

    Ok(ModelVerdict {
        category,
        confidence,
    })
}

/// Extracts the first balanced JSON object from free text, respecting
/// string literals and escape sequences.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }

    None
}
