//! Categorization config: the ordered rule tables and policy constants.
//!
//! Declared order is part of the contract. Vendor and merchant-pattern
//! tables are first-match-wins, and the context scorer breaks score ties
//! by declared category order, so all tables deserialize into `Vec`s
//! rather than maps.

use serde::{Deserialize, Serialize};

use crate::taxonomy::CategoryId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub version: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub vendors: Vec<VendorRule>,
    #[serde(default)]
    pub merchant_patterns: Vec<PatternRule>,
    #[serde(default)]
    pub context_rules: Vec<ContextRule>,
    #[serde(default)]
    pub policy: PolicyConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

/// Maps a known vendor-name fragment to a category with a fixed confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorRule {
    #[serde(rename = "match")]
    pub fragment: String,
    pub category: CategoryId,
    pub confidence: f64,
}

/// Maps a regex over the merchant name to a category. Tested only after the
/// whole vendor table has missed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    pub pattern: String,
    pub category: CategoryId,
    pub confidence: f64,
}

/// Weighted keyword table entry for one category, with optional context
/// adjustments: missing all `required` keywords halves the score, and any
/// `excluded` keyword present multiplies it by 0.3 (required is always
/// applied first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRule {
    pub category: CategoryId,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub excluded: Vec<String>,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    /// Context-scorer acceptance threshold. Tuned constant from production
    /// data; change via config, not code.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    /// Category returned (flagged low-confidence) when no score clears the
    /// threshold.
    #[serde(default = "default_fallback_category")]
    pub fallback_category: CategoryId,
    /// Queue attempts before a receipt is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub model: ModelConfig,
}

fn default_score_threshold() -> f64 {
    0.5
}

fn default_fallback_category() -> CategoryId {
    CategoryId::Supplies
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            score_threshold: default_score_threshold(),
            fallback_category: default_fallback_category(),
            max_attempts: default_max_attempts(),
            model: ModelConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// Classification endpoint URL. When unset the model stage reports
    /// `upstream_error` instead of calling out.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_model_name")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Caps applied when building the receipt summary sent to the model.
    #[serde(default = "default_max_line_items")]
    pub max_line_items: usize,
    #[serde(default = "default_max_item_chars")]
    pub max_item_chars: usize,
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
    /// Environment variable holding the API key, read once at startup.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_model_name() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout_secs() -> u64 {
    8
}

fn default_max_line_items() -> usize {
    10
}

fn default_max_item_chars() -> usize {
    80
}

fn default_max_text_chars() -> usize {
    1500
}

fn default_api_key_env() -> String {
    "RECIBO_MODEL_API_KEY".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: default_model_name(),
            timeout_secs: default_timeout_secs(),
            max_line_items: default_max_line_items(),
            max_item_chars: default_max_item_chars(),
            max_text_chars: default_max_text_chars(),
            api_key_env: default_api_key_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"version": "1.0"}"#).unwrap();
        assert_eq!(config.version, "1.0");
        assert!(config.vendors.is_empty());
        assert!((config.policy.score_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.policy.fallback_category, CategoryId::Supplies);
        assert_eq!(config.policy.max_attempts, 3);
        assert_eq!(config.policy.model.timeout_secs, 8);
        assert!(config.worker_count >= 1);
    }

    #[test]
    fn test_vendor_rule_uses_match_key() {
        let rule: VendorRule = serde_json::from_str(
            r#"{"match": "shell", "category": "car_truck", "confidence": 0.95}"#,
        )
        .unwrap();
        assert_eq!(rule.fragment, "shell");
        assert_eq!(rule.category, CategoryId::CarTruck);
    }

    #[test]
    fn test_unknown_category_id_rejected_at_parse() {
        let result: Result<VendorRule, _> = serde_json::from_str(
            r#"{"match": "x", "category": "not_a_category", "confidence": 0.9}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_context_rule_defaults() {
        let rule: ContextRule =
            serde_json::from_str(r#"{"category": "meals", "keywords": ["coffee"]}"#).unwrap();
        assert!((rule.weight - 1.0).abs() < f64::EPSILON);
        assert!(rule.required.is_empty());
        assert!(rule.excluded.is_empty());
    }
}
