use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");
const DEFAULT_CONFIG_JSON: &str = include_str!("../../../../config/default.json");

/// Vendor and merchant-pattern confidences are fixed, curated values; the
/// allowed band keeps rule hits trusted but never fully saturated.
const RULE_CONFIDENCE_MIN: f64 = 0.65;
const RULE_CONFIDENCE_MAX: f64 = 0.95;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Returns the shipped rule tables. The embedded JSON is validated the same
/// way as a user-supplied config; a broken shipped config is a build defect
/// caught by the test suite, so failure here is not recoverable.
pub fn builtin_config() -> Result<Config, ConfigError> {
    load_config_from_str(DEFAULT_CONFIG_JSON)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let errors: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| format!("{} at {}", e, e.instance_path()))
        .collect();
    if !errors.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: errors.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    // Vendor table: non-empty fragments, no duplicates (a duplicate would
    // silently shadow a later entry), confidence inside the curated band.
    let mut seen_fragments = HashSet::new();
    for vendor in &config.vendors {
        let fragment = vendor.fragment.to_lowercase();
        if fragment.trim().is_empty() {
            return Err(ConfigError::InvalidVendor {
                fragment: vendor.fragment.clone(),
                reason: "Fragment must not be empty".to_string(),
            });
        }
        if !seen_fragments.insert(fragment) {
            return Err(ConfigError::InvalidVendor {
                fragment: vendor.fragment.clone(),
                reason: "Duplicate vendor fragment".to_string(),
            });
        }
        if vendor.confidence < RULE_CONFIDENCE_MIN || vendor.confidence > RULE_CONFIDENCE_MAX {
            return Err(ConfigError::InvalidVendor {
                fragment: vendor.fragment.clone(),
                reason: format!(
                    "Confidence {} outside [{}, {}]",
                    vendor.confidence, RULE_CONFIDENCE_MIN, RULE_CONFIDENCE_MAX
                ),
            });
        }
    }

    for pattern in &config.merchant_patterns {
        if let Err(e) = regex::Regex::new(&pattern.pattern) {
            return Err(ConfigError::InvalidPattern {
                pattern: pattern.pattern.clone(),
                reason: e.to_string(),
            });
        }
        if pattern.confidence <= 0.0 || pattern.confidence > 1.0 {
            return Err(ConfigError::InvalidPattern {
                pattern: pattern.pattern.clone(),
                reason: format!("Confidence {} outside (0, 1]", pattern.confidence),
            });
        }
    }

    let mut seen_categories = HashSet::new();
    for rule in &config.context_rules {
        if !seen_categories.insert(rule.category) {
            return Err(ConfigError::InvalidContextRule {
                category: rule.category.to_string(),
                reason: "Duplicate context rule for category".to_string(),
            });
        }
        if rule.weight <= 0.0 {
            return Err(ConfigError::InvalidContextRule {
                category: rule.category.to_string(),
                reason: format!("Weight {} must be positive", rule.weight),
            });
        }
        if rule.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::InvalidContextRule {
                category: rule.category.to_string(),
                reason: "Keywords must not be empty".to_string(),
            });
        }
    }

    if config.policy.score_threshold <= 0.0 {
        return Err(ConfigError::Validation {
            message: format!(
                "Score threshold {} must be positive",
                config.policy.score_threshold
            ),
        });
    }

    Ok(())
}
