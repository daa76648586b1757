//! Deterministic merchant-to-category rule engine.
//!
//! Two ordered passes over the merchant name: a case-insensitive substring
//! check against the vendor table, then the regex keyword patterns. Both
//! tables are first-match-wins in declared order; ordering is owned by the
//! config data, not by this module.

use regex::{Regex, RegexBuilder};

use crate::config::schema::{PatternRule, VendorRule};
use crate::taxonomy::CategoryId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleMatch {
    pub category: CategoryId,
    pub confidence: f64,
}

pub struct RuleEngine {
    vendors: Vec<VendorEntry>,
    patterns: Vec<PatternEntry>,
}

struct VendorEntry {
    fragment: String,
    category: CategoryId,
    confidence: f64,
}

struct PatternEntry {
    regex: Regex,
    category: CategoryId,
    confidence: f64,
}

impl RuleEngine {
    /// Builds the engine from the config tables, preserving declared order.
    /// Invalid regexes are rejected at config load; any that slip through
    /// are skipped rather than matched.
    pub fn new(vendors: &[VendorRule], patterns: &[PatternRule]) -> Self {
        let vendors = vendors
            .iter()
            .map(|v| VendorEntry {
                fragment: v.fragment.to_lowercase(),
                category: v.category,
                confidence: v.confidence,
            })
            .collect();

        let patterns = patterns
            .iter()
            .filter_map(|p| {
                RegexBuilder::new(&p.pattern)
                    .case_insensitive(true)
                    .build()
                    .ok()
                    .map(|regex| PatternEntry {
                        regex,
                        category: p.category,
                        confidence: p.confidence,
                    })
            })
            .collect();

        Self { vendors, patterns }
    }

    /// Classifies a merchant name, or returns `None` when neither table
    /// matches. Pure and deterministic; no I/O.
    pub fn classify(&self, merchant: &str) -> Option<RuleMatch> {
        let normalized = merchant.to_lowercase();
        if normalized.trim().is_empty() {
            return None;
        }

        for vendor in &self.vendors {
            if normalized.contains(&vendor.fragment) {
                return Some(RuleMatch {
                    category: vendor.category,
                    confidence: vendor.confidence,
                });
            }
        }

        for pattern in &self.patterns {
            if pattern.regex.is_match(&normalized) {
                return Some(RuleMatch {
                    category: pattern.category,
                    confidence: pattern.confidence,
                });
            }
        }

        None
    }
}
