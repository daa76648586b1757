//! Weighted keyword scoring over merchant name, line items, and OCR text.
//!
//! The heuristic stage between the rule tables and the model call. Every
//! category in the context-rule table gets a score; the pick is the top
//! score when it clears the threshold, otherwise the configured fallback
//! category flagged low-confidence.

use regex::{Regex, RegexBuilder};

use crate::config::schema::ContextRule;
use crate::receipt::LineItem;
use crate::taxonomy::CategoryId;

/// Score multipliers by where a keyword was found. Merchant hits count
/// double, line-item hits one-and-a-half, each occurrence in the combined
/// text counts once. Tuned against production data; not derived.
const MERCHANT_FACTOR: f64 = 2.0;
const LINE_ITEM_FACTOR: f64 = 1.5;
const REQUIRED_MISSING_PENALTY: f64 = 0.5;
const EXCLUDED_PRESENT_PENALTY: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryScore {
    pub category: CategoryId,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextPick {
    pub category: CategoryId,
    pub score: f64,
    /// True when no score cleared the threshold and `category` is the
    /// configured fallback rather than an earned result.
    pub is_default: bool,
}

pub struct ContextScorer {
    categories: Vec<CategoryEntry>,
    threshold: f64,
    fallback: CategoryId,
}

struct CategoryEntry {
    category: CategoryId,
    weight: f64,
    keywords: Vec<Keyword>,
    required: Vec<String>,
    excluded: Vec<String>,
}

struct Keyword {
    text: String,
    occurrences: Option<Regex>,
}

impl ContextScorer {
    pub fn new(rules: &[ContextRule], threshold: f64, fallback: CategoryId) -> Self {
        let categories = rules
            .iter()
            .map(|rule| CategoryEntry {
                category: rule.category,
                weight: rule.weight,
                keywords: rule
                    .keywords
                    .iter()
                    .map(|k| {
                        let text = k.to_lowercase();
                        let occurrences = RegexBuilder::new(&regex::escape(&text))
                            .case_insensitive(true)
                            .build()
                            .ok();
                        Keyword { text, occurrences }
                    })
                    .collect(),
                required: rule.required.iter().map(|k| k.to_lowercase()).collect(),
                excluded: rule.excluded.iter().map(|k| k.to_lowercase()).collect(),
            })
            .collect();

        Self {
            categories,
            threshold,
            fallback,
        }
    }

    /// Scores every category in the table, descending by score. Ties keep
    /// the table's declared category order (stable sort). Pure; no I/O.
    pub fn score(
        &self,
        merchant: &str,
        raw_text: Option<&str>,
        line_items: &[LineItem],
    ) -> Vec<CategoryScore> {
        let merchant_lc = merchant.to_lowercase();
        let items_lc: Vec<String> = line_items
            .iter()
            .map(|item| item.description.to_lowercase())
            .collect();
        let combined = format!(
            "{} {} {}",
            merchant_lc,
            raw_text.unwrap_or("").to_lowercase(),
            items_lc.join(" ")
        );

        let mut scores: Vec<CategoryScore> = self
            .categories
            .iter()
            .map(|entry| {
                let mut score = 0.0;

                for keyword in &entry.keywords {
                    if merchant_lc.contains(&keyword.text) {
                        score += MERCHANT_FACTOR * entry.weight;
                    }
                    if items_lc.iter().any(|item| item.contains(&keyword.text)) {
                        score += LINE_ITEM_FACTOR * entry.weight;
                    }
                    if let Some(regex) = &keyword.occurrences {
                        score += regex.find_iter(&combined).count() as f64 * entry.weight;
                    }
                }

                // Context adjustments, required check strictly before
                // excluded; both can hit the same category.
                if !entry.required.is_empty()
                    && !entry.required.iter().any(|k| combined.contains(k))
                {
                    score *= REQUIRED_MISSING_PENALTY;
                }
                if entry.excluded.iter().any(|k| combined.contains(k)) {
                    score *= EXCLUDED_PRESENT_PENALTY;
                }

                CategoryScore {
                    category: entry.category,
                    score,
                }
            })
            .collect();

        scores.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scores
    }

    /// Applies the decision rule: top score above the threshold wins,
    /// otherwise the fallback category is returned flagged `is_default`.
    pub fn pick(
        &self,
        merchant: &str,
        raw_text: Option<&str>,
        line_items: &[LineItem],
    ) -> ContextPick {
        let scores = self.score(merchant, raw_text, line_items);
        let top = scores.first().copied();

        match top {
            Some(best) if best.score > self.threshold => ContextPick {
                category: best.category,
                score: best.score,
                is_default: false,
            },
            _ => ContextPick {
                category: self.fallback,
                score: top.map(|s| s.score).unwrap_or(0.0),
                is_default: true,
            },
        }
    }
}
