//! Three-stage categorization driver.
//!
//! Runs Rule Engine, Context Scorer, and Model Fallback strictly in order,
//! short-circuiting on the first accepted result. Every stage attempted
//! writes one prediction row, winners and non-winners alike. Model calls
//! are the most expensive, so later stages never run once an earlier one
//! succeeds.

use std::sync::Arc;

use tracing::{debug, info_span, warn};

use crate::broadcast::categorize_progress::CategorizePhase;
use crate::classify::{
    ContextScorer, HttpModelClassifier, ModelClassifier, ReceiptSummary, RuleEngine,
    UnconfiguredClassifier,
};
use crate::config::{Config, ModelConfig};
use crate::db::{prediction_repo, receipt_repo, Database};
use crate::error::ConfigError;
use crate::receipt::{Method, Prediction, Receipt, ReceiptStatus};
use crate::taxonomy::CategoryId;

use super::error::CategorizeError;
use super::outcome::{CategorizeOutcome, StageTrace};
use super::progress::{ProgressEvent, ProgressReporter};

pub struct Orchestrator {
    db: Database,
    rules: RuleEngine,
    scorer: ContextScorer,
    model: Arc<dyn ModelClassifier>,
    model_config: ModelConfig,
}

impl Orchestrator {
    /// Production constructor. Builds the rule tables and scorer from
    /// config; the model classifier is the HTTP adapter when an endpoint
    /// is configured, otherwise a stand-in that always fails upstream.
    pub fn from_config(db: Database, config: &Config) -> Result<Self, ConfigError> {
        let model: Arc<dyn ModelClassifier> = match &config.policy.model.endpoint {
            Some(endpoint) => Arc::new(HttpModelClassifier::new(
                &config.policy.model,
                endpoint.clone(),
            )?),
            None => Arc::new(UnconfiguredClassifier),
        };

        Ok(Self::with_classifier(db, config, model))
    }

    /// Constructor with an injected model classifier, used by tests and by
    /// callers that bring their own adapter.
    pub fn with_classifier(
        db: Database,
        config: &Config,
        model: Arc<dyn ModelClassifier>,
    ) -> Self {
        let rules = RuleEngine::new(&config.vendors, &config.merchant_patterns);
        let scorer = ContextScorer::new(
            &config.context_rules,
            config.policy.score_threshold,
            config.policy.fallback_category,
        );

        Self {
            db,
            rules,
            scorer,
            model,
            model_config: config.policy.model.clone(),
        }
    }

    /// Categorizes one receipt. Safe to call redundantly: an already
    /// categorized receipt returns its existing assignment without rerunning
    /// any stage. A receipt that exhausts all three stages stays `ocr_done`
    /// and the outcome carries the failure reason; only contract errors and
    /// persistence failures surface as `Err`.
    pub fn categorize(
        &self,
        receipt_id: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<CategorizeOutcome, CategorizeError> {
        let _span = info_span!("categorize", receipt_id = %receipt_id).entered();

        match self.run_stages(receipt_id, progress) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("Categorization attempt for {} failed: {}", receipt_id, e);
                progress.report(ProgressEvent::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn run_stages(
        &self,
        receipt_id: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<CategorizeOutcome, CategorizeError> {
        let receipt = receipt_repo::find_by_id(&self.db, receipt_id)?
            .ok_or_else(|| CategorizeError::ReceiptNotFound(receipt_id.to_string()))?;

        match receipt.status {
            ReceiptStatus::Categorized => return Ok(already_categorized(&receipt)),
            ReceiptStatus::OcrDone => {}
            other => {
                return Err(CategorizeError::InvalidStatus {
                    id: receipt_id.to_string(),
                    status: other.to_string(),
                })
            }
        }

        let mut trace = Vec::new();

        // Stage 1: rule engine. A hit is trusted as ground truth and
        // accepted regardless of its confidence value.
        {
            let _stage = info_span!("rule_stage").entered();
            progress.report(ProgressEvent::Phase {
                phase: CategorizePhase::RuleStage,
                message: "Matching vendor rules".to_string(),
            });

            if let Some(hit) = self.rules.classify(&receipt.merchant) {
                debug!("Rule match: {} ({})", hit.category, hit.confidence);
                let details = format!("matched merchant '{}'", receipt.merchant);
                self.record(&receipt, Method::Rule, Some(hit.category), Some(hit.confidence), &details)?;
                trace.push(StageTrace {
                    stage: Method::Rule,
                    outcome: details,
                    category_id: Some(hit.category),
                    confidence: Some(hit.confidence),
                    accepted: true,
                });
                return self.accept(&receipt, hit.category, hit.confidence, Method::Rule, trace, progress);
            }

            let details = "no vendor or keyword pattern match".to_string();
            self.record(&receipt, Method::Rule, None, None, &details)?;
            trace.push(StageTrace {
                stage: Method::Rule,
                outcome: details,
                category_id: None,
                confidence: None,
                accepted: false,
            });
        }

        // Stage 2: context scorer. Only a non-default pick above the
        // threshold is accepted; the low-confidence fallback falls through
        // to the model.
        {
            let _stage = info_span!("context_stage").entered();
            progress.report(ProgressEvent::Phase {
                phase: CategorizePhase::ContextStage,
                message: "Scoring context keywords".to_string(),
            });

            let pick = self.scorer.pick(
                &receipt.merchant,
                receipt.raw_text.as_deref(),
                &receipt.line_items,
            );

            if !pick.is_default {
                debug!("Context pick: {} (score {:.2})", pick.category, pick.score);
                let confidence = clamp_confidence(pick.score);
                let details = format!("top score {:.2} above threshold", pick.score);
                self.record(&receipt, Method::Heuristic, Some(pick.category), Some(confidence), &details)?;
                trace.push(StageTrace {
                    stage: Method::Heuristic,
                    outcome: details,
                    category_id: Some(pick.category),
                    confidence: Some(confidence),
                    accepted: true,
                });
                return self.accept(&receipt, pick.category, confidence, Method::Heuristic, trace, progress);
            }

            let details = format!(
                "top score {:.2} at or below threshold; fallback '{}' not accepted",
                pick.score, pick.category
            );
            self.record(&receipt, Method::Heuristic, None, None, &details)?;
            trace.push(StageTrace {
                stage: Method::Heuristic,
                outcome: details,
                category_id: None,
                confidence: None,
                accepted: false,
            });
        }

        // Stage 3: model fallback. The only stage allowed to block on the
        // network; no database lock is held across the call.
        let _stage = info_span!("model_stage").entered();
        progress.report(ProgressEvent::Phase {
            phase: CategorizePhase::ModelStage,
            message: format!("Asking model '{}'", self.model_config.model),
        });

        let summary = ReceiptSummary::from_receipt(&receipt, &self.model_config);

        match self.model.classify(&summary) {
            Ok(verdict) => {
                debug!("Model verdict: {} ({})", verdict.category, verdict.confidence);
                let details = "model verdict accepted".to_string();
                self.record(&receipt, Method::Model, Some(verdict.category), Some(verdict.confidence), &details)?;
                trace.push(StageTrace {
                    stage: Method::Model,
                    outcome: details,
                    category_id: Some(verdict.category),
                    confidence: Some(verdict.confidence),
                    accepted: true,
                });
                self.accept(&receipt, verdict.category, verdict.confidence, Method::Model, trace, progress)
            }
            Err(failure) => {
                // A model failure on a receipt with nothing to classify is
                // an input problem, not a model problem.
                let reason = if summary.is_empty() {
                    "insufficient_data"
                } else {
                    failure.reason_code()
                };
                let details = format!("{}: {}", reason, failure);
                self.record(&receipt, Method::Model, None, None, &details)?;
                trace.push(StageTrace {
                    stage: Method::Model,
                    outcome: details,
                    category_id: None,
                    confidence: None,
                    accepted: false,
                });

                debug!("Receipt {} not categorized: {}", receipt.id, reason);
                progress.report(ProgressEvent::NotCategorized {
                    reason: reason.to_string(),
                });
                Ok(CategorizeOutcome::not_categorized(&receipt.id, reason, trace))
            }
        }
    }

    fn record(
        &self,
        receipt: &Receipt,
        method: Method,
        category: Option<CategoryId>,
        confidence: Option<f64>,
        details: &str,
    ) -> Result<(), CategorizeError> {
        let prediction = Prediction::new(
            &receipt.id,
            method,
            category,
            confidence.map(clamp_confidence),
            details.to_string(),
        );
        prediction_repo::insert(&self.db, &prediction)?;
        Ok(())
    }

    /// Persists the winning stage's result. Status and category fields move
    /// together behind an `ocr_done` guard; when the guard misses, a
    /// concurrent call already assigned a category and that assignment is
    /// reported instead.
    fn accept(
        &self,
        receipt: &Receipt,
        category: CategoryId,
        confidence: f64,
        method: Method,
        trace: Vec<StageTrace>,
        progress: &dyn ProgressReporter,
    ) -> Result<CategorizeOutcome, CategorizeError> {
        let confidence = clamp_confidence(confidence);

        progress.report(ProgressEvent::Phase {
            phase: CategorizePhase::Persisting,
            message: "Persisting result".to_string(),
        });

        let now = chrono::Utc::now().to_rfc3339();
        let won = receipt_repo::assign_category(&self.db, &receipt.id, category, confidence, method, &now)?;

        if !won {
            let current = receipt_repo::find_by_id(&self.db, &receipt.id)?
                .ok_or_else(|| CategorizeError::ReceiptNotFound(receipt.id.clone()))?;
            if current.status == ReceiptStatus::Categorized {
                debug!("Receipt {} was categorized concurrently", receipt.id);
                let mut outcome = already_categorized(&current);
                outcome.trace = trace;
                return Ok(outcome);
            }
            // Guard missed but the receipt is not categorized: it moved to
            // another status underneath us. Retryable from the queue.
            return Ok(CategorizeOutcome::not_categorized(&receipt.id, "conflict", trace));
        }

        progress.report(ProgressEvent::Completed {
            category: category.name().to_string(),
            confidence,
            message: format!("Categorized via {}", method),
        });

        Ok(CategorizeOutcome::assigned(&receipt.id, category, confidence, method, trace))
    }
}

fn already_categorized(receipt: &Receipt) -> CategorizeOutcome {
    CategorizeOutcome {
        receipt_id: receipt.id.clone(),
        ok: true,
        category: receipt.category_id.map(|c| c.name().to_string()),
        category_id: receipt.category_id,
        confidence: receipt.category_confidence,
        method: receipt.category_method,
        reason: None,
        already_categorized: true,
        trace: Vec::new(),
    }
}

/// All persisted confidences lie in [0, 1], whatever a stage produced.
fn clamp_confidence(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
