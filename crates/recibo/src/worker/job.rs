use crate::db::queue_repo::QueueEntry;
use crate::pipeline::CategorizeOutcome;
use crate::receipt::Method;
use crate::taxonomy::CategoryId;

/// One categorization unit of work handed to the pool.
#[derive(Debug, Clone)]
pub struct QueueJob {
    pub queue_id: i64,
    pub receipt_id: String,
    pub attempts: u32,
}

impl QueueJob {
    pub fn from_entry(entry: &QueueEntry) -> Self {
        Self {
            queue_id: entry.id,
            receipt_id: entry.receipt_id.clone(),
            attempts: entry.attempts,
        }
    }
}

/// How a worker's attempt at one job ended.
#[derive(Debug, Clone)]
pub enum Disposition {
    Categorized {
        category: CategoryId,
        confidence: f64,
        method: Method,
    },
    /// Redundant delivery; the receipt already had a category.
    AlreadyCategorized,
    /// All stages exhausted. Retryable from the queue until the attempt
    /// budget runs out.
    NotCategorized { reason: String },
    /// Contract or persistence error. Also retryable.
    Error { error: String },
}

#[derive(Debug)]
pub struct JobResult {
    pub queue_id: i64,
    pub receipt_id: String,
    pub disposition: Disposition,
}

impl JobResult {
    pub fn from_outcome(job: &QueueJob, outcome: &CategorizeOutcome) -> Self {
        let disposition = if outcome.already_categorized {
            Disposition::AlreadyCategorized
        } else if outcome.ok {
            match (outcome.category_id, outcome.confidence, outcome.method) {
                (Some(category), Some(confidence), Some(method)) => Disposition::Categorized {
                    category,
                    confidence,
                    method,
                },
                // An ok outcome always carries these; treat anything else
                // as a retryable inconsistency.
                _ => Disposition::Error {
                    error: "categorize returned ok without category fields".to_string(),
                },
            }
        } else {
            Disposition::NotCategorized {
                reason: outcome
                    .reason
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            }
        };

        Self {
            queue_id: job.queue_id,
            receipt_id: job.receipt_id.clone(),
            disposition,
        }
    }

    pub fn error(job: &QueueJob, error: String) -> Self {
        Self {
            queue_id: job.queue_id,
            receipt_id: job.receipt_id.clone(),
            disposition: Disposition::Error { error },
        }
    }
}
