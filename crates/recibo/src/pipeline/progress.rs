use std::sync::Arc;

use tokio::sync::broadcast;

use crate::broadcast::categorize_progress::{
    CategorizeEvent, CategorizePhase, CategorizeProgressTracker,
};

/// Events emitted by the orchestrator while categorizing one receipt.
pub enum ProgressEvent {
    Phase {
        phase: CategorizePhase,
        message: String,
    },
    Completed {
        category: String,
        confidence: f64,
        message: String,
    },
    NotCategorized {
        reason: String,
    },
    Failed {
        error: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests and one-shot CLI calls.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges orchestrator events to the broadcast channel.
pub struct BroadcastProgress {
    tracker: CategorizeProgressTracker,
}

impl BroadcastProgress {
    pub fn new(
        receipt_id: &str,
        merchant: &str,
        sender: Arc<broadcast::Sender<CategorizeEvent>>,
    ) -> Self {
        Self {
            tracker: CategorizeProgressTracker::new(receipt_id, merchant, sender),
        }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase { phase, message } => {
                self.tracker.update_phase(phase, &message);
            }
            ProgressEvent::Completed {
                category,
                confidence,
                message,
            } => {
                self.tracker.completed(&category, confidence, &message);
            }
            ProgressEvent::NotCategorized { reason } => {
                self.tracker.not_categorized(&reason);
            }
            ProgressEvent::Failed { error } => {
                self.tracker.failed(&error);
            }
        }
    }
}
