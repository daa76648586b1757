//! Categorization progress broadcaster for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Phase of receipt categorization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CategorizePhase {
    Queued,
    RuleStage,
    ContextStage,
    ModelStage,
    Persisting,
    Completed,
    NotCategorized,
    Failed,
}

impl std::fmt::Display for CategorizePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CategorizePhase::Queued => write!(f, "Queued"),
            CategorizePhase::RuleStage => write!(f, "Matching vendor rules"),
            CategorizePhase::ContextStage => write!(f, "Scoring context keywords"),
            CategorizePhase::ModelStage => write!(f, "Asking model"),
            CategorizePhase::Persisting => write!(f, "Persisting result"),
            CategorizePhase::Completed => write!(f, "Categorized"),
            CategorizePhase::NotCategorized => write!(f, "Not categorized"),
            CategorizePhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Terminal-or-not status of a categorization attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CategorizeStatus {
    Running,
    Completed,
    NotCategorized,
    Failed,
}

/// Progress event for one categorization attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizeEvent {
    /// Receipt being categorized.
    pub receipt_id: String,
    /// Merchant name, for display.
    pub merchant: String,
    /// Current phase.
    pub phase: CategorizePhase,
    /// Overall attempt status.
    pub status: CategorizeStatus,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Timestamp of this event.
    pub timestamp: DateTime<Utc>,
    /// Assigned category display name (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Confidence of the assignment (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Reason code when the receipt stays uncategorized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CategorizeEvent {
    /// Creates a new progress event.
    pub fn new(receipt_id: &str, merchant: &str, phase: CategorizePhase, message: &str) -> Self {
        let status = match phase {
            CategorizePhase::Completed => CategorizeStatus::Completed,
            CategorizePhase::NotCategorized => CategorizeStatus::NotCategorized,
            CategorizePhase::Failed => CategorizeStatus::Failed,
            _ => CategorizeStatus::Running,
        };

        Self {
            receipt_id: receipt_id.to_string(),
            merchant: merchant.to_string(),
            phase,
            status,
            message: message.to_string(),
            timestamp: Utc::now(),
            category: None,
            confidence: None,
            reason: None,
            error: None,
        }
    }
}

/// Broadcasts categorization progress events for streaming.
#[derive(Clone)]
pub struct CategorizeProgressBroadcaster {
    sender: Arc<broadcast::Sender<CategorizeEvent>>,
}

impl CategorizeProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: CategorizeEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<CategorizeEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker for one receipt and emits the initial queued event.
    pub fn start(&self, receipt_id: &str, merchant: &str) -> CategorizeProgressTracker {
        let tracker =
            CategorizeProgressTracker::new(receipt_id, merchant, Arc::clone(&self.sender));
        tracker.update_phase(CategorizePhase::Queued, "Queued for categorization");
        tracker
    }

    /// Gets the inner sender for creating trackers.
    pub fn sender(&self) -> Arc<broadcast::Sender<CategorizeEvent>> {
        Arc::clone(&self.sender)
    }
}

impl Default for CategorizeProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Tracks progress for a single receipt's categorization attempt.
pub struct CategorizeProgressTracker {
    receipt_id: String,
    merchant: String,
    sender: Arc<broadcast::Sender<CategorizeEvent>>,
}

impl CategorizeProgressTracker {
    pub fn new(
        receipt_id: &str,
        merchant: &str,
        sender: Arc<broadcast::Sender<CategorizeEvent>>,
    ) -> Self {
        Self {
            receipt_id: receipt_id.to_string(),
            merchant: merchant.to_string(),
            sender,
        }
    }

    /// Updates the current phase with a message.
    pub fn update_phase(&self, phase: CategorizePhase, message: &str) {
        let event = CategorizeEvent::new(&self.receipt_id, &self.merchant, phase, message);
        let _ = self.sender.send(event);
    }

    /// Marks the attempt as completed with the assigned category.
    pub fn completed(&self, category: &str, confidence: f64, message: &str) {
        let mut event = CategorizeEvent::new(
            &self.receipt_id,
            &self.merchant,
            CategorizePhase::Completed,
            message,
        );
        event.category = Some(category.to_string());
        event.confidence = Some(confidence);
        let _ = self.sender.send(event);
    }

    /// Marks the attempt as exhausted without a category.
    pub fn not_categorized(&self, reason: &str) {
        let mut event = CategorizeEvent::new(
            &self.receipt_id,
            &self.merchant,
            CategorizePhase::NotCategorized,
            "All stages exhausted without a category",
        );
        event.reason = Some(reason.to_string());
        let _ = self.sender.send(event);
    }

    /// Marks the attempt as failed with an error message.
    pub fn failed(&self, error: &str) {
        let mut event = CategorizeEvent::new(
            &self.receipt_id,
            &self.merchant,
            CategorizePhase::Failed,
            "Categorization attempt failed",
        );
        event.error = Some(error.to_string());
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcaster_send_receive() {
        let broadcaster = CategorizeProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        let event =
            CategorizeEvent::new("r-1", "Shell", CategorizePhase::RuleStage, "Matching rules");
        broadcaster.send(event);

        let received = rx.try_recv().unwrap();
        assert_eq!(received.receipt_id, "r-1");
        assert_eq!(received.phase, CategorizePhase::RuleStage);
        assert_eq!(received.status, CategorizeStatus::Running);
    }

    #[test]
    fn test_start_emits_queued_event() {
        let broadcaster = CategorizeProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        let tracker = broadcaster.start("r-2", "Shell Gas Station");

        let received = rx.try_recv().unwrap();
        assert_eq!(received.phase, CategorizePhase::Queued);

        tracker.update_phase(CategorizePhase::ContextStage, "Scoring keywords");
        let received = rx.try_recv().unwrap();
        assert_eq!(received.phase, CategorizePhase::ContextStage);
        assert_eq!(received.message, "Scoring keywords");
    }

    #[test]
    fn test_completion_carries_category() {
        let broadcaster = CategorizeProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        let tracker = broadcaster.start("r-3", "Shell");
        let _ = rx.try_recv();

        tracker.completed("Car and Truck Expenses", 0.95, "Matched vendor rule");

        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, CategorizeStatus::Completed);
        assert_eq!(received.category.as_deref(), Some("Car and Truck Expenses"));
        assert_eq!(received.confidence, Some(0.95));
    }

    #[test]
    fn test_not_categorized_carries_reason() {
        let broadcaster = CategorizeProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        let tracker = broadcaster.start("r-4", "Mystery Store");
        let _ = rx.try_recv();

        tracker.not_categorized("timeout");

        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, CategorizeStatus::NotCategorized);
        assert_eq!(received.reason.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_failure_carries_error() {
        let broadcaster = CategorizeProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        let tracker = broadcaster.start("r-5", "Shell");
        let _ = rx.try_recv();

        tracker.failed("database write failed");

        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, CategorizeStatus::Failed);
        assert_eq!(received.error.as_deref(), Some("database write failed"));
    }
}
