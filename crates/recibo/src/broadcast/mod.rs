//! Broadcast channels for streaming progress to subscribers.

pub mod categorize_progress;

pub use categorize_progress::{
    CategorizeEvent, CategorizePhase, CategorizeProgressBroadcaster, CategorizeProgressTracker,
    CategorizeStatus,
};
