pub mod context;
pub mod model;
pub mod rules;

pub use context::{CategoryScore, ContextPick, ContextScorer};
pub use model::{
    ClassificationFailure, HttpModelClassifier, ModelClassifier, ModelVerdict, ReceiptSummary,
    UnconfiguredClassifier,
};
pub use rules::{RuleEngine, RuleMatch};
