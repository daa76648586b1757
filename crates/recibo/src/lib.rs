pub mod broadcast;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod receipt;
pub mod taxonomy;
pub mod worker;

pub use broadcast::CategorizeProgressBroadcaster;
pub use classify::{ContextScorer, ModelClassifier, RuleEngine};
pub use config::{builtin_config, load_config, Config};
pub use db::Database;
pub use error::{ConfigError, ReciboError, Result, WorkerError};
pub use pipeline::{CategorizeError, CategorizeOutcome, Orchestrator};
pub use receipt::{LineItem, Method, Prediction, Receipt, ReceiptStatus};
pub use taxonomy::CategoryId;
pub use worker::{drain_queue, DrainStats, WorkerPool};
