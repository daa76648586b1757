pub mod error;
pub mod orchestrator;
pub mod outcome;
pub mod progress;

pub use error::CategorizeError;
pub use orchestrator::Orchestrator;
pub use outcome::{CategorizeOutcome, StageTrace};
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
