use thiserror::Error;

#[derive(Error, Debug)]
pub enum CategorizeError {
    /// No receipt with the given id exists.
    #[error("Receipt not found: {0}")]
    ReceiptNotFound(String),

    /// The receipt is not in `ocr_done` status. Contract error: the caller
    /// invoked categorization too early (or on a failed receipt), so fail
    /// fast instead of guessing.
    #[error("Receipt {id} is in status '{status}', expected 'ocr_done'")]
    InvalidStatus { id: String, status: String },

    /// Persistence failure. Retryable; no partial state was written.
    #[error("Persistence failed: {0}")]
    Database(#[from] crate::db::DatabaseError),
}
