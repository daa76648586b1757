use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReciboError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Categorization error: {0}")]
    Categorize(#[from] crate::pipeline::CategorizeError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid merchant pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid vendor rule '{fragment}': {reason}")]
    InvalidVendor { fragment: String, reason: String },

    #[error("Invalid context rule for '{category}': {reason}")]
    InvalidContextRule { category: String, reason: String },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Queue drain failed: {0}")]
    DrainFailed(String),
}

pub type Result<T> = std::result::Result<T, ReciboError>;
