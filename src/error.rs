//! Error types for the MedMind analyzer

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MedMindError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Invalid extraction pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Failed to extract text from PDF: {0}")]
    Pdf(String),

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Invalid reference data: {0}")]
    InvalidReferenceData(String),

    #[error("Test '{0}' not found")]
    UnknownTest(String),

    #[error("Invalid status in database: {0}")]
    InvalidStatus(String),
}
