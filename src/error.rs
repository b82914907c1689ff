// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for the BI Copilot

use thiserror::Error;

/// Result type alias for copilot operations
pub type Result<T> = std::result::Result<T, CopilotError>;

/// Copilot error types
#[derive(Error, Debug)]
pub enum CopilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("LLM provider unavailable: {0}")]
    LlmUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Report error: {0}")]
    Report(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend error ({status}): {detail}")]
    Remote { status: u16, detail: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
