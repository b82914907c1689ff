// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! BI Copilot: AI Business Intelligence Copilot
//!
//! Upload a CSV or spreadsheet and a fixed pipeline of agents profiles it,
//! checks its quality, computes statistics, draws charts, forecasts the
//! main time series and writes a report. SQL and natural-language questions
//! are answered on demand through a chain of LLM providers.

pub mod agents;
pub mod charts;
pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod llm;
pub mod supervisor;
pub mod ui;
pub mod web;
pub mod workflow;

pub use config::AppConfig;
pub use error::{CopilotError, Result};
