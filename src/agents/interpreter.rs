// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Data interpreter: loading, schema inference and the LLM dataset summary

use minijinja::context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use super::{extract_json_block, render_prompt};
use crate::dataset::{ColumnKind, Dataset, OrderedMap};
use crate::llm::{ChatMessage, LlmRouter};
use crate::Result;

/// Structural overview produced before any analysis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetSummary {
    #[serde(default)]
    pub dataset_name: String,
    pub rows: usize,
    pub columns: usize,
    pub schema: OrderedMap<ColumnKind>,
    pub missing_values: OrderedMap<usize>,
    pub columns_list: Vec<String>,
    /// LLM description, when requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic: Option<SemanticSummary>,
}

/// What the LLM thinks the dataset is about
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SemanticSummary {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub key_entities: Vec<serde_json::Value>,
    #[serde(default)]
    pub potential_analyses: Vec<serde_json::Value>,
}

impl SemanticSummary {
    pub fn unavailable() -> Self {
        Self {
            description: "Could not generate summary.".to_string(),
            key_entities: Vec::new(),
            potential_analyses: Vec::new(),
        }
    }
}

pub struct DataInterpreter {
    llm: Arc<LlmRouter>,
    prompt: String,
}

impl DataInterpreter {
    pub fn new(llm: Arc<LlmRouter>, prompt: &str) -> Self {
        Self { llm, prompt: prompt.to_string() }
    }

    /// Load a CSV or spreadsheet
    pub fn load_data(&self, path: &Path) -> Result<Dataset> {
        Dataset::load(path).map_err(|e| {
            error!("Error loading data: {}", e);
            e
        })
    }

    pub fn infer_schema(&self, ds: &Dataset) -> OrderedMap<ColumnKind> {
        ds.infer_schema()
    }

    /// Load the file and describe its structure
    pub fn process(&self, path: &Path) -> Result<(Dataset, DatasetSummary)> {
        let ds = self.load_data(path)?;
        let summary = self.describe(&ds);
        Ok((ds, summary))
    }

    /// Structural summary of an already loaded dataset
    pub fn describe(&self, ds: &Dataset) -> DatasetSummary {
        DatasetSummary {
            dataset_name: ds.name().to_string(),
            rows: ds.rows(),
            columns: ds.columns().len(),
            schema: self.infer_schema(ds),
            missing_values: ds.missing_counts(),
            columns_list: ds.column_names(),
            semantic: None,
        }
    }

    /// Ask the LLM what the data represents. Never fails; unusable replies
    /// give the "Could not generate summary." placeholder.
    pub async fn summarize_dataset(&self, ds: &Dataset) -> SemanticSummary {
        match self.try_summarize(ds).await {
            Ok(summary) => summary,
            Err(e) => {
                error!("LLM summarization failed: {}", e);
                SemanticSummary::unavailable()
            }
        }
    }

    async fn try_summarize(&self, ds: &Dataset) -> Result<SemanticSummary> {
        let schema = serde_json::to_string_pretty(&self.infer_schema(ds))?;
        let prompt = render_prompt(
            &self.prompt,
            context! {
                schema => schema,
                preview => ds.head_markdown(5),
                stats => ds.describe_markdown(),
            },
        )?;

        let messages = [
            ChatMessage::system("You are a helpful Data Interpreter Agent."),
            ChatMessage::user(prompt),
        ];
        let reply = self.llm.invoke(&messages).await;
        info!("Dataset summary from {} ({})", reply.model, ds.name());

        let summary: SemanticSummary = serde_json::from_str(extract_json_block(&reply.content))?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::fixtures;
    use crate::llm::testing::{offline_router, router_with, ScriptedModel};

    fn interpreter(router: LlmRouter) -> DataInterpreter {
        DataInterpreter::new(Arc::new(router), &crate::config::PromptConfig::default().interpreter)
    }

    #[test]
    fn test_describe_lists_every_column() {
        let ds = fixtures::messy();
        let summary = interpreter(offline_router()).describe(&ds);
        assert_eq!(summary.rows, 5);
        assert_eq!(summary.columns, 4);
        assert_eq!(summary.missing_values.get("id"), Some(&0));
        assert_eq!(summary.missing_values.get("price"), Some(&1));
        assert_eq!(summary.columns_list, vec!["id", "name", "price", "mixed"]);
        assert_eq!(summary.schema.get("name"), Some(&ColumnKind::CategoricalText));
    }

    #[test]
    fn test_process_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();
        let (ds, summary) = interpreter(offline_router()).process(&path).unwrap();
        assert_eq!(ds.rows(), 1);
        assert_eq!(summary.dataset_name, "t.csv");
    }

    #[tokio::test]
    async fn test_summary_parses_fenced_json() {
        let reply = "```json\n{\"description\": \"Retail orders\", \"key_entities\": [\"Orders\"], \"potential_analyses\": [\"Trend\"]}\n```";
        let agent = interpreter(router_with(ScriptedModel::answering(reply)));
        let summary = agent.summarize_dataset(&fixtures::daily_sales()).await;
        assert_eq!(summary.description, "Retail orders");
        assert_eq!(summary.key_entities, vec![serde_json::json!("Orders")]);
    }

    #[tokio::test]
    async fn test_summary_falls_back_on_safe_mode() {
        let agent = interpreter(offline_router());
        let summary = agent.summarize_dataset(&fixtures::daily_sales()).await;
        assert_eq!(summary, SemanticSummary::unavailable());
    }
}
