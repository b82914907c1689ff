// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Free-form business questions answered from a dataset preview

use minijinja::context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use super::render_prompt;
use crate::dataset::Dataset;
use crate::llm::{ChatMessage, LlmRouter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SemanticAnswer {
    Success { query: String, answer: String },
    Failed { error: String },
}

pub struct SemanticQueryAgent {
    llm: Arc<LlmRouter>,
    prompt: String,
}

impl SemanticQueryAgent {
    pub fn new(llm: Arc<LlmRouter>, prompt: &str) -> Self {
        Self { llm, prompt: prompt.to_string() }
    }

    pub async fn answer_query(
        &self,
        ds: &Dataset,
        query: &str,
        context: Option<&serde_json::Value>,
    ) -> SemanticAnswer {
        let context_text = match context {
            Some(value) => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
            None => "None".to_string(),
        };

        let prompt = match render_prompt(
            &self.prompt,
            context! {
                query => query,
                preview => ds.head_markdown(5),
                stats => ds.describe_all_markdown(),
                context => context_text,
            },
        ) {
            Ok(p) => p,
            Err(e) => {
                error!("Semantic query failed: {}", e);
                return SemanticAnswer::Failed { error: e.to_string() };
            }
        };

        let reply = self.llm.invoke(&[ChatMessage::user(prompt)]).await;
        info!("Answered semantic query with {}", reply.model);
        SemanticAnswer::Success {
            query: query.to_string(),
            answer: reply.content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::fixtures;
    use crate::llm::testing::{offline_router, router_with, ScriptedModel};
    use crate::llm::SAFE_MODE_NOTICE;
    use serde_json::json;

    fn agent(router: LlmRouter, prompt: &str) -> SemanticQueryAgent {
        SemanticQueryAgent::new(Arc::new(router), prompt)
    }

    #[tokio::test]
    async fn test_answer_success_shape() {
        let prompt = crate::config::PromptConfig::default().semantic;
        let a = agent(router_with(ScriptedModel::answering("Sales peak on weekends.")), &prompt);
        let answer = a.answer_query(&fixtures::daily_sales(), "When do sales peak?", None).await;
        assert_eq!(
            serde_json::to_value(answer).unwrap(),
            json!({"status": "success", "query": "When do sales peak?", "answer": "Sales peak on weekends."})
        );
    }

    #[tokio::test]
    async fn test_safe_mode_still_answers() {
        let prompt = crate::config::PromptConfig::default().semantic;
        let answer = agent(offline_router(), &prompt)
            .answer_query(&fixtures::messy(), "why?", Some(&json!({"quality_score": 55.0})))
            .await;
        match answer {
            SemanticAnswer::Success { answer, .. } => assert_eq!(answer, SAFE_MODE_NOTICE),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broken_template_fails() {
        let answer = agent(offline_router(), "{{ query ")
            .answer_query(&fixtures::messy(), "q", None)
            .await;
        let json = serde_json::to_value(answer).unwrap();
        assert_eq!(json["status"], "failed");
        assert!(json["error"].as_str().is_some());
    }
}
