// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Analysis agents
//!
//! Each agent owns one concern of the pipeline. Deterministic agents work on
//! a [`Dataset`] directly; the LLM-backed ones go through the shared
//! [`LlmRouter`].

pub mod forecasting;
pub mod interpreter;
pub mod quality;
pub mod report;
pub mod semantic;
pub mod sql;
pub mod statistics;
pub mod visualization;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::dataset::{Column, DType, Dataset};
use crate::llm::LlmRouter;
use crate::Result;

pub use forecasting::{ForecastOutcome, ForecastingAgent};
pub use interpreter::{DataInterpreter, DatasetSummary, SemanticSummary};
pub use quality::{DataQualityAgent, QualityReport};
pub use report::{ReportOutcome, ReportType, ReportWriter};
pub use semantic::{SemanticAnswer, SemanticQueryAgent};
pub use sql::{SqlAgent, SqlOutcome};
pub use statistics::{StatisticalAgent, StatisticsReport};
pub use visualization::{ChartSet, VisualizationAgent};

/// Everything a finished analysis produced
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResults {
    pub summary: Option<DatasetSummary>,
    pub data_quality: Option<QualityReport>,
    pub statistical_analysis: Option<StatisticsReport>,
    pub visualizations: Option<ChartSet>,
    pub forecast: Option<ForecastOutcome>,
    pub report: Option<ReportOutcome>,
}

impl AnalysisResults {
    /// Short findings handed to the semantic agent as context
    pub fn highlights(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        if let Some(summary) = &self.summary {
            if let Some(semantic) = &summary.semantic {
                out.insert("description".into(), semantic.description.clone().into());
            }
        }
        if let Some(q) = &self.data_quality {
            out.insert("quality_score".into(), q.quality_score.into());
            out.insert("inconsistencies".into(), serde_json::json!(q.inconsistencies));
        }
        if let Some(s) = &self.statistical_analysis {
            if let statistics::Correlations::Matrix { strong_correlations, .. } = &s.correlations {
                out.insert("strong_correlations".into(), serde_json::json!(strong_correlations));
            }
            out.insert(
                "outlier_columns".into(),
                serde_json::json!(s.outliers.keys().collect::<Vec<_>>()),
            );
        }
        if let Some(ForecastOutcome::Success(f)) = &self.forecast {
            out.insert("forecast_target".into(), f.target_column.clone().into());
            out.insert("forecast_metrics".into(), serde_json::json!(f.metrics));
        }
        serde_json::Value::Object(out)
    }
}

/// The full agent roster, built once per service
pub struct Agents {
    pub interpreter: DataInterpreter,
    pub quality: DataQualityAgent,
    pub statistics: StatisticalAgent,
    pub visualization: VisualizationAgent,
    pub forecasting: ForecastingAgent,
    pub sql: SqlAgent,
    pub semantic: SemanticQueryAgent,
    pub report: ReportWriter,
    pub llm_summary: bool,
}

impl Agents {
    pub fn new(config: &AppConfig, llm: Arc<LlmRouter>) -> Self {
        let analysis = &config.analysis;
        let storage = &config.storage;
        Self {
            interpreter: DataInterpreter::new(llm.clone(), &config.prompts.interpreter),
            quality: DataQualityAgent::new(),
            statistics: StatisticalAgent::new(
                analysis.strong_correlation_threshold,
                analysis.outlier_iqr_multiplier,
            ),
            visualization: VisualizationAgent::new(
                &storage.charts_dir,
                analysis.max_distribution_plots,
                analysis.max_categorical_plots,
                analysis.max_categories,
            ),
            forecasting: ForecastingAgent::new(&storage.forecasts_dir, analysis.forecast_periods),
            sql: SqlAgent::new(llm.clone(), &config.prompts.sql, analysis.sql_max_rows),
            semantic: SemanticQueryAgent::new(llm.clone(), &config.prompts.semantic),
            report: ReportWriter::new(llm, &config.prompts.report, &storage.reports_dir),
            llm_summary: analysis.llm_summary,
        }
    }
}

/// Render a prompt template with minijinja
pub fn render_prompt(template: &str, ctx: minijinja::Value) -> Result<String> {
    let env = minijinja::Environment::new();
    Ok(env.render_str(template, ctx)?)
}

/// Pull the JSON payload out of a reply that may wrap it in a code fence
pub fn extract_json_block(content: &str) -> &str {
    if let Some((_, rest)) = content.split_once("```json") {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    if let Some((_, rest)) = content.split_once("```") {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    content.trim()
}

/// Strip markdown fences from generated SQL
pub fn clean_sql(content: &str) -> String {
    content.replace("```sql", "").replace("```", "").trim().to_string()
}

/// First column named like a date (`date`/`time`) whose values parse as
/// timestamps, with the parsed values
pub fn find_date_column(ds: &Dataset) -> Option<(&Column, Vec<Option<NaiveDateTime>>)> {
    ds.columns().iter().find_map(|c| {
        let lower = c.name.to_lowercase();
        if !(lower.contains("date") || lower.contains("time")) {
            return None;
        }
        if c.dtype == DType::DateTime {
            let dates = c
                .values
                .iter()
                .map(|v| match v {
                    crate::dataset::Value::DateTime(dt) => Some(*dt),
                    _ => None,
                })
                .collect();
            return Some((c, dates));
        }
        c.parse_dates().map(|dates| (c, dates))
    })
}

/// File name component of a stored artifact path
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::dataset::Dataset;

    /// Three weeks of daily sales with a weekend bump
    pub fn daily_sales() -> Dataset {
        let mut csv = String::from("Order Date,Region,Sales,Qty,Unit Price\n");
        for day in 0..21u32 {
            let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                + chrono::Duration::days(day as i64);
            let weekend = if day % 7 >= 5 { 40.0 } else { 0.0 };
            let region = ["North", "South", "East"][(day % 3) as usize];
            let sales = 100.0 + 2.0 * day as f64 + weekend;
            csv.push_str(&format!(
                "{},{},{},{},{}\n",
                date.format("%Y-%m-%d"),
                region,
                sales,
                day + 1,
                9.5
            ));
        }
        Dataset::from_csv_reader("daily_sales.csv", csv.as_bytes()).unwrap()
    }

    /// Small table with missing values, a duplicate row and a negative price
    pub fn messy() -> Dataset {
        let csv = "id,name,price,mixed\n\
                   1,apple,1.5,a\n\
                   2,banana,,7\n\
                   3,cherry,-2.0,b\n\
                   3,cherry,-2.0,b\n\
                   5,,4.0,x\n";
        Dataset::from_csv_reader("messy.csv", csv.as_bytes()).unwrap()
    }
}
