// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Analysis orchestration
//!
//! A workflow is a fixed, linear list of stages sharing one
//! [`WorkflowState`]. Progress is reported to a [`ProgressObserver`] as each
//! stage starts; the first stage error stops the run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use crate::agents::{
    Agents, AnalysisResults, ChartSet, DatasetSummary, ForecastOutcome, QualityReport, ReportOutcome,
    ReportType, StatisticsReport,
};
use crate::dataset::Dataset;
use crate::{CopilotError, Result};

/// Which pipeline to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    #[default]
    Full,
    Quick,
}

impl AnalysisType {
    /// Unknown names fall back to the full pipeline
    pub fn from_param(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "quick" => AnalysisType::Quick,
            _ => AnalysisType::Full,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Full => "full",
            AnalysisType::Quick => "quick",
        }
    }
}

/// Everything the stages read and write
pub struct WorkflowState {
    pub task_id: String,
    pub file_path: PathBuf,
    pub report_type: ReportType,
    pub dataset: Option<Arc<Dataset>>,
    pub summary: Option<DatasetSummary>,
    pub quality_report: Option<QualityReport>,
    pub statistics: Option<StatisticsReport>,
    pub visualizations: Option<ChartSet>,
    pub forecast: Option<ForecastOutcome>,
    pub final_report: Option<ReportOutcome>,
}

impl WorkflowState {
    pub fn new(task_id: &str, file_path: &Path, report_type: ReportType) -> Self {
        Self {
            task_id: task_id.to_string(),
            file_path: file_path.to_path_buf(),
            report_type,
            dataset: None,
            summary: None,
            quality_report: None,
            statistics: None,
            visualizations: None,
            forecast: None,
            final_report: None,
        }
    }

    /// The loaded dataset; fails when the interpreter has not run
    pub fn dataset(&self) -> Result<Arc<Dataset>> {
        self.dataset
            .clone()
            .ok_or_else(|| CopilotError::Workflow("dataset not loaded".to_string()))
    }

    /// Snapshot of the results gathered so far
    pub fn results(&self) -> AnalysisResults {
        AnalysisResults {
            summary: self.summary.clone(),
            data_quality: self.quality_report.clone(),
            statistical_analysis: self.statistics.clone(),
            visualizations: self.visualizations.clone(),
            forecast: self.forecast.clone(),
            report: self.final_report.clone(),
        }
    }
}

/// One step of the pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable identifier
    fn name(&self) -> &'static str;

    /// Agent name shown to users while the stage runs
    fn label(&self) -> &'static str;

    async fn run(&self, agents: &Agents, state: &mut WorkflowState) -> Result<()>;
}

struct InterpretStage;
struct QualityStage;
struct StatisticsStage;
struct VisualizationStage;
struct ForecastStage;
struct ReportStage;

#[async_trait]
impl Stage for InterpretStage {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn label(&self) -> &'static str {
        "Data Interpreter"
    }

    async fn run(&self, agents: &Agents, state: &mut WorkflowState) -> Result<()> {
        let (ds, mut summary) = agents.interpreter.process(&state.file_path)?;
        if agents.llm_summary {
            summary.semantic = Some(agents.interpreter.summarize_dataset(&ds).await);
        }
        state.dataset = Some(Arc::new(ds));
        state.summary = Some(summary);
        Ok(())
    }
}

#[async_trait]
impl Stage for QualityStage {
    fn name(&self) -> &'static str {
        "quality"
    }

    fn label(&self) -> &'static str {
        "Data Quality Agent"
    }

    async fn run(&self, agents: &Agents, state: &mut WorkflowState) -> Result<()> {
        let ds = state.dataset()?;
        state.quality_report = Some(agents.quality.analyze_quality(&ds));
        Ok(())
    }
}

#[async_trait]
impl Stage for StatisticsStage {
    fn name(&self) -> &'static str {
        "statistics"
    }

    fn label(&self) -> &'static str {
        "Statistical Agent"
    }

    async fn run(&self, agents: &Agents, state: &mut WorkflowState) -> Result<()> {
        let ds = state.dataset()?;
        state.statistics = Some(agents.statistics.analyze(&ds));
        Ok(())
    }
}

#[async_trait]
impl Stage for VisualizationStage {
    fn name(&self) -> &'static str {
        "visualization"
    }

    fn label(&self) -> &'static str {
        "Visualization Agent"
    }

    async fn run(&self, agents: &Agents, state: &mut WorkflowState) -> Result<()> {
        let ds = state.dataset()?;
        state.visualizations = Some(agents.visualization.create_visualizations(&state.task_id, &ds)?);
        Ok(())
    }
}

#[async_trait]
impl Stage for ForecastStage {
    fn name(&self) -> &'static str {
        "forecast"
    }

    fn label(&self) -> &'static str {
        "Forecasting Agent"
    }

    async fn run(&self, agents: &Agents, state: &mut WorkflowState) -> Result<()> {
        let ds = state.dataset()?;
        state.forecast = Some(agents.forecasting.run_forecast(&state.task_id, &ds));
        Ok(())
    }
}

#[async_trait]
impl Stage for ReportStage {
    fn name(&self) -> &'static str {
        "report"
    }

    fn label(&self) -> &'static str {
        "Report Writer"
    }

    async fn run(&self, agents: &Agents, state: &mut WorkflowState) -> Result<()> {
        let results = state.results();
        let report = agents
            .report
            .generate_report(&state.task_id, &results, state.report_type)
            .await?;
        state.final_report = Some(report);
        Ok(())
    }
}

/// Receives progress as a workflow runs
pub trait ProgressObserver: Send + Sync {
    /// A stage is starting; `progress` is the completed fraction
    fn on_stage(&self, task_id: &str, stage: &str, progress: f64);

    fn on_complete(&self, task_id: &str, results: &AnalysisResults);

    fn on_failure(&self, task_id: &str, error: &str);
}

/// Observer that only logs
pub struct LogObserver;

impl ProgressObserver for LogObserver {
    fn on_stage(&self, task_id: &str, stage: &str, progress: f64) {
        info!("[{}] {} ({:.0}%)", task_id, stage, progress * 100.0);
    }

    fn on_complete(&self, task_id: &str, _results: &AnalysisResults) {
        info!("[{}] Analysis completed", task_id);
    }

    fn on_failure(&self, task_id: &str, error: &str) {
        error!("[{}] Analysis failed: {}", task_id, error);
    }
}

pub struct Workflow {
    analysis_type: AnalysisType,
    stages: Vec<Box<dyn Stage>>,
}

impl Workflow {
    pub fn for_analysis(analysis_type: AnalysisType) -> Self {
        let stages: Vec<Box<dyn Stage>> = match analysis_type {
            AnalysisType::Full => vec![
                Box::new(InterpretStage),
                Box::new(QualityStage),
                Box::new(StatisticsStage),
                Box::new(VisualizationStage),
                Box::new(ForecastStage),
                Box::new(ReportStage),
            ],
            AnalysisType::Quick => vec![
                Box::new(InterpretStage),
                Box::new(QualityStage),
                Box::new(StatisticsStage),
                Box::new(ReportStage),
            ],
        };
        Self { analysis_type, stages }
    }

    pub fn analysis_type(&self) -> AnalysisType {
        self.analysis_type
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order
    pub async fn run(
        &self,
        agents: &Agents,
        mut state: WorkflowState,
        observer: &dyn ProgressObserver,
    ) -> Result<AnalysisResults> {
        let total = self.stages.len() as f64;
        info!(
            "Starting {} analysis for task {} ({})",
            self.analysis_type.as_str(),
            state.task_id,
            state.file_path.display()
        );

        for (done, stage) in self.stages.iter().enumerate() {
            observer.on_stage(&state.task_id, stage.label(), done as f64 / total);
            if let Err(e) = stage.run(agents, &mut state).await {
                let message = e.to_string();
                error!("Stage {} failed for {}: {}", stage.name(), state.task_id, message);
                observer.on_failure(&state.task_id, &message);
                return Err(e);
            }
        }

        let results = state.results();
        observer.on_complete(&state.task_id, &results);
        Ok(results)
    }
}
