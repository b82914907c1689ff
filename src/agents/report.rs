// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Report writer
//!
//! Turns [`AnalysisResults`] into a markdown report and, on request, a PDF
//! rendering of the same text. The executive summary comes from the LLM when
//! one answers and is otherwise assembled from the results themselves.

use chrono::Utc;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use minijinja::context;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::forecasting::ForecastOutcome;
use super::statistics::Correlations;
use super::visualization::chart_title;
use super::{render_prompt, AnalysisResults};
use crate::dataset::markdown_table;
use crate::dataset::stats::fmt_num;
use crate::llm::{ChatMessage, LlmRouter};
use crate::{CopilotError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    #[default]
    Pdf,
    Markdown,
}

impl ReportType {
    /// Query-parameter spelling; anything that is not markdown means pdf
    pub fn from_param(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "markdown" | "md" => ReportType::Markdown,
            _ => ReportType::Pdf,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Pdf => "pdf",
            ReportType::Markdown => "markdown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportOutcome {
    pub status: String,
    pub report_type: ReportType,
    pub markdown_path: String,
    #[serde(default)]
    pub pdf_path: Option<String>,
    pub executive_summary: String,
}

impl ReportOutcome {
    /// The file users should download: the PDF when there is one
    pub fn primary_path(&self) -> &str {
        self.pdf_path.as_deref().unwrap_or(&self.markdown_path)
    }
}

const NOT_RUN: &str = "_Not run for this analysis._";

pub struct ReportWriter {
    llm: Arc<LlmRouter>,
    prompt: String,
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(llm: Arc<LlmRouter>, prompt: &str, output_dir: &Path) -> Self {
        Self {
            llm,
            prompt: prompt.to_string(),
            output_dir: output_dir.to_path_buf(),
        }
    }

    pub async fn generate_report(
        &self,
        task_id: &str,
        results: &AnalysisResults,
        report_type: ReportType,
    ) -> Result<ReportOutcome> {
        info!("Generating {} report for {}", report_type.as_str(), task_id);
        std::fs::create_dir_all(&self.output_dir)?;

        let executive_summary = self.executive_summary(results).await;
        let markdown = render_markdown(results, &executive_summary);

        let markdown_path = self.output_dir.join(format!("{}_report.md", task_id));
        std::fs::write(&markdown_path, &markdown)?;

        let pdf_path = match report_type {
            ReportType::Pdf => {
                let path = self.output_dir.join(format!("{}_report.pdf", task_id));
                write_pdf(&path, &markdown)?;
                Some(path.to_string_lossy().into_owned())
            }
            ReportType::Markdown => None,
        };

        Ok(ReportOutcome {
            status: "success".to_string(),
            report_type,
            markdown_path: markdown_path.to_string_lossy().into_owned(),
            pdf_path,
            executive_summary,
        })
    }

    async fn executive_summary(&self, results: &AnalysisResults) -> String {
        let mut digest = results.highlights();
        if let (Some(summary), Some(obj)) = (&results.summary, digest.as_object_mut()) {
            obj.insert("rows".into(), summary.rows.into());
            obj.insert("columns".into(), summary.columns.into());
        }
        let results_json = serde_json::to_string_pretty(&digest).unwrap_or_default();

        let prompt = match render_prompt(
            &self.prompt,
            context! { dataset => dataset_name(results), results => results_json },
        ) {
            Ok(p) => p,
            Err(e) => {
                warn!("Report prompt failed to render: {}", e);
                return fallback_summary(results);
            }
        };

        let reply = self.llm.invoke(&[ChatMessage::user(prompt)]).await;
        let text = reply.content.trim();
        if reply.is_safe_mode() || text.is_empty() {
            warn!("Using generated executive summary; no LLM answer available");
            return fallback_summary(results);
        }
        text.to_string()
    }
}

fn dataset_name(results: &AnalysisResults) -> &str {
    results
        .summary
        .as_ref()
        .map(|s| s.dataset_name.as_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("dataset")
}

/// Summary assembled from the results alone
pub fn fallback_summary(results: &AnalysisResults) -> String {
    let mut parts = Vec::new();

    if let Some(summary) = &results.summary {
        parts.push(format!(
            "The dataset {} contains {} rows across {} columns.",
            dataset_name(results),
            summary.rows,
            summary.columns
        ));
    }
    if let Some(q) = &results.data_quality {
        let issues = q.inconsistencies.len();
        parts.push(format!(
            "Its data quality score is {}/100 with {} missing values, {} duplicate rows and {} consistency issue{}.",
            fmt_num(q.quality_score),
            q.missing_values.total_missing,
            q.duplicates.count,
            issues,
            if issues == 1 { "" } else { "s" }
        ));
    }
    if let Some(s) = &results.statistical_analysis {
        if let Correlations::Matrix { strong_correlations, .. } = &s.correlations {
            if let Some(top) = strong_correlations.first() {
                parts.push(format!(
                    "{} strong correlation{} found, for example {} and {} (r = {}).",
                    strong_correlations.len(),
                    if strong_correlations.len() == 1 { " was" } else { "s were" },
                    top.col1,
                    top.col2,
                    fmt_num(top.correlation)
                ));
            }
        }
        if !s.outliers.is_empty() {
            let cols: Vec<&str> = s.outliers.keys().map(String::as_str).collect();
            parts.push(format!("Outliers were detected in {}.", cols.join(", ")));
        }
    }
    match &results.forecast {
        Some(ForecastOutcome::Success(f)) => {
            if let (Some(first), Some(last)) = (f.forecast_data.first(), f.forecast_data.last()) {
                let direction = if last.yhat > first.yhat { "rise" } else { "fall" };
                parts.push(format!(
                    "{} is expected to {} from {} to {} over the next {} days.",
                    f.target_column,
                    direction,
                    fmt_num(first.yhat),
                    fmt_num(last.yhat),
                    f.forecast_data.len()
                ));
            }
        }
        Some(ForecastOutcome::Failed { error }) => parts.push(format!("Forecasting failed: {}.", error)),
        _ => {}
    }

    if parts.is_empty() {
        "No analysis results were available.".to_string()
    } else {
        parts.join(" ")
    }
}

/// Full markdown report
pub fn render_markdown(results: &AnalysisResults, executive_summary: &str) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Analysis Report: {}\n", dataset_name(results));
    let _ = writeln!(md, "_Generated {}_\n", Utc::now().format("%Y-%m-%d %H:%M UTC"));

    let _ = writeln!(md, "## Executive Summary\n\n{}\n", executive_summary);

    md.push_str("## Dataset Overview\n\n");
    match &results.summary {
        Some(s) => {
            let _ = writeln!(md, "- Rows: {}\n- Columns: {}\n", s.rows, s.columns);
            let rows: Vec<Vec<String>> = s
                .schema
                .iter()
                .map(|(name, kind)| {
                    let missing = s.missing_values.get(name).copied().unwrap_or(0);
                    vec![
                        name.clone(),
                        serde_json::to_value(kind)
                            .ok()
                            .and_then(|v| v.as_str().map(str::to_string))
                            .unwrap_or_default(),
                        missing.to_string(),
                    ]
                })
                .collect();
            md.push_str(&markdown_table(
                &["Column".to_string(), "Type".to_string(), "Missing".to_string()],
                &rows,
            ));
            md.push('\n');
        }
        None => {
            let _ = writeln!(md, "{}\n", NOT_RUN);
        }
    }

    md.push_str("## Data Quality\n\n");
    match &results.data_quality {
        Some(q) => {
            let _ = writeln!(md, "- Quality score: {}/100", fmt_num(q.quality_score));
            let _ = writeln!(md, "- Missing values: {}", q.missing_values.total_missing);
            let _ = writeln!(
                md,
                "- Duplicate rows: {} ({}%)\n",
                q.duplicates.count,
                fmt_num(q.duplicates.percentage)
            );
            if q.inconsistencies.is_empty() {
                md.push_str("No consistency issues found.\n\n");
            } else {
                for issue in &q.inconsistencies {
                    let _ = writeln!(md, "- {}", issue);
                }
                md.push('\n');
            }
        }
        None => {
            let _ = writeln!(md, "{}\n", NOT_RUN);
        }
    }

    md.push_str("## Statistical Analysis\n\n");
    match &results.statistical_analysis {
        Some(s) => {
            let numeric = &s.descriptive_stats.numeric;
            if !numeric.is_empty() {
                let rows: Vec<Vec<String>> = numeric
                    .iter()
                    .map(|(name, d)| {
                        let mut row = vec![name.clone()];
                        row.extend(
                            ["mean", "std", "min", "50%", "max"]
                                .iter()
                                .map(|l| d.stat(l).map(fmt_num).unwrap_or_else(|| "-".to_string())),
                        );
                        row
                    })
                    .collect();
                let headers: Vec<String> =
                    ["Column", "Mean", "Std", "Min", "Median", "Max"].iter().map(|h| h.to_string()).collect();
                md.push_str(&markdown_table(&headers, &rows));
                md.push('\n');
            }
            match &s.correlations {
                Correlations::Matrix { strong_correlations, .. } if !strong_correlations.is_empty() => {
                    md.push_str("Strong correlations:\n\n");
                    for c in strong_correlations {
                        let _ = writeln!(md, "- {} / {}: {}", c.col1, c.col2, fmt_num(c.correlation));
                    }
                    md.push('\n');
                }
                Correlations::Matrix { .. } => md.push_str("No strong correlations found.\n\n"),
                Correlations::Message { message } => {
                    let _ = writeln!(md, "{}\n", message);
                }
            }
            if !s.outliers.is_empty() {
                md.push_str("Outliers (IQR rule):\n\n");
                for (col, o) in s.outliers.iter() {
                    let _ = writeln!(md, "- {}: {} rows ({}%)", col, o.count, fmt_num(o.percentage));
                }
                md.push('\n');
            }
        }
        None => {
            let _ = writeln!(md, "{}\n", NOT_RUN);
        }
    }

    md.push_str("## Visualizations\n\n");
    match &results.visualizations {
        Some(charts) if !charts.is_empty() => {
            for (_, path) in charts.iter() {
                let _ = writeln!(md, "![{}]({})", chart_title(path), path);
            }
            md.push('\n');
        }
        _ => {
            let _ = writeln!(md, "{}\n", NOT_RUN);
        }
    }

    md.push_str("## Forecast\n\n");
    match &results.forecast {
        Some(ForecastOutcome::Success(f)) => {
            let _ = writeln!(
                md,
                "Forecast of **{}** by {} (MAE {}, RMSE {}).\n",
                f.target_column,
                f.date_column,
                fmt_num(f.metrics.mae),
                fmt_num(f.metrics.rmse)
            );
            let rows: Vec<Vec<String>> = f
                .forecast_data
                .iter()
                .take(7)
                .map(|r| vec![r.ds.clone(), fmt_num(r.yhat), fmt_num(r.yhat_lower), fmt_num(r.yhat_upper)])
                .collect();
            let headers: Vec<String> = ["Date", "Forecast", "Lower", "Upper"].iter().map(|h| h.to_string()).collect();
            md.push_str(&markdown_table(&headers, &rows));
            let _ = writeln!(md, "\n![Forecast]({})", f.forecast_plot);
        }
        Some(ForecastOutcome::Skipped { reason }) => {
            let _ = writeln!(md, "Skipped: {}", reason);
        }
        Some(ForecastOutcome::Failed { error }) => {
            let _ = writeln!(md, "Failed: {}", error);
        }
        None => {
            let _ = writeln!(md, "{}", NOT_RUN);
        }
    }

    md
}

// A4 in points
const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 50;

/// One laid-out line of PDF text
struct PdfLine {
    font: &'static str,
    size: i64,
    text: String,
}

/// Base-14 fonts only cover Latin-1; keep to printable ASCII
fn pdf_text(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{2013}' | '\u{2014}' => '-',
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201c}' | '\u{201d}' => '"',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '?',
        })
        .collect()
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Flatten markdown into styled, wrapped lines
fn layout(markdown: &str) -> Vec<PdfLine> {
    let usable = (PAGE_WIDTH - 2 * MARGIN) as f64;
    let mut out = Vec::new();
    for raw in markdown.lines() {
        let line = raw.trim_end();
        let (font, size, text) = if let Some(h) = line.strip_prefix("# ") {
            ("F2", 18, h.to_string())
        } else if let Some(h) = line.strip_prefix("## ") {
            ("F2", 14, h.to_string())
        } else if line.starts_with("|:---") || line.starts_with("|---") {
            continue;
        } else if line.starts_with('|') {
            ("F3", 8, line.trim_matches('|').trim().to_string())
        } else if let Some(rest) = line.strip_prefix("![") {
            let (title, target) = rest.split_once("](").unwrap_or((rest, ""));
            ("F1", 10, format!("[chart] {} ({})", title, target.trim_end_matches(')')))
        } else {
            ("F1", 10, line.replace("**", "").replace('_', " "))
        };

        if text.trim().is_empty() {
            out.push(PdfLine { font, size, text: String::new() });
            continue;
        }
        // Courier is 0.6em wide; Helvetica averages about 0.5em
        let em = if font == "F3" { 0.6 } else { 0.5 };
        let width = (usable / (size as f64 * em)).floor().max(10.0) as usize;
        for piece in wrap(&pdf_text(&text), width) {
            out.push(PdfLine { font, size, text: piece });
        }
    }
    out
}

fn page_content(lines: &[PdfLine]) -> Content {
    let mut ops = Vec::new();
    let mut y = PAGE_HEIGHT - MARGIN;
    for line in lines {
        y -= line.size * 3 / 2;
        if line.text.is_empty() {
            continue;
        }
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new(
            "Tf",
            vec![Object::Name(line.font.as_bytes().to_vec()), Object::Integer(line.size)],
        ));
        ops.push(Operation::new("Td", vec![Object::Integer(MARGIN), Object::Integer(y)]));
        ops.push(Operation::new("Tj", vec![Object::string_literal(line.text.as_str())]));
        ops.push(Operation::new("ET", vec![]));
    }
    Content { operations: ops }
}

/// Split lines into pages by accumulated leading
fn paginate(lines: Vec<PdfLine>) -> Vec<Vec<PdfLine>> {
    let budget = PAGE_HEIGHT - 2 * MARGIN;
    let mut pages = vec![Vec::new()];
    let mut used = 0;
    for line in lines {
        let step = line.size * 3 / 2;
        if used + step > budget {
            pages.push(Vec::new());
            used = 0;
        }
        used += step;
        if let Some(page) = pages.last_mut() {
            page.push(line);
        }
    }
    pages
}

/// Render the markdown report as a simple multi-page PDF
pub fn write_pdf(path: &Path, markdown: &str) -> Result<()> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font = |doc: &mut Document, base: &str| -> ObjectId {
        doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => Object::Name(base.as_bytes().to_vec()),
        })
    };
    let regular = font(&mut doc, "Helvetica");
    let bold = font(&mut doc, "Helvetica-Bold");
    let mono = font(&mut doc, "Courier");
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular,
            "F2" => bold,
            "F3" => mono,
        },
    });

    let mut kids = Vec::new();
    for page in paginate(layout(markdown)) {
        let encoded = page_content(&page)
            .encode()
            .map_err(|e| CopilotError::Report(format!("PDF encoding failed: {}", e)))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(count),
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(PAGE_WIDTH),
                Object::Integer(PAGE_HEIGHT),
            ],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    doc.save(path)
        .map_err(|e| CopilotError::Report(format!("Failed to write {}: {}", path.display(), e)))?;
    info!("Wrote PDF report {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{fixtures, DataQualityAgent, StatisticalAgent};
    use crate::llm::testing::{offline_router, router_with, ScriptedModel};

    fn results() -> AnalysisResults {
        let ds = fixtures::messy();
        let interpreter = crate::agents::DataInterpreter::new(Arc::new(offline_router()), "");
        AnalysisResults {
            summary: Some(interpreter.describe(&ds)),
            data_quality: Some(DataQualityAgent::new().analyze_quality(&ds)),
            statistical_analysis: Some(StatisticalAgent::new(0.7, 1.5).analyze(&ds)),
            ..Default::default()
        }
    }

    fn writer(router: LlmRouter, dir: &Path) -> ReportWriter {
        ReportWriter::new(Arc::new(router), &crate::config::PromptConfig::default().report, dir)
    }

    #[test]
    fn test_report_type_param() {
        assert_eq!(ReportType::from_param("markdown"), ReportType::Markdown);
        assert_eq!(ReportType::from_param("PDF"), ReportType::Pdf);
        assert_eq!(ReportType::from_param("docx"), ReportType::Pdf);
    }

    #[test]
    fn test_fallback_summary_mentions_quality() {
        let text = fallback_summary(&results());
        assert!(text.starts_with("The dataset messy.csv contains 5 rows across 4 columns."));
        assert!(text.contains("55.0/100"));
        assert_eq!(fallback_summary(&AnalysisResults::default()), "No analysis results were available.");
    }

    #[test]
    fn test_markdown_sections() {
        let md = render_markdown(&results(), "Summary text");
        for heading in [
            "# Analysis Report: messy.csv",
            "## Executive Summary",
            "## Dataset Overview",
            "## Data Quality",
            "## Statistical Analysis",
            "## Visualizations",
            "## Forecast",
        ] {
            assert!(md.contains(heading), "missing {}", heading);
        }
        assert!(md.contains("Column 'price' has negative values"));
        assert!(md.contains(NOT_RUN));
    }

    #[tokio::test]
    async fn test_markdown_only_report() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(router_with(ScriptedModel::answering("Sales are healthy.")), dir.path());
        let outcome = w.generate_report("t1", &results(), ReportType::Markdown).await.unwrap();
        assert_eq!(outcome.executive_summary, "Sales are healthy.");
        assert!(outcome.pdf_path.is_none());
        assert!(outcome.markdown_path.ends_with("t1_report.md"));
        assert_eq!(outcome.primary_path(), outcome.markdown_path);
        let md = std::fs::read_to_string(&outcome.markdown_path).unwrap();
        assert!(md.contains("Sales are healthy."));
    }

    #[tokio::test]
    async fn test_pdf_report_with_fallback_summary() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = writer(offline_router(), dir.path())
            .generate_report("t2", &results(), ReportType::Pdf)
            .await
            .unwrap();
        assert!(outcome.executive_summary.starts_with("The dataset messy.csv"));
        let pdf = outcome.pdf_path.unwrap();
        assert!(pdf.ends_with("t2_report.pdf"));
        let bytes = std::fs::read(&pdf).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        assert!(Document::load(&pdf).is_ok());
    }

    #[test]
    fn test_long_text_paginates() {
        let mut md = String::from("# Title\n");
        for i in 0..200 {
            md.push_str(&format!("Line {} with a few words to lay out\n", i));
        }
        let pages = paginate(layout(&md));
        assert!(pages.len() > 1);
        assert_eq!(pages.iter().map(Vec::len).sum::<usize>(), 201);
    }

    #[test]
    fn test_wrap_and_sanitize() {
        assert_eq!(wrap("aaa bbb ccc", 7), vec!["aaa bbb", "ccc"]);
        assert_eq!(pdf_text("caf\u{e9} \u{2014} ok"), "caf? - ok");
    }
}
