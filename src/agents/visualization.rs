// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Chart generation for a dataset

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::find_date_column;
use super::statistics::{Correlations, StatisticalAgent};
use crate::charts;
use crate::dataset::Dataset;
use crate::Result;

/// Chart file paths grouped by kind
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChartSet {
    pub correlation: Vec<String>,
    pub distributions: Vec<String>,
    pub categorical: Vec<String>,
    pub time_series: Vec<String>,
}

impl ChartSet {
    /// `(category, path)` pairs in display order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &String)> {
        let groups: [(&'static str, &Vec<String>); 4] = [
            ("correlation", &self.correlation),
            ("distributions", &self.distributions),
            ("categorical", &self.categorical),
            ("time_series", &self.time_series),
        ];
        groups.into_iter().flat_map(|(name, paths)| paths.iter().map(move |p| (name, p)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Human title recovered from a chart file name (`{task}_{slug}.svg`)
pub fn chart_title(path: &str) -> String {
    let stem = Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    // task ids are uuids: 36 chars then '_'
    let slug = if stem.len() > 37 && stem.as_bytes()[36] == b'_' {
        &stem[37..]
    } else {
        stem.as_str()
    };
    let mut title = slug.replace('_', " ");
    if let Some(first) = title.get(..1) {
        title = first.to_uppercase() + &title[1..];
    }
    title
}

pub struct VisualizationAgent {
    output_dir: PathBuf,
    max_distribution_plots: usize,
    max_categorical_plots: usize,
    max_categories: usize,
}

impl VisualizationAgent {
    pub fn new(
        output_dir: &Path,
        max_distribution_plots: usize,
        max_categorical_plots: usize,
        max_categories: usize,
    ) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            max_distribution_plots,
            max_categorical_plots,
            max_categories,
        }
    }

    fn save(&self, task_id: &str, title: &str, svg: String) -> Result<String> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self
            .output_dir
            .join(format!("{}_{}.svg", task_id, charts::slug(title)));
        std::fs::write(&path, svg)?;
        info!("Generated plot: {}", path.display());
        Ok(path.to_string_lossy().into_owned())
    }

    pub fn correlation_heatmap(&self, task_id: &str, ds: &Dataset) -> Result<Option<String>> {
        let Correlations::Matrix { matrix, .. } = StatisticalAgent::new(1.0, 1.5).correlations(ds) else {
            return Ok(None);
        };
        let labels: Vec<String> = matrix.keys().cloned().collect();
        let grid: Vec<Vec<Option<f64>>> = labels
            .iter()
            .map(|row| {
                labels
                    .iter()
                    .map(|col| matrix.get(col).and_then(|inner| inner.get(row)).copied().flatten())
                    .collect()
            })
            .collect();

        let title = "Correlation Matrix";
        self.save(task_id, title, charts::heatmap(title, &labels, &grid)).map(Some)
    }

    pub fn distribution_plots(&self, task_id: &str, ds: &Dataset) -> Result<Vec<String>> {
        ds.numeric_columns()
            .into_iter()
            .take(self.max_distribution_plots)
            .map(|col| {
                let title = format!("Distribution of {}", col.name);
                let svg = charts::histogram(&title, &col.numeric_values(), &col.name);
                self.save(task_id, &title, svg)
            })
            .collect()
    }

    pub fn categorical_plots(&self, task_id: &str, ds: &Dataset) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        for col in ds.object_columns().into_iter().take(self.max_categorical_plots) {
            let counts = col.value_counts();
            if counts.len() > self.max_categories {
                // high cardinality
                continue;
            }
            let title = format!("Count of {}", col.name);
            paths.push(self.save(task_id, &title, charts::bar_chart(&title, &counts, &col.name))?);
        }
        Ok(paths)
    }

    /// First date-like column against the first numeric column
    pub fn time_series_plot(&self, task_id: &str, ds: &Dataset) -> Result<Option<String>> {
        let Some((date_col, dates)) = find_date_column(ds) else {
            return Ok(None);
        };
        let Some(value_col) = ds.numeric_columns().into_iter().next() else {
            return Ok(None);
        };

        let points: Vec<(NaiveDateTime, f64)> = dates
            .iter()
            .zip(&value_col.values)
            .filter_map(|(d, v)| Some(((*d)?, v.as_f64()?)))
            .collect();
        if points.is_empty() {
            warn!("No complete {}/{} pairs to plot", date_col.name, value_col.name);
            return Ok(None);
        }

        let title = format!("Trend of {} over Time", value_col.name);
        let svg = charts::line_chart(&title, &points, &date_col.name, &value_col.name);
        self.save(task_id, &title, svg).map(Some)
    }

    /// Generate the whole chart suite
    pub fn create_visualizations(&self, task_id: &str, ds: &Dataset) -> Result<ChartSet> {
        info!("Generating visualizations...");
        Ok(ChartSet {
            correlation: self.correlation_heatmap(task_id, ds)?.into_iter().collect(),
            distributions: self.distribution_plots(task_id, ds)?,
            categorical: self.categorical_plots(task_id, ds)?,
            time_series: self.time_series_plot(task_id, ds)?.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::fixtures;

    const TASK: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";

    #[test]
    fn test_full_suite_written() {
        let dir = tempfile::tempdir().unwrap();
        let agent = VisualizationAgent::new(dir.path(), 3, 3, 20);
        let charts = agent.create_visualizations(TASK, &fixtures::daily_sales()).unwrap();

        assert_eq!(charts.correlation.len(), 1);
        assert_eq!(charts.distributions.len(), 3);
        // Order Date has 21 distinct values and is skipped
        assert_eq!(charts.categorical.len(), 1);
        assert_eq!(charts.time_series.len(), 1);
        assert!(charts.time_series[0].ends_with(&format!("{}_trend_of_sales_over_time.svg", TASK)));
        for (_, path) in charts.iter() {
            assert!(std::fs::read_to_string(path).unwrap().starts_with("<svg"));
        }
        assert_eq!(charts.len(), 6);
    }

    #[test]
    fn test_high_cardinality_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let agent = VisualizationAgent::new(dir.path(), 3, 3, 2);
        let charts = agent.categorical_plots(TASK, &fixtures::daily_sales()).unwrap();
        // Region has 3 values, Order Date has 21
        assert!(charts.is_empty());
    }

    #[test]
    fn test_no_numeric_columns() {
        let dir = tempfile::tempdir().unwrap();
        let agent = VisualizationAgent::new(dir.path(), 3, 3, 20);
        let ds = Dataset::from_csv_reader("t.csv", "name\nx\ny\n".as_bytes()).unwrap();
        let charts = agent.create_visualizations(TASK, &ds).unwrap();
        assert!(charts.correlation.is_empty());
        assert!(charts.time_series.is_empty());
        assert_eq!(charts.categorical.len(), 1);
    }

    #[test]
    fn test_column_with_separator_stays_in_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let agent = VisualizationAgent::new(dir.path(), 3, 3, 20);
        let ds = Dataset::from_csv_reader("t.csv", "revenue/cost\n1.5\n2.0\n3.5\n".as_bytes()).unwrap();
        let paths = agent.distribution_plots(TASK, &ds).unwrap();
        assert_eq!(paths.len(), 1);
        let path = Path::new(&paths[0]);
        assert_eq!(path.parent(), Some(dir.path()));
        assert!(paths[0].ends_with("_distribution_of_revenue_cost.svg"));
        assert!(path.exists());
    }

    #[test]
    fn test_chart_title_from_path() {
        let path = format!("/x/{}_distribution_of_sales.svg", TASK);
        assert_eq!(chart_title(&path), "Distribution of sales");
        assert_eq!(chart_title("plain_name.svg"), "Plain name");
    }
}
