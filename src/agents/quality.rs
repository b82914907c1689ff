// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Data quality checks and the 0-100 quality score

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

use crate::dataset::stats::round_to;
use crate::dataset::{Dataset, OrderedMap};

/// Name fragments of columns that should never be negative
const NON_NEGATIVE_HINTS: &[&str] = &["price", "cost", "qty"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MissingReport {
    pub total_missing: usize,
    /// Only columns with at least one missing value
    pub by_column: OrderedMap<usize>,
    pub percentage: OrderedMap<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicateReport {
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityReport {
    pub quality_score: f64,
    pub missing_values: MissingReport,
    pub duplicates: DuplicateReport,
    pub inconsistencies: Vec<String>,
    pub is_clean: bool,
}

#[derive(Debug, Default)]
pub struct DataQualityAgent;

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

impl DataQualityAgent {
    pub fn new() -> Self {
        Self
    }

    pub fn check_missing_values(&self, ds: &Dataset) -> MissingReport {
        let counts = ds.missing_counts();
        let total_missing = counts.values().sum();
        let by_column = counts.filtered(|_, n| *n > 0);
        let percentage = by_column
            .iter()
            .map(|(k, n)| (k.clone(), percent(*n, ds.rows())))
            .collect();

        MissingReport { total_missing, by_column, percentage }
    }

    pub fn check_duplicates(&self, ds: &Dataset) -> DuplicateReport {
        let count = ds.duplicated_rows();
        DuplicateReport { count, percentage: percent(count, ds.rows()) }
    }

    pub fn check_inconsistencies(&self, ds: &Dataset) -> Vec<String> {
        let mut issues = Vec::new();

        for col in ds.object_columns() {
            let types: HashSet<&str> = col.non_null().map(|v| v.type_name()).collect();
            if types.len() > 1 {
                issues.push(format!("Column '{}' contains mixed data types.", col.name));
            }
        }

        for col in ds.numeric_columns() {
            let lower = col.name.to_lowercase();
            if NON_NEGATIVE_HINTS.iter().any(|h| lower.contains(h))
                && col.numeric_values().iter().any(|v| *v < 0.0)
            {
                issues.push(format!(
                    "Column '{}' has negative values which might be invalid.",
                    col.name
                ));
            }
        }

        issues
    }

    /// Run every check and score the dataset
    pub fn analyze_quality(&self, ds: &Dataset) -> QualityReport {
        info!("Running Data Quality Analysis...");

        let missing = self.check_missing_values(ds);
        let duplicates = self.check_duplicates(ds);
        let inconsistencies = self.check_inconsistencies(ds);

        let mut score = 100.0;
        if missing.total_missing > 0 {
            score -= percent(missing.total_missing, ds.rows()).min(20.0);
        }
        if duplicates.count > 0 {
            score -= percent(duplicates.count, ds.rows()).min(20.0);
        }
        score -= inconsistencies.len() as f64 * 5.0;

        QualityReport {
            quality_score: round_to(score, 2).max(0.0),
            missing_values: missing,
            duplicates,
            inconsistencies,
            is_clean: score > 90.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::fixtures;
    use crate::dataset::{Column, Value};

    #[test]
    fn test_messy_dataset_scores_low() {
        let report = DataQualityAgent::new().analyze_quality(&fixtures::messy());
        assert_eq!(report.missing_values.total_missing, 2);
        assert_eq!(report.missing_values.by_column.keys().collect::<Vec<_>>(), vec!["name", "price"]);
        assert_eq!(report.missing_values.percentage.get("price"), Some(&20.0));
        assert_eq!(report.duplicates.count, 1);
        assert_eq!(
            report.inconsistencies,
            vec!["Column 'price' has negative values which might be invalid."]
        );
        // 100 - min(20, 40) - min(20, 20) - 5
        assert_eq!(report.quality_score, 55.0);
        assert!(!report.is_clean);
    }

    #[test]
    fn test_clean_dataset() {
        let report = DataQualityAgent::new().analyze_quality(&fixtures::daily_sales());
        assert_eq!(report.quality_score, 100.0);
        assert!(report.is_clean);
        assert!(report.missing_values.by_column.is_empty());
    }

    #[test]
    fn test_mixed_types_flagged() {
        let col = Column::from_values("code", vec![Value::Int(1), Value::Text("A".into()), Value::Null]);
        let ds = Dataset::new("t", vec![col]).unwrap();
        let issues = DataQualityAgent::new().check_inconsistencies(&ds);
        assert_eq!(issues, vec!["Column 'code' contains mixed data types."]);
    }

    #[test]
    fn test_missing_values_are_not_a_type() {
        let col = Column::from_values("name", vec![Value::Text("a".into()), Value::Null, Value::Text("b".into())]);
        let ds = Dataset::new("t", vec![col]).unwrap();
        assert!(DataQualityAgent::new().check_inconsistencies(&ds).is_empty());

        // `name` is a text column with one blank
        let issues = DataQualityAgent::new().check_inconsistencies(&fixtures::messy());
        assert!(!issues.iter().any(|i| i.contains("'name'")));
    }

    #[test]
    fn test_score_never_negative() {
        let cols: Vec<Column> = (0..25)
            .map(|i| Column::from_values(format!("c{}", i), vec![Value::Int(1), Value::Text("x".into())]))
            .collect();
        let ds = Dataset::new("t", cols).unwrap();
        let report = DataQualityAgent::new().analyze_quality(&ds);
        assert_eq!(report.quality_score, 0.0);
    }

    #[test]
    fn test_empty_dataset_has_no_division() {
        let ds = Dataset::from_csv_reader("e.csv", "a,b\n".as_bytes()).unwrap();
        let report = DataQualityAgent::new().analyze_quality(&ds);
        assert_eq!(report.duplicates.percentage, 0.0);
        assert_eq!(report.quality_score, 100.0);
    }
}
