// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Descriptive statistics, correlations and IQR outliers

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::stats::{pearson, quantile, round_to, sorted};
use crate::dataset::{Dataset, NumericSummary, OrderedMap};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoricalSummary {
    pub unique_count: usize,
    pub top_value: Option<String>,
    pub top_freq: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DescriptiveStats {
    pub numeric: OrderedMap<NumericSummary>,
    pub categorical: OrderedMap<CategoricalSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrongCorrelation {
    pub col1: String,
    pub col2: String,
    pub correlation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Correlations {
    Matrix {
        /// column -> column -> r (null where undefined)
        matrix: OrderedMap<OrderedMap<Option<f64>>>,
        strong_correlations: Vec<StrongCorrelation>,
    },
    Message {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutlierInfo {
    pub count: usize,
    pub percentage: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatisticsReport {
    pub descriptive_stats: DescriptiveStats,
    pub correlations: Correlations,
    pub outliers: OrderedMap<OutlierInfo>,
}

pub struct StatisticalAgent {
    strong_threshold: f64,
    iqr_multiplier: f64,
}

impl StatisticalAgent {
    pub fn new(strong_threshold: f64, iqr_multiplier: f64) -> Self {
        Self { strong_threshold, iqr_multiplier }
    }

    pub fn descriptive_stats(&self, ds: &Dataset) -> DescriptiveStats {
        let categorical = ds
            .object_columns()
            .into_iter()
            .map(|c| {
                let counts = c.value_counts();
                let summary = CategoricalSummary {
                    unique_count: counts.len(),
                    top_value: counts.first().map(|(v, _)| v.clone()),
                    top_freq: counts.first().map(|(_, n)| *n).unwrap_or(0),
                };
                (c.name.clone(), summary)
            })
            .collect();

        DescriptiveStats { numeric: ds.describe(), categorical }
    }

    /// Pairwise-complete Pearson matrix over numeric columns
    pub fn correlations(&self, ds: &Dataset) -> Correlations {
        let numeric = ds.numeric_columns();
        if numeric.is_empty() {
            return Correlations::Message {
                message: "No numeric columns for correlation.".to_string(),
            };
        }

        let n = numeric.len();
        let mut grid = vec![vec![None; n]; n];
        for i in 0..n {
            for j in 0..=i {
                let pairs: Vec<(f64, f64)> = numeric[i]
                    .values
                    .iter()
                    .zip(&numeric[j].values)
                    .filter_map(|(a, b)| Some((a.as_f64()?, b.as_f64()?)))
                    .collect();
                let r = pearson(&pairs);
                grid[i][j] = r;
                grid[j][i] = r;
            }
        }

        let mut strong_correlations = Vec::new();
        for i in 0..n {
            for j in 0..i {
                if let Some(r) = grid[i][j] {
                    if r.abs() > self.strong_threshold {
                        strong_correlations.push(StrongCorrelation {
                            col1: numeric[i].name.clone(),
                            col2: numeric[j].name.clone(),
                            correlation: round_to(r, 3),
                        });
                    }
                }
            }
        }

        let matrix = numeric
            .iter()
            .enumerate()
            .map(|(j, col)| {
                let inner = numeric
                    .iter()
                    .enumerate()
                    .map(|(i, row)| (row.name.clone(), grid[i][j]))
                    .collect();
                (col.name.clone(), inner)
            })
            .collect();

        Correlations::Matrix { matrix, strong_correlations }
    }

    /// IQR rule; only columns with at least one outlier are reported
    pub fn detect_outliers(&self, ds: &Dataset) -> OrderedMap<OutlierInfo> {
        let mut outliers = OrderedMap::new();
        for col in ds.numeric_columns() {
            let values = col.numeric_values();
            let ordered = sorted(&values);
            let (Some(q1), Some(q3)) = (quantile(&ordered, 0.25), quantile(&ordered, 0.75)) else {
                continue;
            };
            let iqr = q3 - q1;
            let lower_bound = q1 - self.iqr_multiplier * iqr;
            let upper_bound = q3 + self.iqr_multiplier * iqr;

            let count = values.iter().filter(|v| **v < lower_bound || **v > upper_bound).count();
            if count > 0 {
                outliers.insert(
                    col.name.clone(),
                    OutlierInfo {
                        count,
                        percentage: round_to(count as f64 / ds.rows() as f64 * 100.0, 2),
                        lower_bound,
                        upper_bound,
                    },
                );
            }
        }
        outliers
    }

    pub fn analyze(&self, ds: &Dataset) -> StatisticsReport {
        info!("Running Statistical Analysis...");
        StatisticsReport {
            descriptive_stats: self.descriptive_stats(ds),
            correlations: self.correlations(ds),
            outliers: self.detect_outliers(ds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::fixtures;

    fn agent() -> StatisticalAgent {
        StatisticalAgent::new(0.7, 1.5)
    }

    #[test]
    fn test_categorical_mode_and_ties() {
        let stats = agent().descriptive_stats(&fixtures::daily_sales());
        let region = stats.categorical.get("Region").unwrap();
        assert_eq!(region.unique_count, 3);
        // 7 rows each; smallest value wins the tie
        assert_eq!(region.top_value.as_deref(), Some("East"));
        assert_eq!(region.top_freq, 7);
        assert!(stats.numeric.get("Sales").is_some());
    }

    #[test]
    fn test_strong_correlations_use_lower_triangle() {
        let ds = Dataset::from_csv_reader(
            "c.csv",
            "a,b,c\n1,2,5\n2,4,1\n3,6,4\n4,8,2\n5,10,3\n".as_bytes(),
        )
        .unwrap();
        match agent().correlations(&ds) {
            Correlations::Matrix { matrix, strong_correlations } => {
                assert_eq!(strong_correlations.len(), 1);
                assert_eq!(strong_correlations[0].col1, "b");
                assert_eq!(strong_correlations[0].col2, "a");
                assert_eq!(strong_correlations[0].correlation, 1.0);
                assert_eq!(matrix.get("a").unwrap().get("a"), Some(&Some(1.0)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_no_numeric_columns_message() {
        let ds = Dataset::from_csv_reader("t.csv", "name\nx\ny\n".as_bytes()).unwrap();
        let json = serde_json::to_value(agent().correlations(&ds)).unwrap();
        assert_eq!(json, serde_json::json!({"message": "No numeric columns for correlation."}));
    }

    #[test]
    fn test_constant_column_has_null_correlation() {
        let ds = Dataset::from_csv_reader("t.csv", "a,b\n1,7\n2,7\n3,7\n".as_bytes()).unwrap();
        let json = serde_json::to_value(agent().correlations(&ds)).unwrap();
        assert!(json["matrix"]["a"]["b"].is_null());
        assert_eq!(json["strong_correlations"], serde_json::json!([]));
    }

    #[test]
    fn test_iqr_outliers() {
        let ds = Dataset::from_csv_reader(
            "o.csv",
            "v\n10\n11\n12\n13\n12\n11\n10\n500\n".as_bytes(),
        )
        .unwrap();
        let outliers = agent().detect_outliers(&ds);
        let v = outliers.get("v").unwrap();
        assert_eq!(v.count, 1);
        assert_eq!(v.percentage, 12.5);
        assert!(v.upper_bound < 500.0);
    }

    #[test]
    fn test_report_reloads_from_json() {
        let report = agent().analyze(&fixtures::messy());
        let json = serde_json::to_string(&report).unwrap();
        let back: StatisticsReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.descriptive_stats.categorical, report.descriptive_stats.categorical);
        assert!(matches!(back.correlations, Correlations::Matrix { .. }));
        assert_eq!(back.outliers.len(), report.outliers.len());
    }
}
