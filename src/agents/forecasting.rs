// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Time-series forecasting
//!
//! Additive model `y = a + b*t + weekly[dow]`, fitted by backfitting the
//! linear trend against day-of-week means. Weekly seasonality is only used
//! with at least two weeks of history and fourteen observations.

use chrono::{Datelike, Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use super::find_date_column;
use crate::charts::{self, BandPoint};
use crate::dataset::stats::{round_to, sample_std};
use crate::dataset::{format_datetime, Dataset};

/// z-score of the 80% two-sided interval
const INTERVAL_Z: f64 = 1.2816;
const MIN_SEASONAL_DAYS: f64 = 14.0;
const MIN_SEASONAL_POINTS: usize = 14;
const BACKFIT_ROUNDS: usize = 25;

/// Preferred forecast targets, matched against lowercased column names
const TARGET_HINTS: &[&str] = &["sales", "revenue", "amount", "total", "price"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastRow {
    pub ds: String,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastMetrics {
    pub mae: f64,
    pub rmse: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastSuccess {
    pub date_column: String,
    pub target_column: String,
    pub forecast_plot: String,
    pub components_plot: String,
    pub forecast_data: Vec<ForecastRow>,
    pub metrics: ForecastMetrics,
    #[serde(default)]
    pub weekly_seasonality: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ForecastOutcome {
    Success(ForecastSuccess),
    Skipped { reason: String },
    Failed { error: String },
}

/// Fitted trend plus optional weekday effects
#[derive(Debug, Clone)]
pub struct TrendModel {
    origin: NaiveDateTime,
    intercept: f64,
    slope: f64,
    weekly: Option<[f64; 7]>,
    sigma: f64,
}

fn days_between(origin: &NaiveDateTime, dt: &NaiveDateTime) -> f64 {
    (*dt - *origin).num_seconds() as f64 / 86_400.0
}

fn ols(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    let n = points.len() as f64;
    let mt = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mt).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = points.iter().map(|p| (p.0 - mt) * (p.1 - my)).sum();
    let slope = sxy / sxx;
    Some((my - slope * mt, slope))
}

/// Centered mean residual per weekday (Monday first); absent days are 0
fn weekday_effects(residuals: &[(NaiveDateTime, f64)]) -> [f64; 7] {
    let mut sums = [0.0; 7];
    let mut counts = [0usize; 7];
    for (dt, r) in residuals {
        let d = dt.weekday().num_days_from_monday() as usize;
        sums[d] += r;
        counts[d] += 1;
    }
    let mut effects = [0.0; 7];
    let mut present = 0;
    let mut total = 0.0;
    for d in 0..7 {
        if counts[d] > 0 {
            effects[d] = sums[d] / counts[d] as f64;
            total += effects[d];
            present += 1;
        }
    }
    if present > 0 {
        let center = total / present as f64;
        for d in 0..7 {
            if counts[d] > 0 {
                effects[d] -= center;
            }
        }
    }
    effects
}

impl TrendModel {
    /// Fit on a sorted, de-duplicated daily series
    pub fn fit(series: &[(NaiveDateTime, f64)]) -> std::result::Result<Self, String> {
        if series.len() < 2 {
            return Err(format!(
                "Need at least two dated observations to fit a forecast (found {})",
                series.len()
            ));
        }
        let origin = series[0].0;
        let t: Vec<f64> = series.iter().map(|(dt, _)| days_between(&origin, dt)).collect();
        let span = t.last().copied().unwrap_or(0.0);
        let seasonal = span >= MIN_SEASONAL_DAYS && series.len() >= MIN_SEASONAL_POINTS;

        let mut weekly = [0.0; 7];
        let mut line = (0.0, 0.0);
        let rounds = if seasonal { BACKFIT_ROUNDS } else { 1 };
        for _ in 0..rounds {
            let deseasoned: Vec<(f64, f64)> = series
                .iter()
                .zip(&t)
                .map(|((dt, y), ti)| (*ti, y - weekly[dt.weekday().num_days_from_monday() as usize]))
                .collect();
            line = ols(&deseasoned).ok_or_else(|| "Dates do not vary; cannot fit a trend".to_string())?;
            if seasonal {
                let residuals: Vec<(NaiveDateTime, f64)> = series
                    .iter()
                    .zip(&t)
                    .map(|((dt, y), ti)| (*dt, y - (line.0 + line.1 * ti)))
                    .collect();
                weekly = weekday_effects(&residuals);
            }
        }

        let mut model = Self {
            origin,
            intercept: line.0,
            slope: line.1,
            weekly: seasonal.then_some(weekly),
            sigma: 0.0,
        };
        let residuals: Vec<f64> = series.iter().map(|(dt, y)| y - model.predict(dt)).collect();
        model.sigma = sample_std(&residuals).unwrap_or(0.0);
        Ok(model)
    }

    pub fn trend(&self, dt: &NaiveDateTime) -> f64 {
        self.intercept + self.slope * days_between(&self.origin, dt)
    }

    pub fn predict(&self, dt: &NaiveDateTime) -> f64 {
        let seasonal = self
            .weekly
            .map(|w| w[dt.weekday().num_days_from_monday() as usize])
            .unwrap_or(0.0);
        self.trend(dt) + seasonal
    }

    pub fn band(&self, dt: &NaiveDateTime) -> BandPoint {
        let mid = self.predict(dt);
        BandPoint {
            x: *dt,
            mid,
            lower: mid - INTERVAL_Z * self.sigma,
            upper: mid + INTERVAL_Z * self.sigma,
        }
    }

    pub fn weekly(&self) -> Option<&[f64; 7]> {
        self.weekly.as_ref()
    }
}

pub struct ForecastingAgent {
    output_dir: PathBuf,
    periods: usize,
}

impl ForecastingAgent {
    pub fn new(output_dir: &Path, periods: usize) -> Self {
        Self { output_dir: output_dir.to_path_buf(), periods }
    }

    /// Date column and target metric, when the dataset has both
    pub fn detect_time_series(&self, ds: &Dataset) -> Option<(String, String)> {
        let (date_col, _) = find_date_column(ds)?;
        let numeric = ds.numeric_columns();
        let target = numeric
            .iter()
            .find(|c| {
                let lower = c.name.to_lowercase();
                TARGET_HINTS.iter().any(|h| lower.contains(h))
            })
            .or_else(|| numeric.first())?;
        Some((date_col.name.clone(), target.name.clone()))
    }

    /// Sum the target per distinct timestamp, ascending
    fn aggregate(&self, ds: &Dataset, date_col: &str, target: &str) -> Vec<(NaiveDateTime, f64)> {
        let dates = match find_date_column(ds) {
            Some((col, dates)) if col.name == date_col => dates,
            _ => return Vec::new(),
        };
        let Some(values) = ds.column(target) else {
            return Vec::new();
        };

        let mut by_date: BTreeMap<NaiveDateTime, f64> = BTreeMap::new();
        for (d, v) in dates.iter().zip(&values.values) {
            if let (Some(d), Some(v)) = (d, v.as_f64()) {
                *by_date.entry(*d).or_insert(0.0) += v;
            }
        }
        by_date.into_iter().collect()
    }

    pub fn run_forecast(&self, task_id: &str, ds: &Dataset) -> ForecastOutcome {
        let Some((date_col, target)) = self.detect_time_series(ds) else {
            info!("No suitable time-series columns found.");
            return ForecastOutcome::Skipped {
                reason: "No date/numeric pair found".to_string(),
            };
        };
        info!("Forecasting {} based on {}", target, date_col);

        let series = self.aggregate(ds, &date_col, &target);
        match self.forecast_series(task_id, &series) {
            Ok((forecast_data, metrics, plots, weekly_seasonality)) => ForecastOutcome::Success(ForecastSuccess {
                date_column: date_col,
                target_column: target,
                forecast_plot: plots.0,
                components_plot: plots.1,
                forecast_data,
                metrics,
                weekly_seasonality,
            }),
            Err(e) => {
                error!("Forecasting failed: {}", e);
                ForecastOutcome::Failed { error: e }
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn forecast_series(
        &self,
        task_id: &str,
        series: &[(NaiveDateTime, f64)],
    ) -> std::result::Result<(Vec<ForecastRow>, ForecastMetrics, (String, String), bool), String> {
        let model = TrendModel::fit(series)?;

        let errors: Vec<f64> = series.iter().map(|(dt, y)| y - model.predict(dt)).collect();
        let n = errors.len() as f64;
        let metrics = ForecastMetrics {
            mae: round_to(errors.iter().map(|e| e.abs()).sum::<f64>() / n, 4),
            rmse: round_to((errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt(), 4),
        };

        let last = series[series.len() - 1].0;
        let future: Vec<BandPoint> = (1..=self.periods as i64)
            .map(|k| model.band(&(last + Duration::days(k))))
            .collect();
        let forecast_data = future
            .iter()
            .map(|b| ForecastRow {
                ds: format_datetime(&b.x),
                yhat: round_to(b.mid, 4),
                yhat_lower: round_to(b.lower, 4),
                yhat_upper: round_to(b.upper, 4),
            })
            .collect();

        let mut band: Vec<BandPoint> = series.iter().map(|(dt, _)| model.band(dt)).collect();
        band.extend(future.iter().copied());
        let trend: Vec<(NaiveDateTime, f64)> = band.iter().map(|b| (b.x, model.trend(&b.x))).collect();

        let plots = self
            .write_plots(task_id, series, &band, &trend, model.weekly())
            .map_err(|e| format!("Failed to write forecast plots: {}", e))?;

        Ok((forecast_data, metrics, plots, model.weekly().is_some()))
    }

    fn write_plots(
        &self,
        task_id: &str,
        observed: &[(NaiveDateTime, f64)],
        band: &[BandPoint],
        trend: &[(NaiveDateTime, f64)],
        weekly: Option<&[f64; 7]>,
    ) -> std::io::Result<(String, String)> {
        std::fs::create_dir_all(&self.output_dir)?;

        let plot_path = self.output_dir.join(format!("{}_forecast.svg", task_id));
        std::fs::write(&plot_path, charts::forecast_chart("Forecast", observed, band))?;

        let components_path = self.output_dir.join(format!("{}_components.svg", task_id));
        std::fs::write(
            &components_path,
            charts::components_chart("Forecast Components", trend, weekly),
        )?;

        Ok((
            plot_path.to_string_lossy().into_owned(),
            components_path.to_string_lossy().into_owned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::fixtures;

    fn agent(dir: &Path) -> ForecastingAgent {
        ForecastingAgent::new(dir, 30)
    }

    #[test]
    fn test_detects_preferred_target() {
        let dir = tempfile::tempdir().unwrap();
        let detected = agent(dir.path()).detect_time_series(&fixtures::daily_sales());
        assert_eq!(detected, Some(("Order Date".to_string(), "Sales".to_string())));
    }

    #[test]
    fn test_falls_back_to_first_numeric() {
        let dir = tempfile::tempdir().unwrap();
        let ds = Dataset::from_csv_reader("t.csv", "timestamp,visits,clicks\n2024-01-01,3,1\n2024-01-02,4,2\n".as_bytes()).unwrap();
        assert_eq!(
            agent(dir.path()).detect_time_series(&ds),
            Some(("timestamp".to_string(), "visits".to_string()))
        );
    }

    #[test]
    fn test_skipped_without_dates() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = agent(dir.path()).run_forecast("t", &fixtures::messy());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json, serde_json::json!({"status": "skipped", "reason": "No date/numeric pair found"}));
    }

    #[test]
    fn test_single_date_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ds = Dataset::from_csv_reader("t.csv", "date,sales\n2024-01-01,3\n2024-01-01,4\n".as_bytes()).unwrap();
        match agent(dir.path()).run_forecast("t", &ds) {
            ForecastOutcome::Failed { error } => assert!(error.contains("at least two")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_forecast_with_weekly_seasonality() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = agent(dir.path()).run_forecast("task", &fixtures::daily_sales());
        let ForecastOutcome::Success(f) = outcome else {
            panic!("forecast did not succeed");
        };

        assert!(f.weekly_seasonality);
        assert_eq!(f.forecast_data.len(), 30);
        // history ends Sunday 2024-01-21
        assert_eq!(f.forecast_data[0].ds, "2024-01-22");
        let monday = &f.forecast_data[0];
        let saturday = &f.forecast_data[5];
        assert!((monday.yhat - 142.0).abs() < 5.0, "monday yhat {}", monday.yhat);
        assert!(saturday.yhat > monday.yhat + 30.0);
        assert!(monday.yhat_lower <= monday.yhat && monday.yhat <= monday.yhat_upper);
        assert!(f.metrics.mae < 5.0);
        assert!(Path::new(&f.forecast_plot).exists());
        assert!(f.components_plot.ends_with("task_components.svg"));
    }

    #[test]
    fn test_short_history_is_trend_only() {
        let base = chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let series: Vec<(NaiveDateTime, f64)> = (0..5).map(|d| (base + Duration::days(d), 10.0 + d as f64)).collect();
        let model = TrendModel::fit(&series).unwrap();
        assert!(model.weekly().is_none());
        assert!((model.predict(&(base + Duration::days(10))) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_dates_are_summed() {
        let dir = tempfile::tempdir().unwrap();
        let ds = Dataset::from_csv_reader(
            "t.csv",
            "date,sales\n2024-01-01,3\n2024-01-01,4\n2024-01-02,10\n".as_bytes(),
        )
        .unwrap();
        let series = agent(dir.path()).aggregate(&ds, "date", "sales");
        assert_eq!(series.iter().map(|p| p.1).collect::<Vec<_>>(), vec![7.0, 10.0]);
    }
}
