// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! In-memory tabular datasets
//!
//! Columns carry a storage type (`int64`, `float64`, `bool`,
//! `datetime64[ns]`, `object`) decided at load time, which is what the
//! agents key their behaviour on.

pub mod loader;
pub mod ordered;
pub mod stats;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use crate::{CopilotError, Result};
pub use ordered::OrderedMap;

/// Tokens read as missing values
pub const NA_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND",
    "1.#QNAN", "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// A single cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
    Text(String),
}

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    Int64,
    Float64,
    Bool,
    DateTime,
    Object,
}

/// Semantic column type reported by the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Integer,
    Float,
    Datetime,
    #[serde(rename = "Categorical/Text")]
    CategoricalText,
    Unknown,
}

/// A named, typed column
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub dtype: DType,
    pub values: Vec<Value>,
}

/// A table of equally long columns
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    columns: Vec<Column>,
    rows: usize,
}

/// Count, mean, spread and quartiles of a numeric column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NumericSummary {
    pub count: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    #[serde(rename = "25%")]
    pub p25: Option<f64>,
    #[serde(rename = "50%")]
    pub p50: Option<f64>,
    #[serde(rename = "75%")]
    pub p75: Option<f64>,
    pub max: Option<f64>,
}

/// Summary of an object column: count, unique, top, freq
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectSummary {
    pub count: usize,
    pub unique: usize,
    pub top: Option<String>,
    pub freq: usize,
}

impl Value {
    /// Missing value (NaN floats count as missing)
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) if !f.is_nan() => Some(*f),
            _ => None,
        }
    }

    /// Runtime type name, used for mixed-type detection
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::DateTime(_) => "datetime",
            Value::Text(_) => "str",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Int(i) => serde_json::json!(i),
            Value::Float(f) if f.is_finite() => serde_json::json!(f),
            Value::Float(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::json!(b),
            Value::DateTime(dt) => serde_json::json!(format_datetime(dt)),
            Value::Text(s) => serde_json::json!(s),
        }
    }

    /// Key that makes equal cells hash equal (NA equals NA)
    fn key(&self) -> String {
        match self {
            Value::Null => "\u{0}NA".to_string(),
            Value::Float(f) if f.is_nan() => "\u{0}NA".to_string(),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < 9e15 => format!("n{}", *f as i64),
            Value::Int(i) => format!("n{}", i),
            Value::Float(f) => format!("n{}", f),
            Value::Bool(b) => format!("b{}", b),
            Value::DateTime(dt) => format!("d{}", dt),
            Value::Text(s) => format!("s{}", s),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NaN"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", stats::fmt_num(*v)),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::DateTime(dt) => write!(f, "{}", format_datetime(dt)),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl DType {
    /// dtype string, as shown to the SQL agent
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Int64 => "int64",
            DType::Float64 => "float64",
            DType::Bool => "bool",
            DType::DateTime => "datetime64[ns]",
            DType::Object => "object",
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnKind::Integer => "Integer",
            ColumnKind::Float => "Float",
            ColumnKind::Datetime => "Datetime",
            ColumnKind::CategoricalText => "Categorical/Text",
            ColumnKind::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Render a timestamp: date only at midnight, else date and time
pub fn format_datetime(dt: &NaiveDateTime) -> String {
    if dt.time() == chrono::NaiveTime::MIN {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Parse the date and timestamp spellings commonly found in exports
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }

    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }

    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y", "%b %d %Y", "%d %b %Y", "%B %d, %Y",
    ];
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    // Year-month only
    if let Ok(d) = NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d") {
        if s.len() == 7 {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    None
}

fn is_na_token(s: &str) -> bool {
    NA_TOKENS.contains(&s)
}

fn classify_str(s: &str) -> Value {
    if is_na_token(s) {
        return Value::Null;
    }
    let t = s.trim();
    if let Ok(i) = t.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = t.parse::<f64>() {
        return Value::Float(f);
    }
    match t {
        "True" | "TRUE" | "true" => Value::Bool(true),
        "False" | "FALSE" | "false" => Value::Bool(false),
        _ => Value::Text(s.to_string()),
    }
}

impl Column {
    /// Build a column from text cells, inferring the storage type.
    ///
    /// Object columns keep the original strings.
    pub fn from_strings(name: impl Into<String>, cells: Vec<Option<String>>) -> Self {
        let parsed: Vec<Value> = cells
            .iter()
            .map(|c| c.as_deref().map(classify_str).unwrap_or(Value::Null))
            .collect();
        let dtype = infer_dtype(&parsed);

        let values = if dtype == DType::Object {
            cells
                .into_iter()
                .map(|c| match c {
                    Some(s) if !is_na_token(&s) => Value::Text(s),
                    _ => Value::Null,
                })
                .collect()
        } else {
            normalize(parsed, dtype)
        };

        Self { name: name.into(), dtype, values }
    }

    /// Build a column from already-typed cells (spreadsheets)
    pub fn from_values(name: impl Into<String>, values: Vec<Value>) -> Self {
        let dtype = infer_dtype(&values);
        let values = if dtype == DType::Object { values } else { normalize(values, dtype) };
        Self { name: name.into(), dtype, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.dtype, DType::Int64 | DType::Float64)
    }

    pub fn is_object(&self) -> bool {
        self.dtype == DType::Object
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_null()).count()
    }

    pub fn non_null(&self) -> impl Iterator<Item = &Value> {
        self.values.iter().filter(|v| !v.is_null())
    }

    /// Non-null numeric values in row order
    pub fn numeric_values(&self) -> Vec<f64> {
        self.values.iter().filter_map(Value::as_f64).collect()
    }

    /// Number of distinct non-null values
    pub fn unique_count(&self) -> usize {
        self.non_null().map(Value::key).collect::<HashSet<_>>().len()
    }

    /// Distinct non-null values with their counts, most frequent first.
    /// Ties keep the smaller rendered value first.
    pub fn value_counts(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<String, (String, usize)> = HashMap::new();
        for v in self.non_null() {
            counts.entry(v.key()).or_insert_with(|| (v.to_string(), 0)).1 += 1;
        }
        let mut out: Vec<(String, usize)> = counts.into_values().collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }

    /// Interpret the column as timestamps.
    ///
    /// Returns `None` unless the column is datetime-typed or every non-null
    /// value (and at least one) parses as a date.
    pub fn parse_dates(&self) -> Option<Vec<Option<NaiveDateTime>>> {
        let mut seen = false;
        let mut out = Vec::with_capacity(self.values.len());
        for v in &self.values {
            match v {
                v if v.is_null() => out.push(None),
                Value::DateTime(dt) => {
                    seen = true;
                    out.push(Some(*dt));
                }
                Value::Text(s) => {
                    seen = true;
                    out.push(Some(parse_datetime(s)?));
                }
                _ => return None,
            }
        }
        seen.then_some(out)
    }

    /// Semantic type for the schema report
    pub fn kind(&self) -> ColumnKind {
        match self.dtype {
            DType::Int64 => ColumnKind::Integer,
            DType::Float64 => ColumnKind::Float,
            DType::DateTime => ColumnKind::Datetime,
            DType::Object => {
                if self.parse_dates().is_some() {
                    ColumnKind::Datetime
                } else {
                    ColumnKind::CategoricalText
                }
            }
            DType::Bool => ColumnKind::Unknown,
        }
    }

    fn describe_numeric(&self) -> NumericSummary {
        let values = self.numeric_values();
        let sorted = stats::sorted(&values);
        NumericSummary {
            count: values.len(),
            mean: stats::mean(&values),
            std: stats::sample_std(&values),
            min: sorted.first().copied(),
            p25: stats::quantile(&sorted, 0.25),
            p50: stats::quantile(&sorted, 0.50),
            p75: stats::quantile(&sorted, 0.75),
            max: sorted.last().copied(),
        }
    }

    fn describe_object(&self) -> ObjectSummary {
        let counts = self.value_counts();
        ObjectSummary {
            count: self.len() - self.null_count(),
            unique: counts.len(),
            top: counts.first().map(|(v, _)| v.clone()),
            freq: counts.first().map(|(_, c)| *c).unwrap_or(0),
        }
    }
}

fn infer_dtype(values: &[Value]) -> DType {
    if values.is_empty() {
        return DType::Object;
    }
    let non_null: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
    let has_nulls = non_null.len() < values.len();

    if non_null.is_empty() {
        return DType::Float64;
    }
    if !has_nulls && non_null.iter().all(|v| matches!(v, Value::Int(_))) {
        return DType::Int64;
    }
    if non_null.iter().all(|v| matches!(v, Value::Int(_) | Value::Float(_))) {
        return DType::Float64;
    }
    if !has_nulls && non_null.iter().all(|v| matches!(v, Value::Bool(_))) {
        return DType::Bool;
    }
    if non_null.iter().all(|v| matches!(v, Value::DateTime(_))) {
        return DType::DateTime;
    }
    DType::Object
}

fn normalize(values: Vec<Value>, dtype: DType) -> Vec<Value> {
    match dtype {
        DType::Float64 => values
            .into_iter()
            .map(|v| match v {
                Value::Int(i) => Value::Float(i as f64),
                Value::Float(f) if !f.is_nan() => Value::Float(f),
                _ => Value::Null,
            })
            .collect(),
        _ => values
            .into_iter()
            .map(|v| if v.is_null() { Value::Null } else { v })
            .collect(),
    }
}

impl Dataset {
    /// Assemble a dataset; every column must have the same length
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Result<Self> {
        let rows = columns.first().map(Column::len).unwrap_or(0);
        if let Some(bad) = columns.iter().find(|c| c.len() != rows) {
            return Err(CopilotError::Dataset(format!(
                "Column '{}' has {} values, expected {}",
                bad.name,
                bad.len(),
                rows
            )));
        }
        Ok(Self { name: name.into(), columns, rows })
    }

    /// Load a CSV or spreadsheet file
    pub fn load(path: &Path) -> Result<Self> {
        loader::load(path)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn numeric_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.is_numeric()).collect()
    }

    pub fn object_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.is_object()).collect()
    }

    /// Semantic type for every column
    pub fn infer_schema(&self) -> OrderedMap<ColumnKind> {
        self.columns.iter().map(|c| (c.name.clone(), c.kind())).collect()
    }

    /// dtype string for every column
    pub fn dtypes(&self) -> OrderedMap<String> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.dtype.as_str().to_string()))
            .collect()
    }

    /// Missing-value count for every column
    pub fn missing_counts(&self) -> OrderedMap<usize> {
        self.columns.iter().map(|c| (c.name.clone(), c.null_count())).collect()
    }

    /// Rows identical to an earlier row (the first occurrence is not counted)
    pub fn duplicated_rows(&self) -> usize {
        let mut seen = HashSet::with_capacity(self.rows);
        let mut dups = 0;
        for row in 0..self.rows {
            let key: Vec<String> = self.columns.iter().map(|c| c.values[row].key()).collect();
            if !seen.insert(key) {
                dups += 1;
            }
        }
        dups
    }

    /// `describe()` for numeric columns
    pub fn describe(&self) -> OrderedMap<NumericSummary> {
        self.numeric_columns()
            .into_iter()
            .map(|c| (c.name.clone(), c.describe_numeric()))
            .collect()
    }

    /// `describe()` for object columns
    pub fn describe_objects(&self) -> OrderedMap<ObjectSummary> {
        self.object_columns()
            .into_iter()
            .map(|c| (c.name.clone(), c.describe_object()))
            .collect()
    }

    /// First `n` rows as JSON objects
    pub fn preview_records(&self, n: usize) -> Vec<serde_json::Map<String, serde_json::Value>> {
        (0..self.rows.min(n))
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| (c.name.clone(), c.values[row].to_json()))
                    .collect()
            })
            .collect()
    }

    /// First `n` rows as a markdown table
    pub fn head_markdown(&self, n: usize) -> String {
        let mut headers = vec![String::new()];
        headers.extend(self.column_names());
        let rows: Vec<Vec<String>> = (0..self.rows.min(n))
            .map(|row| {
                let mut cells = vec![row.to_string()];
                cells.extend(self.columns.iter().map(|c| c.values[row].to_string()));
                cells
            })
            .collect();
        markdown_table(&headers, &rows)
    }

    /// Numeric `describe()` as a markdown table (statistics down, columns across)
    pub fn describe_markdown(&self) -> String {
        let described = self.describe();
        if described.is_empty() {
            return self.describe_all_markdown();
        }
        let mut headers = vec![String::new()];
        headers.extend(described.keys().cloned());

        let rows: Vec<Vec<String>> = NumericSummary::LABELS
            .iter()
            .map(|label| {
                let mut row = vec![label.to_string()];
                row.extend(described.values().map(|s| fmt_opt(s.stat(label))));
                row
            })
            .collect();
        markdown_table(&headers, &rows)
    }

    /// Numeric and object summaries together as a markdown table
    pub fn describe_all_markdown(&self) -> String {
        let numeric = self.describe();
        let objects = self.describe_objects();

        let mut headers = vec![String::new()];
        headers.extend(
            self.columns
                .iter()
                .filter(|c| c.is_numeric() || c.is_object())
                .map(|c| c.name.clone()),
        );
        if headers.len() == 1 {
            return "(no describable columns)".to_string();
        }

        let labels = ["count", "unique", "top", "freq", "mean", "std", "min", "25%", "50%", "75%", "max"];
        let rows: Vec<Vec<String>> = labels
            .iter()
            .map(|label| {
                let mut row = vec![label.to_string()];
                for name in &headers[1..] {
                    let cell = if let Some(s) = numeric.get(name) {
                        fmt_opt(s.stat(label))
                    } else if let Some(s) = objects.get(name) {
                        match *label {
                            "count" => s.count.to_string(),
                            "unique" => s.unique.to_string(),
                            "top" => s.top.clone().unwrap_or_else(|| "NaN".to_string()),
                            "freq" => s.freq.to_string(),
                            _ => "NaN".to_string(),
                        }
                    } else {
                        "NaN".to_string()
                    };
                    row.push(cell);
                }
                row
            })
            .collect();
        markdown_table(&headers, &rows)
    }
}

impl NumericSummary {
    /// Row labels in `describe()` order
    pub const LABELS: [&'static str; 8] = ["count", "mean", "std", "min", "25%", "50%", "75%", "max"];

    /// Look up a statistic by its `describe()` label
    pub fn stat(&self, label: &str) -> Option<f64> {
        match label {
            "count" => Some(self.count as f64),
            "mean" => self.mean,
            "std" => self.std,
            "min" => self.min,
            "25%" => self.p25,
            "50%" => self.p50,
            "75%" => self.p75,
            "max" => self.max,
            _ => None,
        }
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(stats::fmt_num).unwrap_or_else(|| "NaN".to_string())
}

/// Render a GitHub-style markdown table
pub fn markdown_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let escape = |s: &str| s.replace('|', "\\|").replace('\n', " ");
    let mut out = String::new();
    out.push_str("| ");
    out.push_str(&headers.iter().map(|h| escape(h)).collect::<Vec<_>>().join(" | "));
    out.push_str(" |\n|");
    out.push_str(&headers.iter().map(|_| ":---").collect::<Vec<_>>().join("|"));
    out.push_str("|\n");
    for row in rows {
        out.push_str("| ");
        out.push_str(&row.iter().map(|c| escape(c)).collect::<Vec<_>>().join(" | "));
        out.push_str(" |\n");
    }
    out
}

/// Content fingerprint of a dataset file
pub fn fingerprint(path: &Path) -> Result<String> {
    let data = std::fs::read(path)?;
    Ok(blake3::hash(&data).to_hex().to_string())
}
