// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! CSV and spreadsheet ingestion

use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use super::{parse_datetime, Column, Dataset, Value, NA_TOKENS};
use crate::{CopilotError, Result};

/// Extensions the loader accepts
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "xls", "xlsx", "xlsm", "ods"];

/// Check whether a file name has a loadable extension
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Load a dataset, dispatching on extension
pub fn load(path: &Path) -> Result<Dataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("dataset")
        .to_string();

    let dataset = match ext.as_str() {
        "csv" => {
            let file = std::fs::File::open(path)?;
            Dataset::from_csv_reader(name, std::io::BufReader::new(file))?
        }
        "xls" | "xlsx" | "xlsm" | "ods" => from_spreadsheet(path, name)?,
        _ => return Err(CopilotError::UnsupportedFormat(ext)),
    };

    info!(
        "Loaded dataset with shape: ({}, {})",
        dataset.rows(),
        dataset.columns().len()
    );
    Ok(dataset)
}

impl Dataset {
    /// Parse CSV text. Short rows are padded with missing values.
    pub fn from_csv_reader<R: Read>(name: impl Into<String>, reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);

        let headers = mangle_headers(rdr.headers()?.iter().map(str::to_string));
        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];

        for record in rdr.records() {
            let record = record?;
            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            for (i, column) in cells.iter_mut().enumerate() {
                column.push(record.get(i).map(str::to_string));
            }
        }

        let columns = headers
            .into_iter()
            .zip(cells)
            .map(|(h, c)| Column::from_strings(h, c))
            .collect();
        Dataset::new(name, columns)
    }
}

/// Read the first sheet; row 0 is the header
fn from_spreadsheet(path: &Path, name: String) -> Result<Dataset> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| CopilotError::Spreadsheet(format!("Failed to open spreadsheet: {}", e)))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let first = sheet_names
        .first()
        .ok_or_else(|| CopilotError::Spreadsheet("Workbook has no sheets".to_string()))?;
    debug!("Reading sheet '{}' of {:?}", first, sheet_names);

    let range = workbook
        .worksheet_range(first)
        .map_err(|e| CopilotError::Spreadsheet(format!("Failed to read sheet '{}': {}", first, e)))?;

    let mut rows = range.rows();
    let header_row = match rows.next() {
        Some(r) => r,
        None => return Dataset::new(name, Vec::new()),
    };
    let headers = mangle_headers(header_row.iter().map(header_text));

    let mut values: Vec<Vec<Value>> = vec![Vec::new(); headers.len()];
    for row in rows {
        if row.iter().all(|c| matches!(c, Data::Empty)) {
            continue;
        }
        for (i, column) in values.iter_mut().enumerate() {
            column.push(row.get(i).map(cell_value).unwrap_or(Value::Null));
        }
    }

    let columns = headers
        .into_iter()
        .zip(values)
        .map(|(h, v)| Column::from_values(h, v))
        .collect();
    Dataset::new(name, columns)
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Int(i) => Value::Int(*i),
        // Whole-number cells are stored as floats in the file format
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Value::Int(*f as i64),
        Data::Float(f) => Value::Float(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) if NA_TOKENS.contains(&s.as_str()) => Value::Null,
        Data::String(s) => Value::Text(s.clone()),
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64())
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        Data::DateTimeIso(s) => parse_datetime(s)
            .map(Value::DateTime)
            .unwrap_or_else(|| Value::Text(s.clone())),
        Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(_) | Data::Empty => Value::Null,
    }
}

/// Convert a spreadsheet serial date (days since 1899-12-30)
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = serial.floor();
    let seconds = ((serial - days) * 86_400.0).round() as i64;
    epoch
        .checked_add_signed(Duration::days(days as i64))?
        .checked_add_signed(Duration::seconds(seconds))
}

/// Fill blank names and de-duplicate repeated ones (`a`, `a.1`, `a.2`)
fn mangle_headers(raw: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::new();
    for (i, name) in raw.enumerate() {
        let name = if name.trim().is_empty() {
            format!("Unnamed: {}", i)
        } else {
            name
        };
        let unique = match seen.get(&name).copied() {
            None => name.clone(),
            Some(mut n) => {
                let mut candidate = format!("{}.{}", name, n);
                while seen.contains_key(&candidate) {
                    n += 1;
                    candidate = format!("{}.{}", name, n);
                }
                seen.insert(name.clone(), n + 1);
                candidate
            }
        };
        seen.entry(name).or_insert(1);
        seen.insert(unique.clone(), 1);
        out.push(unique);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DType;

    #[test]
    fn test_header_mangling() {
        let headers = mangle_headers(
            vec!["a", "", "a", "b", "a"].into_iter().map(String::from),
        );
        assert_eq!(headers, vec!["a", "Unnamed: 1", "a.1", "b", "a.2"]);
    }

    #[test]
    fn test_short_rows_are_padded() {
        let ds = Dataset::from_csv_reader("t.csv", "x,y,z\n1,2\n3,4,5\n".as_bytes()).unwrap();
        assert_eq!(ds.rows(), 2);
        assert_eq!(ds.column("z").unwrap().null_count(), 1);
        assert_eq!(ds.column("z").unwrap().dtype, DType::Float64);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let ds = Dataset::from_csv_reader("t.csv", "x,y\n1,2\n,\n3,4\n".as_bytes()).unwrap();
        assert_eq!(ds.rows(), 2);
    }

    #[test]
    fn test_na_tokens() {
        let ds = Dataset::from_csv_reader("t.csv", "a\nNA\nnull\n5\n".as_bytes()).unwrap();
        assert_eq!(ds.column("a").unwrap().null_count(), 2);
    }

    #[test]
    fn test_quoted_fields() {
        let ds = Dataset::from_csv_reader(
            "t.csv",
            "name,notes\n\"Smith, J\",\"said \"\"hi\"\"\"\n".as_bytes(),
        )
        .unwrap();
        assert_eq!(ds.column("name").unwrap().values[0], Value::Text("Smith, J".into()));
        assert_eq!(ds.column("notes").unwrap().values[0], Value::Text("said \"hi\"".into()));
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.parquet");
        std::fs::write(&path, b"PAR1").unwrap();
        assert!(matches!(load(&path), Err(CopilotError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_load_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Sales.CSV");
        std::fs::write(&path, "a,b\n1,x\n").unwrap();
        let ds = load(&path).unwrap();
        assert_eq!(ds.name(), "Sales.CSV");
        assert_eq!(ds.column_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported(Path::new("a.xlsx")));
        assert!(is_supported(Path::new("a.CSV")));
        assert!(!is_supported(Path::new("a.txt")));
        assert!(!is_supported(Path::new("noext")));
    }

    #[test]
    fn test_excel_serial_dates() {
        let dt = excel_serial_to_datetime(45292.5).unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M").to_string(), "2024-01-01 12:00");
    }
}
