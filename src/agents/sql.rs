// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Natural language to SQL over an in-memory copy of the dataset

use minijinja::context;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{clean_sql, render_prompt};
use crate::dataset::{DType, Dataset, OrderedMap, Value};
use crate::llm::{ChatMessage, LlmRouter};
use crate::Result;

/// Table the dataset is loaded into
pub const TABLE_NAME: &str = "dataset";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SqlOutcome {
    Success {
        query: String,
        sql: String,
        result: Vec<serde_json::Map<String, serde_json::Value>>,
        row_count: usize,
        #[serde(default)]
        truncated: bool,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sql: Option<String>,
    },
}

impl SqlOutcome {
    fn error(message: impl Into<String>, sql: Option<&str>) -> Self {
        SqlOutcome::Error { error: message.into(), sql: sql.map(str::to_string) }
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(dtype: DType) -> &'static str {
    match dtype {
        DType::Int64 | DType::Bool => "INTEGER",
        DType::Float64 => "REAL",
        DType::DateTime | DType::Object => "TEXT",
    }
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) if f.is_nan() => SqlValue::Null,
        Value::Float(f) => SqlValue::Real(*f),
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::DateTime(dt) => SqlValue::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        Value::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => i.into(),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned().into(),
    }
}

/// First keyword of a statement, skipping comments and opening parentheses
fn leading_keyword(sql: &str) -> String {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(comment) = rest.strip_prefix("--") {
            rest = comment.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(comment) = rest.strip_prefix("/*") {
            rest = comment.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            break;
        }
    }
    rest.chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Only plain queries run; `ATTACH` and pragmas pass SQLite's read-only check
fn is_query(sql: &str) -> bool {
    matches!(leading_keyword(sql).as_str(), "SELECT" | "WITH")
}

/// Copy the dataset into an in-memory SQLite table named `dataset`
pub fn df_to_sqlite(ds: &Dataset) -> Result<Connection> {
    let conn = Connection::open_in_memory()?;

    let columns: Vec<String> = ds
        .columns()
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), sql_type(c.dtype)))
        .collect();
    conn.execute_batch(&format!("CREATE TABLE {} ({});", TABLE_NAME, columns.join(", ")))?;

    if ds.columns().is_empty() {
        return Ok(conn);
    }

    let placeholders = vec!["?"; ds.columns().len()].join(", ");
    let insert = format!("INSERT INTO {} VALUES ({})", TABLE_NAME, placeholders);
    {
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&insert)?;
            for row in 0..ds.rows() {
                let values = ds.columns().iter().map(|c| to_sql_value(&c.values[row]));
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;
    }
    debug!("Loaded {} rows into SQLite table {}", ds.rows(), TABLE_NAME);
    Ok(conn)
}

/// `column    dtype` lines, one per column
fn schema_listing(schema: &OrderedMap<String>) -> String {
    let width = schema.keys().map(|k| k.len()).max().unwrap_or(0);
    schema
        .iter()
        .map(|(name, dtype)| format!("{:<width$}    {}", name, dtype, width = width))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct SqlAgent {
    llm: Arc<LlmRouter>,
    prompt: String,
    max_rows: usize,
}

impl SqlAgent {
    pub fn new(llm: Arc<LlmRouter>, prompt: &str, max_rows: usize) -> Self {
        Self { llm, prompt: prompt.to_string(), max_rows }
    }

    /// Ask the LLM for a query. Empty when generation failed.
    pub async fn generate_sql(&self, query: &str, schema: &OrderedMap<String>) -> String {
        let prompt = match render_prompt(&self.prompt, context! { schema => schema_listing(schema), query => query }) {
            Ok(p) => p,
            Err(e) => {
                error!("SQL prompt rendering failed: {}", e);
                return String::new();
            }
        };

        let reply = self.llm.invoke(&[ChatMessage::user(prompt)]).await;
        if reply.is_safe_mode() {
            warn!("SQL generation unavailable: no LLM provider answered");
            return String::new();
        }
        let sql = clean_sql(&reply.content);
        info!("Generated SQL: {}", sql);
        sql
    }

    /// Generate SQL for `query` and run it against the dataset
    pub async fn execute_query(&self, ds: &Dataset, query: &str) -> SqlOutcome {
        let sql = self.generate_sql(query, &ds.dtypes()).await;
        if sql.is_empty() {
            return SqlOutcome::error("Failed to generate SQL.", None);
        }
        self.run_sql(ds, query, &sql)
    }

    /// Execute already generated SQL; only read-only statements are run
    pub fn run_sql(&self, ds: &Dataset, query: &str, sql: &str) -> SqlOutcome {
        match self.try_run(ds, query, sql) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("SQL execution failed: {}", e);
                let message = match e {
                    crate::CopilotError::Database(inner) => inner.to_string(),
                    other => other.to_string(),
                };
                SqlOutcome::error(message, Some(sql))
            }
        }
    }

    fn try_run(&self, ds: &Dataset, query: &str, sql: &str) -> Result<SqlOutcome> {
        if !is_query(sql) {
            warn!("Rejected non-query SQL: {}", sql);
            return Ok(SqlOutcome::error("Only read-only queries are allowed.", Some(sql)));
        }
        let conn = df_to_sqlite(ds)?;
        let mut stmt = conn.prepare(sql)?;
        if !stmt.readonly() {
            warn!("Rejected non read-only SQL: {}", sql);
            return Ok(SqlOutcome::error("Only read-only queries are allowed.", Some(sql)));
        }

        let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let mut rows = stmt.query([])?;
        let mut result = Vec::new();
        let mut row_count = 0;
        while let Some(row) = rows.next()? {
            row_count += 1;
            if result.len() >= self.max_rows {
                continue;
            }
            let mut record = serde_json::Map::new();
            for (i, name) in names.iter().enumerate() {
                record.insert(name.clone(), to_json(row.get_ref(i)?));
            }
            result.push(record);
        }

        Ok(SqlOutcome::Success {
            query: query.to_string(),
            sql: sql.to_string(),
            truncated: row_count > result.len(),
            result,
            row_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::fixtures;
    use crate::dataset::Column;
    use crate::llm::testing::{offline_router, router_with, ScriptedModel};
    use serde_json::json;

    fn agent(router: LlmRouter) -> SqlAgent {
        SqlAgent::new(Arc::new(router), &crate::config::PromptConfig::default().sql, 1000)
    }

    #[test]
    fn test_table_types_follow_dtypes() {
        let conn = df_to_sqlite(&fixtures::messy()).unwrap();
        let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info('dataset')").unwrap();
        let cols: Vec<(String, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(
            cols,
            vec![
                ("id".to_string(), "INTEGER".to_string()),
                ("name".to_string(), "TEXT".to_string()),
                ("price".to_string(), "REAL".to_string()),
                ("mixed".to_string(), "TEXT".to_string()),
            ]
        );
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM dataset", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn test_datetimes_stored_as_text() {
        let dt = chrono::NaiveDate::from_ymd_opt(2024, 2, 3).unwrap().and_hms_opt(4, 5, 6).unwrap();
        let ds = Dataset::new("t", vec![Column::from_values("when", vec![Value::DateTime(dt)])]).unwrap();
        let conn = df_to_sqlite(&ds).unwrap();
        let stored: String = conn.query_row("SELECT \"when\" FROM dataset", [], |r| r.get(0)).unwrap();
        assert_eq!(stored, "2024-02-03 04:05:06");
    }

    #[tokio::test]
    async fn test_fenced_sql_is_cleaned_and_run() {
        let model = ScriptedModel::answering("```sql\nSELECT Region, SUM(Sales) AS total FROM dataset GROUP BY Region ORDER BY Region;\n```");
        let outcome = agent(router_with(model)).execute_query(&fixtures::daily_sales(), "sales by region").await;
        match outcome {
            SqlOutcome::Success { sql, result, row_count, truncated, .. } => {
                assert!(sql.starts_with("SELECT Region"));
                assert_eq!(row_count, 3);
                assert!(!truncated);
                assert_eq!(result[0]["Region"], json!("East"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_safe_mode_is_generation_failure() {
        let outcome = agent(offline_router()).execute_query(&fixtures::messy(), "count rows").await;
        assert_eq!(serde_json::to_value(outcome).unwrap(), json!({"error": "Failed to generate SQL."}));
    }

    #[test]
    fn test_writes_are_rejected() {
        let outcome = agent(offline_router()).run_sql(&fixtures::messy(), "drop it", "DROP TABLE dataset");
        assert_eq!(
            serde_json::to_value(outcome).unwrap(),
            json!({"error": "Only read-only queries are allowed.", "sql": "DROP TABLE dataset"})
        );
    }

    #[test]
    fn test_attach_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("side.db");
        let sql = format!("ATTACH DATABASE '{}' AS side", target.display());
        let outcome = agent(offline_router()).run_sql(&fixtures::messy(), "attach", &sql);
        assert_eq!(
            serde_json::to_value(outcome).unwrap(),
            json!({"error": "Only read-only queries are allowed.", "sql": sql})
        );
        assert!(!target.exists());

        let outcome = agent(offline_router()).run_sql(&fixtures::messy(), "p", "PRAGMA table_info(dataset)");
        assert!(matches!(outcome, SqlOutcome::Error { .. }));
    }

    #[test]
    fn test_leading_keyword() {
        assert_eq!(leading_keyword("  select 1"), "SELECT");
        assert_eq!(leading_keyword("-- totals\nWITH t AS (SELECT 1) SELECT * FROM t"), "WITH");
        assert_eq!(leading_keyword("/* c */ (SELECT 1)"), "SELECT");
        assert_eq!(leading_keyword("attach 'x' as y"), "ATTACH");
        assert!(!is_query("INSERT INTO dataset VALUES (1)"));
    }

    #[test]
    fn test_execution_error_keeps_sql() {
        let outcome = agent(offline_router()).run_sql(&fixtures::messy(), "q", "SELECT nope FROM dataset");
        match outcome {
            SqlOutcome::Error { error, sql } => {
                assert!(error.contains("nope"));
                assert_eq!(sql.as_deref(), Some("SELECT nope FROM dataset"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rows_are_capped() {
        let agent = SqlAgent::new(Arc::new(offline_router()), "{{ query }}", 2);
        match agent.run_sql(&fixtures::daily_sales(), "all", "SELECT * FROM dataset") {
            SqlOutcome::Success { result, row_count, truncated, .. } => {
                assert_eq!(result.len(), 2);
                assert_eq!(row_count, 21);
                assert!(truncated);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_schema_listing_aligns_names() {
        let listing = schema_listing(&fixtures::messy().dtypes());
        assert!(listing.starts_with("id       int64"));
        assert!(listing.contains("price    float64"));
    }
}
