// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Database module for analysis tasks, stored results and user feedback

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::{CopilotError, Result};

/// Database manager (thread-safe wrapper)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Lifecycle of an analysis task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    fn from_db(s: &str) -> Self {
        match s {
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Processing,
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }
}

/// A recorded analysis task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub filename: String,
    pub file_path: String,
    pub file_hash: String,
    pub analysis_type: String,
    pub report_type: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub current_agent: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Thumbs up/down tally
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedbackSummary {
    pub total: i64,
    pub positive: i64,
    pub negative: i64,
}

/// Database statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStats {
    pub task_count: i64,
    pub completed: i64,
    pub failed: i64,
    pub processing: i64,
    pub results_count: i64,
    pub feedback_count: i64,
}

const TASK_COLUMNS: &str = "id, filename, file_path, file_hash, analysis_type, report_type, \
                            status, progress, current_agent, error, created_at, updated_at";

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    let status: String = row.get(6)?;
    let created: String = row.get(10)?;
    let updated: String = row.get(11)?;
    Ok(TaskRecord {
        id: row.get(0)?,
        filename: row.get(1)?,
        file_path: row.get(2)?,
        file_hash: row.get(3)?,
        analysis_type: row.get(4)?,
        report_type: row.get(5)?,
        status: TaskStatus::from_db(&status),
        progress: row.get(7)?,
        current_agent: row.get(8)?,
        error: row.get(9)?,
        created_at: parse_time(&created),
        updated_at: parse_time(&updated),
    })
}

impl Database {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CopilotError::Config("Database lock poisoned".to_string()))
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_hash TEXT NOT NULL,
                analysis_type TEXT NOT NULL,
                report_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'processing',
                progress REAL NOT NULL DEFAULT 0.0,
                current_agent TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS results (
                task_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                rating INTEGER NOT NULL,
                comment TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_hash ON tasks(file_hash);
            CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_at);
            CREATE INDEX IF NOT EXISTS idx_feedback_task ON feedback(task_id);
        "#,
        )?;
        Ok(())
    }

    /// Record a new task in the processing state
    pub fn insert_task(
        &self,
        id: &str,
        filename: &str,
        file_path: &str,
        file_hash: &str,
        analysis_type: &str,
        report_type: &str,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        let ts = now();
        conn.execute(
            r#"INSERT INTO tasks (id, filename, file_path, file_hash, analysis_type, report_type,
                                  status, progress, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'processing', 0.0, ?7, ?7)"#,
            params![id, filename, file_path, file_hash, analysis_type, report_type, ts],
        )?;
        Ok(())
    }

    pub fn update_progress(&self, id: &str, progress: f64, current_agent: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE tasks SET progress = ?2, current_agent = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, progress, current_agent, now()],
        )?;
        Ok(())
    }

    pub fn mark_completed(&self, id: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"UPDATE tasks SET status = 'completed', progress = 1.0, current_agent = NULL,
                                updated_at = ?2 WHERE id = ?1"#,
            params![id, now()],
        )?;
        Ok(())
    }

    pub fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE tasks SET status = 'failed', error = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, error, now()],
        )?;
        Ok(())
    }

    /// Fail tasks left processing by a previous run; returns how many
    pub fn fail_interrupted(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let n = conn.execute(
            r#"UPDATE tasks SET status = 'failed', error = 'Interrupted by service restart',
                                updated_at = ?1 WHERE status = 'processing'"#,
            params![now()],
        )?;
        Ok(n)
    }

    pub fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        let conn = self.lock_conn()?;
        let task = conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// Most recent tasks first
    pub fn recent_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(params![limit as i64], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Latest task that analyzed a file with this fingerprint
    pub fn find_task_by_hash(&self, hash: &str) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        let id = conn
            .query_row(
                "SELECT id FROM tasks WHERE file_hash = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn save_results<T: Serialize>(&self, task_id: &str, results: &T) -> Result<()> {
        let payload = serde_json::to_string(results)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO results (task_id, payload, created_at) VALUES (?1, ?2, ?3)",
            params![task_id, payload, now()],
        )?;
        Ok(())
    }

    pub fn get_results<T: DeserializeOwned>(&self, task_id: &str) -> Result<Option<T>> {
        let payload: Option<String> = {
            let conn = self.lock_conn()?;
            conn.query_row(
                "SELECT payload FROM results WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?
        };
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    /// Store a rating; returns the feedback id
    pub fn insert_feedback(&self, task_id: &str, rating: bool, comment: Option<&str>) -> Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO feedback (task_id, rating, comment, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![task_id, rating, comment, now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn feedback_summary(&self) -> Result<FeedbackSummary> {
        let conn = self.lock_conn()?;
        let summary = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(rating), 0) FROM feedback",
            [],
            |row| {
                let total: i64 = row.get(0)?;
                let positive: i64 = row.get(1)?;
                Ok(FeedbackSummary { total, positive, negative: total - positive })
            },
        )?;
        Ok(summary)
    }

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DbStats> {
        let conn = self.lock_conn()?;
        let count = |sql: &str| -> rusqlite::Result<i64> { conn.query_row(sql, [], |row| row.get(0)) };
        Ok(DbStats {
            task_count: count("SELECT COUNT(*) FROM tasks")?,
            completed: count("SELECT COUNT(*) FROM tasks WHERE status = 'completed'")?,
            failed: count("SELECT COUNT(*) FROM tasks WHERE status = 'failed'")?,
            processing: count("SELECT COUNT(*) FROM tasks WHERE status = 'processing'")?,
            results_count: count("SELECT COUNT(*) FROM results")?,
            feedback_count: count("SELECT COUNT(*) FROM feedback")?,
        })
    }

    /// Vacuum database
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("VACUUM", [])?;
        Ok(())
    }
}

/// Generate a new task id
pub fn new_task_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_task(id: &str) -> Database {
        let db = Database::in_memory().unwrap();
        db.insert_task(id, "sales.csv", "uploads/x_sales.csv", "abc", "full", "pdf").unwrap();
        db
    }

    #[test]
    fn test_task_lifecycle() {
        let db = db_with_task("t1");
        let task = db.get_task("t1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.progress, 0.0);

        db.update_progress("t1", 0.5, "Statistical Agent").unwrap();
        let task = db.get_task("t1").unwrap().unwrap();
        assert_eq!(task.current_agent.as_deref(), Some("Statistical Agent"));

        db.mark_completed("t1").unwrap();
        let task = db.get_task("t1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 1.0);
        assert!(task.current_agent.is_none());
        assert!(task.status.is_finished());
    }

    #[test]
    fn test_failure_and_unknown_task() {
        let db = db_with_task("t1");
        db.mark_failed("t1", "boom").unwrap();
        let task = db.get_task("t1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("boom"));
        assert!(db.get_task("nope").unwrap().is_none());
    }

    #[test]
    fn test_results_round_trip() {
        let db = db_with_task("t1");
        assert!(db.get_results::<serde_json::Value>("t1").unwrap().is_none());
        db.save_results("t1", &serde_json::json!({"summary": {"rows": 3}})).unwrap();
        let back: serde_json::Value = db.get_results("t1").unwrap().unwrap();
        assert_eq!(back["summary"]["rows"], 3);
    }

    #[test]
    fn test_hash_lookup_and_recent() {
        let db = db_with_task("t1");
        db.insert_task("t2", "other.csv", "uploads/o.csv", "def", "quick", "markdown").unwrap();
        assert_eq!(db.find_task_by_hash("abc").unwrap().as_deref(), Some("t1"));
        assert!(db.find_task_by_hash("zzz").unwrap().is_none());

        let recent = db.recent_tasks(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "t2");
        assert_eq!(db.recent_tasks(1).unwrap().len(), 1);
    }

    #[test]
    fn test_feedback_summary() {
        let db = db_with_task("t1");
        db.insert_feedback("t1", true, Some("great")).unwrap();
        db.insert_feedback("t1", false, None).unwrap();
        db.insert_feedback("t1", true, None).unwrap();
        assert_eq!(
            db.feedback_summary().unwrap(),
            FeedbackSummary { total: 3, positive: 2, negative: 1 }
        );
    }

    #[test]
    fn test_stats_and_interrupted() {
        let db = db_with_task("t1");
        db.insert_task("t2", "b.csv", "uploads/b.csv", "h2", "full", "pdf").unwrap();
        db.mark_completed("t2").unwrap();
        assert_eq!(db.fail_interrupted().unwrap(), 1);

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.task_count, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processing, 0);
        db.vacuum().unwrap();
    }

    #[test]
    fn test_task_ids_are_uuids() {
        let id = new_task_id();
        assert_eq!(id.len(), 36);
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
