// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Task progress fan-out: database updates plus a broadcast channel feeding
//! the websocket endpoint

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::agents::AnalysisResults;
use crate::db::{Database, TaskRecord, TaskStatus};
use crate::workflow::ProgressObserver;

/// One progress update as sent to websocket clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub current_agent: Option<String>,
    pub error: Option<String>,
}

impl From<&TaskRecord> for ProgressEvent {
    fn from(task: &TaskRecord) -> Self {
        Self {
            task_id: task.id.clone(),
            status: task.status,
            progress: task.progress,
            current_agent: task.current_agent.clone(),
            error: task.error.clone(),
        }
    }
}

/// Broadcast hub shared by every running workflow
#[derive(Clone)]
pub struct ProgressHub {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Send to every subscriber; events without listeners are dropped
    pub fn publish(&self, event: ProgressEvent) {
        if let Ok(n) = self.tx.send(event) {
            debug!("Progress event delivered to {} subscribers", n);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

/// Persists workflow progress and republishes it on the hub
pub struct TaskObserver {
    db: Database,
    hub: ProgressHub,
}

impl TaskObserver {
    pub fn new(db: Database, hub: ProgressHub) -> Self {
        Self { db, hub }
    }
}

impl ProgressObserver for TaskObserver {
    fn on_stage(&self, task_id: &str, stage: &str, progress: f64) {
        info!("[{}] Running {}", task_id, stage);
        if let Err(e) = self.db.update_progress(task_id, progress, stage) {
            error!("Failed to record progress for {}: {}", task_id, e);
        }
        self.hub.publish(ProgressEvent {
            task_id: task_id.to_string(),
            status: TaskStatus::Processing,
            progress,
            current_agent: Some(stage.to_string()),
            error: None,
        });
    }

    fn on_complete(&self, task_id: &str, results: &AnalysisResults) {
        info!("Workflow completed for {}", task_id);
        let saved = self
            .db
            .save_results(task_id, results)
            .and_then(|_| self.db.mark_completed(task_id));
        if let Err(e) = saved {
            error!("Failed to store results for {}: {}", task_id, e);
        }
        self.hub.publish(ProgressEvent {
            task_id: task_id.to_string(),
            status: TaskStatus::Completed,
            progress: 1.0,
            current_agent: None,
            error: None,
        });
    }

    fn on_failure(&self, task_id: &str, message: &str) {
        error!("Workflow failed for {}: {}", task_id, message);
        if let Err(e) = self.db.mark_failed(task_id, message) {
            error!("Failed to record failure for {}: {}", task_id, e);
        }
        let progress = self
            .db
            .get_task(task_id)
            .ok()
            .flatten()
            .map(|t| t.progress)
            .unwrap_or(0.0);
        self.hub.publish(ProgressEvent {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
            progress,
            current_agent: None,
            error: Some(message.to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_observer_persists_and_publishes() {
        let db = Database::in_memory().unwrap();
        db.insert_task("t", "a.csv", "uploads/t_a.csv", "h", "full", "pdf").unwrap();
        let hub = ProgressHub::new(16);
        let mut rx = hub.subscribe();
        let observer = TaskObserver::new(db.clone(), hub);

        observer.on_stage("t", "Data Quality Agent", 0.25);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.current_agent.as_deref(), Some("Data Quality Agent"));
        assert_eq!(db.get_task("t").unwrap().unwrap().progress, 0.25);

        observer.on_complete("t", &AnalysisResults::default());
        assert_eq!(rx.recv().await.unwrap().status, TaskStatus::Completed);
        assert!(db.get_results::<AnalysisResults>("t").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failure_keeps_progress() {
        let db = Database::in_memory().unwrap();
        db.insert_task("t", "a.csv", "uploads/t_a.csv", "h", "full", "pdf").unwrap();
        db.update_progress("t", 0.5, "Visualization Agent").unwrap();
        let hub = ProgressHub::new(4);
        let mut rx = hub.subscribe();

        TaskObserver::new(db.clone(), hub).on_failure("t", "boom");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.status, TaskStatus::Failed);
        assert_eq!(event.progress, 0.5);
        assert_eq!(event.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_publish_without_subscribers() {
        ProgressHub::new(1).publish(ProgressEvent {
            task_id: "t".into(),
            status: TaskStatus::Processing,
            progress: 0.0,
            current_agent: None,
            error: None,
        });
    }
}
