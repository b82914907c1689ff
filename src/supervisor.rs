// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Child-process supervision for running the API and dashboard together

use futures_util::future::select_all;
use std::path::PathBuf;
use std::process::ExitStatus;
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

use crate::{CopilotError, Result};

/// One service to run as a child process
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ServiceSpec {
    pub fn new(name: &str, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// The first service to exit and its exit code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub name: String,
    pub code: i32,
}

/// Shell-style exit code: the process code, or 128 + signal
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// A set of running children
pub struct Supervisor {
    children: Vec<(String, Child)>,
}

impl Supervisor {
    /// Start every service; already started ones are killed if one fails
    pub fn spawn(specs: &[ServiceSpec]) -> Result<Self> {
        if specs.is_empty() {
            return Err(CopilotError::Config("No services to supervise".to_string()));
        }
        let mut children = Vec::with_capacity(specs.len());
        for spec in specs {
            let child = Command::new(&spec.program)
                .args(&spec.args)
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    error!("Failed to start {} ({}): {}", spec.name, spec.program.display(), e);
                    e
                })?;
            info!("Started {} (pid {:?})", spec.name, child.id());
            children.push((spec.name.clone(), child));
        }
        Ok(Self { children })
    }

    /// Wait until any child exits
    pub async fn wait_first(&mut self) -> Result<ExitReport> {
        let (status, index) = {
            let waits = self.children.iter_mut().map(|(_, child)| Box::pin(child.wait()));
            let (status, index, _rest) = select_all(waits).await;
            (status, index)
        };
        let name = self.children[index].0.clone();
        let code = exit_code(status?);
        info!("{} exited with code {}", name, code);
        Ok(ExitReport { name, code })
    }

    /// Kill and reap every child still running
    pub async fn shutdown(&mut self) {
        for (name, child) in &mut self.children {
            if let Ok(Some(_)) = child.try_wait() {
                continue;
            }
            if let Err(e) = child.start_kill() {
                warn!("Could not stop {}: {}", name, e);
                continue;
            }
            let _ = child.wait().await;
            info!("Stopped {}", name);
        }
    }
}

/// Run every service until the first exits, then stop the rest
pub async fn supervise(specs: &[ServiceSpec]) -> Result<ExitReport> {
    let mut supervisor = Supervisor::spawn(specs)?;
    let report = supervisor.wait_first().await;
    supervisor.shutdown().await;
    report
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn sh(name: &str, script: &str) -> ServiceSpec {
        ServiceSpec::new(name, "/bin/sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_first_exit_code_wins() {
        let started = Instant::now();
        let report = supervise(&[sh("api", "sleep 30"), sh("ui", "exit 3")]).await.unwrap();
        assert_eq!(report, ExitReport { name: "ui".into(), code: 3 });
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_clean_exit_is_zero() {
        let report = supervise(&[sh("api", "exit 0"), sh("ui", "sleep 30")]).await.unwrap();
        assert_eq!(report.code, 0);
        assert_eq!(report.name, "api");
    }

    #[tokio::test]
    async fn test_signal_exit_code() {
        let report = supervise(&[sh("api", "kill -TERM $$"), sh("ui", "sleep 30")]).await.unwrap();
        assert_eq!(report.code, 128 + 15);
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let specs = [ServiceSpec::new("ghost", "/nonexistent/bicopilot-ghost")];
        assert!(supervise(&specs).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_service_list() {
        assert!(matches!(supervise(&[]).await, Err(CopilotError::Config(_))));
    }
}
