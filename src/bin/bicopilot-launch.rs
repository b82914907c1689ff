// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Starts the API and the dashboard side by side and exits with the status
//! of whichever stops first.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use bicopilot::supervisor::{shutdown_signal, ServiceSpec, Supervisor};

#[derive(Parser, Debug)]
#[command(name = "bicopilot-launch")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Run the BI Copilot API and dashboard together")]
struct Args {
    /// Path to configuration file, passed to both services
    #[arg(short, long, default_value = "config.json", env = "BICOPILOT_CONFIG")]
    config: PathBuf,

    /// Directory holding the service binaries (default: alongside this one)
    #[arg(long)]
    bin_dir: Option<PathBuf>,
}

fn bin_dir(args: &Args) -> Result<PathBuf> {
    if let Some(dir) = &args.bin_dir {
        return Ok(dir.clone());
    }
    let exe = std::env::current_exe().context("Failed to locate the launcher executable")?;
    exe.parent()
        .map(PathBuf::from)
        .context("Launcher executable has no parent directory")
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .init();

    let dir = bin_dir(&args)?;
    let config = args.config.to_string_lossy().to_string();
    let services = [
        ServiceSpec::new("api", dir.join("bicopilot-api")).arg("--config").arg(config.clone()),
        ServiceSpec::new("ui", dir.join("bicopilot-ui")).arg("--config").arg(config),
    ];

    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;
    let code = runtime.block_on(async {
        let mut supervisor = Supervisor::spawn(&services).context("Failed to start services")?;

        let first = tokio::select! {
            report = supervisor.wait_first() => Some(report),
            _ = shutdown_signal() => None,
        };
        supervisor.shutdown().await;

        match first {
            Some(report) => {
                let report = report.context("Failed to wait for services")?;
                info!("{} stopped first, exiting with {}", report.name, report.code);
                Ok::<i32, anyhow::Error>(report.code)
            }
            None => Ok(0),
        }
    })?;

    drop(runtime);
    std::process::exit(code);
}
