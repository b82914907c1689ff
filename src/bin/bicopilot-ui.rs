// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! BI Copilot dashboard
//!
//! Server-rendered front end for the API service.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use bicopilot::config::AppConfig;
use bicopilot::Result;

#[derive(Parser, Debug)]
#[command(name = "bicopilot-ui")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "BI Copilot web dashboard")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.json", env = "BICOPILOT_CONFIG")]
    config: PathBuf,

    /// Host to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Base URL of the API service
    #[arg(long, env = "BICOPILOT_API_URL")]
    api_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Open browser automatically
    #[arg(long)]
    open: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("BI Copilot dashboard v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(&args.config)?;
    let mut ui = config.ui;
    if let Some(host) = args.host {
        ui.host = host;
    }
    if let Some(port) = args.port {
        ui.port = port;
    }
    if let Some(api_url) = args.api_url {
        ui.api_url = api_url;
    }
    info!("Using API at {}", ui.api_url);

    if args.open {
        let url = format!("http://localhost:{}", ui.port);
        if let Err(e) = open_browser(&url) {
            error!("Failed to open browser: {}", e);
        }
    }

    bicopilot::ui::start_server(ui, Duration::from_secs(config.llm.timeout_secs + 30)).await
}

fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd").args(["/c", "start", url]).spawn()?;
    }
    Ok(())
}
