// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! BI Copilot API service
//!
//! Accepts uploads, runs the analysis workflow and answers queries.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use bicopilot::config::AppConfig;
use bicopilot::db::Database;
use bicopilot::Result;

#[derive(Parser, Debug)]
#[command(name = "bicopilot-api")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "BI Copilot API server")]
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

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable trace logging
    #[arg(long)]
    trace: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.trace {
        "trace"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("BI Copilot API v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(&args.config)?;
    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }

    let db = Database::open(&config.database.path)?;
    info!("Database: {}", config.database.path);

    bicopilot::web::start_server(config, db).await
}
