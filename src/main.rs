// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! BI Copilot command line: run analyses locally, query datasets and manage
//! the task database.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use bicopilot::agents::{Agents, AnalysisResults, ForecastOutcome, ReportType};
use bicopilot::config::AppConfig;
use bicopilot::dataset::{self, Dataset};
use bicopilot::db::{self, Database};
use bicopilot::llm::{LlmRouter, OllamaClient, Provider};
use bicopilot::web::progress::{ProgressHub, TaskObserver};
use bicopilot::workflow::{AnalysisType, Workflow, WorkflowState};
use bicopilot::{CopilotError, Result};

/// BI Copilot CLI - AI Business Intelligence Copilot
#[derive(Parser, Debug)]
#[command(name = "bicopilot")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Multi-agent dataset analysis with LLM-backed queries", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full agent pipeline on a dataset
    Analyze {
        /// CSV or spreadsheet to analyze
        file: PathBuf,

        /// full or quick
        #[arg(long, default_value = "full")]
        analysis_type: String,

        /// pdf or markdown
        #[arg(long, default_value = "pdf")]
        report_type: String,
    },

    /// Answer a question with LLM-generated SQL
    Sql {
        file: PathBuf,
        question: String,
    },

    /// Ask the analyst a free-form question about a dataset
    Ask {
        file: PathBuf,
        question: String,
    },

    /// Database operations
    Db {
        #[command(subcommand)]
        action: DbCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show LLM provider and database status
    Status,

    /// Initialize a working directory
    Init {
        /// Directory to initialize (default: current)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum DbCommands {
    /// Show database statistics
    Stats,

    /// List recent analysis tasks
    Tasks {
        /// Maximum number to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Export tasks and their results to JSON
    Export {
        /// Output file
        output: PathBuf,
    },

    /// Vacuum database (reclaim space)
    Vacuum,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load(&cli.config)?;
    let json = cli.format == "json";

    match cli.command {
        Commands::Analyze { file, analysis_type, report_type } => {
            run_analyze(config, &file, &analysis_type, &report_type, json).await
        }
        Commands::Sql { file, question } => run_sql(config, &file, &question).await,
        Commands::Ask { file, question } => run_ask(config, &file, &question, json).await,
        Commands::Db { action } => run_db_command(config, action, json),
        Commands::Config { action } => run_config_command(config, action, &cli.config),
        Commands::Status => run_status(config).await,
        Commands::Init { dir, force } => run_init(dir, force),
    }
}

fn build_agents(config: &AppConfig) -> Result<Agents> {
    let llm = Arc::new(LlmRouter::from_config(&config.llm)?);
    let chain = llm.active_chain();
    if chain.is_empty() {
        warn!("No LLM provider available; LLM answers will use safe mode");
    } else {
        info!("LLM chain: {}", chain.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(" -> "));
    }
    Ok(Agents::new(config, llm))
}

fn load_dataset(file: &Path) -> Result<Dataset> {
    if !dataset::loader::is_supported(file) {
        return Err(CopilotError::UnsupportedFormat(file.display().to_string()));
    }
    Dataset::load(file)
}

/// Run the pipeline in-process and record the task like the API does
async fn run_analyze(config: AppConfig, file: &Path, analysis_type: &str, report_type: &str, json: bool) -> Result<()> {
    if !file.is_file() {
        return Err(CopilotError::NotFound(file.display().to_string()));
    }
    if !dataset::loader::is_supported(file) {
        return Err(CopilotError::UnsupportedFormat(file.display().to_string()));
    }
    config.storage.ensure_dirs()?;

    let analysis_type = AnalysisType::from_param(analysis_type);
    let report_type = ReportType::from_param(report_type);
    let agents = build_agents(&config)?;
    let db = Database::open(&config.database.path)?;

    let task_id = db::new_task_id();
    let hash = dataset::fingerprint(file)?;
    if let Some(previous) = db.find_task_by_hash(&hash)? {
        info!("{} was already analyzed as task {}", file.display(), previous);
    }
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.display().to_string());
    db.insert_task(
        &task_id,
        &filename,
        &file.to_string_lossy(),
        &hash,
        analysis_type.as_str(),
        report_type.as_str(),
    )?;

    let observer = TaskObserver::new(db.clone(), ProgressHub::new(16));
    let workflow = Workflow::for_analysis(analysis_type);
    let results = workflow
        .run(&agents, WorkflowState::new(&task_id, file, report_type), &observer)
        .await?;

    if json {
        let output = serde_json::json!({ "task_id": task_id, "results": results });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_results(&task_id, &results);
    }
    Ok(())
}

fn print_results(task_id: &str, results: &AnalysisResults) {
    println!("Task {}", task_id);
    if let Some(summary) = &results.summary {
        println!("  Dataset: {} ({} rows x {} columns)", summary.dataset_name, summary.rows, summary.columns);
        if let Some(semantic) = &summary.semantic {
            println!("  About: {}", semantic.description);
        }
    }
    if let Some(quality) = &results.data_quality {
        println!(
            "  Quality score: {} ({} missing cells, {} duplicate rows)",
            quality.quality_score, quality.missing_values.total_missing, quality.duplicates.count
        );
        for issue in &quality.inconsistencies {
            println!("    ! {}", issue);
        }
    }
    if let Some(stats) = &results.statistical_analysis {
        println!("  Numeric columns: {}", stats.descriptive_stats.numeric.len());
        let flagged: usize = stats.outliers.iter().map(|(_, o)| o.count).sum();
        println!("  Outliers flagged: {}", flagged);
    }
    if let Some(charts) = &results.visualizations {
        println!("  Charts: {}", charts.iter().count());
    }
    match &results.forecast {
        Some(ForecastOutcome::Success(f)) => println!(
            "  Forecast: {} by {} (MAE {}, RMSE {})",
            f.target_column, f.date_column, f.metrics.mae, f.metrics.rmse
        ),
        Some(ForecastOutcome::Skipped { reason }) => println!("  Forecast skipped: {}", reason),
        Some(ForecastOutcome::Failed { error }) => println!("  Forecast failed: {}", error),
        None => {}
    }
    if let Some(report) = &results.report {
        println!("  Report: {}", report.primary_path());
        println!("\n{}", report.executive_summary);
    }
}

async fn run_sql(config: AppConfig, file: &Path, question: &str) -> Result<()> {
    let ds = load_dataset(file)?;
    let agents = build_agents(&config)?;
    let outcome = agents.sql.execute_query(&ds, question).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_ask(config: AppConfig, file: &Path, question: &str, json: bool) -> Result<()> {
    let ds = load_dataset(file)?;
    let agents = build_agents(&config)?;
    let answer = agents.semantic.answer_query(&ds, question, None).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        match serde_json::to_value(&answer)? {
            serde_json::Value::Object(map) => {
                let text = map
                    .get("answer")
                    .or_else(|| map.get("error"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                println!("{}", text);
            }
            other => println!("{}", other),
        }
    }
    Ok(())
}

fn run_db_command(config: AppConfig, action: DbCommands, json: bool) -> Result<()> {
    let db = Database::open(&config.database.path)?;

    match action {
        DbCommands::Stats => {
            let stats = db.get_stats()?;
            let feedback = db.feedback_summary()?;
            if json {
                let output = serde_json::json!({ "stats": stats, "feedback": feedback });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("Database Statistics:");
                println!("  Tasks: {}", stats.task_count);
                println!("    completed: {}", stats.completed);
                println!("    failed: {}", stats.failed);
                println!("    processing: {}", stats.processing);
                println!("  Stored results: {}", stats.results_count);
                println!(
                    "  Feedback: {} ({} positive, {} negative)",
                    feedback.total, feedback.positive, feedback.negative
                );
            }
        }
        DbCommands::Tasks { limit } => {
            let tasks = db.recent_tasks(limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                println!("Recent tasks:");
                for task in tasks {
                    println!(
                        "  {} {} {:<10} {:>3.0}% {}",
                        task.created_at.format("%Y-%m-%d %H:%M"),
                        task.id,
                        task.status.as_str(),
                        task.progress * 100.0,
                        task.filename
                    );
                }
            }
        }
        DbCommands::Export { output } => {
            let tasks = db.recent_tasks(i64::MAX as usize)?;
            let mut entries = Vec::with_capacity(tasks.len());
            for task in tasks {
                let results = db.get_results::<serde_json::Value>(&task.id)?;
                entries.push(serde_json::json!({ "task": task, "results": results }));
            }
            std::fs::write(&output, serde_json::to_string_pretty(&entries)?)?;
            println!("Exported {} tasks to {:?}", entries.len(), output);
        }
        DbCommands::Vacuum => {
            db.vacuum()?;
            println!("Database vacuumed successfully");
        }
    }

    Ok(())
}

fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  API: {}:{}", config.api.host, config.api.port);
            println!("  UI: {}:{} -> {}", config.ui.host, config.ui.port, config.ui.api_url);
            println!("  Primary LLM provider: {}", config.llm.primary);
            println!("  Database: {}", config.database.path);
        }
    }

    Ok(())
}

async fn run_status(config: AppConfig) -> Result<()> {
    println!("BI Copilot v{} Status", env!("CARGO_PKG_VERSION"));
    println!("======================");

    println!("\nLLM providers (chain from {}):", config.llm.primary);
    for provider in config.llm.primary.chain_from() {
        let settings = config.llm.provider(provider);
        let key = match (&settings.api_key_env, config.llm.api_key(provider)) {
            (None, _) => "no key needed".to_string(),
            (Some(var), Some(_)) => format!("{} set", var),
            (Some(var), None) => format!("{} missing", var),
        };
        let enabled = if settings.enabled { "enabled" } else { "disabled" };
        println!("  {:<12} {:<9} {:<28} {} model(s)", provider.as_str(), enabled, key, settings.models.len());
    }

    let ollama = &config.llm.ollama;
    if ollama.enabled {
        let client = OllamaClient::new(&ollama.base_url, Duration::from_secs(config.llm.timeout_secs))?;
        match client.health_check().await {
            Ok(()) => {
                println!("\nOllama: Running at {}", ollama.base_url);
                match client.list_models().await {
                    Ok(models) => {
                        for m in &models {
                            let marker = if ollama.models.contains(m) { "→" } else { " " };
                            println!("  {} {}", marker, m);
                        }
                    }
                    Err(e) => println!("  Error listing models: {}", e),
                }
            }
            Err(e) => println!("\nOllama: Error - {}", e),
        }
    }

    match Database::open(&config.database.path) {
        Ok(db) => {
            let stats = db.get_stats()?;
            println!("\nDatabase ({}):", config.database.path);
            println!("  Tasks: {} ({} completed, {} failed)", stats.task_count, stats.completed, stats.failed);
        }
        Err(e) => println!("\nDatabase: ✗ Error - {}", e),
    }

    Ok(())
}

fn run_init(dir: Option<PathBuf>, force: bool) -> Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    let config_path = target.join("config.json");

    if config_path.exists() && !force {
        return Err(CopilotError::Config(
            "config.json already exists. Use --force to overwrite".to_string(),
        ));
    }

    let config = AppConfig::default();
    config.storage.rooted_at(&target).ensure_dirs()?;
    std::fs::create_dir_all(&target)?;
    config.save(&config_path)?;

    println!("BI Copilot initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - config.json");
    for dir in ["uploads/", "artifacts/charts/", "artifacts/forecasts/", "reports/"] {
        println!("  - {}", dir);
    }
    println!("\nNext steps:");
    println!("  1. export GROQ_API_KEY=... (or run Ollama locally)");
    println!("  2. Start both services: bicopilot-launch");
    println!("  3. Or analyze directly: bicopilot analyze data.csv");
    if !Provider::CHAIN.iter().any(|p| config.llm.api_key(*p).is_some_and(|k| !k.is_empty())) {
        println!("\nNo provider API key found in the environment yet.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["bicopilot"]).is_err());
    }

    #[test]
    fn test_cli_analyze_command() {
        let cli = Cli::try_parse_from([
            "bicopilot", "analyze", "/tmp/sales.csv", "--analysis-type", "quick", "--report-type", "markdown",
        ])
        .unwrap();

        match cli.command {
            Commands::Analyze { file, analysis_type, report_type } => {
                assert_eq!(file, PathBuf::from("/tmp/sales.csv"));
                assert_eq!(analysis_type, "quick");
                assert_eq!(report_type, "markdown");
            }
            _ => panic!("Expected Analyze command"),
        }
    }

    #[test]
    fn test_cli_analyze_defaults() {
        let cli = Cli::try_parse_from(["bicopilot", "analyze", "data.xlsx"]).unwrap();
        match cli.command {
            Commands::Analyze { analysis_type, report_type, .. } => {
                assert_eq!(analysis_type, "full");
                assert_eq!(report_type, "pdf");
            }
            _ => panic!("Expected Analyze command"),
        }
        assert_eq!(cli.format, "text");
    }

    #[test]
    fn test_cli_sql_command_with_global_flags() {
        let cli = Cli::try_parse_from([
            "bicopilot", "sql", "data.csv", "show total sales by region", "--format", "json", "-q",
        ])
        .unwrap();
        assert_eq!(cli.format, "json");
        assert!(cli.quiet);
        match cli.command {
            Commands::Sql { question, .. } => assert_eq!(question, "show total sales by region"),
            _ => panic!("Expected Sql command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["bicopilot", "status", "--format", "xml"]).is_err());
    }

    #[test]
    fn test_cli_db_tasks_limit() {
        let cli = Cli::try_parse_from(["bicopilot", "db", "tasks", "--limit", "5"]).unwrap();
        match cli.command {
            Commands::Db { action: DbCommands::Tasks { limit } } => assert_eq!(limit, 5),
            _ => panic!("Expected Db Tasks command"),
        }
    }

    #[test]
    fn test_init_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        run_init(Some(dir.path().to_path_buf()), false).unwrap();
        assert!(dir.path().join("config.json").exists());
        assert!(dir.path().join("artifacts/charts").is_dir());
        assert!(run_init(Some(dir.path().to_path_buf()), false).is_err());
        assert!(run_init(Some(dir.path().to_path_buf()), true).is_ok());
    }
}
