// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for the BI Copilot

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::llm::Provider;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// API service settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Dashboard service settings
    #[serde(default)]
    pub ui: UiConfig,

    /// LLM provider chain
    #[serde(default)]
    pub llm: LlmConfig,

    /// Artifact directories
    #[serde(default)]
    pub storage: StorageConfig,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Agent thresholds and limits
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Prompt templates (minijinja syntax)
    #[serde(default)]
    pub prompts: PromptConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
    /// Number of loaded datasets kept in memory for query endpoints
    #[serde(default = "default_cache_entries")]
    pub dataset_cache_entries: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_ui_port")]
    pub port: u16,
    /// Base URL the dashboard uses to reach the API service
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
    /// Largest upload the dashboard forwards to the API
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    /// Provider the chain starts from
    #[serde(default = "default_primary")]
    pub primary: Provider,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Extra attempts per model before moving down the chain
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_ollama")]
    pub ollama: ProviderConfig,
    #[serde(default = "default_groq")]
    pub groq: ProviderConfig,
    #[serde(default = "default_openrouter")]
    pub openrouter: ProviderConfig,
    #[serde(default = "default_huggingface")]
    pub huggingface: ProviderConfig,
}

/// Endpoint, model list and secret location for one provider
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub base_url: String,
    pub models: Vec<String>,
    /// Environment variable holding the API key; `None` for keyless providers
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
    #[serde(default = "default_charts_dir")]
    pub charts_dir: PathBuf,
    #[serde(default = "default_forecasts_dir")]
    pub forecasts_dir: PathBuf,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_strong_correlation")]
    pub strong_correlation_threshold: f64,
    #[serde(default = "default_iqr_multiplier")]
    pub outlier_iqr_multiplier: f64,
    #[serde(default = "default_plot_limit")]
    pub max_distribution_plots: usize,
    #[serde(default = "default_plot_limit")]
    pub max_categorical_plots: usize,
    /// Categorical columns with more distinct values are not charted
    #[serde(default = "default_max_categories")]
    pub max_categories: usize,
    #[serde(default = "default_forecast_periods")]
    pub forecast_periods: usize,
    /// Ask the LLM for a semantic dataset summary during interpretation
    #[serde(default = "default_true")]
    pub llm_summary: bool,
    #[serde(default = "default_sql_max_rows")]
    pub sql_max_rows: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_interpreter_prompt")]
    pub interpreter: String,
    #[serde(default = "default_sql_prompt")]
    pub sql: String,
    #[serde(default = "default_semantic_prompt")]
    pub semantic: String,
    #[serde(default = "default_report_prompt")]
    pub report: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_api_port() -> u16 { 8000 }
fn default_ui_port() -> u16 { 8501 }
fn default_api_url() -> String { "http://localhost:8000".to_string() }
fn default_refresh_secs() -> u64 { 5 }
fn default_max_upload_mb() -> usize { 50 }
fn default_cache_entries() -> usize { 8 }
fn default_primary() -> Provider { Provider::Groq }
fn default_timeout() -> u64 { 120 }
fn default_max_tokens() -> u32 { 2000 }
fn default_true() -> bool { true }
fn default_uploads_dir() -> PathBuf { PathBuf::from("uploads") }
fn default_charts_dir() -> PathBuf { PathBuf::from("artifacts/charts") }
fn default_forecasts_dir() -> PathBuf { PathBuf::from("artifacts/forecasts") }
fn default_reports_dir() -> PathBuf { PathBuf::from("reports") }
fn default_db_path() -> String { "bicopilot.db".to_string() }
fn default_strong_correlation() -> f64 { 0.7 }
fn default_iqr_multiplier() -> f64 { 1.5 }
fn default_plot_limit() -> usize { 3 }
fn default_max_categories() -> usize { 20 }
fn default_forecast_periods() -> usize { 30 }
fn default_sql_max_rows() -> usize { 1000 }

fn models(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn default_ollama() -> ProviderConfig {
    ProviderConfig {
        enabled: true,
        base_url: "http://localhost:11434".to_string(),
        models: models(&["qwen2.5:7b"]),
        api_key_env: None,
    }
}

fn default_groq() -> ProviderConfig {
    ProviderConfig {
        enabled: true,
        base_url: "https://api.groq.com/openai/v1".to_string(),
        models: models(&[
            "llama-3.1-8b-instant",
            "qwen/qwen3-32b",
            "meta-llama/llama-4-scout-17b-16e-instruct",
            "meta-llama/llama-4-maverick-17b-128e-instruct",
            "openai/gpt-oss-120b",
            "gemma2-9b-it",
            // last: tight rate limit
            "llama-3.3-70b-versatile",
        ]),
        api_key_env: Some("GROQ_API_KEY".to_string()),
    }
}

fn default_openrouter() -> ProviderConfig {
    ProviderConfig {
        enabled: true,
        base_url: "https://openrouter.ai/api/v1".to_string(),
        models: models(&[
            "google/gemini-2.0-flash-exp:free",
            "meta-llama/llama-3.3-70b-instruct:free",
            "deepseek/deepseek-r1:free",
            "qwen/qwen-2.5-72b-instruct:free",
            "nousresearch/hermes-3-llama-3.1-405b:free",
            "mistralai/mistral-nemo:free",
            "microsoft/phi-3-mini-128k-instruct:free",
        ]),
        api_key_env: Some("OPENROUTER_API_KEY".to_string()),
    }
}

fn default_huggingface() -> ProviderConfig {
    ProviderConfig {
        enabled: true,
        base_url: "https://api-inference.huggingface.co/models".to_string(),
        models: models(&["google/flan-t5-large", "google/flan-t5-base", "google/flan-t5-small"]),
        api_key_env: Some("HUGGINGFACE_API_KEY".to_string()),
    }
}

fn default_interpreter_prompt() -> String {
    r#"You are a Data Scientist. Analyze this dataset preview and schema.

Schema:
{{ schema }}

Preview:
{{ preview }}

Statistics:
{{ stats }}

Provide a structured JSON summary with:
1. 'description': Brief overview of what this data represents.
2. 'key_entities': Main business entities found (e.g., Customers, Orders).
3. 'potential_analyses': List of 3-5 recommended analyses.

Return ONLY valid JSON."#.to_string()
}

fn default_sql_prompt() -> String {
    r#"You are an expert SQL Data Analyst.
Convert the user's natural language query into a valid SQL query for a SQLite database.
The table name is 'dataset'.

Schema:
{{ schema }}

User Query: "{{ query }}"

Return ONLY the raw SQL query. Do not include markdown formatting or explanations."#.to_string()
}

fn default_semantic_prompt() -> String {
    r#"You are a Senior Business Intelligence Analyst.
Answer the user's question based on the dataset preview and statistics provided below.

User Question: "{{ query }}"

Dataset Preview:
{{ preview }}

Dataset Statistics:
{{ stats }}

Additional Context:
{{ context }}

Provide a clear, concise, and data-driven explanation.
If you cannot answer based on the data, state that clearly."#.to_string()
}

fn default_report_prompt() -> String {
    r#"You are a Business Intelligence report writer.
Write a short executive summary (one or two paragraphs, plain prose, no headings)
for the analysis of the dataset "{{ dataset }}".

Analysis results (JSON):
{{ results }}

Highlight data quality concerns, notable correlations, outliers and the forecast outlook."#.to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_api_port(),
            max_upload_mb: default_max_upload_mb(),
            dataset_cache_entries: default_cache_entries(),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_ui_port(),
            api_url: default_api_url(),
            refresh_secs: default_refresh_secs(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            temperature: 0.0,
            timeout_secs: default_timeout(),
            retries: 0,
            max_tokens: default_max_tokens(),
            ollama: default_ollama(),
            groq: default_groq(),
            openrouter: default_openrouter(),
            huggingface: default_huggingface(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uploads_dir: default_uploads_dir(),
            charts_dir: default_charts_dir(),
            forecasts_dir: default_forecasts_dir(),
            reports_dir: default_reports_dir(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            strong_correlation_threshold: default_strong_correlation(),
            outlier_iqr_multiplier: default_iqr_multiplier(),
            max_distribution_plots: default_plot_limit(),
            max_categorical_plots: default_plot_limit(),
            max_categories: default_max_categories(),
            forecast_periods: default_forecast_periods(),
            llm_summary: true,
            sql_max_rows: default_sql_max_rows(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter_prompt(),
            sql: default_sql_prompt(),
            semantic: default_semantic_prompt(),
            report: default_report_prompt(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            ui: UiConfig::default(),
            llm: LlmConfig::default(),
            storage: StorageConfig::default(),
            database: DatabaseConfig::default(),
            analysis: AnalysisConfig::default(),
            prompts: PromptConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Settings for one provider
    pub fn provider(&self, provider: Provider) -> &ProviderConfig {
        match provider {
            Provider::Ollama => &self.ollama,
            Provider::Groq => &self.groq,
            Provider::OpenRouter => &self.openrouter,
            Provider::HuggingFace => &self.huggingface,
        }
    }

    /// Resolve a provider's API key from its environment variable.
    ///
    /// Returns `Some("")` for keyless providers so callers can treat
    /// "no key configured" and "key required but missing" differently.
    pub fn api_key(&self, provider: Provider) -> Option<String> {
        match &self.provider(provider).api_key_env {
            None => Some(String::new()),
            Some(var) => std::env::var(var).ok().filter(|k| !k.trim().is_empty()),
        }
    }
}

impl StorageConfig {
    /// Create every artifact directory
    pub fn ensure_dirs(&self) -> crate::Result<()> {
        for dir in [&self.uploads_dir, &self.charts_dir, &self.forecasts_dir, &self.reports_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Re-root every relative directory under `base`
    pub fn rooted_at(&self, base: &Path) -> Self {
        let root = |p: &PathBuf| if p.is_absolute() { p.clone() } else { base.join(p) };
        Self {
            uploads_dir: root(&self.uploads_dir),
            charts_dir: root(&self.charts_dir),
            forecasts_dir: root(&self.forecasts_dir),
            reports_dir: root(&self.reports_dir),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::CopilotError::Config(format!("Failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the agents cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        let a = &self.analysis;
        if !(0.0..=1.0).contains(&a.strong_correlation_threshold) {
            return Err(crate::CopilotError::Config(
                "analysis.strong_correlation_threshold must be within 0.0..=1.0".to_string(),
            ));
        }
        if a.outlier_iqr_multiplier <= 0.0 {
            return Err(crate::CopilotError::Config(
                "analysis.outlier_iqr_multiplier must be positive".to_string(),
            ));
        }
        if a.forecast_periods == 0 {
            return Err(crate::CopilotError::Config(
                "analysis.forecast_periods must be at least 1".to_string(),
            ));
        }
        if self.api.port == self.ui.port && self.api.host == self.ui.host {
            return Err(crate::CopilotError::Config(
                "api and ui cannot listen on the same address".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment_ports() {
        let config = AppConfig::default();
        assert_eq!(config.api.port, 8000);
        assert_eq!(config.ui.port, 8501);
        assert_eq!(config.llm.primary, Provider::Groq);
        assert_eq!(config.llm.groq.api_key_env.as_deref(), Some("GROQ_API_KEY"));
        assert_eq!(config.llm.groq.models[0], "llama-3.1-8b-instant");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"api": {"port": 9000}}"#).unwrap();
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.analysis.forecast_periods, 30);
        assert!(config.prompts.sql.contains("{{ query }}"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.database.path, "bicopilot.db");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.analysis.sql_max_rows = 25;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.analysis.sql_max_rows, 25);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = AppConfig::default();
        config.analysis.strong_correlation_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_keyless_provider_has_empty_key() {
        let config = LlmConfig::default();
        assert_eq!(config.api_key(Provider::Ollama), Some(String::new()));
    }

    #[test]
    fn test_rooted_storage() {
        let storage = StorageConfig::default().rooted_at(Path::new("/srv/app"));
        assert_eq!(storage.reports_dir, PathBuf::from("/srv/app/reports"));
    }
}
