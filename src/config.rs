use crate::log_debug;

use anyhow::{Context, Result, anyhow, bail};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use strum_macros::{Display, EnumString};

/// Directory name under the platform config dir
pub const CONFIG_DIR_NAME: &str = "procurement-ai";
/// Configuration filename
pub const CONFIG_FILENAME: &str = "config.toml";

/// Configuration structure for the tender analysis pipeline
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Config {
    /// Chat-completion backend settings
    #[serde(default)]
    pub llm: LlmConfig,
    /// Stage thresholds, temperatures and batch fan-out
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Retrieval-augmented generation settings
    #[serde(default)]
    pub rag: RagConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API
    pub base_url: String,
    pub model: String,
    /// Bearer token; empty for local servers
    pub api_key: String,
    /// Total attempts per structured call
    pub max_retries: u32,
    /// Per-call deadline
    pub timeout_seconds: u64,
    pub max_tokens: u32,
    /// Base delay between attempts
    pub retry_backoff_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            model: "openai/gpt-oss-20b".to_string(),
            api_key: String::new(),
            max_retries: 3,
            timeout_seconds: 120,
            max_tokens: 2000,
            retry_backoff_ms: 500,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum overall score that triggers bid generation
    pub pursue_threshold: f64,
    /// Filter confidence below this is treated as not relevant (0 disables)
    pub min_confidence: f64,
    /// Upper bound on tenders processed at once in a batch
    pub max_concurrent_tenders: usize,
    pub temperature_precise: f32,
    pub temperature_balanced: f32,
    pub temperature_creative: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pursue_threshold: 7.0,
            min_confidence: 0.0,
            max_concurrent_tenders: 4,
            temperature_precise: 0.1,
            temperature_balanced: 0.3,
            temperature_creative: 0.7,
        }
    }
}

/// Which embedding backend to construct
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EmbeddingBackendKind {
    /// `POST {base_url}/embeddings`
    #[serde(rename = "openai")]
    #[strum(serialize = "openai")]
    OpenAi,
    /// Offline feature hashing
    Hashing,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    pub enabled: bool,
    pub min_similarity: f64,
    pub num_examples: usize,
    pub embedding_backend: EmbeddingBackendKind,
    pub embedding_model: String,
    /// Falls back to `llm.base_url` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_base_url: Option<String>,
    pub hashing_dimensions: usize,
    pub batch_size: usize,
    /// Directory of the persistent vector index; in-memory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_base_path: Option<PathBuf>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_similarity: 0.6,
            num_examples: 2,
            embedding_backend: EmbeddingBackendKind::OpenAi,
            embedding_model: "text-embedding-nomic-embed-text-v1.5".to_string(),
            embedding_base_url: None,
            hashing_dimensions: 384,
            batch_size: 32,
            knowledge_base_path: None,
        }
    }
}

impl Config {
    /// Load the configuration from the default location
    pub fn load() -> Result<Self> {
        let path = Self::default_config_path()?;
        Self::load_from(&path)
    }

    /// Load from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Self::from_toml_str(&content)
                .with_context(|| format!("Invalid configuration file {}", path.display()))?
        } else {
            log_debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };

        log_debug!("Configuration loaded: {:?}", config.masked());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (flat key names)
    pub fn apply_overrides_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = lookup("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = lookup("MAX_RETRIES") {
            self.llm.max_retries = parse_override("MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("LLM_TIMEOUT") {
            self.llm.timeout_seconds = parse_override("LLM_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("PURSUE_THRESHOLD") {
            self.pipeline.pursue_threshold = parse_override("PURSUE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("RAG_MIN_SIMILARITY") {
            self.rag.min_similarity = parse_override("RAG_MIN_SIMILARITY", &v)?;
        }
        if let Some(v) = lookup("RAG_NUM_EXAMPLES") {
            self.rag.num_examples = parse_override("RAG_NUM_EXAMPLES", &v)?;
        }
        Ok(())
    }

    /// Check URL syntax and numeric ranges
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.llm.base_url)
            .with_context(|| format!("Invalid llm.base_url '{}'", self.llm.base_url))?;
        if let Some(base) = &self.rag.embedding_base_url {
            url::Url::parse(base)
                .with_context(|| format!("Invalid rag.embedding_base_url '{base}'"))?;
        }

        if self.llm.max_retries == 0 {
            bail!("llm.max_retries must be at least 1");
        }
        if self.llm.timeout_seconds == 0 {
            bail!("llm.timeout_seconds must be at least 1");
        }
        if !(0.0..=10.0).contains(&self.pipeline.pursue_threshold) {
            bail!(
                "pipeline.pursue_threshold must be between 0 and 10, got {}",
                self.pipeline.pursue_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.pipeline.min_confidence) {
            bail!(
                "pipeline.min_confidence must be between 0 and 1, got {}",
                self.pipeline.min_confidence
            );
        }
        if self.pipeline.max_concurrent_tenders == 0 {
            bail!("pipeline.max_concurrent_tenders must be at least 1");
        }
        for (name, t) in [
            ("temperature_precise", self.pipeline.temperature_precise),
            ("temperature_balanced", self.pipeline.temperature_balanced),
            ("temperature_creative", self.pipeline.temperature_creative),
        ] {
            if !(0.0..=2.0).contains(&t) {
                bail!("pipeline.{name} must be between 0 and 2, got {t}");
            }
        }
        if !(-1.0..=1.0).contains(&self.rag.min_similarity) {
            bail!(
                "rag.min_similarity must be between -1 and 1, got {}",
                self.rag.min_similarity
            );
        }
        if self.rag.batch_size == 0 || self.rag.hashing_dimensions == 0 {
            return Err(anyhow!(
                "rag.batch_size and rag.hashing_dimensions must be positive"
            ));
        }
        Ok(())
    }

    /// Effective embedding endpoint base
    pub fn embedding_base_url(&self) -> &str {
        self.rag
            .embedding_base_url
            .as_deref()
            .unwrap_or(&self.llm.base_url)
    }

    /// Copy with the API key hidden, for display and logs
    #[must_use]
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        if !copy.llm.api_key.is_empty() {
            let visible: String = copy.llm.api_key.chars().take(4).collect();
            copy.llm.api_key = format!("{visible}****");
        }
        copy
    }

    /// Save the configuration to the default location
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::default_config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        log_debug!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn default_config_path() -> Result<PathBuf> {
        let mut path =
            config_dir().ok_or_else(|| anyhow!("Unable to determine config directory"))?;
        path.push(CONFIG_DIR_NAME);
        path.push(CONFIG_FILENAME);
        Ok(path)
    }
}

fn parse_override<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow!("Invalid value '{raw}' for {key}: {e}"))
}
