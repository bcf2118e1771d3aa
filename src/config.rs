//! TOML configuration.
//!
//! The whole pipeline is driven by a single [`Config`] loaded once at
//! startup by [`load_config`] and passed by reference into each stage.
//!
//! ```toml
//! [repository]
//! owner = "rust-lang"
//! name = "log"
//!
//! [github]
//! concurrency = 8
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-large"
//! dims = 512
//!
//! [vectordb]
//! url = "http://localhost:19530"
//! collection = "code_docs"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub vectordb: VectorDbConfig,
}

/// The repository to walk.
#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    pub owner: String,
    pub name: String,
    /// Starting path inside the repository; empty means the root.
    #[serde(default)]
    pub path: String,
    /// Branch, tag or commit passed as `?ref=` on every contents request.
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
}

impl RepositoryConfig {
    /// `owner/name`, as stamped into document metadata.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    /// Name of the environment variable holding the access token.
    #[serde(default = "default_github_token_env")]
    pub token_env: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_github_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Look up each file's last commit date for `modifiedOn`.
    #[serde(default)]
    pub resolve_commit_dates: bool,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            token_env: default_github_token_env(),
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_github_retries(),
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            resolve_commit_dates: false,
        }
    }
}

impl GithubConfig {
    /// Read the access token from the configured environment variable.
    pub fn access_token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_github_token_env() -> String {
    "GITHUB_ACCESS_TOKEN".to_string()
}
fn default_concurrency() -> usize {
    8
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_github_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DocumentsConfig {
    /// Minimum spacing between successive document constructions.
    #[serde(default)]
    pub min_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_title_nodes")]
    pub title_nodes: usize,
    #[serde(default = "default_questions")]
    pub questions: usize,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            separator: default_separator(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            title_nodes: default_title_nodes(),
            questions: default_questions(),
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_separator() -> String {
    " ".to_string()
}
fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    128
}
fn default_title_nodes() -> usize {
    5
}
fn default_questions() -> usize {
    3
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Endpoint override for the OpenAI-compatible or Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankerConfig {
    /// `disabled`, `http` (a `/v1/rerank` endpoint) or `local` (fastembed).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_reranker_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding a bearer token for the `http` provider.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_reranker_batch_size")]
    pub batch_size: usize,
    /// Map raw relevance logits into `[0, 1]`.
    #[serde(default = "default_true")]
    pub normalize: bool,
    #[serde(default = "default_reranker_timeout")]
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_reranker_model(),
            base_url: None,
            token_env: None,
            batch_size: default_reranker_batch_size(),
            normalize: true,
            timeout_secs: default_reranker_timeout(),
        }
    }
}

impl RerankerConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn token(&self) -> Option<String> {
        self.token_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|t| !t.trim().is_empty())
    }
}

fn default_reranker_model() -> String {
    "BAAI/bge-reranker-v2-m3".to_string()
}
fn default_reranker_batch_size() -> usize {
    32
}
fn default_reranker_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorDbConfig {
    /// `milvus` or `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_vectordb_url")]
    pub url: String,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_vector_field")]
    pub vector_field: String,
    #[serde(default = "default_metric_type")]
    pub metric_type: String,
    #[serde(default = "default_index_type")]
    pub index_type: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_vectordb_url(),
            token_env: None,
            collection: default_collection(),
            vector_field: default_vector_field(),
            metric_type: default_metric_type(),
            index_type: default_index_type(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl VectorDbConfig {
    pub fn token(&self) -> Option<String> {
        self.token_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
    }
}

fn default_backend() -> String {
    "milvus".to_string()
}
fn default_vectordb_url() -> String {
    "http://localhost:19530".to_string()
}
fn default_collection() -> String {
    "code_docs".to_string()
}
fn default_vector_field() -> String {
    "vector_field".to_string()
}
fn default_metric_type() -> String {
    "L2".to_string()
}
fn default_index_type() -> String {
    "IVF_FLAT".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.repository.owner.trim().is_empty() {
        bail!("repository.owner must not be empty");
    }
    if config.repository.name.trim().is_empty() {
        bail!("repository.name must not be empty");
    }

    if config.github.concurrency == 0 {
        bail!("github.concurrency must be > 0");
    }

    // Validate extraction
    if config.extraction.chunk_size == 0 {
        bail!("extraction.chunk_size must be > 0");
    }
    if config.extraction.chunk_overlap >= config.extraction.chunk_size {
        bail!(
            "extraction.chunk_overlap ({}) must be smaller than extraction.chunk_size ({})",
            config.extraction.chunk_overlap,
            config.extraction.chunk_size
        );
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    match config.reranker.provider.as_str() {
        "disabled" | "local" => {}
        "http" => {
            if config.reranker.base_url.is_none() {
                bail!("reranker.base_url must be set when provider is 'http'");
            }
        }
        other => bail!(
            "Unknown reranker provider: '{}'. Must be disabled, http, or local.",
            other
        ),
    }

    match config.vectordb.backend.as_str() {
        "milvus" | "memory" => {}
        other => bail!(
            "Unknown vectordb backend: '{}'. Must be milvus or memory.",
            other
        ),
    }

    Ok(config)
}
