//! Cross-encoder reranking.
//!
//! Two backends:
//! - [`HttpReranker`] posts all query/document pairs in one request to an
//!   OpenAI-compatible `/v1/rerank` endpoint.
//! - [`LocalReranker`] runs a fastembed cross-encoder in-process (feature
//!   `local-models-fastembed`).
//!
//! Scores are raw logits unless `reranker.normalize` is set, in which case
//! they pass through a sigmoid into `[0, 1]`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RerankerConfig;

/// Relevance of one input document.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankResult {
    /// Index into the original documents slice.
    pub index: usize,
    pub score: f32,
}

#[async_trait]
pub trait Reranker: Send + Sync {
    fn model_name(&self) -> &str;
    /// Score `documents` against `query`, sorted by score descending.
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankResult>>;
}

/// Maps raw logits into `[0, 1]`.
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn finish(mut results: Vec<RerankResult>, normalize: bool) -> Vec<RerankResult> {
    if normalize {
        for r in &mut results {
            r.score = sigmoid(r.score);
        }
    }
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results
}

// ============ HTTP ============

pub struct HttpReranker {
    client: reqwest::Client,
    url: String,
    model: String,
    normalize: bool,
    token: Option<String>,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResultRaw>,
}

#[derive(Deserialize)]
struct RerankResultRaw {
    index: usize,
    relevance_score: f32,
}

impl HttpReranker {
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .context("reranker.base_url not configured")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/v1/rerank", base_url.trim_end_matches('/')),
            model: config.model.clone(),
            normalize: config.normalize,
            token: config.token(),
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankResult>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let request = RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n: documents.len(),
        };

        let mut req = self.client.post(&self.url).json(&request);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .context("Failed to reach reranker endpoint")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Reranker returned {status}: {body}");
        }

        let body: RerankResponse = resp
            .json()
            .await
            .context("Failed to parse reranker response")?;

        let results = body
            .results
            .into_iter()
            .filter(|r| r.index < documents.len())
            .map(|r| RerankResult {
                index: r.index,
                score: r.relevance_score,
            })
            .collect();
        Ok(finish(results, self.normalize))
    }
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-models-fastembed")]
pub struct LocalReranker {
    model_name: String,
    batch_size: usize,
    normalize: bool,
    model: std::sync::Arc<std::sync::Mutex<Option<fastembed::TextRerank>>>,
}

#[cfg(feature = "local-models-fastembed")]
impl LocalReranker {
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        config_to_reranker_model(&config.model)?;
        Ok(Self {
            model_name: config.model.clone(),
            batch_size: config.batch_size,
            normalize: config.normalize,
            model: Default::default(),
        })
    }
}

#[cfg(feature = "local-models-fastembed")]
fn config_to_reranker_model(name: &str) -> Result<fastembed::RerankerModel> {
    match name {
        "BAAI/bge-reranker-base" => Ok(fastembed::RerankerModel::BGERerankerBase),
        "BAAI/bge-reranker-v2-m3" => Ok(fastembed::RerankerModel::BGERerankerV2M3),
        other => bail!(
            "Unknown local reranker model: '{}'. Supported models: \
             BAAI/bge-reranker-base, BAAI/bge-reranker-v2-m3",
            other
        ),
    }
}

#[cfg(feature = "local-models-fastembed")]
#[async_trait]
impl Reranker for LocalReranker {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankResult>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let reranker_model = config_to_reranker_model(&self.model_name)?;
        let slot = self.model.clone();
        let query = query.to_string();
        let documents = documents.to_vec();
        let batch_size = self.batch_size;

        let raw = tokio::task::spawn_blocking(move || -> Result<Vec<RerankResult>> {
            let mut guard = slot
                .lock()
                .map_err(|_| anyhow::anyhow!("Local reranker lock poisoned"))?;
            if guard.is_none() {
                let model = fastembed::TextRerank::try_new(
                    fastembed::RerankInitOptions::new(reranker_model)
                        .with_show_download_progress(true),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local reranker: {}", e))?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("Local reranker unavailable"))?;
            let scored = model
                .rerank(query, documents, false, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local reranking failed: {}", e))?;
            Ok(scored
                .into_iter()
                .map(|r| RerankResult {
                    index: r.index,
                    score: r.score,
                })
                .collect())
        })
        .await??;

        Ok(finish(raw, self.normalize))
    }
}

/// Create the [`Reranker`] named by `config.provider`.
pub fn create_reranker(config: &RerankerConfig) -> Result<Box<dyn Reranker>> {
    match config.provider.as_str() {
        "http" => Ok(Box::new(HttpReranker::new(config)?)),
        #[cfg(feature = "local-models-fastembed")]
        "local" => Ok(Box::new(LocalReranker::new(config)?)),
        #[cfg(not(feature = "local-models-fastembed"))]
        "local" => bail!("Local reranker requires --features local-models-fastembed"),
        "disabled" => bail!("Reranker provider is disabled"),
        other => bail!("Unknown reranker provider: {}", other),
    }
}
