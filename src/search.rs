//! `coderag search`: embed a query, search the collection, optionally rerank.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::Config;
use crate::store::{JsonMap, MetricType};
use crate::vectordb::VectorDbHandle;

/// Options for a single query.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    pub filter: Option<String>,
    pub rerank: bool,
    pub nprobe: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            filter: None,
            rerank: false,
            nprobe: 10,
        }
    }
}

/// One printed search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub id: i64,
    /// Raw metric value from the store.
    pub distance: f32,
    /// Cross-encoder relevance when reranked.
    pub rerank_score: Option<f32>,
    pub file_name: Option<String>,
    pub title: Option<String>,
    pub snippet: String,
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}

fn item(hit: &crate::store::SearchHit, rerank_score: Option<f32>) -> SearchResultItem {
    let field = |key: &str| {
        hit.payload
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    SearchResultItem {
        id: hit.id,
        distance: hit.distance,
        rerank_score,
        file_name: field("file_name"),
        title: field("document_title"),
        snippet: snippet(hit.text().unwrap_or_default(), 200),
    }
}

/// Run a query against `handle`, which must carry an embedder, and a reranker
/// when `options.rerank` is set.
pub async fn search(
    config: &Config,
    handle: &VectorDbHandle,
    query: &str,
    options: &SearchOptions,
) -> Result<Vec<SearchResultItem>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let metric: MetricType = config.vectordb.metric_type.parse()?;
    let collection = &config.vectordb.collection;

    let vector = handle
        .create_embeddings(&[query.to_string()])
        .await?
        .into_iter()
        .next()
        .unwrap_or_default();

    let mut params = JsonMap::new();
    params.insert("nprobe".to_string(), options.nprobe.into());

    let hits = match options.filter.as_deref() {
        Some(filter) if !filter.trim().is_empty() => {
            handle
                .hybrid_search(
                    collection,
                    &vector,
                    filter,
                    options.top_k,
                    metric.as_str(),
                    params,
                )
                .await?
        }
        _ => {
            handle
                .search_vectors(collection, &vector, options.top_k, metric.as_str(), params)
                .await?
        }
    };

    if options.rerank && !hits.is_empty() {
        let ranked = handle.rerank_results(query, hits).await?;
        return Ok(ranked.iter().map(|r| item(&r.hit, Some(r.score))).collect());
    }
    Ok(hits.iter().map(|h| item(h, None)).collect())
}

pub async fn run_search(
    config: &Config,
    query: &str,
    options: &SearchOptions,
    json: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    if !config.embedding.is_enabled() {
        bail!("search requires embeddings. Set [embedding] provider in config.");
    }

    let mut handle = VectorDbHandle::from_config(&config.vectordb)?;
    handle.create_embedding_function(&config.embedding)?;
    if options.rerank {
        if !config.reranker.is_enabled() {
            bail!("--rerank requires [reranker] provider in config.");
        }
        handle.create_reranker(&config.reranker)?;
    }

    let results = search(config, &handle, query, options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, r) in results.iter().enumerate() {
        let score = match r.rerank_score {
            Some(s) => format!("rerank {:.3}, distance {:.4}", s, r.distance),
            None => format!("distance {:.4}", r.distance),
        };
        println!(
            "{}. [{}] {}",
            i + 1,
            score,
            r.file_name.as_deref().unwrap_or("(unknown)")
        );
        if let Some(title) = &r.title {
            println!("    title: {}", title);
        }
        println!("    id: {}", r.id);
        println!("    > {}", r.snippet);
        println!();
    }
    Ok(())
}
