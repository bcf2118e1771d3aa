//! Pipeline driver.
//!
//! Runs the stages in order: walk → build documents → split and extract →
//! embed → store. Each stage also backs its own CLI command so it can be
//! inspected in isolation (`coderag walk`, `build`, `extract`, `ingest`).

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::Config;
use crate::document::{Document, DocumentBuilder};
use crate::extract::{ExtractionPipeline, ExtractionReport};
use crate::llm::{LanguageModel, OpenAiChatModel};
use crate::models::Node;
use crate::store::{CollectionSchema, IndexParams, JsonMap};
use crate::vectordb::VectorDbHandle;
use crate::walker::{RepoWalker, WalkOutput};

/// Rows per insert request.
const INSERT_BATCH: usize = 256;

/// Walk the configured repository.
pub async fn walk(config: &Config) -> Result<WalkOutput> {
    let walker = RepoWalker::new(config)?;
    let output = walker
        .traverse(&config.repository.path)
        .await
        .with_context(|| format!("Failed to walk {}", config.repository.full_name()))?;
    for failure in &output.manifest.failures {
        tracing::warn!("Skipped {}: {}", failure.path, failure.error);
    }
    Ok(output)
}

/// Walk, then build one document per fetched file.
pub async fn collect_documents(
    config: &Config,
    limit: Option<usize>,
) -> Result<(WalkOutput, Vec<Document>)> {
    let output = walk(config).await?;
    let records = match limit {
        Some(n) => &output.files[..n.min(output.files.len())],
        None => &output.files[..],
    };
    let docs = DocumentBuilder::new(config).build(records).await;
    Ok((output, docs))
}

/// The chat model backing extraction, when extraction is enabled.
pub fn language_model(config: &Config) -> Result<Option<Arc<dyn LanguageModel>>> {
    if !config.extraction.enabled {
        return Ok(None);
    }
    let model = OpenAiChatModel::from_config(&config.extraction)?;
    Ok(Some(Arc::new(model)))
}

/// Split documents and run the configured extractors.
pub async fn extract_nodes(config: &Config, docs: &[Document]) -> Result<ExtractionReport> {
    let pipeline = ExtractionPipeline::from_config(&config.extraction, language_model(config)?)?;
    Ok(pipeline.run(docs).await)
}

/// Stable positive 63-bit id for a node, derived from its document and index.
pub fn node_vector_id(node: &Node) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(node.document_id.as_bytes());
    hasher.update(node.chunk_index.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(bytes) & (i64::MAX as u64)) as i64
}

/// Text sent to the embedding model: the title, when known, then the chunk.
pub fn embedding_text(node: &Node) -> String {
    match node.title() {
        Some(title) => format!("{}\n\n{}", title, node.text),
        None => node.text.clone(),
    }
}

/// `document_id in ["..", ..]` over the given parent documents.
pub fn document_predicate(document_ids: &[&str]) -> String {
    let list = document_ids
        .iter()
        .map(|id| format!("\"{}\"", id))
        .collect::<Vec<_>>()
        .join(", ");
    format!("document_id in [{}]", list)
}

fn node_payload(node: &Node) -> JsonMap {
    let mut payload: JsonMap = node
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    payload.insert("document_id".to_string(), node.document_id.clone().into());
    payload.insert("chunk_index".to_string(), (node.chunk_index as u64).into());
    payload
}

/// Embed and store `nodes` in the configured collection, creating the
/// collection and its vector index on first use. Every stored row of a
/// document being re-ingested is removed first, so a file that now splits
/// into fewer chunks leaves nothing stale. Returns the number of rows inserted.
pub async fn store_nodes(
    config: &Config,
    handle: &VectorDbHandle,
    nodes: &[Node],
    recreate: bool,
) -> Result<usize> {
    let collection = &config.vectordb.collection;
    let Some(dims) = handle.embedding_dims().filter(|d| *d > 0) else {
        bail!("An embedding provider with known dims is required to store nodes");
    };

    let mut existed = handle.collection_exists(collection).await?;
    if existed && recreate {
        handle.drop_collection(collection).await?;
        existed = false;
    }
    if !existed {
        let schema = CollectionSchema::for_documents(handle.vector_field(), dims);
        handle.create_collection(collection, &schema).await?;
        let index = IndexParams::new(&config.vectordb.index_type, &config.vectordb.metric_type)
            .with_param("nlist", 128);
        handle
            .create_index(collection, handle.vector_field(), &index)
            .await?;
    }

    if existed {
        let documents: Vec<&str> = nodes
            .iter()
            .map(|n| n.document_id.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        for group in documents.chunks(INSERT_BATCH) {
            handle
                .delete_where(collection, &document_predicate(group))
                .await?;
        }
    }

    let mut inserted = 0;
    for batch in nodes.chunks(INSERT_BATCH) {
        let ids: Vec<i64> = batch.iter().map(node_vector_id).collect();
        let texts: Vec<String> = batch.iter().map(embedding_text).collect();
        let payloads: Vec<JsonMap> = batch.iter().map(node_payload).collect();
        inserted += handle
            .insert_documents_with_embeddings(collection, &texts, ids, Some(payloads))
            .await?;
        tracing::info!("Stored {}/{} nodes", inserted, nodes.len());
    }
    Ok(inserted)
}

// ============ Commands ============

/// `coderag walk`: print the directory graph, a file summary and the
/// failure manifest.
pub async fn run_walk(config: &Config, json: bool) -> Result<()> {
    let output = walk(config).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "graph": output.graph.to_json(),
                "files": output.files.iter().map(|f| serde_json::json!({
                    "path": f.path,
                    "lines": f.lines_of_code,
                    "size": f.size,
                })).collect::<Vec<_>>(),
                "failures": output.manifest.failures,
            }))?
        );
        return Ok(());
    }

    println!("{}", serde_json::to_string_pretty(&output.graph.to_json())?);
    println!();
    println!("walk {}", config.repository.full_name());
    println!("  files: {}", output.files.len());
    for file in &output.files {
        println!("    {} ({} lines, {} bytes)", file.path, file.lines_of_code, file.size);
    }
    println!("  failures: {}", output.manifest.failures.len());
    for failure in &output.manifest.failures {
        println!("    {} [{:?}]: {}", failure.path, failure.kind, failure.error);
    }
    println!("ok");
    Ok(())
}

/// `coderag build`: print rendered documents.
pub async fn run_build(config: &Config, limit: Option<usize>) -> Result<()> {
    let (_, docs) = collect_documents(config, limit).await?;
    for doc in &docs {
        println!("--- {} ({})", doc.path, doc.id);
        println!("{}", doc.render());
        println!();
    }
    println!("built {} documents", docs.len());
    Ok(())
}

/// `coderag extract`: split and annotate, then print nodes.
pub async fn run_extract(config: &Config, limit: Option<usize>, json: bool) -> Result<()> {
    let (_, docs) = collect_documents(config, limit).await?;
    let report = extract_nodes(config, &docs).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for node in &report.nodes {
        println!(
            "{} #{} tokens {}..{}",
            node.metadata
                .get("file_name")
                .and_then(|v| v.as_str())
                .unwrap_or(&node.document_id),
            node.chunk_index,
            node.token_span.0,
            node.token_span.1
        );
        if let Some(title) = node.title() {
            println!("  title: {}", title);
        }
        for q in node.questions() {
            println!("  q: {}", q);
        }
    }
    println!("extract");
    println!("  documents: {}", docs.len());
    println!("  nodes: {}", report.nodes.len());
    println!("  failed documents: {}", report.failures.len());
    for failure in &report.failures {
        println!("    {}: {}", failure.path, failure.error);
    }
    Ok(())
}

/// `coderag ingest`: the full pipeline into the vector store.
pub async fn run_ingest(
    config: &Config,
    limit: Option<usize>,
    dry_run: bool,
    recreate: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() && !dry_run {
        bail!("ingest requires an embedding provider; set [embedding].provider");
    }

    let (output, docs) = collect_documents(config, limit).await?;
    let report = extract_nodes(config, &docs).await?;

    if dry_run {
        println!("ingest {} (dry-run)", config.repository.full_name());
        println!("  files: {}", output.files.len());
        println!("  documents: {}", docs.len());
        println!("  nodes: {}", report.nodes.len());
        return Ok(());
    }

    let mut handle = VectorDbHandle::from_config(&config.vectordb)?;
    handle.create_embedding_function(&config.embedding)?;
    let inserted = store_nodes(config, &handle, &report.nodes, recreate).await?;

    println!("ingest {}", config.repository.full_name());
    println!("  files: {}", output.files.len());
    println!("  walk failures: {}", output.manifest.failures.len());
    println!("  documents: {}", docs.len());
    println!("  nodes: {}", report.nodes.len());
    println!("  extraction failures: {}", report.failures.len());
    println!("  vectors inserted: {}", inserted);
    println!("  collection: {}", config.vectordb.collection);
    println!("ok");
    Ok(())
}
