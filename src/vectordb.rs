//! Vector-database handle.
//!
//! [`VectorDbHandle`] owns a [`VectorStore`] backend plus an optional
//! embedding provider and reranker. It reshapes caller arguments into store
//! requests and logs every operation; it does not check that a collection
//! exists before mutating it, leaving that to the backend.

use crate::config::{EmbeddingConfig, RerankerConfig, VectorDbConfig};
use crate::embedding::{create_provider, embed_batched, EmbeddingProvider};
use crate::error::{VectorDbError, VectorDbResult};
use crate::rerank::{create_reranker, Reranker};
use crate::store::{
    create_store, CollectionSchema, CollectionStats, FieldSpec, IndexParams, InsertBatch, JsonMap,
    SearchHit, SearchRequest, VectorStore, ALL_OUTPUT_FIELDS,
};

pub const DEFAULT_VECTOR_FIELD: &str = "vector_field";

/// A search hit with its reranker score.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedHit {
    pub hit: SearchHit,
    pub score: f32,
}

pub struct VectorDbHandle {
    store: Box<dyn VectorStore>,
    vector_field: String,
    embedder: Option<Box<dyn EmbeddingProvider>>,
    embedding_batch_size: usize,
    reranker: Option<Box<dyn Reranker>>,
}

impl VectorDbHandle {
    pub fn new(store: Box<dyn VectorStore>) -> Self {
        Self {
            store,
            vector_field: DEFAULT_VECTOR_FIELD.to_string(),
            embedder: None,
            embedding_batch_size: 64,
            reranker: None,
        }
    }

    /// Connect to the backend named in config.
    pub fn from_config(config: &VectorDbConfig) -> VectorDbResult<Self> {
        let store = create_store(config)?;
        tracing::info!("Using {} vector store at {}", store.backend_name(), config.url);
        Ok(Self::new(store).with_vector_field(&config.vector_field))
    }

    pub fn with_vector_field(mut self, field: &str) -> Self {
        self.vector_field = field.to_string();
        self
    }

    pub fn with_embedder(mut self, embedder: Box<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_reranker(mut self, reranker: Box<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn vector_field(&self) -> &str {
        &self.vector_field
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    /// Dimensionality of the configured embedder, if any.
    pub fn embedding_dims(&self) -> Option<usize> {
        self.embedder.as_ref().map(|e| e.dims())
    }

    // ============ Schema & collections ============

    /// One schema field per `FieldSpec`, names and primary flags preserved.
    pub fn define_schema(&self, fields: &[FieldSpec]) -> CollectionSchema {
        tracing::info!("Defining schema with {} fields", fields.len());
        tracing::debug!("Fields: {:?}", fields);
        CollectionSchema {
            fields: fields.to_vec(),
            description: String::new(),
        }
    }

    pub async fn get_schema(&self, name: &str) -> VectorDbResult<CollectionSchema> {
        tracing::info!("Describing collection {}", name);
        let schema = self.store.describe_collection(name).await?;
        tracing::debug!("Schema of {}: {:?}", name, schema);
        Ok(schema)
    }

    pub async fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> VectorDbResult<()> {
        tracing::info!("Creating collection {}", name);
        tracing::debug!("Schema: {:?}", schema);
        self.store.create_collection(name, schema).await
    }

    pub async fn drop_collection(&self, name: &str) -> VectorDbResult<()> {
        tracing::info!("Dropping collection {}", name);
        self.store.drop_collection(name).await
    }

    pub async fn list_collections(&self) -> VectorDbResult<Vec<String>> {
        tracing::info!("Listing collections");
        let names = self.store.list_collections().await?;
        tracing::debug!("Collections: {:?}", names);
        Ok(names)
    }

    pub async fn collection_exists(&self, name: &str) -> VectorDbResult<bool> {
        tracing::info!("Checking whether collection {} exists", name);
        let exists = self.store.has_collection(name).await?;
        tracing::debug!("{} exists: {}", name, exists);
        Ok(exists)
    }

    // ============ Vectors ============

    /// Insert `vectors` under `ids`, in caller order.
    pub async fn insert_vectors(
        &self,
        name: &str,
        vectors: Vec<Vec<f32>>,
        ids: Vec<i64>,
    ) -> VectorDbResult<usize> {
        tracing::info!("Inserting {} vectors into {}", vectors.len(), name);
        let batch = InsertBatch::new(ids, vectors)?;
        tracing::debug!("Ids: {:?}", batch.ids);
        self.store.insert(name, &batch).await
    }

    /// Delete by primary key, via the predicate `id in [..]`.
    pub async fn delete_vectors(&self, name: &str, ids: &[i64]) -> VectorDbResult<()> {
        tracing::info!("Deleting {} vectors from {}", ids.len(), name);
        let predicate = id_predicate(ids);
        tracing::debug!("Delete predicate: {}", predicate);
        self.store.delete(name, &predicate).await
    }

    /// Delete every row matching a boolean filter expression.
    pub async fn delete_where(&self, name: &str, filter: &str) -> VectorDbResult<()> {
        tracing::info!("Deleting rows from {} where {}", name, filter);
        self.store.delete(name, filter).await
    }

    pub async fn create_index(
        &self,
        name: &str,
        field: &str,
        params: &IndexParams,
    ) -> VectorDbResult<()> {
        tracing::info!("Creating {} index on {}.{}", params.index_type, name, field);
        tracing::debug!("Index params: {:?}", params);
        self.store.create_index(name, field, params).await
    }

    pub async fn drop_index(&self, name: &str, field: &str) -> VectorDbResult<()> {
        tracing::info!("Dropping index on {}.{}", name, field);
        self.store.drop_index(name, field).await
    }

    // ============ Search ============

    /// Top-k similarity search on the configured vector field. `metric_type`
    /// is merged into `params`.
    pub async fn search_vectors(
        &self,
        name: &str,
        query: &[f32],
        top_k: usize,
        metric_type: &str,
        params: JsonMap,
    ) -> VectorDbResult<Vec<SearchHit>> {
        tracing::info!("Searching {} (top_k={}, metric={})", name, top_k, metric_type);
        let request = self.search_request(name, query, top_k, metric_type, params, None);
        self.run_search(request).await
    }

    /// As [`search_vectors`](Self::search_vectors), restricted to rows
    /// matching `filter`.
    pub async fn hybrid_search(
        &self,
        name: &str,
        query: &[f32],
        filter: &str,
        top_k: usize,
        metric_type: &str,
        params: JsonMap,
    ) -> VectorDbResult<Vec<SearchHit>> {
        tracing::info!(
            "Hybrid search on {} (top_k={}, metric={}, filter={})",
            name,
            top_k,
            metric_type,
            filter
        );
        let request = self.search_request(
            name,
            query,
            top_k,
            metric_type,
            params,
            Some(filter.to_string()),
        );
        self.run_search(request).await
    }

    fn search_request(
        &self,
        name: &str,
        query: &[f32],
        top_k: usize,
        metric_type: &str,
        params: JsonMap,
        filter: Option<String>,
    ) -> SearchRequest {
        let mut merged = JsonMap::new();
        merged.insert("metric_type".to_string(), metric_type.into());
        for (key, value) in params {
            if key != "metric_type" {
                merged.insert(key, value);
            }
        }
        SearchRequest {
            collection: name.to_string(),
            field: self.vector_field.clone(),
            vectors: vec![query.to_vec()],
            top_k,
            params: merged,
            filter,
            output_fields: vec![ALL_OUTPUT_FIELDS.to_string()],
        }
    }

    async fn run_search(&self, request: SearchRequest) -> VectorDbResult<Vec<SearchHit>> {
        tracing::debug!("Search params: {:?}", request.params);
        let hits = self
            .store
            .search(&request)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        tracing::debug!("{} hits", hits.len());
        Ok(hits)
    }

    // ============ Aggregates ============

    pub async fn get_collection_stats(&self, name: &str) -> VectorDbResult<CollectionStats> {
        tracing::info!("Fetching stats for {}", name);
        let stats = self.store.collection_stats(name).await?;
        tracing::debug!("Stats for {}: {:?}", name, stats);
        Ok(stats)
    }

    pub async fn count_vectors(&self, name: &str) -> VectorDbResult<u64> {
        tracing::info!("Counting vectors in {}", name);
        let count = self.store.count(name, None).await?;
        tracing::debug!("{} holds {} vectors", name, count);
        Ok(count)
    }

    // ============ Embedding ============

    /// Construct the embedding provider described by `config`. Fails with a
    /// configuration error when the provider is disabled or missing
    /// credentials.
    pub fn create_embedding_function(&mut self, config: &EmbeddingConfig) -> VectorDbResult<()> {
        tracing::info!("Creating {} embedding function", config.provider);
        if !config.is_enabled() {
            return Err(VectorDbError::config("embedding provider is disabled"));
        }
        let provider =
            create_provider(config).map_err(|e| VectorDbError::config(format!("{:#}", e)))?;
        tracing::debug!(
            "Embedding model {} ({} dims)",
            provider.model_name(),
            provider.dims()
        );
        self.embedding_batch_size = config.batch_size;
        self.embedder = Some(provider);
        Ok(())
    }

    pub async fn create_embeddings(&self, docs: &[String]) -> VectorDbResult<Vec<Vec<f32>>> {
        tracing::info!("Creating embeddings for {} documents", docs.len());
        let embedder = self.embedder.as_deref().ok_or_else(|| {
            VectorDbError::config("no embedding function configured; call create_embedding_function first")
        })?;
        let vectors = embed_batched(embedder, docs, self.embedding_batch_size)
            .await
            .map_err(|e| VectorDbError::Embedding(format!("{:#}", e)))?;
        tracing::debug!("Created {} embeddings", vectors.len());
        Ok(vectors)
    }

    /// Embed `docs` and insert them under `ids`. Each row's payload carries
    /// the document text under `text`, merged over the optional `payloads`.
    pub async fn insert_documents_with_embeddings(
        &self,
        name: &str,
        docs: &[String],
        ids: Vec<i64>,
        payloads: Option<Vec<JsonMap>>,
    ) -> VectorDbResult<usize> {
        tracing::info!("Embedding and inserting {} documents into {}", docs.len(), name);
        if docs.len() != ids.len() {
            return Err(VectorDbError::invalid_argument(format!(
                "{} ids for {} documents",
                ids.len(),
                docs.len()
            )));
        }
        let vectors = self.create_embeddings(docs).await?;

        let mut rows = payloads.unwrap_or_else(|| vec![JsonMap::new(); docs.len()]);
        if rows.len() != docs.len() {
            return Err(VectorDbError::invalid_argument(format!(
                "{} payloads for {} documents",
                rows.len(),
                docs.len()
            )));
        }
        for (row, text) in rows.iter_mut().zip(docs.iter()) {
            row.insert("text".to_string(), text.clone().into());
        }

        let batch = InsertBatch::new(ids, vectors)?.with_payloads(rows)?;
        self.store.insert(name, &batch).await
    }

    // ============ Reranking ============

    pub fn create_reranker(&mut self, config: &RerankerConfig) -> VectorDbResult<()> {
        tracing::info!("Creating {} reranker ({})", config.provider, config.model);
        if !config.is_enabled() {
            return Err(VectorDbError::config("reranker provider is disabled"));
        }
        let reranker =
            create_reranker(config).map_err(|e| VectorDbError::config(format!("{:#}", e)))?;
        self.reranker = Some(reranker);
        Ok(())
    }

    /// Reorder `results` by cross-encoder relevance to `query`, best first.
    pub async fn rerank_results(
        &self,
        query: &str,
        results: Vec<SearchHit>,
    ) -> VectorDbResult<Vec<RankedHit>> {
        tracing::info!("Reranking {} results", results.len());
        let reranker = self.reranker.as_deref().ok_or_else(|| {
            VectorDbError::config("no reranker configured; call create_reranker first")
        })?;
        let texts: Vec<String> = results
            .iter()
            .map(|hit| hit.text().unwrap_or_default().to_string())
            .collect();
        let scored = reranker
            .rerank(query, &texts)
            .await
            .map_err(|e| VectorDbError::Rerank(format!("{:#}", e)))?;

        let mut slots: Vec<Option<SearchHit>> = results.into_iter().map(Some).collect();
        let ranked: Vec<RankedHit> = scored
            .into_iter()
            .filter_map(|r| {
                slots
                    .get_mut(r.index)
                    .and_then(Option::take)
                    .map(|hit| RankedHit { hit, score: r.score })
            })
            .collect();
        tracing::debug!(
            "Reranked order: {:?}",
            ranked.iter().map(|r| r.hit.id).collect::<Vec<_>>()
        );
        Ok(ranked)
    }
}

/// `id in [7, 8]`
pub fn id_predicate(ids: &[i64]) -> String {
    let list = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("id in [{}]", list)
}
