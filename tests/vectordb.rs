use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use code_rag::config::{EmbeddingConfig, RerankerConfig};
use code_rag::embedding::EmbeddingProvider;
use code_rag::error::{VectorDbError, VectorDbResult};
use code_rag::rerank::{RerankResult, Reranker};
use code_rag::store::memory::InMemoryStore;
use code_rag::store::{
    CollectionSchema, CollectionStats, DataType, FieldSpec, IndexParams, InsertBatch, JsonMap,
    SearchHit, SearchRequest, VectorStore,
};
use code_rag::vectordb::VectorDbHandle;
use serde_json::json;

// ============ Test doubles ============

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Create(String, CollectionSchema),
    Insert(String, InsertBatch),
    Delete(String, String),
    Index(String, String, IndexParams),
    Search(SearchRequest),
}

/// Records every mutating call; searches return one canned hit list.
#[derive(Clone, Default)]
struct RecordingStore {
    calls: Arc<Mutex<Vec<Call>>>,
    hits: Vec<SearchHit>,
}

impl RecordingStore {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl VectorStore for RecordingStore {
    fn backend_name(&self) -> &str {
        "recording"
    }

    async fn create_collection(&self, name: &str, schema: &CollectionSchema) -> VectorDbResult<()> {
        self.record(Call::Create(name.to_string(), schema.clone()));
        Ok(())
    }

    async fn drop_collection(&self, _name: &str) -> VectorDbResult<()> {
        Ok(())
    }

    async fn list_collections(&self) -> VectorDbResult<Vec<String>> {
        Ok(vec!["code_docs".to_string()])
    }

    async fn has_collection(&self, name: &str) -> VectorDbResult<bool> {
        Ok(name == "code_docs")
    }

    async fn describe_collection(&self, name: &str) -> VectorDbResult<CollectionSchema> {
        self.calls()
            .into_iter()
            .find_map(|c| match c {
                Call::Create(n, schema) if n == name => Some(schema),
                _ => None,
            })
            .ok_or_else(|| VectorDbError::NotFound(name.to_string()))
    }

    async fn insert(&self, collection: &str, batch: &InsertBatch) -> VectorDbResult<usize> {
        self.record(Call::Insert(collection.to_string(), batch.clone()));
        Ok(batch.len())
    }

    async fn delete(&self, collection: &str, filter: &str) -> VectorDbResult<()> {
        self.record(Call::Delete(collection.to_string(), filter.to_string()));
        Ok(())
    }

    async fn create_index(
        &self,
        collection: &str,
        field: &str,
        params: &IndexParams,
    ) -> VectorDbResult<()> {
        self.record(Call::Index(
            collection.to_string(),
            field.to_string(),
            params.clone(),
        ));
        Ok(())
    }

    async fn drop_index(&self, _collection: &str, _field: &str) -> VectorDbResult<()> {
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> VectorDbResult<Vec<Vec<SearchHit>>> {
        self.record(Call::Search(request.clone()));
        Ok(vec![self.hits.clone()])
    }

    async fn collection_stats(&self, _collection: &str) -> VectorDbResult<CollectionStats> {
        Ok(CollectionStats { row_count: 3 })
    }

    async fn count(&self, _collection: &str, _filter: Option<&str>) -> VectorDbResult<u64> {
        Ok(3)
    }
}

/// Embeds a text as `[len, vowels, 1]`.
struct CountingEmbedder;

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    fn model_name(&self) -> &str {
        "counting"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let vowels = t.chars().filter(|c| "aeiou".contains(*c)).count();
                vec![t.len() as f32, vowels as f32, 1.0]
            })
            .collect())
    }
}

/// Scores a document by how many query words it contains.
struct OverlapReranker;

#[async_trait]
impl Reranker for OverlapReranker {
    fn model_name(&self) -> &str {
        "overlap"
    }
    async fn rerank(&self, query: &str, documents: &[String]) -> anyhow::Result<Vec<RerankResult>> {
        let mut results: Vec<RerankResult> = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| RerankResult {
                index,
                score: query.split_whitespace().filter(|w| doc.contains(w)).count() as f32,
            })
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        Ok(results)
    }
}

fn hit(id: i64, distance: f32, text: &str) -> SearchHit {
    let mut payload = JsonMap::new();
    payload.insert("text".to_string(), json!(text));
    SearchHit {
        id,
        distance,
        payload,
    }
}

// ============ Handle → store translation ============

#[tokio::test]
async fn test_search_vectors_merges_metric_into_params() {
    let store = RecordingStore::default();
    let handle = VectorDbHandle::new(Box::new(store.clone()));

    let mut params = JsonMap::new();
    params.insert("nprobe".to_string(), json!(10));
    handle
        .search_vectors("code_docs", &[0.1, 0.2, 0.3], 5, "L2", params)
        .await
        .unwrap();

    let calls = store.calls();
    let Call::Search(request) = &calls[0] else {
        panic!("expected a search call, got {:?}", calls);
    };
    assert_eq!(request.collection, "code_docs");
    assert_eq!(request.field, "vector_field");
    assert_eq!(request.top_k, 5);
    assert_eq!(request.vectors, vec![vec![0.1, 0.2, 0.3]]);
    assert_eq!(
        serde_json::Value::Object(request.params.clone()),
        json!({"metric_type": "L2", "nprobe": 10})
    );
    assert!(request.filter.is_none());
    assert_eq!(request.output_fields, vec!["*".to_string()]);
}

#[tokio::test]
async fn test_hybrid_search_passes_filter() {
    let store = RecordingStore::default();
    let handle = VectorDbHandle::new(Box::new(store.clone())).with_vector_field("embedding");

    handle
        .hybrid_search(
            "code_docs",
            &[1.0],
            "extension == \".rs\"",
            3,
            "COSINE",
            JsonMap::new(),
        )
        .await
        .unwrap();

    let Call::Search(request) = &store.calls()[0] else {
        panic!("expected a search call");
    };
    assert_eq!(request.field, "embedding");
    assert_eq!(request.filter.as_deref(), Some("extension == \".rs\""));
    assert_eq!(request.metric_type(), Some("COSINE"));
}

#[tokio::test]
async fn test_insert_vectors_keeps_ids_and_order() {
    let store = RecordingStore::default();
    let handle = VectorDbHandle::new(Box::new(store.clone()));

    let inserted = handle
        .insert_vectors("code_docs", vec![vec![1.0, 2.0, 3.0]], vec![42])
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    assert_eq!(
        store.calls(),
        vec![Call::Insert(
            "code_docs".to_string(),
            InsertBatch::new(vec![42], vec![vec![1.0, 2.0, 3.0]]).unwrap()
        )]
    );
}

#[tokio::test]
async fn test_insert_vectors_rejects_length_mismatch() {
    let handle = VectorDbHandle::new(Box::new(RecordingStore::default()));
    let err = handle
        .insert_vectors("code_docs", vec![vec![1.0]], vec![1, 2])
        .await
        .unwrap_err();
    assert!(matches!(err, VectorDbError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_delete_vectors_uses_id_predicate() {
    let store = RecordingStore::default();
    let handle = VectorDbHandle::new(Box::new(store.clone()));
    handle.delete_vectors("code_docs", &[7, 8]).await.unwrap();
    assert_eq!(
        store.calls(),
        vec![Call::Delete("code_docs".to_string(), "id in [7, 8]".to_string())]
    );
}

#[tokio::test]
async fn test_create_index_forwards_params() {
    let store = RecordingStore::default();
    let handle = VectorDbHandle::new(Box::new(store.clone()));
    let params = IndexParams::new("IVF_FLAT", "L2").with_param("nlist", 128);
    handle
        .create_index("code_docs", "vector_field", &params)
        .await
        .unwrap();
    assert_eq!(
        store.calls(),
        vec![Call::Index(
            "code_docs".to_string(),
            "vector_field".to_string(),
            params
        )]
    );
}

#[tokio::test]
async fn test_schema_round_trip() {
    let store = RecordingStore::default();
    let handle = VectorDbHandle::new(Box::new(store));
    let schema = handle.define_schema(&[
        FieldSpec::new("id", DataType::Int64).primary(),
        FieldSpec::new("vector_field", DataType::FloatVector).with_dim(3),
    ]);
    assert_eq!(schema.primary_field().map(|f| f.name.as_str()), Some("id"));

    handle.create_collection("code_docs", &schema).await.unwrap();
    let described = handle.get_schema("code_docs").await.unwrap();
    assert_eq!(described, schema);
}

#[tokio::test]
async fn test_aggregates() {
    let handle = VectorDbHandle::new(Box::new(RecordingStore::default()));
    assert_eq!(handle.count_vectors("code_docs").await.unwrap(), 3);
    assert_eq!(
        handle.get_collection_stats("code_docs").await.unwrap().row_count,
        3
    );
    assert!(handle.collection_exists("code_docs").await.unwrap());
    assert!(!handle.collection_exists("other").await.unwrap());
}

// ============ Embeddings and reranking ============

#[tokio::test]
async fn test_create_embeddings_without_embedder_is_config_error() {
    let handle = VectorDbHandle::new(Box::new(RecordingStore::default()));
    let err = handle
        .create_embeddings(&["hello".to_string()])
        .await
        .unwrap_err();
    assert!(err.is_config(), "{}", err);
}

#[test]
fn test_create_embedding_function_disabled_is_config_error() {
    let mut handle = VectorDbHandle::new(Box::new(RecordingStore::default()));
    let err = handle
        .create_embedding_function(&EmbeddingConfig::default())
        .unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn test_insert_documents_with_embeddings() {
    let store = RecordingStore::default();
    let handle =
        VectorDbHandle::new(Box::new(store.clone())).with_embedder(Box::new(CountingEmbedder));

    let docs = vec!["abc".to_string(), "hello".to_string()];
    let n = handle
        .insert_documents_with_embeddings("code_docs", &docs, vec![1, 2], None)
        .await
        .unwrap();
    assert_eq!(n, 2);

    let Call::Insert(_, batch) = &store.calls()[0] else {
        panic!("expected an insert");
    };
    assert_eq!(batch.ids, vec![1, 2]);
    assert_eq!(batch.vectors, vec![vec![3.0, 1.0, 1.0], vec![5.0, 2.0, 1.0]]);
    let payloads = batch.payloads.as_ref().unwrap();
    assert_eq!(payloads[1]["text"], "hello");
}

#[tokio::test]
async fn test_rerank_without_reranker_is_config_error() {
    let handle = VectorDbHandle::new(Box::new(RecordingStore::default()));
    let err = handle
        .rerank_results("q", vec![hit(1, 0.1, "x")])
        .await
        .unwrap_err();
    assert!(err.is_config());

    let mut handle = handle;
    assert!(handle
        .create_reranker(&RerankerConfig::default())
        .unwrap_err()
        .is_config());
}

#[tokio::test]
async fn test_rerank_results_reorders_hits() {
    let handle = VectorDbHandle::new(Box::new(RecordingStore::default()))
        .with_reranker(Box::new(OverlapReranker));
    let hits = vec![
        hit(1, 0.1, "unrelated text"),
        hit(2, 0.2, "retry with backoff"),
        hit(3, 0.3, "retry once"),
    ];
    let ranked = handle
        .rerank_results("retry backoff", hits)
        .await
        .unwrap();
    let ids: Vec<i64> = ranked.iter().map(|r| r.hit.id).collect();
    assert_eq!(ids, vec![2, 3, 1]);
    assert_eq!(ranked[0].score, 2.0);
}

// ============ In-memory backend end to end ============

#[tokio::test]
async fn test_memory_store_lifecycle() {
    let handle =
        VectorDbHandle::new(Box::new(InMemoryStore::new())).with_embedder(Box::new(CountingEmbedder));
    let schema = CollectionSchema::for_documents(handle.vector_field(), 3);
    handle.create_collection("docs", &schema).await.unwrap();

    handle
        .insert_vectors(
            "docs",
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]],
            vec![10, 20, 30],
        )
        .await
        .unwrap();
    assert_eq!(handle.count_vectors("docs").await.unwrap(), 3);

    let hits = handle
        .search_vectors("docs", &[0.9, 0.1, 0.0], 2, "L2", JsonMap::new())
        .await
        .unwrap();
    assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![10, 20]);

    handle.delete_vectors("docs", &[10]).await.unwrap();
    assert_eq!(handle.count_vectors("docs").await.unwrap(), 2);

    let hits = handle
        .hybrid_search("docs", &[0.9, 0.1, 0.0], "id != 20", 5, "L2", JsonMap::new())
        .await
        .unwrap();
    assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![30]);

    handle.drop_collection("docs").await.unwrap();
    assert!(handle.list_collections().await.unwrap().is_empty());
}
