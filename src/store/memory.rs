//! In-memory [`VectorStore`] implementation for tests and offline runs.
//!
//! Collections live in a `BTreeMap` behind a `tokio::sync::RwLock`.
//! Search is brute force over every row; filters use [`Filter`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::filter::Filter;
use super::{
    CollectionSchema, CollectionStats, IndexParams, InsertBatch, JsonMap, MetricType,
    SearchHit, SearchRequest, VectorStore, ALL_OUTPUT_FIELDS,
};
use crate::embedding::cosine_similarity;
use crate::error::{VectorDbError, VectorDbResult};

struct StoredRow {
    id: i64,
    vector: Vec<f32>,
    payload: JsonMap,
}

struct StoredCollection {
    schema: CollectionSchema,
    rows: Vec<StoredRow>,
    indexes: BTreeMap<String, IndexParams>,
}

/// Brute-force vector store kept entirely in process memory.
pub struct InMemoryStore {
    collections: RwLock<BTreeMap<String, StoredCollection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
        }
    }

    /// Names of fields with an index, for inspection in tests.
    pub async fn indexed_fields(&self, collection: &str) -> VectorDbResult<Vec<String>> {
        let collections = self.collections.read().await;
        let stored = get(&collections, collection)?;
        Ok(stored.indexes.keys().cloned().collect())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn get<'a>(
    collections: &'a BTreeMap<String, StoredCollection>,
    name: &str,
) -> VectorDbResult<&'a StoredCollection> {
    collections
        .get(name)
        .ok_or_else(|| VectorDbError::NotFound(name.to_string()))
}

fn get_mut<'a>(
    collections: &'a mut BTreeMap<String, StoredCollection>,
    name: &str,
) -> VectorDbResult<&'a mut StoredCollection> {
    collections
        .get_mut(name)
        .ok_or_else(|| VectorDbError::NotFound(name.to_string()))
}

fn score(metric: MetricType, query: &[f32], vector: &[f32]) -> f32 {
    match metric {
        MetricType::L2 => query
            .iter()
            .zip(vector.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum(),
        MetricType::Ip => query.iter().zip(vector.iter()).map(|(a, b)| a * b).sum(),
        MetricType::Cosine => cosine_similarity(query, vector),
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn create_collection(&self, name: &str, schema: &CollectionSchema) -> VectorDbResult<()> {
        if schema.primary_field().is_none() {
            return Err(VectorDbError::invalid_argument(format!(
                "collection {} has no primary field",
                name
            )));
        }
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(VectorDbError::Backend {
                code: 65535,
                message: format!("collection {} already exists", name),
            });
        }
        collections.insert(
            name.to_string(),
            StoredCollection {
                schema: schema.clone(),
                rows: Vec::new(),
                indexes: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> VectorDbResult<()> {
        let mut collections = self.collections.write().await;
        collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| VectorDbError::NotFound(name.to_string()))
    }

    async fn list_collections(&self) -> VectorDbResult<Vec<String>> {
        Ok(self.collections.read().await.keys().cloned().collect())
    }

    async fn has_collection(&self, name: &str) -> VectorDbResult<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn describe_collection(&self, name: &str) -> VectorDbResult<CollectionSchema> {
        let collections = self.collections.read().await;
        Ok(get(&collections, name)?.schema.clone())
    }

    async fn insert(&self, collection: &str, batch: &InsertBatch) -> VectorDbResult<usize> {
        let mut collections = self.collections.write().await;
        let stored = get_mut(&mut collections, collection)?;

        if let Some(dim) = stored.schema.vector_field().and_then(|f| f.dim) {
            if let Some(bad) = batch.vectors.iter().find(|v| v.len() != dim) {
                return Err(VectorDbError::invalid_argument(format!(
                    "vector of length {} does not match dim {}",
                    bad.len(),
                    dim
                )));
            }
        }

        for (row, (id, vector)) in batch.ids.iter().zip(batch.vectors.iter()).enumerate() {
            let payload = batch
                .payloads
                .as_ref()
                .and_then(|p| p.get(row))
                .cloned()
                .unwrap_or_default();
            stored.rows.retain(|r| r.id != *id);
            stored.rows.push(StoredRow {
                id: *id,
                vector: vector.clone(),
                payload,
            });
        }
        Ok(batch.len())
    }

    async fn delete(&self, collection: &str, filter: &str) -> VectorDbResult<()> {
        let filter = Filter::parse(filter)?;
        let mut collections = self.collections.write().await;
        let stored = get_mut(&mut collections, collection)?;
        stored.rows.retain(|r| !filter.matches(r.id, &r.payload));
        Ok(())
    }

    async fn create_index(
        &self,
        collection: &str,
        field: &str,
        params: &IndexParams,
    ) -> VectorDbResult<()> {
        let mut collections = self.collections.write().await;
        let stored = get_mut(&mut collections, collection)?;
        if stored.schema.field(field).is_none() {
            return Err(VectorDbError::invalid_argument(format!(
                "field {} not in collection {}",
                field, collection
            )));
        }
        stored.indexes.insert(field.to_string(), params.clone());
        Ok(())
    }

    async fn drop_index(&self, collection: &str, field: &str) -> VectorDbResult<()> {
        let mut collections = self.collections.write().await;
        let stored = get_mut(&mut collections, collection)?;
        stored.indexes.remove(field);
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> VectorDbResult<Vec<Vec<SearchHit>>> {
        let metric: MetricType = request.metric_type().unwrap_or("L2").parse()?;
        let filter = request
            .filter
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .map(Filter::parse)
            .transpose()?;

        let collections = self.collections.read().await;
        let stored = get(&collections, &request.collection)?;

        let mut results = Vec::with_capacity(request.vectors.len());
        for query in &request.vectors {
            let mut hits: Vec<SearchHit> = stored
                .rows
                .iter()
                .filter(|r| filter.as_ref().map_or(true, |f| f.matches(r.id, &r.payload)))
                .map(|r| {
                    let payload = if request.output_fields.is_empty()
                        || request.output_fields.iter().any(|f| f == ALL_OUTPUT_FIELDS)
                    {
                        r.payload.clone()
                    } else {
                        r.payload
                            .iter()
                            .filter(|(k, _)| request.output_fields.contains(k))
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect()
                    };
                    SearchHit {
                        id: r.id,
                        distance: score(metric, query, &r.vector),
                        payload,
                    }
                })
                .collect();

            hits.sort_by(|a, b| {
                let ord = a
                    .distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal);
                if metric.smaller_is_closer() {
                    ord
                } else {
                    ord.reverse()
                }
            });
            hits.truncate(request.top_k);
            results.push(hits);
        }
        Ok(results)
    }

    async fn collection_stats(&self, collection: &str) -> VectorDbResult<CollectionStats> {
        let collections = self.collections.read().await;
        Ok(CollectionStats {
            row_count: get(&collections, collection)?.rows.len() as u64,
        })
    }

    async fn count(&self, collection: &str, filter: Option<&str>) -> VectorDbResult<u64> {
        let filter = filter
            .filter(|f| !f.trim().is_empty())
            .map(Filter::parse)
            .transpose()?;
        let collections = self.collections.read().await;
        let stored = get(&collections, collection)?;
        Ok(stored
            .rows
            .iter()
            .filter(|r| filter.as_ref().map_or(true, |f| f.matches(r.id, &r.payload)))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DataType, FieldSpec};

    async fn store_with_rows() -> InMemoryStore {
        let store = InMemoryStore::new();
        let schema = CollectionSchema {
            fields: vec![
                FieldSpec::new("id", DataType::Int64).primary(),
                FieldSpec::new("vector_field", DataType::FloatVector).with_dim(2),
            ],
            description: String::new(),
        };
        store.create_collection("docs", &schema).await.unwrap();
        let batch = InsertBatch::new(
            vec![1, 2, 3],
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.9, 0.1]],
        )
        .unwrap();
        store.insert("docs", &batch).await.unwrap();
        store
    }

    fn request(metric: &str, filter: Option<&str>) -> SearchRequest {
        let mut params = JsonMap::new();
        params.insert("metric_type".to_string(), metric.into());
        SearchRequest {
            collection: "docs".to_string(),
            field: "vector_field".to_string(),
            vectors: vec![vec![1.0, 0.0]],
            top_k: 3,
            params,
            filter: filter.map(str::to_string),
            output_fields: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_l2_ascending() {
        let store = store_with_rows().await;
        let hits = store.search(&request("L2", None)).await.unwrap();
        let ids: Vec<i64> = hits[0].iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
        assert!(hits[0][0].distance <= hits[0][1].distance);
    }

    #[tokio::test]
    async fn test_cosine_and_ip_descending() {
        let store = store_with_rows().await;
        for metric in ["COSINE", "IP"] {
            let hits = store.search(&request(metric, None)).await.unwrap();
            let ids: Vec<i64> = hits[0].iter().map(|h| h.id).collect();
            assert_eq!(ids, vec![1, 3, 2], "{}", metric);
        }
    }

    #[tokio::test]
    async fn test_filter_respected() {
        let store = store_with_rows().await;
        let hits = store
            .search(&request("L2", Some("id in [2, 3]")))
            .await
            .unwrap();
        let ids: Vec<i64> = hits[0].iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_delete_and_count() {
        let store = store_with_rows().await;
        assert_eq!(store.count("docs", None).await.unwrap(), 3);
        store.delete("docs", "id in [1, 2]").await.unwrap();
        assert_eq!(store.count("docs", None).await.unwrap(), 1);
        assert_eq!(store.collection_stats("docs").await.unwrap().row_count, 1);
    }

    #[tokio::test]
    async fn test_delete_keeps_adjacent_large_ids() {
        let store = store_with_rows().await;
        let low = 1i64 << 53;
        let batch =
            InsertBatch::new(vec![low, low + 1], vec![vec![0.5, 0.5], vec![0.5, 0.5]]).unwrap();
        store.insert("docs", &batch).await.unwrap();
        store
            .delete("docs", &format!("id in [{}]", low + 1))
            .await
            .unwrap();
        assert_eq!(store.count("docs", None).await.unwrap(), 4);
        assert_eq!(
            store
                .count("docs", Some(&format!("id == {}", low)))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_wildcard_output_fields_return_payload() {
        let store = store_with_rows().await;
        let mut payload = JsonMap::new();
        payload.insert("text".to_string(), "fn main".into());
        let batch = InsertBatch::new(vec![10], vec![vec![1.0, 0.0]])
            .unwrap()
            .with_payloads(vec![payload])
            .unwrap();
        store.insert("docs", &batch).await.unwrap();

        let mut req = request("L2", Some("id == 10"));
        req.output_fields = vec![ALL_OUTPUT_FIELDS.to_string()];
        let hits = store.search(&req).await.unwrap();
        assert_eq!(hits[0][0].text(), Some("fn main"));
    }

    #[tokio::test]
    async fn test_dim_mismatch_rejected() {
        let store = store_with_rows().await;
        let batch = InsertBatch::new(vec![9], vec![vec![1.0, 2.0, 3.0]]).unwrap();
        assert!(store.insert("docs", &batch).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.count("nope", None).await,
            Err(VectorDbError::NotFound(_))
        ));
        assert!(!store.has_collection("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_index_lifecycle() {
        let store = store_with_rows().await;
        store
            .create_index("docs", "vector_field", &IndexParams::new("IVF_FLAT", "L2"))
            .await
            .unwrap();
        assert_eq!(store.indexed_fields("docs").await.unwrap(), vec!["vector_field"]);
        store.drop_index("docs", "vector_field").await.unwrap();
        assert!(store.indexed_fields("docs").await.unwrap().is_empty());
    }
}
