//! Milvus backend over the RESTful API v2.
//!
//! Every call is a `POST` to `/v2/vectordb/<resource>/<action>` with a JSON
//! body. Responses carry `{"code": 0, "data": ...}` on success; any other
//! code is surfaced as [`VectorDbError::Backend`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    CollectionSchema, CollectionStats, DataType, FieldSpec, IndexParams, InsertBatch, JsonMap,
    SearchHit, SearchRequest, VectorStore,
};
use crate::config::VectorDbConfig;
use crate::error::{VectorDbError, VectorDbResult};

pub struct MilvusStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    vector_field: String,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

impl MilvusStore {
    pub fn new(config: &VectorDbConfig) -> VectorDbResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token(),
            vector_field: config.vector_field.clone(),
        })
    }

    async fn call(&self, path: &str, body: Value) -> VectorDbResult<Value> {
        let url = format!("{}/v2/vectordb/{}", self.base_url, path);
        tracing::debug!("POST {} {}", url, body);

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VectorDbError::Http(format!("{} from {}: {}", status, url, text)));
        }

        let envelope: Envelope = response.json().await?;
        if envelope.code != 0 {
            return Err(VectorDbError::Backend {
                code: envelope.code,
                message: envelope.message.unwrap_or_default(),
            });
        }
        Ok(envelope.data)
    }
}

fn field_to_json(field: &FieldSpec) -> Value {
    let mut params = JsonMap::new();
    if let Some(dim) = field.dim {
        params.insert("dim".to_string(), Value::String(dim.to_string()));
    }
    if let Some(max_length) = field.max_length {
        params.insert("max_length".to_string(), Value::String(max_length.to_string()));
    }
    let mut out = json!({
        "fieldName": field.name,
        "dataType": field.dtype.as_str(),
        "isPrimary": field.is_primary,
    });
    if !params.is_empty() {
        out["elementTypeParams"] = Value::Object(params);
    }
    out
}

/// Parse a `describe` response's `fields` array.
fn schema_from_describe(data: &Value) -> VectorDbResult<CollectionSchema> {
    let fields = data
        .get("fields")
        .and_then(|f| f.as_array())
        .ok_or_else(|| VectorDbError::Http("describe response missing fields".to_string()))?;

    let mut specs = Vec::with_capacity(fields.len());
    for field in fields {
        let name = field
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let dtype: DataType = field
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .parse()?;
        let mut spec = FieldSpec::new(name, dtype);
        spec.is_primary = field
            .get("primaryKey")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        for param in field
            .get("params")
            .and_then(|p| p.as_array())
            .into_iter()
            .flatten()
        {
            let key = param.get("key").and_then(|k| k.as_str());
            let value = param.get("value").and_then(|v| {
                v.as_str()
                    .and_then(|s| s.parse::<usize>().ok())
                    .or_else(|| v.as_u64().map(|n| n as usize))
            });
            match (key, value) {
                (Some("dim"), Some(v)) => spec.dim = Some(v),
                (Some("max_length"), Some(v)) => spec.max_length = Some(v),
                _ => {}
            }
        }
        specs.push(spec);
    }

    Ok(CollectionSchema {
        fields: specs,
        description: data
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

/// Split `{"metric_type": .., rest..}` into Milvus's
/// `{"metricType": .., "params": {rest..}}`.
fn search_params(params: &JsonMap) -> Value {
    let mut rest = params.clone();
    let metric = rest.remove("metric_type");
    let mut out = JsonMap::new();
    if let Some(metric) = metric {
        out.insert("metricType".to_string(), metric);
    }
    out.insert("params".to_string(), Value::Object(rest));
    Value::Object(out)
}

/// `vector_field` is dropped from the payload; a `*` projection returns it.
fn hit_from_json(row: &Value, vector_field: &str) -> Option<SearchHit> {
    let object = row.as_object()?;
    let id = object.get("id").and_then(|v| v.as_i64())?;
    let distance = object
        .get("distance")
        .and_then(|v| v.as_f64())
        .unwrap_or_default() as f32;
    let payload = object
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "id" | "distance") && k.as_str() != vector_field)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Some(SearchHit {
        id,
        distance,
        payload,
    })
}

#[async_trait]
impl VectorStore for MilvusStore {
    fn backend_name(&self) -> &str {
        "milvus"
    }

    async fn create_collection(&self, name: &str, schema: &CollectionSchema) -> VectorDbResult<()> {
        let fields: Vec<Value> = schema.fields.iter().map(field_to_json).collect();
        self.call(
            "collections/create",
            json!({
                "collectionName": name,
                "description": schema.description,
                "schema": {
                    "autoId": false,
                    "enableDynamicField": true,
                    "fields": fields,
                },
            }),
        )
        .await?;
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> VectorDbResult<()> {
        self.call("collections/drop", json!({ "collectionName": name }))
            .await?;
        Ok(())
    }

    async fn list_collections(&self) -> VectorDbResult<Vec<String>> {
        let data = self.call("collections/list", json!({})).await?;
        Ok(data
            .as_array()
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn has_collection(&self, name: &str) -> VectorDbResult<bool> {
        let data = self
            .call("collections/has", json!({ "collectionName": name }))
            .await?;
        Ok(data.get("has").and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn describe_collection(&self, name: &str) -> VectorDbResult<CollectionSchema> {
        let data = self
            .call("collections/describe", json!({ "collectionName": name }))
            .await?;
        schema_from_describe(&data)
    }

    async fn insert(&self, collection: &str, batch: &InsertBatch) -> VectorDbResult<usize> {
        let rows: Vec<Value> = batch
            .ids
            .iter()
            .zip(batch.vectors.iter())
            .enumerate()
            .map(|(i, (id, vector))| {
                let mut row = batch
                    .payloads
                    .as_ref()
                    .and_then(|p| p.get(i))
                    .cloned()
                    .unwrap_or_default();
                row.insert("id".to_string(), json!(id));
                row.insert(self.vector_field.clone(), json!(vector));
                Value::Object(row)
            })
            .collect();

        let data = self
            .call(
                "entities/insert",
                json!({ "collectionName": collection, "data": rows }),
            )
            .await?;
        Ok(data
            .get("insertCount")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(batch.len()))
    }

    async fn delete(&self, collection: &str, filter: &str) -> VectorDbResult<()> {
        self.call(
            "entities/delete",
            json!({ "collectionName": collection, "filter": filter }),
        )
        .await?;
        Ok(())
    }

    async fn create_index(
        &self,
        collection: &str,
        field: &str,
        params: &IndexParams,
    ) -> VectorDbResult<()> {
        let mut build = params.params.clone();
        build.insert("index_type".to_string(), json!(params.index_type));
        self.call(
            "indexes/create",
            json!({
                "collectionName": collection,
                "indexParams": [{
                    "fieldName": field,
                    "indexName": field,
                    "metricType": params.metric_type,
                    "params": build,
                }],
            }),
        )
        .await?;
        Ok(())
    }

    async fn drop_index(&self, collection: &str, field: &str) -> VectorDbResult<()> {
        self.call(
            "indexes/drop",
            json!({ "collectionName": collection, "indexName": field }),
        )
        .await?;
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> VectorDbResult<Vec<Vec<SearchHit>>> {
        let mut results = Vec::with_capacity(request.vectors.len());
        for vector in &request.vectors {
            let mut body = json!({
                "collectionName": request.collection,
                "data": [vector],
                "annsField": request.field,
                "limit": request.top_k,
                "searchParams": search_params(&request.params),
                "outputFields": request.output_fields,
            });
            if let Some(filter) = &request.filter {
                body["filter"] = json!(filter);
            }
            let data = self.call("entities/search", body).await?;
            let hits = data
                .as_array()
                .map(|rows| {
                    rows.iter()
                        .filter_map(|row| hit_from_json(row, &request.field))
                        .collect()
                })
                .unwrap_or_default();
            results.push(hits);
        }
        Ok(results)
    }

    async fn collection_stats(&self, collection: &str) -> VectorDbResult<CollectionStats> {
        let data = self
            .call(
                "collections/get_stats",
                json!({ "collectionName": collection }),
            )
            .await?;
        Ok(CollectionStats {
            row_count: data.get("rowCount").and_then(|v| v.as_u64()).unwrap_or(0),
        })
    }

    async fn count(&self, collection: &str, filter: Option<&str>) -> VectorDbResult<u64> {
        let data = self
            .call(
                "entities/query",
                json!({
                    "collectionName": collection,
                    "filter": filter.unwrap_or(""),
                    "outputFields": ["count(*)"],
                }),
            )
            .await?;
        Ok(data
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("count(*)"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0))
    }
}
