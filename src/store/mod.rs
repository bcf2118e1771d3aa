//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait is the capability set the pipeline needs from a
//! vector database: schema management, vector mutation, indexing, search and
//! aggregates. Backends are injected into
//! [`VectorDbHandle`](crate::vectordb::VectorDbHandle):
//!
//! - [`milvus::MilvusStore`] talks to Milvus over its RESTful API v2.
//! - [`memory::InMemoryStore`] is a brute-force store for tests and offline runs.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`create_collection`](VectorStore::create_collection) | Create a named collection from a schema |
//! | [`drop_collection`](VectorStore::drop_collection) | Remove a collection and its data |
//! | [`list_collections`](VectorStore::list_collections) | Names of all collections |
//! | [`has_collection`](VectorStore::has_collection) | Existence check |
//! | [`describe_collection`](VectorStore::describe_collection) | Schema of a collection |
//! | [`insert`](VectorStore::insert) | Append ids, vectors and payloads |
//! | [`delete`](VectorStore::delete) | Delete rows matching a filter expression |
//! | [`create_index`](VectorStore::create_index) / [`drop_index`](VectorStore::drop_index) | Index lifecycle |
//! | [`search`](VectorStore::search) | Top-k similarity search, optionally filtered |
//! | [`collection_stats`](VectorStore::collection_stats) / [`count`](VectorStore::count) | Aggregates |

pub mod filter;
pub mod memory;
pub mod milvus;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{VectorDbError, VectorDbResult};

/// JSON object used for free-form parameters and row payloads.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Scalar and vector field types, named as Milvus names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int64,
    Float,
    Double,
    VarChar,
    #[serde(rename = "JSON")]
    Json,
    FloatVector,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "Bool",
            DataType::Int64 => "Int64",
            DataType::Float => "Float",
            DataType::Double => "Double",
            DataType::VarChar => "VarChar",
            DataType::Json => "JSON",
            DataType::FloatVector => "FloatVector",
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, DataType::FloatVector)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = VectorDbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bool" => Ok(DataType::Bool),
            "int64" => Ok(DataType::Int64),
            "float" => Ok(DataType::Float),
            "double" => Ok(DataType::Double),
            "varchar" => Ok(DataType::VarChar),
            "json" => Ok(DataType::Json),
            "floatvector" | "float_vector" => Ok(DataType::FloatVector),
            other => Err(VectorDbError::invalid_argument(format!(
                "unknown data type: {}",
                other
            ))),
        }
    }
}

/// One field of a collection schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub dtype: DataType,
    #[serde(default)]
    pub is_primary: bool,
    /// Vector dimensionality, for vector fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim: Option<usize>,
    /// Maximum length, for `VarChar` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dtype,
            is_primary: false,
            dim: None,
            max_length: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub description: String,
}

impl CollectionSchema {
    pub fn primary_field(&self) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.is_primary)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn vector_field(&self) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.dtype.is_vector())
    }

    /// Schema used by the ingest pipeline: an `id` primary key, a text
    /// payload and one vector field.
    pub fn for_documents(vector_field: &str, dim: usize) -> Self {
        Self {
            fields: vec![
                FieldSpec::new("id", DataType::Int64).primary(),
                FieldSpec::new("text", DataType::VarChar).with_max_length(65_535),
                FieldSpec::new(vector_field, DataType::FloatVector).with_dim(dim),
            ],
            description: "Repository documents".to_string(),
        }
    }
}

/// Similarity metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    /// Squared Euclidean distance; smaller is closer.
    L2,
    /// Inner product; larger is closer.
    Ip,
    /// Cosine similarity; larger is closer.
    Cosine,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::L2 => "L2",
            MetricType::Ip => "IP",
            MetricType::Cosine => "COSINE",
        }
    }

    pub fn smaller_is_closer(&self) -> bool {
        matches!(self, MetricType::L2)
    }
}

impl FromStr for MetricType {
    type Err = VectorDbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "L2" => Ok(MetricType::L2),
            "IP" => Ok(MetricType::Ip),
            "COSINE" => Ok(MetricType::Cosine),
            other => Err(VectorDbError::invalid_argument(format!(
                "unsupported metric type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexParams {
    pub index_type: String,
    pub metric_type: String,
    /// Build parameters such as `nlist`.
    pub params: JsonMap,
}

impl IndexParams {
    pub fn new(index_type: impl Into<String>, metric_type: impl Into<String>) -> Self {
        Self {
            index_type: index_type.into(),
            metric_type: metric_type.into(),
            params: JsonMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// Column-oriented insert: ids first, vectors second, optional per-row
/// payloads third. All present columns have the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertBatch {
    pub ids: Vec<i64>,
    pub vectors: Vec<Vec<f32>>,
    pub payloads: Option<Vec<JsonMap>>,
}

impl InsertBatch {
    pub fn new(ids: Vec<i64>, vectors: Vec<Vec<f32>>) -> VectorDbResult<Self> {
        if ids.len() != vectors.len() {
            return Err(VectorDbError::invalid_argument(format!(
                "{} ids for {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        Ok(Self {
            ids,
            vectors,
            payloads: None,
        })
    }

    pub fn with_payloads(mut self, payloads: Vec<JsonMap>) -> VectorDbResult<Self> {
        if payloads.len() != self.ids.len() {
            return Err(VectorDbError::invalid_argument(format!(
                "{} payloads for {} ids",
                payloads.len(),
                self.ids.len()
            )));
        }
        self.payloads = Some(payloads);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub collection: String,
    /// Vector field searched against.
    pub field: String,
    pub vectors: Vec<Vec<f32>>,
    pub top_k: usize,
    /// Search parameters; always carries `metric_type`.
    pub params: JsonMap,
    /// Boolean filter expression, for hybrid search.
    pub filter: Option<String>,
    /// Payload fields returned with each hit; [`ALL_OUTPUT_FIELDS`] selects
    /// every scalar field.
    pub output_fields: Vec<String>,
}

/// Wildcard for [`SearchRequest::output_fields`].
pub const ALL_OUTPUT_FIELDS: &str = "*";

impl SearchRequest {
    pub fn metric_type(&self) -> Option<&str> {
        self.params.get("metric_type").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: i64,
    /// Distance or similarity, depending on the metric.
    pub distance: f32,
    pub payload: JsonMap,
}

impl SearchHit {
    pub fn text(&self) -> Option<&str> {
        self.payload.get("text").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionStats {
    pub row_count: u64,
}

/// Abstract vector-database backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name for logs.
    fn backend_name(&self) -> &str;

    async fn create_collection(&self, name: &str, schema: &CollectionSchema) -> VectorDbResult<()>;

    async fn drop_collection(&self, name: &str) -> VectorDbResult<()>;

    async fn list_collections(&self) -> VectorDbResult<Vec<String>>;

    async fn has_collection(&self, name: &str) -> VectorDbResult<bool>;

    async fn describe_collection(&self, name: &str) -> VectorDbResult<CollectionSchema>;

    /// Returns the number of rows inserted.
    async fn insert(&self, collection: &str, batch: &InsertBatch) -> VectorDbResult<usize>;

    /// Delete rows matching `filter`, e.g. `id in [7, 8]`.
    async fn delete(&self, collection: &str, filter: &str) -> VectorDbResult<()>;

    async fn create_index(
        &self,
        collection: &str,
        field: &str,
        params: &IndexParams,
    ) -> VectorDbResult<()>;

    async fn drop_index(&self, collection: &str, field: &str) -> VectorDbResult<()>;

    /// One hit list per query vector, best first.
    async fn search(&self, request: &SearchRequest) -> VectorDbResult<Vec<Vec<SearchHit>>>;

    async fn collection_stats(&self, collection: &str) -> VectorDbResult<CollectionStats>;

    /// Rows matching `filter`, or all rows.
    async fn count(&self, collection: &str, filter: Option<&str>) -> VectorDbResult<u64>;
}

/// Build the backend named by `config.backend`.
pub fn create_store(config: &crate::config::VectorDbConfig) -> VectorDbResult<Box<dyn VectorStore>> {
    match config.backend.as_str() {
        "milvus" => Ok(Box::new(milvus::MilvusStore::new(config)?)),
        "memory" => Ok(Box::new(memory::InMemoryStore::new())),
        other => Err(VectorDbError::config(format!(
            "unknown vectordb backend: {}",
            other
        ))),
    }
}
