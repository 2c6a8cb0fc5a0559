//! The seam between the resilient client and a concrete search cluster.
//!
//! [`ClusterHandle`] is one open connection; [`ClusterConnector`] builds
//! handles from addresses. The production implementation lives in
//! [`super::http`]; tests script their own.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::Result;
use crate::Document;

/// Cluster health as reported by the cluster itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub cluster_name: String,
    pub status: HealthStatus,
    pub number_of_nodes: u32,
}

impl ClusterHealth {
    /// Yellow or green: primaries are allocated and requests can be served.
    pub fn is_ready(&self) -> bool {
        self.status != HealthStatus::Red
    }
}

/// A document as stored in an index.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    /// Mapping type, when the cluster still reports one.
    pub type_name: Option<String>,
    pub source: Document,
}

/// One action of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkAction {
    Index {
        id: String,
        type_name: String,
        document: Document,
    },
    Delete {
        id: String,
        type_name: String,
    },
}

impl BulkAction {
    pub fn id(&self) -> &str {
        match self {
            Self::Index { id, .. } | Self::Delete { id, .. } => id,
        }
    }
}

/// Per-item outcome of a bulk request, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItem {
    pub id: String,
    /// The item created a new document (index) or removed one (delete).
    pub created: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HighlightRequest {
    pub field: String,
    pub fragment_size: usize,
    pub pre_tag: String,
    pub post_tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermsAggregation {
    pub field: String,
    pub size: usize,
    pub min_doc_count: u64,
}

/// A search request in cluster query-DSL terms.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchRequest {
    pub query: Value,
    pub post_filter: Option<Value>,
    pub sort: Vec<Value>,
    pub from: usize,
    pub size: usize,
    pub explain: bool,
    pub highlight: Option<HighlightRequest>,
    pub aggregations: Vec<TermsAggregation>,
    /// Open a scroll cursor with this keep-alive.
    pub scroll: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub type_name: Option<String>,
    pub source: Document,
    pub explanation: Option<String>,
    pub highlights: IndexMap<String, Vec<String>>,
}

impl SearchHit {
    pub fn new(id: impl Into<String>, source: Document) -> Self {
        Self {
            id: id.into(),
            type_name: None,
            source,
            explanation: None,
            highlights: IndexMap::new(),
        }
    }
}

/// A raw terms bucket in cluster order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub key: String,
    pub doc_count: u64,
}

impl Bucket {
    pub fn new(key: impl Into<String>, doc_count: u64) -> Self {
        Self {
            key: key.into(),
            doc_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchResponse {
    pub total_hits: u64,
    pub hits: Vec<SearchHit>,
    /// Buckets per aggregation name.
    pub aggregations: IndexMap<String, Vec<Bucket>>,
    pub scroll_id: Option<String>,
}

/// One live connection to a search cluster.
///
/// Implementations report connectivity failures through the transient
/// [`super::IndexError`] variants so callers can reconnect and retry.
pub trait ClusterHandle: Send + Sync {
    /// Human-readable target, for logs.
    fn describe(&self) -> String;

    fn health(&self) -> Result<ClusterHealth>;

    fn index_exists(&self, index: &str) -> Result<bool>;

    fn create_index(&self, index: &str, shards: u32, replicas: u32) -> Result<()>;

    fn put_mapping(&self, index: &str, mapping: &Value) -> Result<()>;

    fn refresh(&self, index: &str) -> Result<()>;

    fn count(&self, index: &str, query: &Value) -> Result<u64>;

    fn exists(&self, index: &str, id: &str) -> Result<bool>;

    fn get(&self, index: &str, id: &str) -> Result<Option<StoredDocument>>;

    /// Fetch many documents at once; missing ids are omitted.
    fn multi_get(&self, index: &str, ids: &[String]) -> Result<Vec<StoredDocument>>;

    /// Insert or merge `document`; returns whether it was created.
    fn upsert(&self, index: &str, type_name: &str, id: &str, document: &Document) -> Result<bool>;

    /// Returns whether a document was deleted.
    fn delete(&self, index: &str, type_name: &str, id: &str) -> Result<bool>;

    fn bulk(&self, index: &str, actions: &[BulkAction]) -> Result<Vec<BulkItem>>;

    fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResponse>;

    /// Next page of an open scroll cursor.
    fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<SearchResponse>;

    fn clear_scroll(&self, scroll_id: &str) -> Result<()>;

    /// Release the connection. Later calls fail with a transient error.
    fn close(&self) -> Result<()>;
}

/// Builds cluster handles.
pub trait ClusterConnector: Send + Sync {
    fn open(&self, addresses: &[String], cluster_name: &str) -> Result<Arc<dyn ClusterHandle>>;
}
