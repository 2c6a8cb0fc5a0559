//! Retry-on-transient-failure wrapper around every cluster operation.
//!
//! Each call runs against the handle that is live when the attempt starts.
//! A transient failure (see [`IndexError::is_transient`]) is logged, the
//! operation policy's delay is slept on the injected clock, the connection
//! manager reconnects and the attempt is repeated. Other errors surface
//! immediately. Search queries use their own bounded policy and degrade to
//! an empty [`QueryResult`] once it is exhausted.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{info, warn};

use super::cluster::{BulkAction, ClusterHandle, SearchRequest};
use super::connection::ConnectionManager;
use super::error::{IndexError, Result};
use super::query::{Filter, QueryResult, QuerySpec, enrich_document};
use super::retry::RetryPolicy;
use crate::Document;

/// Field holding a caller-side version number; never written to the index.
pub const VERSION_FIELD: &str = "_version";

/// Type reported for documents whose cluster response carries none.
pub const DEFAULT_TYPE: &str = "web";

/// Bulk writes slower than this may be throttled.
pub const THROTTLE_TIME_THRESHOLD_MS: u64 = 2_000;
/// Bulk writes below this rate (created documents per second) are throttled.
pub const THROTTLE_OPS_THRESHOLD: u64 = 1_000;

pub const SCROLL_KEEP_ALIVE: Duration = Duration::from_secs(60);
pub const SCROLL_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    pub operation_policy: RetryPolicy,
    pub query_policy: RetryPolicy,
    pub throttling_factor: f64,
    pub default_type: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            operation_policy: RetryPolicy::operation(),
            query_policy: RetryPolicy::query(),
            throttling_factor: 1.0,
            default_type: DEFAULT_TYPE.to_string(),
        }
    }
}

/// One document of a bulk write. Entries without an id are skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkEntry {
    pub id: Option<String>,
    pub type_name: String,
    pub document: Document,
}

impl BulkEntry {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>, document: Document) -> Self {
        Self {
            id: Some(id.into()),
            type_name: type_name.into(),
            document,
        }
    }
}

/// Per-item outcome of a bulk write.
///
/// Only newly created documents appear in `created`; updates succeed
/// silently. The write succeeded when `errors` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkWriteResult {
    pub created: BTreeSet<String>,
    pub errors: BTreeMap<String, String>,
}

impl BulkWriteResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug)]
pub struct ResilientClient {
    connection: Arc<ConnectionManager>,
    options: ClientOptions,
}

impl ResilientClient {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self::with_options(connection, ClientOptions::default())
    }

    pub fn with_options(connection: Arc<ConnectionManager>, options: ClientOptions) -> Self {
        Self {
            connection,
            options,
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Whether the cluster has ever reported itself ready.
    pub fn cluster_ready(&self) -> bool {
        self.connection.cluster_ready()
    }

    fn with_retry<T>(
        &self,
        operation: &'static str,
        policy: RetryPolicy,
        mut attempt: impl FnMut(&dyn ClusterHandle) -> Result<T>,
    ) -> Result<T> {
        let cancel = self.connection.cancel_token();
        let mut failures: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            let mut generation = 0;
            let outcome = self.connection.current().and_then(|live| {
                generation = live.generation();
                attempt(&**live.handle())
            });
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    failures += 1;
                    if !policy.allows(failures) {
                        warn!(operation, attempts = failures, error = %e, "giving up after transient failures");
                        return Err(e);
                    }
                    let delay = policy.delay_for(failures - 1);
                    info!(
                        operation,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, reconnecting"
                    );
                    self.connection.clock().sleep(delay);
                    if cancel.is_cancelled() {
                        return Err(IndexError::Cancelled);
                    }
                    self.connection.reconnect(generation)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn retry<T>(
        &self,
        operation: &'static str,
        attempt: impl FnMut(&dyn ClusterHandle) -> Result<T>,
    ) -> Result<T> {
        self.with_retry(operation, self.options.operation_policy, attempt)
    }

    /// Create `index` unless it exists. Losing a creation race is fine.
    pub fn create_index_if_not_exists(&self, index: &str, shards: u32, replicas: u32) -> Result<()> {
        self.retry("create_index", |cluster| {
            if cluster.index_exists(index)? {
                return Ok(());
            }
            match cluster.create_index(index, shards, replicas) {
                Err(IndexError::Rejected { reason, .. })
                    if reason.contains("resource_already_exists") =>
                {
                    Ok(())
                }
                other => other,
            }
        })
    }

    /// Apply a mapping once. Transient failures are logged, not returned.
    pub fn set_mapping(&self, index: &str, mapping: &Value) -> Result<()> {
        let outcome = self
            .connection
            .current()
            .and_then(|live| live.handle().put_mapping(index, mapping));
        match outcome {
            Err(e) if e.is_transient() => {
                warn!(index, error = %e, "could not set mapping");
                Ok(())
            }
            other => other,
        }
    }

    pub fn refresh(&self, index: &str) -> Result<()> {
        self.retry("refresh", |cluster| cluster.refresh(index))
    }

    pub fn count(&self, index: &str, filter: &Filter) -> Result<u64> {
        let query = filter.to_dsl(0);
        self.retry("count", |cluster| cluster.count(index, &query))
    }

    pub fn count_all(&self, index: &str) -> Result<u64> {
        self.count(index, &Filter::MatchAll)
    }

    pub fn exist(&self, index: &str, id: &str) -> Result<bool> {
        self.retry("exist", |cluster| cluster.exists(index, id))
    }

    /// Subset of `ids` present in `index`.
    pub fn exist_bulk(&self, index: &str, ids: &[String]) -> Result<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        self.retry("exist_bulk", |cluster| {
            let found = cluster.multi_get(index, ids)?;
            Ok(found.into_iter().map(|doc| doc.id).collect())
        })
    }

    pub fn read_map(&self, index: &str, id: &str) -> Result<Option<Document>> {
        self.retry("read_map", |cluster| {
            Ok(cluster.get(index, id)?.map(|doc| {
                let kind = doc.type_name.as_deref().unwrap_or(&self.options.default_type);
                enrich_document(doc.source, &doc.id, kind)
            }))
        })
    }

    /// Documents found for `ids`, keyed by id in request order.
    pub fn read_map_bulk(&self, index: &str, ids: &[String]) -> Result<IndexMap<String, Document>> {
        if ids.is_empty() {
            return Ok(IndexMap::new());
        }
        self.retry("read_map_bulk", |cluster| {
            let found = cluster.multi_get(index, ids)?;
            Ok(found
                .into_iter()
                .map(|doc| {
                    let kind = doc.type_name.as_deref().unwrap_or(&self.options.default_type);
                    let id = doc.id.clone();
                    (id, enrich_document(doc.source, &doc.id, kind))
                })
                .collect())
        })
    }

    /// Upsert `document` under `id`; returns whether it was newly created.
    ///
    /// The version field is left out of the written copy.
    pub fn write_map(&self, index: &str, type_name: &str, id: &str, document: &Document) -> Result<bool> {
        let mut body = document.clone();
        body.remove(VERSION_FIELD);
        self.retry("write_map", |cluster| {
            let clock = self.connection.clock();
            let start = clock.now();
            let created = cluster.upsert(index, type_name, id, &body)?;
            let duration_ms = (clock.now().saturating_sub(start).as_millis() as u64).max(1);
            info!(
                index,
                id,
                outcome = if created { "created" } else { "updated" },
                duration_ms,
                "wrote document"
            );
            Ok(created)
        })
    }

    /// Write all entries that carry an id in one bulk request.
    ///
    /// A slow, low-throughput batch is followed by a blocking pause of
    /// `throttling_factor * duration` before the result is returned.
    pub fn write_map_bulk(&self, index: &str, entries: &[BulkEntry]) -> Result<BulkWriteResult> {
        let actions: Vec<BulkAction> = entries
            .iter()
            .filter_map(|entry| {
                let id = entry.id.clone()?;
                let mut document = entry.document.clone();
                document.remove(VERSION_FIELD);
                Some(BulkAction::Index {
                    id,
                    type_name: entry.type_name.clone(),
                    document,
                })
            })
            .collect();
        if actions.is_empty() {
            return Ok(BulkWriteResult::default());
        }

        self.retry("write_map_bulk", |cluster| {
            let clock = self.connection.clock();
            let start = clock.now();
            let items = cluster.bulk(index, &actions)?;

            let mut result = BulkWriteResult::default();
            for item in items {
                match item.error {
                    Some(error) => {
                        result.errors.insert(item.id, error);
                    }
                    None if item.created => {
                        result.created.insert(item.id);
                    }
                    None => {}
                }
            }

            let duration_ms = (clock.now().saturating_sub(start).as_millis() as u64).max(1);
            let created = result.created.len() as u64;
            let ops = created * 1000 / duration_ms;
            let throttle_ms = throttle_delay_ms(duration_ms, ops, self.options.throttling_factor);
            if throttle_ms > 0 {
                clock.sleep(Duration::from_millis(throttle_ms));
            }
            info!(
                index,
                entries = entries.len(),
                created,
                errors = result.errors.len(),
                duration_ms,
                throttle_ms,
                ops_per_sec = ops,
                "wrote bulk"
            );
            Ok(result)
        })
    }

    pub fn delete(&self, index: &str, type_name: &str, id: &str) -> Result<bool> {
        self.retry("delete", |cluster| cluster.delete(index, type_name, id))
    }

    /// Delete every document matching `filter`; returns how many were
    /// submitted for deletion.
    ///
    /// All matches are enumerated through a scroll cursor before anything
    /// is deleted, then removed in a single bulk request.
    pub fn delete_by_query(&self, index: &str, filter: &Filter) -> Result<usize> {
        let request = SearchRequest {
            query: filter.to_dsl(0),
            size: SCROLL_PAGE_SIZE,
            scroll: Some(SCROLL_KEEP_ALIVE),
            ..Default::default()
        };
        self.retry("delete_by_query", |cluster| {
            let mut ids: IndexMap<String, String> = IndexMap::new();
            let mut page = cluster.search(index, &request)?;
            loop {
                if page.hits.is_empty() {
                    break;
                }
                for hit in page.hits.drain(..) {
                    let kind = hit
                        .type_name
                        .unwrap_or_else(|| self.options.default_type.clone());
                    ids.entry(hit.id).or_insert(kind);
                }
                let Some(scroll_id) = page.scroll_id.as_deref() else {
                    break;
                };
                page = cluster.scroll(scroll_id, SCROLL_KEEP_ALIVE)?;
            }
            if let Some(scroll_id) = page.scroll_id.as_deref()
                && let Err(e) = cluster.clear_scroll(scroll_id)
            {
                info!(index, error = %e, "could not clear scroll");
            }
            if ids.is_empty() {
                return Ok(0);
            }
            let actions: Vec<BulkAction> = ids
                .iter()
                .map(|(id, kind)| BulkAction::Delete {
                    id: id.clone(),
                    type_name: kind.clone(),
                })
                .collect();
            cluster.bulk(index, &actions)?;
            info!(index, deleted = actions.len(), "deleted by query");
            Ok(actions.len())
        })
    }

    /// Run a search. After the query policy's attempts are used up on
    /// transient failures the result is empty rather than an error.
    pub fn query(&self, index: &str, spec: &QuerySpec) -> Result<QueryResult> {
        let request = spec.to_request();
        let outcome = self.with_retry("query", self.options.query_policy, |cluster| {
            cluster.search(index, &request)
        });
        match outcome {
            Ok(response) => Ok(QueryResult::from_response(
                response,
                spec,
                &self.options.default_type,
            )),
            Err(e) if e.is_transient() => {
                warn!(index, error = %e, "query attempts exhausted, returning empty result");
                Ok(QueryResult::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Stop retry loops and release the cluster connection.
    pub fn close(&self) {
        self.connection.shutdown();
    }
}

/// Backpressure pause for a bulk write of `duration_ms` achieving `ops`
/// created documents per second.
pub fn throttle_delay_ms(duration_ms: u64, ops: u64, factor: f64) -> u64 {
    if duration_ms > THROTTLE_TIME_THRESHOLD_MS && ops < THROTTLE_OPS_THRESHOLD {
        (factor * duration_ms as f64) as u64
    } else {
        0
    }
}
