//! Elasticsearch-compatible REST implementation of the cluster seam.
//!
//! Uses the blocking `reqwest` client; every call runs on the caller's
//! thread. Transport failures and cluster-side availability errors map onto
//! the transient [`IndexError`] variants.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indexmap::IndexMap;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::cluster::{
    Bucket, BulkAction, BulkItem, ClusterConnector, ClusterHandle, ClusterHealth, SearchHit,
    SearchRequest, SearchResponse, StoredDocument,
};
use super::error::{IndexError, Result};
use crate::Document;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens [`HttpCluster`] handles.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    timeout: Duration,
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl HttpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ClusterConnector for HttpConnector {
    /// Probe `addresses` in order and bind to the first node that answers
    /// and belongs to `cluster_name` (any cluster when empty).
    fn open(&self, addresses: &[String], cluster_name: &str) -> Result<Arc<dyn ClusterHandle>> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| IndexError::Configuration(format!("http client: {e}")))?;

        let mut failures = Vec::new();
        for address in addresses {
            let base_url = base_url(address);
            let probe = HttpCluster {
                client: client.clone(),
                base_url,
                closed: AtomicBool::new(false),
            };
            match probe.node_cluster_name() {
                Ok(name) if cluster_name.is_empty() || name == cluster_name => {
                    debug!(address = %address, cluster = %name, "bound to cluster node");
                    return Ok(Arc::new(probe));
                }
                Ok(name) => failures.push(format!("{address}: belongs to cluster {name}")),
                Err(e) => failures.push(format!("{address}: {e}")),
            }
        }
        Err(IndexError::NoNodeAvailable(if failures.is_empty() {
            "no addresses configured".into()
        } else {
            failures.join("; ")
        }))
    }
}

fn base_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

fn keep_alive(duration: Duration) -> String {
    format!("{}s", duration.as_secs().max(1))
}

/// One node of a search cluster reached over HTTP.
#[derive(Debug)]
pub struct HttpCluster {
    client: Client,
    base_url: String,
    closed: AtomicBool,
}

impl HttpCluster {
    fn url(&self, parts: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for part in parts {
            url.push('/');
            url.push_str(&urlencoding::encode(part));
        }
        url
    }

    fn send(&self, request: RequestBuilder) -> Result<Response> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IndexError::IllegalState("cluster handle closed".into()));
        }
        request
            .send()
            .map_err(|e| IndexError::NoNodeAvailable(format!("{}: {e}", self.base_url)))
    }

    /// Send and decode a successful JSON body; error statuses become errors.
    fn call<T: serde::de::DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request)?;
        let status = response.status();
        let body = response
            .bytes()
            .map_err(|e| IndexError::NoNodeAvailable(format!("{}: {e}", self.base_url)))?;
        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// HEAD-style probe: 200 is true, 404 false.
    fn probe(&self, request: RequestBuilder) -> Result<bool> {
        let response = self.send(request)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(classify_failure(s, &[])),
        }
    }

    fn node_cluster_name(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct NodeInfo {
            cluster_name: String,
        }
        let info: NodeInfo = self.call(self.client.get(self.url(&[])))?;
        Ok(info.cluster_name)
    }

    fn search_body(request: &SearchRequest) -> Value {
        let mut body = json!({
            "query": request.query,
            "from": request.from,
            "size": request.size,
            "track_total_hits": true,
        });
        if request.explain {
            body["explain"] = json!(true);
        }
        if let Some(post_filter) = &request.post_filter {
            body["post_filter"] = post_filter.clone();
        }
        if !request.sort.is_empty() {
            body["sort"] = json!(request.sort);
        }
        if let Some(h) = &request.highlight {
            body["highlight"] = json!({
                "fields": { h.field.as_str(): {
                    "fragment_size": h.fragment_size,
                    "pre_tags": [h.pre_tag],
                    "post_tags": [h.post_tag],
                } }
            });
        }
        if !request.aggregations.is_empty() {
            let aggs: serde_json::Map<String, Value> = request
                .aggregations
                .iter()
                .map(|a| {
                    let terms = json!({ "terms": {
                        "field": a.field,
                        "size": a.size,
                        "min_doc_count": a.min_doc_count,
                    } });
                    (a.field.clone(), terms)
                })
                .collect();
            body["aggs"] = Value::Object(aggs);
        }
        body
    }
}

impl ClusterHandle for HttpCluster {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    fn health(&self) -> Result<ClusterHealth> {
        self.call(self.client.get(self.url(&["_cluster", "health"])))
    }

    fn index_exists(&self, index: &str) -> Result<bool> {
        self.probe(self.client.head(self.url(&[index])))
    }

    fn create_index(&self, index: &str, shards: u32, replicas: u32) -> Result<()> {
        let body = json!({ "settings": {
            "number_of_shards": shards,
            "number_of_replicas": replicas,
        } });
        let _: Value = self.call(self.client.put(self.url(&[index])).json(&body))?;
        Ok(())
    }

    fn put_mapping(&self, index: &str, mapping: &Value) -> Result<()> {
        let _: Value = self.call(self.client.put(self.url(&[index, "_mapping"])).json(mapping))?;
        Ok(())
    }

    fn refresh(&self, index: &str) -> Result<()> {
        let _: Value = self.call(self.client.post(self.url(&[index, "_refresh"])))?;
        Ok(())
    }

    fn count(&self, index: &str, query: &Value) -> Result<u64> {
        #[derive(Deserialize)]
        struct Count {
            count: u64,
        }
        let body = json!({ "query": query });
        let count: Count = self.call(self.client.post(self.url(&[index, "_count"])).json(&body))?;
        Ok(count.count)
    }

    fn exists(&self, index: &str, id: &str) -> Result<bool> {
        self.probe(self.client.head(self.url(&[index, "_doc", id])))
    }

    fn get(&self, index: &str, id: &str) -> Result<Option<StoredDocument>> {
        let response = self.send(self.client.get(self.url(&[index, "_doc", id])))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response
            .bytes()
            .map_err(|e| IndexError::NoNodeAvailable(format!("{}: {e}", self.base_url)))?;
        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }
        let doc: WireDocument = serde_json::from_slice(&body)?;
        Ok(doc.into_stored())
    }

    fn multi_get(&self, index: &str, ids: &[String]) -> Result<Vec<StoredDocument>> {
        #[derive(Deserialize)]
        struct MultiGet {
            docs: Vec<WireDocument>,
        }
        let body = json!({ "ids": ids });
        let response: MultiGet = self.call(self.client.post(self.url(&[index, "_mget"])).json(&body))?;
        Ok(response
            .docs
            .into_iter()
            .filter_map(WireDocument::into_stored)
            .collect())
    }

    fn upsert(&self, index: &str, _type_name: &str, id: &str, document: &Document) -> Result<bool> {
        let body = json!({ "doc": document, "doc_as_upsert": true });
        let outcome: WriteResponse =
            self.call(self.client.post(self.url(&[index, "_update", id])).json(&body))?;
        Ok(outcome.result == "created")
    }

    fn delete(&self, index: &str, _type_name: &str, id: &str) -> Result<bool> {
        let response = self.send(self.client.delete(self.url(&[index, "_doc", id])))?;
        let status = response.status();
        let body = response
            .bytes()
            .map_err(|e| IndexError::NoNodeAvailable(format!("{}: {e}", self.base_url)))?;
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }
        let outcome: WriteResponse = serde_json::from_slice(&body)?;
        Ok(outcome.result == "deleted")
    }

    fn bulk(&self, index: &str, actions: &[BulkAction]) -> Result<Vec<BulkItem>> {
        let mut ndjson = Vec::new();
        for action in actions {
            match action {
                BulkAction::Index { id, document, .. } => {
                    serde_json::to_writer(&mut ndjson, &json!({ "index": { "_id": id } }))?;
                    ndjson.push(b'\n');
                    serde_json::to_writer(&mut ndjson, document)?;
                    ndjson.push(b'\n');
                }
                BulkAction::Delete { id, .. } => {
                    serde_json::to_writer(&mut ndjson, &json!({ "delete": { "_id": id } }))?;
                    ndjson.push(b'\n');
                }
            }
        }
        let request = self
            .client
            .post(self.url(&[index, "_bulk"]))
            .header("content-type", "application/x-ndjson")
            .body(ndjson);
        let response: BulkResponse = self.call(request)?;
        Ok(response
            .items
            .into_iter()
            .filter_map(|item| item.into_values().next())
            .map(|outcome| BulkItem {
                created: outcome.error.is_none()
                    && matches!(outcome.result.as_deref(), Some("created" | "deleted")),
                error: outcome.error.map(|e| error_text(&e)),
                id: outcome.id,
            })
            .collect())
    }

    fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResponse> {
        let mut url = self.url(&[index, "_search"]);
        if let Some(scroll) = request.scroll {
            url.push_str("?scroll=");
            url.push_str(&keep_alive(scroll));
        }
        let body = Self::search_body(request);
        let response: WireSearch = self.call(self.client.post(url).json(&body))?;
        Ok(response.into_response())
    }

    fn scroll(&self, scroll_id: &str, keep: Duration) -> Result<SearchResponse> {
        let body = json!({ "scroll": keep_alive(keep), "scroll_id": scroll_id });
        let response: WireSearch =
            self.call(self.client.post(self.url(&["_search", "scroll"])).json(&body))?;
        Ok(response.into_response())
    }

    fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        let body = json!({ "scroll_id": scroll_id });
        let _: Value = self.call(self.client.delete(self.url(&["_search", "scroll"])).json(&body))?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Map an error response onto the error taxonomy.
fn classify_failure(status: StatusCode, body: &[u8]) -> IndexError {
    let error = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").cloned());
    let kind = error
        .as_ref()
        .and_then(|e| e.get("type"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let reason = error
        .as_ref()
        .map(error_text)
        .unwrap_or_else(|| status.to_string());
    match kind.as_str() {
        "cluster_block_exception" => IndexError::ClusterBlocked(reason),
        "search_phase_execution_exception" => IndexError::SearchPhase(reason),
        "no_shard_available_action_exception" | "master_not_discovered_exception" => {
            IndexError::NoNodeAvailable(reason)
        }
        _ if status == StatusCode::SERVICE_UNAVAILABLE => IndexError::NoNodeAvailable(reason),
        _ => IndexError::Rejected {
            status: status.as_u16(),
            reason,
        },
    }
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(o) => {
            let kind = o.get("type").and_then(Value::as_str).unwrap_or("error");
            let reason = o.get("reason").and_then(Value::as_str).unwrap_or_default();
            format!("{kind}: {reason}")
        }
        other => other.to_string(),
    }
}

/// Render an explanation tree as indented `value = description` lines.
fn explanation_text(explanation: &Value) -> String {
    fn walk(node: &Value, depth: usize, out: &mut String) {
        let value = node.get("value").map(Value::to_string).unwrap_or_default();
        let description = node
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{value} = {description}\n"));
        if let Some(details) = node.get("details").and_then(Value::as_array) {
            for detail in details {
                walk(detail, depth + 1, out);
            }
        }
    }
    let mut out = String::new();
    walk(explanation, 0, &mut out);
    out
}

#[derive(Deserialize)]
struct WireDocument {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_type")]
    type_name: Option<String>,
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<Document>,
}

impl WireDocument {
    fn into_stored(self) -> Option<StoredDocument> {
        if !self.found {
            return None;
        }
        Some(StoredDocument {
            id: self.id,
            type_name: self.type_name,
            source: self.source.unwrap_or_default(),
        })
    }
}

#[derive(Deserialize)]
struct WriteResponse {
    result: String,
}

#[derive(Deserialize)]
struct BulkResponse {
    items: Vec<IndexMap<String, BulkOutcome>>,
}

#[derive(Deserialize)]
struct BulkOutcome {
    #[serde(rename = "_id")]
    id: String,
    result: Option<String>,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct WireSearch {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    hits: WireHits,
    #[serde(default)]
    aggregations: IndexMap<String, WireAggregation>,
}

#[derive(Deserialize)]
struct WireHits {
    total: Option<Value>,
    #[serde(default)]
    hits: Vec<WireHit>,
}

#[derive(Deserialize)]
struct WireHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_type")]
    type_name: Option<String>,
    #[serde(rename = "_source", default)]
    source: Document,
    #[serde(rename = "_explanation")]
    explanation: Option<Value>,
    #[serde(default)]
    highlight: IndexMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct WireAggregation {
    #[serde(default)]
    buckets: Vec<WireBucket>,
}

#[derive(Deserialize)]
struct WireBucket {
    key: Value,
    key_as_string: Option<String>,
    doc_count: u64,
}

impl WireSearch {
    fn into_response(self) -> SearchResponse {
        // `total` is a number on old clusters and `{ "value": n }` on new ones
        let total_hits = match self.hits.total {
            Some(Value::Number(n)) => n.as_u64().unwrap_or_default(),
            Some(Value::Object(o)) => o.get("value").and_then(Value::as_u64).unwrap_or_default(),
            _ => 0,
        };
        let hits = self
            .hits
            .hits
            .into_iter()
            .map(|hit| SearchHit {
                id: hit.id,
                type_name: hit.type_name,
                source: hit.source,
                explanation: hit.explanation.as_ref().map(explanation_text),
                highlights: hit.highlight,
            })
            .collect();
        let aggregations = self
            .aggregations
            .into_iter()
            .map(|(name, agg)| {
                let buckets = agg
                    .buckets
                    .into_iter()
                    .map(|b| {
                        let key = b.key_as_string.unwrap_or_else(|| match b.key {
                            Value::String(s) => s,
                            other => other.to_string(),
                        });
                        Bucket::new(key, b.doc_count)
                    })
                    .collect();
                (name, buckets)
            })
            .collect();
        SearchResponse {
            total_hits,
            hits,
            aggregations,
            scroll_id: self.scroll_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::cluster::{HighlightRequest, TermsAggregation};

    #[test]
    fn failures_map_onto_transient_variants() {
        let blocked = br#"{"error":{"type":"cluster_block_exception","reason":"index read-only"},"status":403}"#;
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, blocked),
            IndexError::ClusterBlocked(_)
        ));
        let phase = br#"{"error":{"type":"search_phase_execution_exception","reason":"all shards failed"}}"#;
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, phase),
            IndexError::SearchPhase(_)
        ));
        assert!(classify_failure(StatusCode::SERVICE_UNAVAILABLE, b"").is_transient());
        let bad = br#"{"error":{"type":"mapper_parsing_exception","reason":"failed"}}"#;
        match classify_failure(StatusCode::BAD_REQUEST, bad) {
            IndexError::Rejected { status, reason } => {
                assert_eq!(status, 400);
                assert_eq!(reason, "mapper_parsing_exception: failed");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn search_body_renders_highlight_and_terms() {
        let request = SearchRequest {
            query: json!({ "match_all": {} }),
            size: 3,
            highlight: Some(HighlightRequest {
                field: "text_t".into(),
                fragment_size: 140,
                pre_tag: String::new(),
                post_tag: String::new(),
            }),
            aggregations: vec![TermsAggregation {
                field: "host_s".into(),
                size: 7,
                min_doc_count: 1,
            }],
            ..Default::default()
        };
        let body = HttpCluster::search_body(&request);
        assert_eq!(body["highlight"]["fields"]["text_t"]["fragment_size"], 140);
        assert_eq!(body["highlight"]["fields"]["text_t"]["pre_tags"], json!([""]));
        assert_eq!(body["aggs"]["host_s"]["terms"]["size"], 7);
        assert_eq!(body["aggs"]["host_s"]["terms"]["min_doc_count"], 1);
        assert!(body.get("explain").is_none());
    }

    #[test]
    fn search_response_accepts_both_total_shapes() {
        let modern: WireSearch = serde_json::from_value(json!({
            "_scroll_id": "s1",
            "hits": { "total": { "value": 5, "relation": "eq" }, "hits": [
                { "_id": "a", "_source": { "title": "x" }, "highlight": { "title": ["x"] } }
            ] },
            "aggregations": { "year": { "buckets": [ { "key": 2020, "doc_count": 4 } ] } }
        }))
        .unwrap();
        let response = modern.into_response();
        assert_eq!(response.total_hits, 5);
        assert_eq!(response.scroll_id.as_deref(), Some("s1"));
        assert_eq!(response.hits[0].highlights["title"], vec!["x".to_string()]);
        assert_eq!(response.aggregations["year"], vec![Bucket::new("2020", 4)]);

        let legacy: WireSearch =
            serde_json::from_value(json!({ "hits": { "total": 9, "hits": [] } })).unwrap();
        assert_eq!(legacy.into_response().total_hits, 9);
    }

    #[test]
    fn path_parts_are_percent_encoded() {
        let cluster = HttpCluster {
            client: Client::new(),
            base_url: base_url("localhost:9200/"),
            closed: AtomicBool::new(false),
        };
        assert_eq!(
            cluster.url(&["web", "_doc", "a b/c"]),
            "http://localhost:9200/web/_doc/a%20b%2Fc"
        );
    }

    #[test]
    fn closed_handle_fails_transiently() {
        let cluster = HttpCluster {
            client: Client::new(),
            base_url: base_url("127.0.0.1:1"),
            closed: AtomicBool::new(false),
        };
        cluster.close().unwrap();
        let err = cluster.refresh("web").unwrap_err();
        assert!(matches!(err, IndexError::IllegalState(_)));
    }

    #[test]
    fn explanation_tree_is_indented() {
        let text = explanation_text(&json!({
            "value": 1.5, "description": "sum of:",
            "details": [ { "value": 1.5, "description": "weight(title:x)" } ]
        }));
        assert_eq!(text, "1.5 = sum of:\n  1.5 = weight(title:x)\n");
    }
}
