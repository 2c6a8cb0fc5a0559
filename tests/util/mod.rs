use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use searchgrid::Document;
use searchgrid::index::cluster::{
    Bucket, BulkAction, BulkItem, ClusterConnector, ClusterHandle, ClusterHealth, HealthStatus,
    SearchHit, SearchRequest, SearchResponse, StoredDocument,
};
use searchgrid::index::{
    ClientOptions, Clock, ConnectionManager, IndexError, ManualClock, ResilientClient, RetryPolicy,
};
use serde_json::Value;
use tempfile::TempDir;

type IndexResult<T> = Result<T, IndexError>;

/// Build a document from a `json!` object literal.
#[allow(dead_code)]
pub fn doc(value: Value) -> Document {
    value.as_object().cloned().expect("object literal")
}

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[allow(dead_code)]
pub struct EnvGuard {
    key: String,
    prev: Option<String>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn set(key: &str, val: impl AsRef<str>) -> Self {
        let prev = std::env::var(key).ok();
        unsafe { std::env::set_var(key, val.as_ref()) };
        Self {
            key: key.to_string(),
            prev,
        }
    }

    pub fn unset(key: &str) -> Self {
        let prev = std::env::var(key).ok();
        unsafe { std::env::remove_var(key) };
        Self {
            key: key.to_string(),
            prev,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.prev {
            Some(v) => unsafe { std::env::set_var(&self.key, v) },
            None => unsafe { std::env::remove_var(&self.key) },
        }
    }
}

#[allow(dead_code)]
pub struct TempFixtureDir {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl TempFixtureDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}

/// Scripted in-process cluster shared by every handle a [`MockConnector`]
/// opens.
#[derive(Default)]
pub struct MockState {
    pub indexes: BTreeMap<String, IndexMap<String, Document>>,
    pub mappings: BTreeMap<String, Value>,
    /// Operation names in call order, including failed calls.
    pub calls: Vec<String>,
    pub bulk_calls: Vec<Vec<BulkAction>>,
    pub search_requests: Vec<SearchRequest>,
    pub cleared_scrolls: Vec<String>,
    pub bulk_errors: BTreeMap<String, String>,
    /// Virtual time one bulk request takes.
    pub bulk_latency: Duration,
    pub health: Option<HealthStatus>,
    pub aggregations: IndexMap<String, Vec<Bucket>>,
    scroll_pages: VecDeque<SearchResponse>,
    failures: VecDeque<IndexError>,
    down: bool,
}

#[allow(dead_code)]
pub struct MockCluster {
    state: Mutex<MockState>,
    clock: Option<Arc<ManualClock>>,
}

#[allow(dead_code)]
impl MockCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                health: Some(HealthStatus::Green),
                ..MockState::default()
            }),
            clock: None,
        })
    }

    /// A cluster whose bulk requests advance `clock`.
    pub fn with_clock(clock: Arc<ManualClock>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                health: Some(HealthStatus::Green),
                ..MockState::default()
            }),
            clock: Some(clock),
        })
    }

    pub fn state(&self) -> parking_lot::MutexGuard<'_, MockState> {
        self.state.lock()
    }

    pub fn insert(&self, index: &str, id: &str, document: Document) {
        self.state
            .lock()
            .indexes
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), document);
    }

    pub fn document(&self, index: &str, id: &str) -> Option<Document> {
        self.state.lock().indexes.get(index)?.get(id).cloned()
    }

    /// Fail the next calls with these errors, one per call.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = IndexError>) {
        self.state.lock().failures.extend(errors);
    }

    /// While down, every call fails with `NoNodeAvailable`.
    pub fn set_down(&self, down: bool) {
        self.state.lock().down = down;
    }

    pub fn set_health(&self, health: Option<HealthStatus>) {
        self.state.lock().health = health;
    }

    /// Scroll pages with the given hit counts, ids numbered across pages.
    pub fn script_scroll(&self, page_sizes: &[usize]) {
        let mut next = 0;
        let mut state = self.state.lock();
        for &size in page_sizes {
            let hits = (0..size)
                .map(|_| {
                    next += 1;
                    SearchHit::new(format!("doc-{next}"), Document::new())
                })
                .collect();
            state.scroll_pages.push_back(SearchResponse {
                total_hits: page_sizes.iter().sum::<usize>() as u64,
                hits,
                scroll_id: Some("scroll-1".into()),
                ..Default::default()
            });
        }
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == name).count()
    }

    fn enter(&self, op: &str, closed: &AtomicBool) -> IndexResult<()> {
        let mut state = self.state.lock();
        state.calls.push(op.to_string());
        if closed.load(Ordering::SeqCst) {
            return Err(IndexError::IllegalState("handle closed".into()));
        }
        if state.down {
            return Err(IndexError::NoNodeAvailable("cluster down".into()));
        }
        match state.failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Opens handles onto one [`MockCluster`].
#[allow(dead_code)]
pub struct MockConnector {
    cluster: Arc<MockCluster>,
    opens: AtomicUsize,
    failing_opens: AtomicUsize,
    closed_handles: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

#[allow(dead_code)]
impl MockConnector {
    pub fn new(cluster: Arc<MockCluster>) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            opens: AtomicUsize::new(0),
            failing_opens: AtomicUsize::new(0),
            closed_handles: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(0),
        })
    }

    /// Fail the next `n` open attempts.
    pub fn fail_opens(&self, n: usize) {
        self.failing_opens.store(n, Ordering::SeqCst);
    }

    /// Successful opens so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closed_handles(&self) -> usize {
        self.closed_handles.load(Ordering::SeqCst)
    }
}

impl ClusterConnector for MockConnector {
    fn open(&self, addresses: &[String], _cluster_name: &str) -> IndexResult<Arc<dyn ClusterHandle>> {
        let failing = self.failing_opens.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_opens.store(failing - 1, Ordering::SeqCst);
            return Err(IndexError::NoNodeAvailable(format!("{addresses:?} unreachable")));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            cluster: Arc::clone(&self.cluster),
            closed: AtomicBool::new(false),
            closed_counter: Arc::clone(&self.closed_handles),
        }))
    }
}

pub struct MockHandle {
    id: u64,
    cluster: Arc<MockCluster>,
    closed: AtomicBool,
    closed_counter: Arc<AtomicUsize>,
}

impl MockHandle {
    fn enter(&self, op: &str) -> IndexResult<()> {
        self.cluster.enter(op, &self.closed)
    }
}

impl ClusterHandle for MockHandle {
    fn describe(&self) -> String {
        format!("mock-{}", self.id)
    }

    fn health(&self) -> IndexResult<ClusterHealth> {
        self.enter("health")?;
        match self.cluster.state().health {
            Some(status) => Ok(ClusterHealth {
                cluster_name: "mock".into(),
                status,
                number_of_nodes: 1,
            }),
            None => Err(IndexError::NoNodeAvailable("health unavailable".into())),
        }
    }

    fn index_exists(&self, index: &str) -> IndexResult<bool> {
        self.enter("index_exists")?;
        Ok(self.cluster.state().indexes.contains_key(index))
    }

    fn create_index(&self, index: &str, _shards: u32, _replicas: u32) -> IndexResult<()> {
        self.enter("create_index")?;
        self.cluster
            .state()
            .indexes
            .entry(index.to_string())
            .or_default();
        Ok(())
    }

    fn put_mapping(&self, index: &str, mapping: &Value) -> IndexResult<()> {
        self.enter("put_mapping")?;
        self.cluster
            .state()
            .mappings
            .insert(index.to_string(), mapping.clone());
        Ok(())
    }

    fn refresh(&self, _index: &str) -> IndexResult<()> {
        self.enter("refresh")
    }

    fn count(&self, index: &str, _query: &Value) -> IndexResult<u64> {
        self.enter("count")?;
        Ok(self
            .cluster
            .state()
            .indexes
            .get(index)
            .map_or(0, |docs| docs.len() as u64))
    }

    fn exists(&self, index: &str, id: &str) -> IndexResult<bool> {
        self.enter("exists")?;
        Ok(self.cluster.document(index, id).is_some())
    }

    fn get(&self, index: &str, id: &str) -> IndexResult<Option<StoredDocument>> {
        self.enter("get")?;
        Ok(self.cluster.document(index, id).map(|source| StoredDocument {
            id: id.to_string(),
            type_name: None,
            source,
        }))
    }

    fn multi_get(&self, index: &str, ids: &[String]) -> IndexResult<Vec<StoredDocument>> {
        self.enter("multi_get")?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.cluster.document(index, id).map(|source| StoredDocument {
                    id: id.clone(),
                    type_name: None,
                    source,
                })
            })
            .collect())
    }

    fn upsert(&self, index: &str, _type_name: &str, id: &str, document: &Document) -> IndexResult<bool> {
        self.enter("upsert")?;
        let mut state = self.cluster.state();
        let docs = state.indexes.entry(index.to_string()).or_default();
        match docs.get_mut(id) {
            Some(existing) => {
                for (k, v) in document {
                    existing.insert(k.clone(), v.clone());
                }
                Ok(false)
            }
            None => {
                docs.insert(id.to_string(), document.clone());
                Ok(true)
            }
        }
    }

    fn delete(&self, index: &str, _type_name: &str, id: &str) -> IndexResult<bool> {
        self.enter("delete")?;
        let mut state = self.cluster.state();
        Ok(state
            .indexes
            .get_mut(index)
            .and_then(|docs| docs.shift_remove(id))
            .is_some())
    }

    fn bulk(&self, index: &str, actions: &[BulkAction]) -> IndexResult<Vec<BulkItem>> {
        self.enter("bulk")?;
        let latency = {
            let mut state = self.cluster.state();
            state.bulk_calls.push(actions.to_vec());
            state.bulk_latency
        };
        if let Some(clock) = &self.cluster.clock {
            clock.advance(latency);
        }
        let mut state = self.cluster.state();
        let errors = state.bulk_errors.clone();
        let docs = state.indexes.entry(index.to_string()).or_default();
        Ok(actions
            .iter()
            .map(|action| {
                let id = action.id().to_string();
                if let Some(error) = errors.get(&id) {
                    return BulkItem {
                        id,
                        created: false,
                        error: Some(error.clone()),
                    };
                }
                let created = match action {
                    BulkAction::Index { document, .. } => {
                        docs.insert(id.clone(), document.clone()).is_none()
                    }
                    BulkAction::Delete { .. } => docs.shift_remove(&id).is_some(),
                };
                BulkItem {
                    id,
                    created,
                    error: None,
                }
            })
            .collect())
    }

    fn search(&self, index: &str, request: &SearchRequest) -> IndexResult<SearchResponse> {
        self.enter("search")?;
        let mut state = self.cluster.state();
        state.search_requests.push(request.clone());
        if request.scroll.is_some() {
            return Ok(state.scroll_pages.pop_front().unwrap_or_default());
        }
        let docs = state.indexes.get(index).cloned().unwrap_or_default();
        let hits = docs
            .iter()
            .skip(request.from)
            .take(request.size)
            .map(|(id, source)| {
                let mut hit = SearchHit::new(id.clone(), source.clone());
                if request.explain {
                    hit.explanation = Some(format!("1.0 = match {id}"));
                }
                if let Some(h) = &request.highlight
                    && let Some(Value::String(text)) = source.get(&h.field)
                {
                    hit.highlights.insert(
                        h.field.clone(),
                        vec![text.chars().take(h.fragment_size).collect()],
                    );
                }
                hit
            })
            .collect();
        Ok(SearchResponse {
            total_hits: docs.len() as u64,
            hits,
            aggregations: state.aggregations.clone(),
            scroll_id: None,
        })
    }

    fn scroll(&self, scroll_id: &str, _keep_alive: Duration) -> IndexResult<SearchResponse> {
        self.enter("scroll")?;
        let mut state = self.cluster.state();
        Ok(state.scroll_pages.pop_front().unwrap_or_else(|| SearchResponse {
            scroll_id: Some(scroll_id.to_string()),
            ..Default::default()
        }))
    }

    fn clear_scroll(&self, scroll_id: &str) -> IndexResult<()> {
        self.enter("clear_scroll")?;
        self.cluster
            .state()
            .cleared_scrolls
            .push(scroll_id.to_string());
        Ok(())
    }

    fn close(&self) -> IndexResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.closed_counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A connected client over `cluster` whose retry loops sleep on `clock`.
#[allow(dead_code)]
pub fn mock_client(
    cluster: &Arc<MockCluster>,
    clock: &Arc<ManualClock>,
    options: ClientOptions,
) -> (ResilientClient, Arc<MockConnector>) {
    let connector = MockConnector::new(Arc::clone(cluster));
    let manager = ConnectionManager::new(
        Arc::clone(&connector) as Arc<dyn ClusterConnector>,
        vec!["node-1:9300".to_string()],
        "mock",
    )
    .with_policy(RetryPolicy::connect())
    .with_clock(Arc::clone(clock) as Arc<dyn Clock>);
    manager.connect().expect("mock connect");
    (
        ResilientClient::with_options(Arc::new(manager), options),
        connector,
    )
}
