//! Entry point for callers that address the index by logical name.
//!
//! The facade connects lazily on first use when only an address was
//! configured, forwards to the [`ResilientClient`] and turns every failure
//! into a terminal error after logging it at debug level. Only a missing
//! address surfaces unwrapped, as [`IndexError::Configuration`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use super::client::{BulkEntry, BulkWriteResult, ClientOptions, ResilientClient};
use super::cluster::ClusterConnector;
use super::connection::ConnectionManager;
use super::error::{IndexError, Result};
use super::http::HttpConnector;
use super::query::{Filter, QueryResult, QuerySpec};
use super::retry::{Clock, RetryPolicy, SystemClock};
use crate::Document;

pub use super::client::DEFAULT_TYPE;

pub const CRAWLSTART_INDEX: &str = "crawlstart";
pub const CRAWLER_INDEX: &str = "crawler";
pub const QUERY_INDEX: &str = "query";
pub const WEB_INDEX: &str = "web";

const SCHEME: &str = "elastic://";

/// `elastic://host:port[,host:port...][/clusterName]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElasticAddress {
    pub hosts: Vec<String>,
    pub cluster_name: String,
}

impl FromStr for ElasticAddress {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .trim()
            .strip_prefix(SCHEME)
            .ok_or_else(|| IndexError::Configuration(format!("not an elastic address: {s}")))?;
        let (hosts, cluster_name) = rest.split_once('/').unwrap_or((rest, ""));
        let hosts: Vec<String> = hosts
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();
        if hosts.is_empty() {
            return Err(IndexError::Configuration(format!("no hosts in address: {s}")));
        }
        Ok(Self {
            hosts,
            cluster_name: cluster_name.trim_matches('/').to_string(),
        })
    }
}

impl fmt::Display for ElasticAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}", self.hosts.join(","))?;
        if !self.cluster_name.is_empty() {
            write!(f, "/{}", self.cluster_name)?;
        }
        Ok(())
    }
}

/// Retry and timing knobs handed to every client the facade builds.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub connect_policy: RetryPolicy,
    pub client: ClientOptions,
    pub clock: Arc<dyn Clock>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            connect_policy: RetryPolicy::connect(),
            client: ClientOptions::default(),
            clock: Arc::new(SystemClock::default()),
        }
    }
}

pub struct GridIndex {
    connector: Arc<dyn ClusterConnector>,
    settings: IndexSettings,
    address: Mutex<Option<ElasticAddress>>,
    client: Mutex<Option<Arc<ResilientClient>>>,
}

impl fmt::Debug for GridIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridIndex")
            .field("address", &*self.address.lock())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Default for GridIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl GridIndex {
    /// A facade talking HTTP to the cluster.
    pub fn new() -> Self {
        Self::with_connector(Arc::new(HttpConnector::default()), IndexSettings::default())
    }

    pub fn with_connector(connector: Arc<dyn ClusterConnector>, settings: IndexSettings) -> Self {
        Self {
            connector,
            settings,
            address: Mutex::new(None),
            client: Mutex::new(None),
        }
    }

    /// Record `address` for a lazy connect on first use.
    ///
    /// Returns `false` when the address cannot be parsed.
    pub fn configure(&self, address: &str) -> bool {
        match address.parse::<ElasticAddress>() {
            Ok(parsed) => {
                *self.address.lock() = Some(parsed);
                true
            }
            Err(e) => {
                debug!(address, error = %e, "ignoring index address");
                false
            }
        }
    }

    /// Connect now. `Ok(false)` for an unusable address.
    pub fn connect(&self, address: &str) -> Result<bool> {
        if !self.configure(address) {
            return Ok(false);
        }
        let client = self.build_client()?;
        let previous = self.client.lock().replace(Arc::clone(&client));
        if let Some(previous) = previous {
            previous.close();
        }
        self.connect_client(&client)
            .map_err(|e| terminal("connect", e))?;
        Ok(true)
    }

    pub fn is_connected(&self) -> bool {
        self.client
            .lock()
            .as_ref()
            .is_some_and(|c| c.connection().is_connected())
    }

    pub fn address(&self) -> Option<ElasticAddress> {
        self.address.lock().clone()
    }

    /// A client for the configured address whose manager is not connected yet.
    fn build_client(&self) -> Result<Arc<ResilientClient>> {
        let address = self
            .address
            .lock()
            .clone()
            .ok_or_else(|| IndexError::Configuration("no elastic address configured".into()))?;
        let manager = ConnectionManager::new(
            Arc::clone(&self.connector),
            address.hosts,
            address.cluster_name,
        )
        .with_policy(self.settings.connect_policy)
        .with_clock(Arc::clone(&self.settings.clock));
        Ok(Arc::new(ResilientClient::with_options(
            Arc::new(manager),
            self.settings.client.clone(),
        )))
    }

    /// Run the connect loop outside the client slot lock so `close` can
    /// cancel it.
    fn connect_client(&self, client: &ResilientClient) -> Result<()> {
        let manager = client.connection();
        if manager.is_connected() {
            return Ok(());
        }
        let clock = &self.settings.clock;
        let start = clock.now();
        let generation = manager.ensure_connected()?;
        info!(
            hosts = ?manager.addresses(),
            cluster = %manager.cluster_name(),
            generation,
            elapsed_ms = clock.now().saturating_sub(start).as_millis() as u64,
            "index client connected"
        );
        Ok(())
    }

    fn ensure_client(&self) -> Result<Arc<ResilientClient>> {
        let client = {
            let mut slot = self.client.lock();
            match slot.as_ref() {
                Some(client) => Arc::clone(client),
                None => {
                    let client = self.build_client()?;
                    *slot = Some(Arc::clone(&client));
                    client
                }
            }
        };
        self.connect_client(&client)?;
        Ok(client)
    }

    fn call<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&ResilientClient) -> Result<T>,
    ) -> Result<T> {
        self.ensure_client()
            .and_then(|client| f(&client))
            .map_err(|e| terminal(operation, e))
    }

    pub fn cluster_ready(&self) -> bool {
        self.ensure_client().is_ok_and(|c| c.cluster_ready())
    }

    pub fn create_index_if_not_exists(&self, index: &str, shards: u32, replicas: u32) -> Result<()> {
        self.call("create_index", |c| c.create_index_if_not_exists(index, shards, replicas))
    }

    pub fn set_mapping(&self, index: &str, mapping: &Value) -> Result<()> {
        self.call("set_mapping", |c| c.set_mapping(index, mapping))
    }

    pub fn count(&self, index: &str, filter: &Filter) -> Result<u64> {
        self.call("count", |c| c.count(index, filter))
    }

    pub fn count_all(&self, index: &str) -> Result<u64> {
        self.call("count", |c| c.count_all(index))
    }

    pub fn exist(&self, index: &str, id: &str) -> Result<bool> {
        self.call("exist", |c| c.exist(index, id))
    }

    pub fn exist_bulk(&self, index: &str, ids: &[String]) -> Result<HashSet<String>> {
        self.call("exist_bulk", |c| c.exist_bulk(index, ids))
    }

    pub fn read_map(&self, index: &str, id: &str) -> Result<Option<Document>> {
        self.call("read_map", |c| c.read_map(index, id))
    }

    pub fn read_map_bulk(&self, index: &str, ids: &[String]) -> Result<IndexMap<String, Document>> {
        self.call("read_map_bulk", |c| c.read_map_bulk(index, ids))
    }

    pub fn write_map(&self, index: &str, type_name: &str, id: &str, document: &Document) -> Result<bool> {
        self.call("write_map", |c| c.write_map(index, type_name, id, document))
    }

    pub fn write_map_bulk(&self, index: &str, entries: &[BulkEntry]) -> Result<BulkWriteResult> {
        self.call("write_map_bulk", |c| c.write_map_bulk(index, entries))
    }

    pub fn delete(&self, index: &str, type_name: &str, id: &str) -> Result<bool> {
        self.call("delete", |c| c.delete(index, type_name, id))
    }

    pub fn delete_by_query(&self, index: &str, filter: &Filter) -> Result<usize> {
        self.call("delete_by_query", |c| c.delete_by_query(index, filter))
    }

    pub fn query(&self, index: &str, spec: &QuerySpec) -> Result<QueryResult> {
        self.call("query", |c| c.query(index, spec))
    }

    /// Refresh `index`; failures are only logged.
    pub fn refresh(&self, index: &str) {
        if let Err(e) = self.call("refresh", |c| c.refresh(index)) {
            debug!(index, error = %e, "refresh skipped");
        }
    }

    /// Release the connection and cancel any connect still in progress.
    /// A later call connects again lazily.
    pub fn close(&self) {
        let client = self.client.lock().take();
        if let Some(client) = client {
            client.close();
        }
    }
}

/// Log `e` and turn it into a terminal error. A missing address is
/// returned as is.
fn terminal(operation: &'static str, e: IndexError) -> IndexError {
    match e {
        IndexError::Configuration(_) => e,
        other => {
            debug!(operation, error = %other, "index operation failed");
            IndexError::Failed {
                operation,
                source: Box::new(other),
            }
        }
    }
}
