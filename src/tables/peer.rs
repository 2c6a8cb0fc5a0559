//! HTTP client for a remote table peer.
//!
//! A peer serves `GET <prefix><name>.json[?where=k1:v1,k2:v2]` and answers
//! with a JSON array of row objects.

use std::time::Duration;

use reqwest::blocking::Client;
use tracing::info;

use super::table::{IndexedTable, Select};
use crate::storage::{Result, StorageError};

/// Timeout for peer requests (short so local fallback kicks in quickly)
const PEER_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct TablePeer {
    url_prefix: String,
    client: Client,
}

impl TablePeer {
    pub fn new(url_prefix: impl Into<String>) -> Result<Self> {
        Self::with_timeout(url_prefix, Duration::from_secs(PEER_TIMEOUT_SECS))
    }

    pub fn with_timeout(url_prefix: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("searchgrid/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::RemoteFetch(format!("building http client: {e}")))?;
        Ok(Self {
            url_prefix: url_prefix.into(),
            client,
        })
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// Request URL for `name` with the given selections.
    pub fn table_url(&self, name: &str, selects: &[Select]) -> String {
        let mut url = format!("{}{}.json", self.url_prefix, name);
        if !selects.is_empty() {
            let clause = selects
                .iter()
                .map(|s| {
                    format!(
                        "{}:{}",
                        urlencoding::encode(&s.column),
                        urlencoding::encode(&s.value)
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            url.push_str("?where=");
            url.push_str(&clause);
        }
        url
    }

    /// Fetch a private copy of the named table, already filtered by the peer.
    pub fn fetch(&self, name: &str, selects: &[Select]) -> Result<IndexedTable> {
        let url = self.table_url(name, selects);
        info!(url = %url, "loading table from peer");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| StorageError::RemoteFetch(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::RemoteFetch(format!("{url}: http {status}")));
        }
        let body = response
            .bytes()
            .map_err(|e| StorageError::RemoteFetch(format!("{url}: {e}")))?;
        IndexedTable::from_json_slice(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_without_selects_has_no_query() {
        let peer = TablePeer::new("http://peer:8400/tables/").unwrap();
        assert_eq!(
            peer.table_url("users", &[]),
            "http://peer:8400/tables/users.json"
        );
    }

    #[test]
    fn url_joins_selects_with_commas() {
        let peer = TablePeer::new("http://peer/").unwrap();
        let url = peer.table_url(
            "users",
            &[Select::new("team", "core"), Select::new("level", "2")],
        );
        assert_eq!(url, "http://peer/users.json?where=team:core,level:2");
    }

    #[test]
    fn url_escapes_reserved_characters() {
        let peer = TablePeer::new("http://peer/").unwrap();
        let url = peer.table_url("t", &[Select::new("name", "a b&c")]);
        assert_eq!(url, "http://peer/t.json?where=name:a%20b%26c");
    }
}
