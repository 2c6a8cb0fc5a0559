//! Resilient client for a remote search cluster.
//!
//! Layers, innermost first:
//!
//! - [`cluster`]: the [`ClusterHandle`] seam, implemented over HTTP by
//!   [`http`].
//! - [`connection`]: owns the live handle and reconnects.
//! - [`client`]: retries every operation across transient failures.
//! - [`facade`]: lazy connect plus terminal error reporting.

pub mod client;
pub mod cluster;
pub mod connection;
pub mod error;
pub mod facade;
pub mod http;
pub mod query;
pub mod retry;

pub use client::{BulkEntry, BulkWriteResult, ClientOptions, ResilientClient};
pub use cluster::{ClusterConnector, ClusterHandle};
pub use connection::ConnectionManager;
pub use error::IndexError;
pub use facade::{ElasticAddress, GridIndex, IndexSettings};
pub use http::HttpConnector;
pub use query::{Filter, QueryResult, QuerySpec, Sort, SortOrder};
pub use retry::{CancelToken, Clock, ManualClock, RetryPolicy, SystemClock};
