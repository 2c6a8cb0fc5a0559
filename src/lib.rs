pub mod config;
pub mod cord;
pub mod index;
pub mod storage;
pub mod tables;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use config::GridConfig;
use index::{Filter, GridIndex, HttpConnector, QuerySpec, Sort};
use storage::{FsStore, StorePath};
use tables::{PersistentTables, TablePeer};

/// One JSON object: a cluster document, cord element or table row.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "sgrid",
    version,
    about = "Query a search cluster and read managed JSON tables"
)]
pub struct Cli {
    /// Cluster address, `elastic://host:port[,host:port]/cluster`
    #[arg(long, env = "SEARCHGRID_ELASTIC_ADDRESS")]
    pub address: Option<String>,

    /// Root directory of the table store
    #[arg(long, env = "SEARCHGRID_STORE_PATH")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect and report whether the cluster is ready
    Ready,
    /// Count documents, optionally matching a query string
    Count {
        #[arg(long, default_value = index::facade::WEB_INDEX)]
        index: String,
        query: Option<String>,
    },
    /// Run a query string and print the normalized result as JSON
    Query {
        #[arg(long, default_value = index::facade::WEB_INDEX)]
        index: String,
        query: String,
        #[arg(long, default_value_t = 0)]
        from: usize,
        #[arg(long, default_value_t = 10)]
        size: usize,
        /// Field to highlight
        #[arg(long)]
        highlight: Option<String>,
        /// Aggregation field (repeatable)
        #[arg(long = "facet")]
        facets: Vec<String>,
        /// Maximum buckets per facet
        #[arg(long, default_value_t = 10)]
        facet_limit: usize,
        /// Sort field, `-field` for descending (repeatable)
        #[arg(long = "sort")]
        sorts: Vec<String>,
        /// Timezone offset in minutes east of UTC
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        timezone_offset: i32,
        #[arg(long)]
        explain: bool,
    },
    /// Delete every document matching a query string
    DeleteByQuery {
        #[arg(long, default_value = index::facade::WEB_INDEX)]
        index: String,
        query: String,
    },
    /// Create an index unless it exists, optionally applying a mapping
    CreateIndex {
        name: String,
        #[arg(long, default_value_t = 1)]
        shards: u32,
        #[arg(long, default_value_t = 0)]
        replicas: u32,
        /// JSON mapping file
        #[arg(long)]
        mapping: Option<PathBuf>,
    },
    /// Print a managed table, optionally filtered by `key:value` selections
    Table {
        name: String,
        selects: Vec<String>,
        /// Only the first N rows
        #[arg(long)]
        head: Option<usize>,
        /// Remote table-peer URL prefix
        #[arg(long, env = "SEARCHGRID_TABLE_PEER")]
        peer: Option<String>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = GridConfig::from_env();
    if cli.address.is_some() {
        cfg.elastic_address = cli.address.clone();
    }
    if cli.store.is_some() {
        cfg.store_path = cli.store.clone();
    }

    match cli.command {
        Commands::Ready => {
            let grid = open_index(&cfg)?;
            println!("{}", grid.cluster_ready());
            grid.close();
            Ok(())
        }
        Commands::Count { index, query } => {
            let grid = open_index(&cfg)?;
            let count = match query {
                Some(q) => grid.count(&index, &Filter::query_string(q))?,
                None => grid.count_all(&index)?,
            };
            println!("{count}");
            grid.close();
            Ok(())
        }
        Commands::Query {
            index,
            query,
            from,
            size,
            highlight,
            facets,
            facet_limit,
            sorts,
            timezone_offset,
            explain,
        } => {
            let grid = open_index(&cfg)?;
            let mut spec = QuerySpec::new(Filter::query_string(query))
                .page(from, size)
                .timezone_offset(timezone_offset)
                .explain(explain)
                .aggregate(facet_limit, facets);
            if let Some(field) = highlight {
                spec = spec.highlight(field);
            }
            for sort in sorts {
                spec = spec.sort(match sort.strip_prefix('-') {
                    Some(field) => Sort::desc(field),
                    None => Sort::asc(sort),
                });
            }
            let result = grid.query(&index, &spec)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            grid.close();
            Ok(())
        }
        Commands::DeleteByQuery { index, query } => {
            let grid = open_index(&cfg)?;
            let deleted = grid.delete_by_query(&index, &Filter::query_string(query))?;
            println!("{deleted}");
            grid.close();
            Ok(())
        }
        Commands::CreateIndex {
            name,
            shards,
            replicas,
            mapping,
        } => {
            let grid = open_index(&cfg)?;
            grid.create_index_if_not_exists(&name, shards, replicas)?;
            if let Some(path) = mapping {
                let raw = std::fs::read(&path)
                    .with_context(|| format!("reading mapping {}", path.display()))?;
                let mapping: serde_json::Value = serde_json::from_slice(&raw)
                    .with_context(|| format!("parsing mapping {}", path.display()))?;
                grid.set_mapping(&name, &mapping)?;
            }
            grid.close();
            Ok(())
        }
        Commands::Table {
            name,
            selects,
            head,
            peer,
        } => {
            let mut repo = PersistentTables::new();
            if let Some(root) = &cfg.store_path {
                repo = repo.with_store(Arc::new(FsStore::new(root)), StorePath::new(""));
            }
            if let Some(prefix) = peer.or_else(|| cfg.table_peer.clone()) {
                repo = repo.with_peer(TablePeer::new(prefix)?);
            }
            let table = repo.select(&name, &selects)?;
            let table = table.read();
            let json = match head {
                Some(n) => table.head(n).to_json_pretty()?,
                None => table.to_json_pretty()?,
            };
            println!("{}", String::from_utf8_lossy(&json));
            Ok(())
        }
    }
}

fn open_index(cfg: &GridConfig) -> Result<GridIndex> {
    let Some(address) = cfg.elastic_address.as_deref() else {
        bail!("no cluster address: pass --address or set SEARCHGRID_ELASTIC_ADDRESS");
    };
    let grid = GridIndex::with_connector(
        Arc::new(HttpConnector::new(cfg.http_timeout)),
        cfg.index_settings(),
    );
    if !grid.connect(address)? {
        bail!("invalid cluster address: {address}");
    }
    Ok(grid)
}
