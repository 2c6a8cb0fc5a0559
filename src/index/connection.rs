//! Owner of the live cluster handle.
//!
//! The handle lives in an [`ArcSwapOption`]: readers take a snapshot at
//! call time, `connect` swaps a fresh handle in without blocking them.
//! Replaced handles are closed on named teardown threads that `shutdown`
//! joins, so no teardown outlives the manager unobserved.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::cluster::{ClusterConnector, ClusterHandle};
use super::error::{IndexError, Result};
use super::retry::{CancelToken, Clock, RetryPolicy, SystemClock};

/// A cluster handle together with the connect generation that produced it.
pub struct LiveHandle {
    handle: Arc<dyn ClusterHandle>,
    generation: u64,
}

impl LiveHandle {
    pub fn handle(&self) -> &Arc<dyn ClusterHandle> {
        &self.handle
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for LiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveHandle")
            .field("target", &self.handle.describe())
            .field("generation", &self.generation)
            .finish()
    }
}

pub struct ConnectionManager {
    addresses: Vec<String>,
    cluster_name: String,
    connector: Arc<dyn ClusterConnector>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
    live: ArcSwapOption<LiveHandle>,
    generation: AtomicU64,
    ready: AtomicBool,
    connect_gate: Mutex<()>,
    teardown: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("addresses", &self.addresses)
            .field("cluster_name", &self.cluster_name)
            .field("policy", &self.policy)
            .field("generation", &self.generation())
            .field("ready", &self.ready.load(Ordering::SeqCst))
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn ClusterConnector>,
        addresses: Vec<String>,
        cluster_name: impl Into<String>,
    ) -> Self {
        Self {
            addresses,
            cluster_name: cluster_name.into(),
            connector,
            policy: RetryPolicy::connect(),
            clock: Arc::new(SystemClock::default()),
            cancel: CancelToken::new(),
            live: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            ready: AtomicBool::new(false),
            connect_gate: Mutex::new(()),
            teardown: Mutex::new(Vec::new()),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Number of handles built so far; 0 before the first connect.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.live.load().is_some()
    }

    /// Snapshot of the live handle.
    pub fn current(&self) -> Result<Arc<LiveHandle>> {
        self.live
            .load_full()
            .ok_or_else(|| IndexError::IllegalState("no live cluster handle".into()))
    }

    /// Build a new handle and swap it in, retrying per the connect policy.
    ///
    /// Returns the generation of the new handle.
    pub fn connect(&self) -> Result<u64> {
        let _gate = self.connect_gate.lock();
        self.connect_locked()
    }

    /// Reconnect unless another caller already replaced the handle of
    /// generation `stale`.
    pub fn reconnect(&self, stale: u64) -> Result<u64> {
        let _gate = self.connect_gate.lock();
        let current = self.generation();
        if current != stale && self.is_connected() {
            debug!(stale, current, "handle already replaced");
            return Ok(current);
        }
        self.connect_locked()
    }

    /// Connect unless a handle is already live.
    ///
    /// Concurrent callers wait on the same gate, so only the first one
    /// builds a handle. Returns the live generation.
    pub fn ensure_connected(&self) -> Result<u64> {
        let _gate = self.connect_gate.lock();
        if self.is_connected() {
            return Ok(self.generation());
        }
        self.connect_locked()
    }

    fn connect_locked(&self) -> Result<u64> {
        let mut attempts: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            match self.connector.open(&self.addresses, &self.cluster_name) {
                Ok(handle) => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let live = Arc::new(LiveHandle { handle, generation });
                    // shutdown raced the open; the manager must stay empty
                    if self.cancel.is_cancelled() {
                        close_quietly(&live);
                        return Err(IndexError::Cancelled);
                    }
                    let target = live.handle.describe();
                    if let Some(previous) = self.live.swap(Some(live)) {
                        self.retire(previous);
                    }
                    info!(
                        target_cluster = %target,
                        generation,
                        attempts = attempts + 1,
                        ready = self.cluster_ready(),
                        "connected to search cluster"
                    );
                    return Ok(generation);
                }
                Err(e) => {
                    attempts += 1;
                    if !self.policy.allows(attempts) {
                        warn!(attempts, error = %e, "giving up connecting to search cluster");
                        return Err(e);
                    }
                    let delay = self.policy.delay_for(attempts - 1);
                    warn!(
                        addresses = ?self.addresses,
                        cluster = %self.cluster_name,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "connect failed, retrying"
                    );
                    self.clock.sleep(delay);
                }
            }
        }
    }

    /// Close a replaced handle on a tracked teardown thread.
    fn retire(&self, previous: Arc<LiveHandle>) {
        let generation = previous.generation;
        let mut pending = self.teardown.lock();
        pending.retain(|task| !task.is_finished());
        let spawned = std::thread::Builder::new()
            .name(format!("searchgrid-teardown-{generation}"))
            .spawn(move || close_quietly(&previous));
        match spawned {
            Ok(task) => pending.push(task),
            Err(e) => warn!(generation, error = %e, "could not spawn teardown thread"),
        }
    }

    /// Whether the cluster has ever reported itself ready.
    ///
    /// A positive answer is latched; a negative one is re-checked on the
    /// next call.
    pub fn cluster_ready(&self) -> bool {
        if self.ready.load(Ordering::SeqCst) {
            return true;
        }
        let Ok(live) = self.current() else {
            return false;
        };
        match live.handle.health() {
            Ok(health) if health.is_ready() => {
                info!(
                    cluster = %health.cluster_name,
                    status = ?health.status,
                    nodes = health.number_of_nodes,
                    "search cluster ready"
                );
                self.ready.store(true, Ordering::SeqCst);
                true
            }
            Ok(health) => {
                debug!(status = ?health.status, "search cluster not ready");
                false
            }
            Err(e) => {
                debug!(error = %e, "cluster health check failed");
                false
            }
        }
    }

    /// Cancel pending retry loops, close the live handle and join every
    /// teardown thread.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(live) = self.live.swap(None) {
            close_quietly(&live);
        }
        let pending: Vec<_> = std::mem::take(&mut *self.teardown.lock());
        for task in pending {
            if task.join().is_err() {
                warn!("teardown thread panicked");
            }
        }
    }

    /// Teardown threads not yet joined.
    pub fn pending_teardowns(&self) -> usize {
        let mut pending = self.teardown.lock();
        pending.retain(|task| !task.is_finished());
        pending.len()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for task in std::mem::take(&mut *self.teardown.lock()) {
            let _ = task.join();
        }
    }
}

fn close_quietly(live: &LiveHandle) {
    match live.handle.close() {
        Ok(()) => debug!(generation = live.generation, "closed cluster handle"),
        Err(e) => warn!(generation = live.generation, error = %e, "closing cluster handle failed"),
    }
}
