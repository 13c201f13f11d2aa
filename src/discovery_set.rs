//! A strategy instance bound to one candidate set.
//!
//! Servers may carry a discovery date range. When any range boundary lies in
//! the future, the set runs a background task that sleeps until the next
//! boundary and reinstalls the currently discoverable servers into the
//! strategy. The task lives exactly as long as the set is not stopped.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::error::{DiscoveryError, Result};
use crate::server_entry::ServerEntry;
use crate::strategies::ServerSelectionStrategy;

static NEXT_SET_ID: AtomicU64 = AtomicU64::new(1);

pub struct DiscoverySet {
    id: u64,
    strategy: Arc<dyn ServerSelectionStrategy>,
    shutdown_tx: watch::Sender<bool>,
    rotation: Mutex<Option<JoinHandle<()>>>,
    has_rotation: bool,
    stop_calls: AtomicUsize,
}

impl DiscoverySet {
    /// Installs the servers discoverable now into `strategy` and starts the
    /// rotation task if any server will enter or leave discovery later.
    ///
    /// Starting a rotation task requires a Tokio runtime.
    pub fn start(
        clock: Arc<dyn Clock>,
        servers: Vec<ServerEntry>,
        strategy: Arc<dyn ServerSelectionStrategy>,
    ) -> Result<Self> {
        let mut ids = HashSet::with_capacity(servers.len());
        for server in &servers {
            if !ids.insert(server.id.as_str()) {
                return Err(DiscoveryError::Construction(format!(
                    "duplicate server id {:?}",
                    server.id
                )));
            }
        }

        let servers: Arc<[Arc<ServerEntry>]> = servers.into_iter().map(Arc::new).collect();
        let now = clock.now();
        let active = discoverable_at(&servers, now);
        strategy.servers_changed(&active);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let rotation = match next_boundary(&servers, now) {
            None => None,
            Some(_) => {
                let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
                    DiscoveryError::Construction(format!(
                        "server discovery ranges need a runtime for rotation: {e}"
                    ))
                })?;
                let task = rotate(clock, servers, Arc::clone(&strategy), active, shutdown_rx);
                Some(runtime.spawn(task))
            }
        };

        let id = NEXT_SET_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            set_id = id,
            strategy = %strategy.kind(),
            rotation = rotation.is_some(),
            "discovery set started"
        );

        Ok(Self {
            id,
            strategy,
            shutdown_tx,
            has_rotation: rotation.is_some(),
            rotation: Mutex::new(rotation),
            stop_calls: AtomicUsize::new(0),
        })
    }

    /// Process-unique identity of this set.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn strategy(&self) -> &Arc<dyn ServerSelectionStrategy> {
        &self.strategy
    }

    pub fn has_background_task(&self) -> bool {
        self.has_rotation
    }

    pub fn select_servers(&self, client_ip: IpAddr) -> Vec<Arc<ServerEntry>> {
        self.strategy.select_servers(client_ip)
    }

    /// Cancels the rotation task. Safe to call repeatedly and when no task
    /// was started.
    pub fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::Relaxed);
        let already_stopped = self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.rotation.lock().take() {
            handle.abort();
        }
        if !already_stopped {
            tracing::debug!(set_id = self.id, "discovery set stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Number of `stop` calls made on this set so far.
    pub fn stop_count(&self) -> usize {
        self.stop_calls.load(Ordering::Relaxed)
    }

    /// True while the rotation task is still running.
    pub fn rotation_running(&self) -> bool {
        self.rotation
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }
}

impl Drop for DiscoverySet {
    fn drop(&mut self) {
        self.stop();
    }
}

fn discoverable_at(servers: &[Arc<ServerEntry>], at: DateTime<Utc>) -> Vec<Arc<ServerEntry>> {
    servers
        .iter()
        .filter(|server| server.is_discoverable_at(at))
        .cloned()
        .collect()
}

fn next_boundary(servers: &[Arc<ServerEntry>], after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    servers
        .iter()
        .filter_map(|server| server.next_boundary_after(after))
        .min()
}

async fn rotate(
    clock: Arc<dyn Clock>,
    servers: Arc<[Arc<ServerEntry>]>,
    strategy: Arc<dyn ServerSelectionStrategy>,
    mut active: Vec<Arc<ServerEntry>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let now = clock.now();
        let current = discoverable_at(&servers, now);
        if current != active {
            tracing::info!(
                strategy = %strategy.kind(),
                discoverable = current.len(),
                total = servers.len(),
                "discovery servers changed"
            );
            strategy.servers_changed(&current);
            active = current;
        }

        let Some(boundary) = next_boundary(&servers, now) else {
            return;
        };
        let wait = (boundary - now).to_std().unwrap_or_default();

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
