//! Fixed set of ready management connections shared round-robin.
//!
//! Unlike [`InvalidationQueue`](crate::InvalidationQueue), the pool does
//! not queue: a command is rejected when every connection is busy or down.
//! Each slot has a task that re-establishes its connection after a drop,
//! retrying per [`ReconnectConfig`]. A slot whose retry budget is spent
//! sleeps until a command finds no connection available.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::connection::{ConnectionState, ManagementClient, ManagementConnection};
use crate::error::InvalidationError;
use crate::protocol::Response;
use crate::reconnect::{reconnect_loop, Reconnect, ReconnectConfig};

struct Slot {
    connection: RwLock<Option<Arc<ManagementConnection>>>,
    busy: AtomicBool,
    /// Wakes a slot that gave up reconnecting.
    revive: Notify,
}

impl Slot {
    fn ready_connection(&self) -> Option<Arc<ManagementConnection>> {
        self.connection
            .read()
            .clone()
            .filter(|c| c.state() == ConnectionState::Ready)
    }

    fn is_down(&self) -> bool {
        self.connection
            .read()
            .as_ref()
            .map_or(true, |c| c.state() == ConnectionState::Disconnected)
    }
}

/// Clears a connection's busy flag when the command finishes.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ManagementPool {
    slots: Vec<Arc<Slot>>,
    next: AtomicUsize,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ManagementPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagementPool")
            .field("slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl ManagementPool {
    /// Open `size` connections. Fails only when none becomes ready; slots
    /// that failed keep retrying in the background.
    pub async fn connect(
        client: &ManagementClient,
        size: usize,
        reconnect: ReconnectConfig,
    ) -> Result<Self, InvalidationError> {
        let attempts = join_all((0..size).map(|_| client.connect_ready())).await;

        let mut slots = Vec::with_capacity(size);
        let mut ready = 0;
        let mut last_error = None;
        for attempt in attempts {
            let connection = match attempt {
                Ok(connection) => {
                    ready += 1;
                    Some(Arc::new(connection))
                }
                Err(e) => {
                    tracing::warn!(address = %client.address(), error = %e, "Pooled management connection failed");
                    last_error = Some(e);
                    None
                }
            };
            slots.push(Arc::new(Slot {
                connection: RwLock::new(connection),
                busy: AtomicBool::new(false),
                revive: Notify::new(),
            }));
        }

        if ready == 0 {
            return Err(last_error.unwrap_or(InvalidationError::NoConnectionAvailable));
        }

        let cancel = CancellationToken::new();
        for slot in &slots {
            tokio::spawn(maintain(
                Arc::clone(slot),
                client.clone(),
                reconnect,
                cancel.clone(),
            ));
        }

        tracing::info!(
            address = %client.address(),
            ready,
            requested = size,
            "Management connection pool ready",
        );
        Ok(Self {
            slots,
            next: AtomicUsize::new(0),
            cancel,
        })
    }

    /// Run `command` on the next free ready connection.
    pub async fn run_cmd(&self, command: &str) -> Result<Response, InvalidationError> {
        let count = self.slots.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);

        for offset in 0..count {
            let slot = &self.slots[(start + offset) % count];
            let Some(connection) = slot.ready_connection() else {
                continue;
            };
            if slot
                .busy
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                let _guard = BusyGuard(&slot.busy);
                return connection.run_cmd(command).await;
            }
        }

        for slot in self.slots.iter().filter(|s| s.is_down()) {
            slot.revive.notify_one();
        }
        Err(InvalidationError::NoConnectionAvailable)
    }

    /// Connections that are ready and idle.
    pub fn available(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.ready_connection().is_some() && !s.busy.load(Ordering::Acquire))
            .count()
    }

    /// Configured number of connections, ready or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Stop reconnecting and close every connection.
    pub async fn close(&self) {
        self.cancel.cancel();
        let connections: Vec<_> = self
            .slots
            .iter()
            .filter_map(|s| s.connection.write().take())
            .collect();
        join_all(connections.iter().map(|c| c.close())).await;
    }
}

impl Drop for ManagementPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Keep one slot connected until the pool is closed.
async fn maintain(
    slot: Arc<Slot>,
    client: ManagementClient,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let address = client.address();
    loop {
        let current = slot.connection.read().clone();
        if let Some(connection) = current {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = connection.closed() => {}
            }
            slot.connection.write().take();
            tracing::warn!(%address, "Pooled management connection lost, reconnecting");
        }

        match reconnect_loop(&client, &reconnect, &cancel).await {
            Reconnect::Connected(connection) => {
                *slot.connection.write() = Some(Arc::new(connection));
                tracing::info!(%address, "Pooled management connection restored");
            }
            Reconnect::Cancelled => return,
            Reconnect::Exhausted { attempts } => {
                tracing::error!(%address, attempts, "Pooled management connection unreachable, waiting for demand");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = slot.revive.notified() => {}
                }
            }
        }
    }
}
