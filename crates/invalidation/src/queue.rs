//! Bounded FIFO of invalidation commands over one management connection.
//!
//! [`InvalidationQueue::start`] spawns a dispatcher task that connects,
//! sends queued commands one at a time and reconnects when the connection
//! drops. When the queue is full the oldest unsent command is dropped.
//! When reconnection gives up, the queue stops for good.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::{ConnectionState, ManagementClient, ManagementConnection};
use crate::error::InvalidationError;
use crate::events::InvalidationEvent;
use crate::protocol::Response;
use crate::reconnect::{reconnect_loop, Reconnect, ReconnectConfig};

/// Broadcast channel capacity for queue events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long [`InvalidationQueue::shutdown`] waits for the dispatcher.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Maximum number of unsent commands.
    pub max_len: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_len: 2000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Connecting,
    Ready,
    Disconnected,
    /// Reconnection gave up; commands are rejected.
    Exhausted,
    ShutDown,
}

type Completion = oneshot::Sender<Result<Response, InvalidationError>>;

struct QueuedCommand {
    text: String,
    completion: Completion,
}

impl QueuedCommand {
    fn complete(self, result: Result<Response, InvalidationError>) {
        let _ = self.completion.send(result);
    }
}

/// Resolves when the submitted command has been answered, dropped or
/// abandoned.
pub struct Receipt {
    rx: oneshot::Receiver<Result<Response, InvalidationError>>,
}

impl Receipt {
    fn rejected(error: InvalidationError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { rx }
    }

    pub async fn wait(self) -> Result<Response, InvalidationError> {
        self.rx.await.unwrap_or(Err(InvalidationError::ShutDown))
    }
}

struct QueueInner {
    commands: Mutex<VecDeque<QueuedCommand>>,
    notify: Notify,
    events: broadcast::Sender<InvalidationEvent>,
    state: watch::Sender<QueueState>,
    max_len: usize,
    max_attempts: u32,
}

impl QueueInner {
    fn emit(&self, event: InvalidationEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: QueueState) {
        self.state.send_replace(state);
    }

    /// Next command, waiting until one is queued.
    async fn next(&self) -> QueuedCommand {
        loop {
            if let Some(command) = self.commands.lock().pop_front() {
                return command;
            }
            self.notify.notified().await;
        }
    }

    /// Move to a terminal state and fail everything still queued.
    fn stop(&self, state: QueueState, error: impl Fn() -> InvalidationError) {
        self.set_state(state);
        let drained: Vec<_> = self.commands.lock().drain(..).collect();
        for command in drained {
            command.complete(Err(error()));
        }
    }
}

pub struct InvalidationQueue {
    inner: Arc<QueueInner>,
    address: String,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InvalidationQueue {
    /// Create the queue and spawn its dispatcher. Must be called inside a
    /// tokio runtime.
    pub fn start(client: ManagementClient, config: QueueConfig, reconnect: ReconnectConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(QueueState::Connecting);
        let inner = Arc::new(QueueInner {
            commands: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            events,
            state,
            max_len: config.max_len.max(1),
            max_attempts: reconnect.max_attempts,
        });
        let cancel = CancellationToken::new();
        let address = client.address();

        let task = tokio::spawn(dispatch(
            Arc::clone(&inner),
            client,
            reconnect,
            cancel.clone(),
        ));

        tracing::info!(%address, max_len = inner.max_len, "Invalidation queue started");

        Arc::new(Self {
            inner,
            address,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Queue `command`. If the queue is full, the oldest unsent command is
    /// dropped: its receipt resolves with [`InvalidationError::Dropped`] and
    /// an [`InvalidationEvent::Overflow`] is emitted.
    pub fn submit(&self, command: impl Into<String>) -> Receipt {
        let text = command.into();
        let (tx, rx) = oneshot::channel();

        let dropped = {
            let mut commands = self.inner.commands.lock();
            match *self.inner.state.borrow() {
                QueueState::ShutDown => return Receipt::rejected(InvalidationError::ShutDown),
                QueueState::Exhausted => {
                    return Receipt::rejected(InvalidationError::ReconnectExhausted {
                        attempts: self.inner.max_attempts,
                    })
                }
                _ => {}
            }
            commands.push_back(QueuedCommand {
                text,
                completion: tx,
            });
            if commands.len() > self.inner.max_len {
                commands.pop_front().map(|oldest| (oldest, commands.len()))
            } else {
                None
            }
        };

        if let Some((oldest, queue_len)) = dropped {
            tracing::warn!(
                address = %self.address,
                queue_len,
                command = %oldest.text,
                "Invalidation queue full, dropping oldest command",
            );
            self.inner.emit(InvalidationEvent::Overflow {
                dropped: oldest.text.clone(),
                queue_len,
            });
            oldest.complete(Err(InvalidationError::Dropped));
        }

        self.inner.notify.notify_one();
        Receipt { rx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> QueueState {
        *self.inner.state.borrow()
    }

    /// Number of unsent commands.
    pub fn len(&self) -> usize {
        self.inner.commands.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the dispatcher and fail every unsent command with
    /// [`InvalidationError::ShutDown`]. A command in flight gets up to five
    /// seconds to complete.
    pub async fn shutdown(&self) {
        tracing::info!(address = %self.address, "Shutting down invalidation queue");
        self.cancel.cancel();

        let task = self.task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
                tracing::warn!(address = %self.address, "Invalidation dispatcher did not stop in time");
                task.abort();
            }
        }

        if self.state() != QueueState::Exhausted {
            self.inner.stop(QueueState::ShutDown, || InvalidationError::ShutDown);
        }
    }
}

impl Drop for InvalidationQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Connect -> send commands -> reconnect, until cancelled or reconnection
/// is exhausted.
async fn dispatch(
    inner: Arc<QueueInner>,
    client: ManagementClient,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let address = client.address();

    loop {
        inner.set_state(QueueState::Connecting);
        let connection = match reconnect_loop(&client, &reconnect, &cancel).await {
            Reconnect::Connected(connection) => connection,
            Reconnect::Cancelled => return,
            Reconnect::Exhausted { attempts } => {
                tracing::error!(%address, attempts, "Management port unreachable, invalidations disabled");
                inner.stop(QueueState::Exhausted, || InvalidationError::ReconnectExhausted { attempts });
                inner.emit(InvalidationEvent::ReconnectExhausted { attempts });
                return;
            }
        };

        inner.set_state(QueueState::Ready);
        inner.emit(InvalidationEvent::Connected {
            address: address.clone(),
        });
        tracing::info!(%address, "Invalidation queue connected");

        if serve(&inner, &connection, &cancel).await == Served::Cancelled {
            connection.close().await;
            return;
        }

        inner.set_state(QueueState::Disconnected);
        inner.emit(InvalidationEvent::Disconnected {
            address: address.clone(),
        });
        tracing::warn!(%address, "Management connection lost, reconnecting");
    }
}

#[derive(PartialEq, Eq)]
enum Served {
    Cancelled,
    Disconnected,
}

/// Send queued commands one at a time until the connection drops or the
/// queue is cancelled.
async fn serve(inner: &QueueInner, connection: &ManagementConnection, cancel: &CancellationToken) -> Served {
    loop {
        let command = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Served::Cancelled,
            _ = connection.closed() => return Served::Disconnected,
            command = inner.next() => command,
        };

        match connection.run_cmd(&command.text).await {
            Ok(response) => {
                if !response.is_success() {
                    tracing::warn!(
                        address = %connection.address(),
                        code = response.code,
                        body = %response.body,
                        command = %command.text,
                        "Invalidation command failed",
                    );
                    inner.emit(InvalidationEvent::CommandFailed {
                        command: command.text.clone(),
                        code: response.code,
                        body: response.body.clone(),
                    });
                }
                command.complete(Ok(response));
            }
            Err(e) => {
                tracing::warn!(address = %connection.address(), error = %e, "Invalidation command not delivered");
                command.complete(Err(e));
                if connection.state() == ConnectionState::Disconnected {
                    return Served::Disconnected;
                }
            }
        }
    }
}
