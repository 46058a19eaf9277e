//! Sends purge commands to the downstream HTTP cache without making the
//! caller wait for them.

use std::sync::Arc;

use serde::Serialize;
use tilegraph_invalidation::{
    InvalidationError, InvalidationQueue, ManagementClient, ManagementPool, QueueState, Response,
};

use crate::config::VarnishConfig;

/// How purge commands reach the management port.
#[derive(Clone)]
pub enum Invalidator {
    Queue(Arc<InvalidationQueue>),
    Pool(Arc<ManagementPool>),
}

/// Reported by the health endpoint.
#[derive(Debug, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InvalidatorStatus {
    Queue { state: QueueState, queued: usize },
    Pool { connections: usize, available: usize },
}

impl Invalidator {
    /// Start the queue, or open the pool when `config.pool_size > 0`. Both
    /// reconnect per `config.reconnect`.
    pub async fn start(config: &VarnishConfig) -> Result<Self, InvalidationError> {
        let client = ManagementClient::new(config.host.clone(), config.port);
        if config.pool_size > 0 {
            let pool = ManagementPool::connect(&client, config.pool_size, config.reconnect).await?;
            Ok(Self::Pool(Arc::new(pool)))
        } else {
            Ok(Self::Queue(InvalidationQueue::start(
                client,
                config.queue,
                config.reconnect,
            )))
        }
    }

    /// Send `command` in the background. Failures are logged, never returned.
    pub fn send(&self, command: String) {
        match self {
            Self::Queue(queue) => {
                let receipt = queue.submit(command.clone());
                tokio::spawn(async move { log_outcome(&command, receipt.wait().await) });
            }
            Self::Pool(pool) => {
                let pool = Arc::clone(pool);
                tokio::spawn(async move {
                    let result = pool.run_cmd(&command).await;
                    log_outcome(&command, result);
                });
            }
        }
    }

    pub fn status(&self) -> InvalidatorStatus {
        match self {
            Self::Queue(queue) => InvalidatorStatus::Queue {
                state: queue.state(),
                queued: queue.len(),
            },
            Self::Pool(pool) => InvalidatorStatus::Pool {
                connections: pool.len(),
                available: pool.available(),
            },
        }
    }

    /// Whether commands can currently be delivered.
    pub fn is_healthy(&self) -> bool {
        match self {
            Self::Queue(queue) => !matches!(
                queue.state(),
                QueueState::Exhausted | QueueState::ShutDown
            ),
            Self::Pool(pool) => pool.available() > 0,
        }
    }

    pub async fn shutdown(&self) {
        match self {
            Self::Queue(queue) => queue.shutdown().await,
            Self::Pool(pool) => pool.close().await,
        }
    }
}

fn log_outcome(command: &str, result: Result<Response, InvalidationError>) {
    match result {
        Ok(response) if response.is_success() => {
            tracing::debug!(command, code = response.code, "Purge command accepted");
        }
        Ok(response) => {
            tracing::warn!(
                command,
                code = response.code,
                body = %response.body,
                "Purge command rejected",
            );
        }
        Err(e) => tracing::warn!(command, error = %e, "Purge command failed"),
    }
}
