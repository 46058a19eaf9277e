//! Fixed-interval reconnection to the management port.
//!
//! [`reconnect_loop`] keeps trying to open a ready connection until one
//! succeeds, the attempt budget is spent, or the [`CancellationToken`] is
//! triggered.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::connection::{ManagementClient, ManagementConnection};

#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    /// Delay between consecutive attempts.
    pub interval: Duration,
    /// Failed attempts tolerated since the last successful connection.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 10,
        }
    }
}

pub enum Reconnect {
    Connected(ManagementConnection),
    Cancelled,
    Exhausted { attempts: u32 },
}

/// Connect, retrying every `config.interval`. Every failure counts towards
/// `config.max_attempts`, including the first.
pub async fn reconnect_loop(
    client: &ManagementClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Reconnect {
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Reconnect::Cancelled,
            result = client.connect_ready() => match result {
                Ok(connection) => {
                    if attempt > 1 {
                        tracing::info!(address = %client.address(), attempt, "Reconnected to management port");
                    }
                    return Reconnect::Connected(connection);
                }
                Err(e) => {
                    tracing::warn!(
                        address = %client.address(),
                        error = %e,
                        "Management connection attempt {attempt} failed",
                    );
                }
            }
        }

        if attempt >= config.max_attempts {
            return Reconnect::Exhausted { attempts: attempt };
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Reconnect::Cancelled,
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
}
