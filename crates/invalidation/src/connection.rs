//! Single management-port connection.
//!
//! [`ManagementClient`] holds the address of the management port. Call
//! [`ManagementClient::connect`] to open a [`ManagementConnection`], which
//! moves `Connected -> Ready` when the server banner arrives and to
//! `Disconnected` when the socket closes or misbehaves. At most one command
//! is in flight per connection.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::error::InvalidationError;
use crate::protocol::{ManagementCodec, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Socket open, banner not yet received.
    Connected,
    Ready,
}

type Completion = oneshot::Sender<Result<Response, InvalidationError>>;

/// Address of one management port.
#[derive(Debug, Clone)]
pub struct ManagementClient {
    host: String,
    port: u16,
}

impl ManagementClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Open a connection. The returned connection is `Connected`; use
    /// [`ManagementConnection::ready`] to wait for the banner.
    pub async fn connect(&self) -> Result<ManagementConnection, InvalidationError> {
        let address = self.address();
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| InvalidationError::Connection(format!("Failed to connect to {address}: {e}")))?;
        let (read_half, write_half) = stream.into_split();

        let (state, _) = watch::channel(ConnectionState::Connected);
        let shared = Arc::new(Shared {
            state,
            pending: Mutex::new(None),
        });
        let cancel = CancellationToken::new();

        tokio::spawn(read_loop(
            FramedRead::new(read_half, ManagementCodec),
            Arc::clone(&shared),
            cancel.clone(),
            address.clone(),
        ));

        tracing::debug!(%address, "Connected to management port");

        Ok(ManagementConnection {
            address,
            shared,
            writer: tokio::sync::Mutex::new(FramedWrite::new(write_half, ManagementCodec)),
            cancel,
        })
    }

    /// Connect and wait for the banner.
    pub async fn connect_ready(&self) -> Result<ManagementConnection, InvalidationError> {
        let connection = self.connect().await?;
        connection.ready().await?;
        Ok(connection)
    }
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    /// Completion of the command in flight.
    pending: Mutex<Option<Completion>>,
}

impl Shared {
    /// Mark the connection down and fail the command in flight, if any.
    fn disconnect(&self, error: InvalidationError) {
        let pending = {
            let mut pending = self.pending.lock();
            self.state.send_replace(ConnectionState::Disconnected);
            pending.take()
        };
        if let Some(tx) = pending {
            let _ = tx.send(Err(error));
        }
    }
}

/// A live management-port connection.
///
/// Dropping the connection stops its reader task.
pub struct ManagementConnection {
    address: String,
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, ManagementCodec>>,
    cancel: CancellationToken,
}

impl ManagementConnection {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Wait until the banner arrives. Fails if the connection drops first.
    pub async fn ready(&self) -> Result<(), InvalidationError> {
        let mut rx = self.shared.state.subscribe();
        let state = rx
            .wait_for(|s| *s != ConnectionState::Connected)
            .await
            .map(|s| *s)
            .unwrap_or(ConnectionState::Disconnected);
        match state {
            ConnectionState::Ready => Ok(()),
            _ => Err(InvalidationError::ConnectionClosed),
        }
    }

    /// Resolves once the connection is `Disconnected`.
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|s| *s == ConnectionState::Disconnected).await;
    }

    /// Send `command` and wait for its response.
    ///
    /// Fails with [`InvalidationError::CommandPending`] while another
    /// command awaits its response. A command in flight when the connection
    /// drops fails with [`InvalidationError::ConnectionClosed`].
    pub async fn run_cmd(&self, command: &str) -> Result<Response, InvalidationError> {
        let rx = {
            let mut pending = self.shared.pending.lock();
            match *self.shared.state.borrow() {
                ConnectionState::Ready => {}
                ConnectionState::Disconnected => return Err(InvalidationError::ConnectionClosed),
                ConnectionState::Connecting | ConnectionState::Connected => {
                    return Err(InvalidationError::NotReady)
                }
            }
            if pending.is_some() {
                return Err(InvalidationError::CommandPending);
            }
            let (tx, rx) = oneshot::channel();
            *pending = Some(tx);
            rx
        };

        let sent = self.writer.lock().await.send(command.to_string()).await;
        if let Err(e) = sent {
            self.shared.pending.lock().take();
            return Err(e.into());
        }

        tracing::trace!(address = %self.address, command, "Management command sent");
        rx.await.unwrap_or(Err(InvalidationError::ConnectionClosed))
    }

    /// Close the connection. A command in flight fails with
    /// [`InvalidationError::ConnectionClosed`].
    pub async fn close(&self) {
        self.cancel.cancel();
        self.shared.disconnect(InvalidationError::ConnectionClosed);
        let _ = self.writer.lock().await.close().await;
    }
}

impl Drop for ManagementConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Read frames until the socket closes, the peer breaks the protocol or
/// the connection is cancelled. The first frame is the banner.
async fn read_loop(
    mut reader: FramedRead<OwnedReadHalf, ManagementCodec>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    address: String,
) {
    let error = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break InvalidationError::ConnectionClosed,
            frame = reader.next() => frame,
        };
        match frame {
            Some(Ok(response)) => {
                if *shared.state.borrow() == ConnectionState::Connected {
                    shared.state.send_replace(ConnectionState::Ready);
                    tracing::debug!(%address, banner = %response.body, "Management port ready");
                    continue;
                }
                match shared.pending.lock().take() {
                    Some(tx) => {
                        let _ = tx.send(Ok(response));
                    }
                    None => tracing::warn!(%address, code = response.code, "Unsolicited management response"),
                }
            }
            Some(Err(e)) => {
                tracing::warn!(%address, error = %e, "Management protocol error");
                break InvalidationError::Protocol(e);
            }
            None => break InvalidationError::ConnectionClosed,
        }
    };

    shared.disconnect(error);
    tracing::debug!(%address, "Management connection closed");
}
