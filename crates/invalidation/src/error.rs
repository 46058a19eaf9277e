/// Wire-level failures on a management connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The status line is not `<code> <length>`.
    #[error("Malformed status line: {0:?}")]
    MalformedStatus(String),

    /// A line exceeded the codec's maximum length without a terminator.
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    /// Commands are single lines.
    #[error("Command contains a line break")]
    InvalidCommand,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by connections, the queue and the pool.
#[derive(Debug, thiserror::Error)]
pub enum InvalidationError {
    /// Failed to establish the TCP connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connected, but the server banner has not arrived yet.
    #[error("Connection is not ready")]
    NotReady,

    /// Another command is awaiting its response on this connection.
    #[error("Response pending")]
    CommandPending,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Dropped from a full queue before it was sent.
    #[error("Command dropped: invalidation queue is full")]
    Dropped,

    /// Every pooled connection is busy or down.
    #[error("No connection available")]
    NoConnectionAvailable,

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Invalidation queue shut down")]
    ShutDown,
}
