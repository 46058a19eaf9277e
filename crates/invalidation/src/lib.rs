//! Client for a downstream HTTP cache's management port.
//!
//! Provides the line-oriented wire codec, a single-command-in-flight
//! connection, fixed-interval reconnection, a bounded FIFO command queue,
//! a round-robin connection pool and the purge commands sent through them.

pub mod commands;
pub mod connection;
pub mod error;
pub mod events;
pub mod pool;
pub mod protocol;
pub mod queue;
pub mod reconnect;

pub use connection::{ConnectionState, ManagementClient, ManagementConnection};
pub use error::{InvalidationError, ProtocolError};
pub use events::InvalidationEvent;
pub use pool::ManagementPool;
pub use protocol::{ManagementCodec, Response};
pub use queue::{InvalidationQueue, QueueConfig, QueueState, Receipt};
pub use reconnect::ReconnectConfig;
