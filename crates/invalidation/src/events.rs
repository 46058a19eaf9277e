//! Events emitted by the invalidation queue.

use serde::Serialize;

/// A state change or degradation worth reporting.
///
/// Broadcast via [`InvalidationQueue::subscribe`](crate::InvalidationQueue::subscribe).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InvalidationEvent {
    /// The management connection is ready for commands.
    Connected { address: String },

    /// The management connection dropped; reconnection follows.
    Disconnected { address: String },

    /// The queue was full and its oldest unsent command was dropped.
    Overflow { dropped: String, queue_len: usize },

    /// The server answered a command with a failure status.
    CommandFailed { command: String, code: u16, body: String },

    /// Reconnection gave up. Emitted once; the queue stops dispatching.
    ReconnectExhausted { attempts: u32 },
}
