//! tilegraph HTTP server library.
//!
//! Exposes configuration, state, error handling, adapters and routes so
//! integration tests and the binary entrypoint share them.

pub mod config;
pub mod error;
pub mod invalidator;
pub mod map_store;
pub mod renderer;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
