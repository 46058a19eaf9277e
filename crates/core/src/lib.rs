//! Domain types and SQL/HTTP helpers shared by every tilegraph crate.
//!
//! Nothing in this crate performs I/O; collaborators are reached through
//! the traits in [`capability`].

pub mod affected_tables;
pub mod capability;
pub mod error;
pub mod filter;
pub mod hashing;
pub mod headers;
pub mod mapconfig;
pub mod query;
pub mod tables;
pub mod types;
