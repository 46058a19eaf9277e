//! Analysis-graph resolution.
//!
//! Turns a declarative map configuration into concrete per-layer and
//! per-dataview SQL, the analysis graphs behind it, a datasource registry
//! and the list of base tables the result depends on.

pub mod builder;
pub mod context;
pub mod datasource;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod stages;

pub use context::{RequestParams, ResolutionContext};
pub use error::{PipelineError, PipelineErrors};
pub use pipeline::{Pipeline, Resolution};
