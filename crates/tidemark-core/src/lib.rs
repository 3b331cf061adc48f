//! tidemark-core: Schema model, property resolution, and shared plumbing for Tidemark.
//!
//! This crate provides the foundational pieces used by every Tidemark component:
//! - Declarative node and relationship schemas ([`NodeSchema`], [`RelSchema`])
//! - Property references and their resolution against records
//! - The explicit per-call [`SyncContext`] (sync tag + injected constants)
//! - Layered configuration loading
//! - Common error types

pub mod config;
pub mod context;
pub mod error;
pub mod resolve;
pub mod schema;

pub use context::SyncContext;
pub use error::TidemarkError;
pub use resolve::resolve;
pub use schema::{Direction, NodeSchema, PropertyRef, RelSchema, TargetMatcher};

/// A flat record produced by a transform step: field name to value.
pub type Record = serde_json::Map<String, serde_json::Value>;
