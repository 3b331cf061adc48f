//! Tidemark Graph: schema-driven writes into the property graph.
//!
//! This crate is the single mutation point for the inventory graph. Records
//! are upserted through a [`tidemark_core::NodeSchema`] by [`load`] and stale
//! entities are removed inside an injected scope by [`cleanup`]. Both talk to
//! a [`GraphStore`]: the Neo4j [`GraphClient`] in production, or the
//! [`MemoryGraph`] for tests and dry runs.

pub mod cleanup;
pub mod client;
pub mod cypher;
pub mod load;
pub mod memory;
pub mod mutations;
pub mod queries;
pub mod store;

pub use cleanup::{cleanup, cleanup_batched, CleanupReport};
pub use client::{GraphClient, GraphConfig, GraphError};
pub use load::{load, load_batched, LoadReport, RelReport, DEFAULT_BATCH_SIZE};
pub use memory::MemoryGraph;
pub use store::{GraphStore, Neighbor, NodeRecord};
