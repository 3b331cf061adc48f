//! tidemark-sync: Runs resource modules against the inventory graph.
//!
//! For each module run: fetch and transform every scope, load the records
//! through the module's schemas, then clean up what the run did not touch.
//! Every run is recorded in the journal.

pub mod config;
pub mod error;
pub mod journal;
pub mod module;
pub mod modules;
pub mod orchestrator;
pub mod scope_lock;
pub mod snapshot;

pub use config::{Ec2Settings, ScopeFailurePolicy, SyncSettings};
pub use error::{Stage, SyncError};
pub use module::{ResourceModule, Scope, Transformed};
pub use orchestrator::{CleanupEntry, Orchestrator, ScopeReport, SyncReport};
