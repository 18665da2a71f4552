//! # Converge
//!
//! A dependency-ordered reconciliation engine for declared infrastructure.
//!
//! Callers declare resources with desired attributes, the engine compares
//! them with observed state and executes create, update, and destroy
//! operations in dependency order until the two match.
//!
//! ## Core Concepts
//!
//! - **Resource**: A declared piece of infrastructure, addressed as `kind.name`
//! - **DependencyGraph**: Deterministic ordering over the declared resources
//! - **Plan**: The operations one pass intends to execute, previewable before apply
//! - **ProviderAdapter**: CRUD seam a backend implements per resource kind
//! - **Engine**: Runs passes with bounded parallelism, retries, and state persistence
//!
//! ## Example
//!
//! ```ignore
//! use converge::{Engine, NoProgress, ProviderRegistry, Resource, store::MemoryStore};
//!
//! let mut registry = ProviderRegistry::new();
//! registry.register(std::sync::Arc::new(my_backend::ObjectStores::default()));
//!
//! let resources = vec![
//!     Resource::new("object_store", "audio").attr("region", "local-1"),
//!     Resource::new("function", "synthesize")
//!         .attr("bucket", "${object_store.audio.arn}"),
//! ];
//!
//! let engine = Engine::new(registry, MemoryStore::new());
//! let plan = engine.plan(&resources, &[], &NoProgress)?;
//! let report = engine.apply(&resources, &plan, &NoProgress)?;
//! assert!(report.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits at its seams:
//!
//! - [`ProviderAdapter`]: Backend CRUD for one resource kind
//! - [`StateStore`]: Durable record of what the engine manages
//! - [`ProgressCallback`]: Receives pass and per-operation progress
//! - [`RetryCallback`]: Observes retries of transient failures
//!
//! This keeps the engine free of hard dependencies on any particular
//! backend, storage format, or UI.

pub mod engine;
pub mod error;
pub mod expr;
pub mod graph;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod store;

// Re-export main types at crate root
pub use engine::{
    ApplyReport, CancelFlag, Engine, EngineOptions, NoProgress, OpOutcome, PassOutcome, Phase,
    ProgressCallback,
};
pub use error::{ConfigError, EngineError, ProviderError, Severity, StateError};
pub use expr::AttrRef;
pub use graph::DependencyGraph;
pub use plan::{Action, AttrDiff, ChangeOp, Plan};
pub use provider::{ProviderAdapter, ProviderRegistry};
pub use resource::{Attributes, Resource, ResourceRef};
pub use retry::{NoCallback, RetryCallback, RetryPolicy};
pub use store::{MemoryStore, ObservedState, StateEntry, StateStore};
