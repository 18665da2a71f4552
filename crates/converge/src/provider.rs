//! Provider adapter contract and registry.
//!
//! An adapter translates the engine's four verbs into calls against one
//! remote system, one adapter per resource kind. Adapters receive fully
//! resolved attribute values: by the time an operation runs, every
//! dependency has been applied and every reference substituted.
//!
//! Adapters classify their own failures as transient or permanent via
//! [`ProviderError`]; the engine owns retry and ordering, adapters own
//! the remote calls.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ConfigError, ProviderError};
use crate::resource::{Attributes, Resource, ResourceRef};
use crate::store::ObservedState;

/// CRUD surface over one resource kind.
pub trait ProviderAdapter: Send + Sync {
    /// The resource kind this adapter handles, e.g. `object_store`.
    fn kind(&self) -> &'static str;

    /// Create the resource and return its observed state, including
    /// computed outputs such as identifiers.
    fn create(
        &self,
        address: &ResourceRef,
        desired: &Attributes,
    ) -> Result<ObservedState, ProviderError>;

    /// Read the resource's current remote state.
    ///
    /// Returns `Ok(None)` when the resource no longer exists remotely,
    /// which the planner treats as drift to repair.
    fn read(
        &self,
        address: &ResourceRef,
        prior: &ObservedState,
    ) -> Result<Option<ObservedState>, ProviderError>;

    /// Change the existing resource to match the desired attributes.
    fn update(
        &self,
        address: &ResourceRef,
        desired: &Attributes,
        prior: &ObservedState,
    ) -> Result<ObservedState, ProviderError>;

    /// Delete the resource.
    fn delete(&self, address: &ResourceRef, prior: &ObservedState) -> Result<(), ProviderError>;
}

/// Registry mapping resource kinds to their adapters.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its declared kind, replacing any
    /// previous adapter for that kind.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.kind().to_string(), adapter);
    }

    /// Look up the adapter for a kind.
    pub fn get(&self, kind: &str) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters.get(kind)
    }

    /// Look up the adapter for a resource, failing with a configuration
    /// error when its kind has no registered adapter.
    pub fn adapter_for(&self, address: &ResourceRef) -> Result<&Arc<dyn ProviderAdapter>, ConfigError> {
        self.adapters
            .get(&address.kind)
            .ok_or_else(|| ConfigError::UnknownKind {
                resource: address.clone(),
                kind: address.kind.clone(),
            })
    }

    /// Check that every resource's kind has an adapter. Run before
    /// planning so unhandled kinds fail pre-flight.
    pub fn ensure_registered(&self, resources: &[Resource]) -> Result<(), ConfigError> {
        for resource in resources {
            self.adapter_for(&resource.address)?;
        }
        Ok(())
    }
}
