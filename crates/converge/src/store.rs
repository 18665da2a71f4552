//! Recorded state: outputs observed by this tool's own operations.
//!
//! The store is the tool's memory between runs. Every successful create or
//! update saves one entry, every successful destroy removes one, each
//! persisted before the pass moves on. Stores never see half-applied plans:
//! a crash mid-pass leaves a prefix of the work recorded, and the next pass
//! converges from there.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StateError;
use crate::expr::AttrRef;
use crate::resource::{Attributes, ResourceRef};

/// Remote state of one resource as last observed, including computed outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    /// Provider-assigned identifier, e.g. an ARN
    pub provider_id: String,
    /// Attribute values as the provider reported them
    #[serde(default)]
    pub attributes: Attributes,
}

impl ObservedState {
    /// Create an observed state with no attributes.
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            attributes: Attributes::new(),
        }
    }

    /// Add an observed attribute.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Get an observed attribute by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// One recorded resource: its address, observed state, and the dependencies
/// it had when applied. Dependencies are recorded so resources that later
/// disappear from the configuration can still be destroyed in the right
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Address of the recorded resource
    pub resource: ResourceRef,
    /// State as last observed
    pub observed: ObservedState,
    /// Dependencies at the time the resource was applied
    #[serde(default)]
    pub dependencies: Vec<ResourceRef>,
}

/// Persistent record of applied resources.
///
/// `save` and `remove` must be durable before they return; the engine
/// treats any store failure as fatal to the running pass.
pub trait StateStore {
    /// Load every recorded entry.
    fn load(&self) -> Result<BTreeMap<ResourceRef, StateEntry>, StateError>;

    /// Record one entry, replacing any previous entry for the same address.
    fn save(&mut self, entry: StateEntry) -> Result<(), StateError>;

    /// Forget the entry for an address. Unknown addresses are not an error.
    fn remove(&mut self, address: &ResourceRef) -> Result<(), StateError>;
}

/// In-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<ResourceRef, StateEntry>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with entries.
    pub fn with_entries(entries: impl IntoIterator<Item = StateEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.resource.clone(), entry))
                .collect(),
        }
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<BTreeMap<ResourceRef, StateEntry>, StateError> {
        Ok(self.entries.clone())
    }

    fn save(&mut self, entry: StateEntry) -> Result<(), StateError> {
        self.entries.insert(entry.resource.clone(), entry);
        Ok(())
    }

    fn remove(&mut self, address: &ResourceRef) -> Result<(), StateError> {
        self.entries.remove(address);
        Ok(())
    }
}

/// Look up a referenced output attribute in recorded state.
pub fn lookup(entries: &BTreeMap<ResourceRef, StateEntry>, attr_ref: &AttrRef) -> Option<Value> {
    entries
        .get(&attr_ref.resource)
        .and_then(|entry| entry.observed.get(&attr_ref.attribute))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bucket_entry() -> StateEntry {
        StateEntry {
            resource: ResourceRef::new("object_store", "audio"),
            observed: ObservedState::new("arn:local:store:::audio")
                .attr("bucket", "audio")
                .attr("arn", "arn:local:store:::audio"),
            dependencies: vec![],
        }
    }

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::new();
        store.save(bucket_entry()).unwrap();

        let entries = store.load().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[&ResourceRef::new("object_store", "audio")];
        assert_eq!(entry.observed.get("bucket"), Some(&json!("audio")));
    }

    #[test]
    fn test_memory_store_remove() {
        let mut store = MemoryStore::with_entries([bucket_entry()]);
        let address = ResourceRef::new("object_store", "audio");

        store.remove(&address).unwrap();
        assert!(store.load().unwrap().is_empty());

        // Removing again is not an error
        store.remove(&address).unwrap();
    }

    #[test]
    fn test_lookup_recorded_output() {
        let store = MemoryStore::with_entries([bucket_entry()]);
        let entries = store.load().unwrap();

        let attr_ref = AttrRef::new(ResourceRef::new("object_store", "audio"), "arn");
        assert_eq!(
            lookup(&entries, &attr_ref),
            Some(json!("arn:local:store:::audio"))
        );

        let missing = AttrRef::new(ResourceRef::new("object_store", "audio"), "region");
        assert_eq!(lookup(&entries, &missing), None);
    }

    #[test]
    fn test_entry_serde_round_trip() {
        let entry = StateEntry {
            resource: ResourceRef::new("function", "synthesize"),
            observed: ObservedState::new("arn:local:function:::synthesize")
                .attr("function_name", "synthesize")
                .attr("timeout", 30),
            dependencies: vec![
                ResourceRef::new("object_store", "audio"),
                ResourceRef::new("identity_role", "runtime"),
            ],
        };

        let json = serde_json::to_string(&entry).unwrap();
        let back: StateEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
