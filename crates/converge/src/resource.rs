//! Resource model: addresses, declarations, and catalog validation.
//!
//! A resource is identified by `kind.name` and declared with a set of
//! desired attributes plus explicit dependencies. Declaration order is
//! significant: it breaks ties between otherwise independent resources
//! when the planner orders work.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::expr;

/// Attribute map shared by desired and observed resource state.
pub type Attributes = serde_json::Map<String, Value>;

/// Stable identity of a resource: its kind plus a unique name.
///
/// Rendered and parsed as `kind.name`, the same address syntax used by
/// `depends_on` entries, attribute references, and target filters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ResourceRef {
    /// Resource kind, e.g. `object_store` or `function`
    pub kind: String,
    /// Name unique within the kind
    pub name: String,
}

impl ResourceRef {
    /// Create a new resource address.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for ResourceRef {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((kind, name)) if !kind.is_empty() && !name.is_empty() && !name.contains('.') => {
                Ok(Self::new(kind, name))
            }
            _ => Err(ConfigError::BadAddress {
                input: s.to_string(),
            }),
        }
    }
}

impl From<ResourceRef> for String {
    fn from(address: ResourceRef) -> Self {
        address.to_string()
    }
}

impl TryFrom<String> for ResourceRef {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A declared resource: address, desired attributes, explicit dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// The resource's address
    pub address: ResourceRef,
    /// Desired attribute values; strings may embed `${kind.name.attr}` references
    #[serde(default)]
    pub attributes: Attributes,
    /// Explicitly declared dependencies
    #[serde(default)]
    pub depends_on: Vec<ResourceRef>,
}

impl Resource {
    /// Create a resource with no attributes or dependencies.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: ResourceRef::new(kind, name),
            attributes: Attributes::new(),
            depends_on: Vec::new(),
        }
    }

    /// Add a desired attribute.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add an explicit dependency.
    pub fn depends_on(mut self, address: ResourceRef) -> Self {
        self.depends_on.push(address);
        self
    }

    /// Addresses referenced from attribute values via `${kind.name.attr}`.
    ///
    /// Deduplicated; attribute order preserved.
    pub fn referenced(&self) -> Vec<ResourceRef> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for value in self.attributes.values() {
            for attr_ref in expr::references(value) {
                if seen.insert(attr_ref.resource.clone()) {
                    out.push(attr_ref.resource);
                }
            }
        }
        out
    }

    /// All dependencies: explicit `depends_on` plus implicit references.
    ///
    /// Deduplicated; explicit entries first.
    pub fn dependencies(&self) -> Vec<ResourceRef> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for dep in self.depends_on.iter().cloned().chain(self.referenced()) {
            if seen.insert(dep.clone()) {
                out.push(dep);
            }
        }
        out
    }
}

/// Validate a resource catalog before planning.
///
/// Rejects duplicate addresses, self-dependencies, and `depends_on` or
/// attribute references that name undeclared resources. Pure: performs
/// no provider or store calls.
pub fn validate(resources: &[Resource]) -> Result<(), ConfigError> {
    let mut declared = BTreeSet::new();
    for resource in resources {
        if !declared.insert(&resource.address) {
            return Err(ConfigError::DuplicateResource {
                resource: resource.address.clone(),
            });
        }
    }

    for resource in resources {
        for dep in &resource.depends_on {
            if dep == &resource.address {
                return Err(ConfigError::SelfDependency {
                    resource: resource.address.clone(),
                });
            }
            if !declared.contains(dep) {
                return Err(ConfigError::UnknownDependency {
                    resource: resource.address.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        for target in resource.referenced() {
            if target == resource.address {
                return Err(ConfigError::SelfDependency {
                    resource: resource.address.clone(),
                });
            }
            if !declared.contains(&target) {
                return Err(ConfigError::UnknownReference {
                    resource: resource.address.clone(),
                    target,
                });
            }
        }
    }

    Ok(())
}
