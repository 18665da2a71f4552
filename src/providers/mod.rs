//! Provider adapters for the local site backend.
//!
//! The local site is a directory tree standing in for a managed cloud
//! account. Every resource kind stores one metadata document under its own
//! area, and `read` reports observed state straight from disk, so deleting
//! a document by hand shows up as drift on the next plan.

mod access_policy;
mod function;
mod gateway_route;
mod identity_role;
mod object_store;

pub use access_policy::AccessPolicies;
pub use function::Functions;
pub use gateway_route::GatewayRoutes;
pub use identity_role::IdentityRoles;
pub use object_store::ObjectStores;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use converge::{Attributes, ObservedState, ProviderError, ProviderRegistry, ResourceRef};

/// Storage areas within the site root, one per resource kind.
pub(crate) mod area {
    pub const BUCKETS: &str = "buckets";
    pub const ROLES: &str = "roles";
    pub const POLICIES: &str = "policies";
    pub const FUNCTIONS: &str = "functions";
    pub const ROUTES: &str = "routes";
}

/// Build a registry with every terral adapter over one site root.
pub fn registry(root: &Path) -> ProviderRegistry {
    let site = LocalSite::new(root);
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(ObjectStores::new(site.clone())));
    registry.register(Arc::new(IdentityRoles::new(site.clone())));
    registry.register(Arc::new(AccessPolicies::new(site.clone())));
    registry.register(Arc::new(Functions::new(site.clone())));
    registry.register(Arc::new(GatewayRoutes::new(site)));
    registry
}

// ============================================================================
// Local Site
// ============================================================================

/// Directory-backed stand-in for a managed cloud site.
#[derive(Debug, Clone)]
pub struct LocalSite {
    root: PathBuf,
}

impl LocalSite {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Metadata document path for one resource.
    fn meta_path(&self, area: &str, name: &str) -> PathBuf {
        self.root.join(area).join(format!("{name}.json"))
    }

    /// Payload directory for resources that carry data.
    fn data_dir(&self, area: &str, name: &str) -> PathBuf {
        self.root.join(area).join(name)
    }

    /// Whether a resource's metadata document exists.
    fn has_meta(&self, area: &str, name: &str) -> bool {
        self.meta_path(area, name).exists()
    }

    fn write_meta(
        &self,
        area: &str,
        name: &str,
        observed: &ObservedState,
    ) -> Result<(), ProviderError> {
        let path = self.meta_path(area, name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error("site-io", &e))?;
        }
        let content = serde_json::to_string_pretty(observed)
            .map_err(|e| ProviderError::permanent("encode", e.to_string()))?;
        fs::write(&path, content).map_err(|e| io_error("site-io", &e))?;
        Ok(())
    }

    fn read_meta(&self, area: &str, name: &str) -> Result<Option<ObservedState>, ProviderError> {
        let path = self.meta_path(area, name);
        match fs::read_to_string(&path) {
            Ok(content) => {
                let observed = serde_json::from_str(&content).map_err(|e| {
                    ProviderError::permanent("corrupt-meta", format!("{}: {e}", path.display()))
                })?;
                Ok(Some(observed))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("site-io", &e)),
        }
    }

    fn remove_meta(&self, area: &str, name: &str) -> Result<(), ProviderError> {
        match fs::remove_file(self.meta_path(area, name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("site-io", &e)),
        }
    }
}

// ============================================================================
// Shared Helpers
// ============================================================================

/// Deterministic identifier in the site's ARN-like format.
pub(crate) fn arn(kind: &str, name: &str) -> String {
    format!("arn:local:{kind}/{name}")
}

/// Observed state echoing the desired attributes, stamped with the
/// resource's identifier and any extra computed outputs.
pub(crate) fn observe(
    address: &ResourceRef,
    desired: &Attributes,
    outputs: &[(&str, Value)],
) -> ObservedState {
    let id = arn(&address.kind, &address.name);
    let mut observed = ObservedState::new(id.clone());
    observed.attributes = desired.clone();
    observed.attributes.insert("arn".to_string(), Value::String(id));
    for (key, value) in outputs {
        observed
            .attributes
            .insert((*key).to_string(), value.clone());
    }
    observed
}

/// Read a required string attribute.
pub(crate) fn require_str<'a>(
    address: &ResourceRef,
    desired: &'a Attributes,
    key: &str,
) -> Result<&'a str, ProviderError> {
    desired.get(key).and_then(Value::as_str).ok_or_else(|| {
        ProviderError::permanent(
            "missing-attribute",
            format!("{address} requires a string attribute `{key}`"),
        )
    })
}

/// Classify an I/O failure; busy conditions are worth retrying.
pub(crate) fn io_error(code: &str, error: &io::Error) -> ProviderError {
    match error.kind() {
        io::ErrorKind::Interrupted
        | io::ErrorKind::TimedOut
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::ResourceBusy => ProviderError::transient(code, error.to_string()),
        _ => ProviderError::permanent(code, error.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================
