//! Identity roles that functions and policies attach to.

use serde_json::Value;

use converge::{Attributes, ObservedState, ProviderAdapter, ProviderError, ResourceRef};

use super::{LocalSite, area, observe};

/// Adapter for the `identity_role` kind.
pub struct IdentityRoles {
    site: LocalSite,
}

impl IdentityRoles {
    pub fn new(site: LocalSite) -> Self {
        Self { site }
    }
}

impl ProviderAdapter for IdentityRoles {
    fn kind(&self) -> &'static str {
        "identity_role"
    }

    fn create(
        &self,
        address: &ResourceRef,
        desired: &Attributes,
    ) -> Result<ObservedState, ProviderError> {
        let observed = observe(
            address,
            desired,
            &[("role_name", Value::String(address.name.clone()))],
        );
        self.site.write_meta(area::ROLES, &address.name, &observed)?;
        Ok(observed)
    }

    fn read(
        &self,
        address: &ResourceRef,
        _prior: &ObservedState,
    ) -> Result<Option<ObservedState>, ProviderError> {
        self.site.read_meta(area::ROLES, &address.name)
    }

    fn update(
        &self,
        address: &ResourceRef,
        desired: &Attributes,
        _prior: &ObservedState,
    ) -> Result<ObservedState, ProviderError> {
        let observed = observe(
            address,
            desired,
            &[("role_name", Value::String(address.name.clone()))],
        );
        self.site.write_meta(area::ROLES, &address.name, &observed)?;
        Ok(observed)
    }

    fn delete(&self, address: &ResourceRef, _prior: &ObservedState) -> Result<(), ProviderError> {
        self.site.remove_meta(area::ROLES, &address.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_exposes_role_name() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = IdentityRoles::new(LocalSite::new(dir.path()));
        let address = ResourceRef::new("identity_role", "runtime");

        let mut attrs = Attributes::new();
        attrs.insert("assume_service".to_string(), json!("functions.local"));

        let created = adapter.create(&address, &attrs).unwrap();
        assert_eq!(created.get("role_name"), Some(&json!("runtime")));
        assert_eq!(created.get("arn"), Some(&json!("arn:local:identity_role/runtime")));
        assert_eq!(adapter.read(&address, &created).unwrap(), Some(created));
    }

    #[test]
    fn test_update_rewrites_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = IdentityRoles::new(LocalSite::new(dir.path()));
        let address = ResourceRef::new("identity_role", "runtime");

        let mut attrs = Attributes::new();
        attrs.insert("assume_service".to_string(), json!("functions.local"));
        let created = adapter.create(&address, &attrs).unwrap();

        attrs.insert("assume_service".to_string(), json!("gateway.local"));
        let updated = adapter.update(&address, &attrs, &created).unwrap();
        assert_eq!(updated.get("assume_service"), Some(&json!("gateway.local")));

        let read = adapter.read(&address, &updated).unwrap().unwrap();
        assert_eq!(read.get("assume_service"), Some(&json!("gateway.local")));
    }
}
