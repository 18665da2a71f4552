//! Access policies granting a role permissions on other resources.

use serde_json::Value;

use converge::{Attributes, ObservedState, ProviderAdapter, ProviderError, ResourceRef};

use super::{LocalSite, area, observe, require_str};

/// Adapter for the `access_policy` kind.
///
/// A policy attaches to an existing role by name, usually wired through a
/// `${identity_role.NAME.role_name}` reference so the role is guaranteed
/// to be applied first.
pub struct AccessPolicies {
    site: LocalSite,
}

impl AccessPolicies {
    pub fn new(site: LocalSite) -> Self {
        Self { site }
    }

    fn attach(
        &self,
        address: &ResourceRef,
        desired: &Attributes,
    ) -> Result<ObservedState, ProviderError> {
        let role = require_str(address, desired, "role")?;
        if !self.site.has_meta(area::ROLES, role) {
            return Err(ProviderError::permanent(
                "missing-role",
                format!("{address}: role `{role}` does not exist in the site"),
            ));
        }

        let observed = observe(
            address,
            desired,
            &[("policy_name", Value::String(address.name.clone()))],
        );
        self.site
            .write_meta(area::POLICIES, &address.name, &observed)?;
        Ok(observed)
    }
}

impl ProviderAdapter for AccessPolicies {
    fn kind(&self) -> &'static str {
        "access_policy"
    }

    fn create(
        &self,
        address: &ResourceRef,
        desired: &Attributes,
    ) -> Result<ObservedState, ProviderError> {
        self.attach(address, desired)
    }

    fn read(
        &self,
        address: &ResourceRef,
        _prior: &ObservedState,
    ) -> Result<Option<ObservedState>, ProviderError> {
        self.site.read_meta(area::POLICIES, &address.name)
    }

    fn update(
        &self,
        address: &ResourceRef,
        desired: &Attributes,
        _prior: &ObservedState,
    ) -> Result<ObservedState, ProviderError> {
        self.attach(address, desired)
    }

    fn delete(&self, address: &ResourceRef, _prior: &ObservedState) -> Result<(), ProviderError> {
        self.site.remove_meta(area::POLICIES, &address.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::IdentityRoles;
    use serde_json::json;

    fn policy_attrs(role: &str) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("role".to_string(), json!(role));
        attrs.insert("actions".to_string(), json!(["s3:PutObject"]));
        attrs
    }

    #[test]
    fn test_attach_requires_existing_role() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = AccessPolicies::new(LocalSite::new(dir.path()));
        let address = ResourceRef::new("access_policy", "write_audio");

        let err = adapter.create(&address, &policy_attrs("runtime")).unwrap_err();
        assert_eq!(err.code, "missing-role");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_attach_to_existing_role() {
        let dir = tempfile::tempdir().unwrap();
        let site = LocalSite::new(dir.path());

        let roles = IdentityRoles::new(site.clone());
        roles
            .create(&ResourceRef::new("identity_role", "runtime"), &Attributes::new())
            .unwrap();

        let adapter = AccessPolicies::new(site);
        let address = ResourceRef::new("access_policy", "write_audio");
        let created = adapter.create(&address, &policy_attrs("runtime")).unwrap();

        assert_eq!(created.get("policy_name"), Some(&json!("write_audio")));
        assert_eq!(adapter.read(&address, &created).unwrap(), Some(created));
    }

    #[test]
    fn test_missing_role_attribute_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = AccessPolicies::new(LocalSite::new(dir.path()));
        let address = ResourceRef::new("access_policy", "write_audio");

        let err = adapter.create(&address, &Attributes::new()).unwrap_err();
        assert_eq!(err.code, "missing-attribute");
    }
}
