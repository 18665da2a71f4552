//! Gateway routes exposing functions over HTTP.

use serde_json::Value;

use converge::{Attributes, ObservedState, ProviderAdapter, ProviderError, ResourceRef};

use super::{LocalSite, area, observe, require_str};

/// Adapter for the `gateway_route` kind.
///
/// A route points at a deployed function by name and computes a stable
/// `invoke_url`, which is the usual thing to export as an output.
pub struct GatewayRoutes {
    site: LocalSite,
}

impl GatewayRoutes {
    pub fn new(site: LocalSite) -> Self {
        Self { site }
    }

    fn wire(
        &self,
        address: &ResourceRef,
        desired: &Attributes,
    ) -> Result<ObservedState, ProviderError> {
        let function = require_str(address, desired, "function")?;
        if !self.site.has_meta(area::FUNCTIONS, function) {
            return Err(ProviderError::permanent(
                "missing-function",
                format!("{address}: function `{function}` is not deployed"),
            ));
        }

        let path = desired.get("path").and_then(Value::as_str).unwrap_or("/");
        let method = desired.get("method").and_then(Value::as_str).unwrap_or("GET");
        let observed = observe(
            address,
            desired,
            &[
                ("route_key", Value::String(format!("{method} {path}"))),
                ("invoke_url", Value::String(invoke_url(&address.name, function, path))),
            ],
        );
        self.site.write_meta(area::ROUTES, &address.name, &observed)?;
        Ok(observed)
    }
}

/// Endpoint URL for a route. The host carries a short digest of the
/// route/function pair, so rewiring a route to another function changes
/// the URL.
fn invoke_url(route: &str, function: &str, path: &str) -> String {
    let digest = blake3::hash(format!("{route}:{function}").as_bytes());
    let hex = digest.to_hex();
    format!("http://{route}-{}.gateway.local{path}", &hex[..8])
}

impl ProviderAdapter for GatewayRoutes {
    fn kind(&self) -> &'static str {
        "gateway_route"
    }

    fn create(
        &self,
        address: &ResourceRef,
        desired: &Attributes,
    ) -> Result<ObservedState, ProviderError> {
        self.wire(address, desired)
    }

    fn read(
        &self,
        address: &ResourceRef,
        _prior: &ObservedState,
    ) -> Result<Option<ObservedState>, ProviderError> {
        self.site.read_meta(area::ROUTES, &address.name)
    }

    fn update(
        &self,
        address: &ResourceRef,
        desired: &Attributes,
        _prior: &ObservedState,
    ) -> Result<ObservedState, ProviderError> {
        self.wire(address, desired)
    }

    fn delete(&self, address: &ResourceRef, _prior: &ObservedState) -> Result<(), ProviderError> {
        self.site.remove_meta(area::ROUTES, &address.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Functions;
    use serde_json::json;
    use std::fs;

    fn deploy_function(dir: &std::path::Path, site: &LocalSite, name: &str) {
        let source = dir.join(format!("{name}.py"));
        fs::write(&source, b"pass\n").unwrap();

        let mut attrs = Attributes::new();
        attrs.insert("source".to_string(), json!(source.to_str().unwrap()));
        Functions::new(site.clone())
            .create(&ResourceRef::new("function", name), &attrs)
            .unwrap();
    }

    fn route_attrs(function: &str, path: &str) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("function".to_string(), json!(function));
        attrs.insert("method".to_string(), json!("POST"));
        attrs.insert("path".to_string(), json!(path));
        attrs
    }

    #[test]
    fn test_route_requires_deployed_function() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = GatewayRoutes::new(LocalSite::new(dir.path()));
        let address = ResourceRef::new("gateway_route", "api");

        let err = adapter
            .create(&address, &route_attrs("synthesize", "/synthesize"))
            .unwrap_err();
        assert_eq!(err.code, "missing-function");
    }

    #[test]
    fn test_invoke_url_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let site = LocalSite::new(dir.path().join("site"));
        deploy_function(dir.path(), &site, "synthesize");

        let adapter = GatewayRoutes::new(site);
        let address = ResourceRef::new("gateway_route", "api");

        let created = adapter
            .create(&address, &route_attrs("synthesize", "/synthesize"))
            .unwrap();
        let url = created.get("invoke_url").and_then(Value::as_str).unwrap();
        assert!(url.starts_with("http://api-"));
        assert!(url.ends_with(".gateway.local/synthesize"));
        assert_eq!(created.get("route_key"), Some(&json!("POST /synthesize")));

        // Re-applying the same route keeps the same URL.
        let updated = adapter
            .update(&address, &route_attrs("synthesize", "/synthesize"), &created)
            .unwrap();
        assert_eq!(updated.get("invoke_url"), created.get("invoke_url"));
    }

    #[test]
    fn test_rewiring_changes_invoke_url() {
        let dir = tempfile::tempdir().unwrap();
        let site = LocalSite::new(dir.path().join("site"));
        deploy_function(dir.path(), &site, "synthesize");
        deploy_function(dir.path(), &site, "transcribe");

        let adapter = GatewayRoutes::new(site);
        let address = ResourceRef::new("gateway_route", "api");

        let first = adapter
            .create(&address, &route_attrs("synthesize", "/run"))
            .unwrap();
        let second = adapter
            .update(&address, &route_attrs("transcribe", "/run"), &first)
            .unwrap();
        assert_ne!(first.get("invoke_url"), second.get("invoke_url"));
    }
}
