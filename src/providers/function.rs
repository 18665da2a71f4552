//! Functions: deployed source payloads with runtime metadata.

use std::fs;
use std::io;
use std::path::Path;

use serde_json::Value;

use converge::{Attributes, ObservedState, ProviderAdapter, ProviderError, ResourceRef};

use super::{LocalSite, area, io_error, observe, require_str};

/// Adapter for the `function` kind.
///
/// Deploying copies the source file into the function's payload directory.
/// The `source_hash` attribute rides along in the metadata, so a content
/// change diffs as an update even when the path stays the same.
pub struct Functions {
    site: LocalSite,
}

impl Functions {
    pub fn new(site: LocalSite) -> Self {
        Self { site }
    }

    fn deploy(
        &self,
        address: &ResourceRef,
        desired: &Attributes,
    ) -> Result<ObservedState, ProviderError> {
        let source = require_str(address, desired, "source")?;

        if let Some(role) = desired.get("role").and_then(Value::as_str) {
            if !self.site.has_meta(area::ROLES, role) {
                return Err(ProviderError::permanent(
                    "missing-role",
                    format!("{address}: role `{role}` does not exist in the site"),
                ));
            }
        }

        let source_path = Path::new(source);
        let file_name = source_path.file_name().ok_or_else(|| {
            ProviderError::permanent(
                "missing-source",
                format!("{address}: `{source}` is not a file path"),
            )
        })?;

        let payload_dir = self.site.data_dir(area::FUNCTIONS, &address.name);
        fs::create_dir_all(&payload_dir).map_err(|e| io_error("function-io", &e))?;
        match fs::copy(source_path, payload_dir.join(file_name)) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ProviderError::permanent(
                    "missing-source",
                    format!("{address}: source file `{source}` does not exist"),
                ));
            }
            Err(e) => return Err(io_error("function-io", &e)),
        }

        let observed = observe(
            address,
            desired,
            &[("function_name", Value::String(address.name.clone()))],
        );
        self.site
            .write_meta(area::FUNCTIONS, &address.name, &observed)?;
        Ok(observed)
    }
}

impl ProviderAdapter for Functions {
    fn kind(&self) -> &'static str {
        "function"
    }

    fn create(
        &self,
        address: &ResourceRef,
        desired: &Attributes,
    ) -> Result<ObservedState, ProviderError> {
        self.deploy(address, desired)
    }

    fn read(
        &self,
        address: &ResourceRef,
        _prior: &ObservedState,
    ) -> Result<Option<ObservedState>, ProviderError> {
        self.site.read_meta(area::FUNCTIONS, &address.name)
    }

    fn update(
        &self,
        address: &ResourceRef,
        desired: &Attributes,
        _prior: &ObservedState,
    ) -> Result<ObservedState, ProviderError> {
        self.deploy(address, desired)
    }

    fn delete(&self, address: &ResourceRef, _prior: &ObservedState) -> Result<(), ProviderError> {
        let payload_dir = self.site.data_dir(area::FUNCTIONS, &address.name);
        if payload_dir.exists() {
            fs::remove_dir_all(&payload_dir).map_err(|e| io_error("function-io", &e))?;
        }
        self.site.remove_meta(area::FUNCTIONS, &address.name)
    }
}
