//! Object store buckets, backed by one directory per bucket.

use std::fs;

use serde_json::Value;

use converge::{Attributes, ObservedState, ProviderAdapter, ProviderError, ResourceRef};

use super::{LocalSite, area, io_error, observe};

/// Adapter for the `object_store` kind.
///
/// The payload directory holds the bucket's objects; deleting a non-empty
/// bucket fails unless `force_destroy` is set, matching how real object
/// stores behave.
pub struct ObjectStores {
    site: LocalSite,
}

impl ObjectStores {
    pub fn new(site: LocalSite) -> Self {
        Self { site }
    }
}

impl ProviderAdapter for ObjectStores {
    fn kind(&self) -> &'static str {
        "object_store"
    }

    fn create(
        &self,
        address: &ResourceRef,
        desired: &Attributes,
    ) -> Result<ObservedState, ProviderError> {
        let data = self.site.data_dir(area::BUCKETS, &address.name);
        fs::create_dir_all(&data).map_err(|e| io_error("bucket-io", &e))?;

        let observed = observe(
            address,
            desired,
            &[("bucket", Value::String(address.name.clone()))],
        );
        self.site.write_meta(area::BUCKETS, &address.name, &observed)?;
        Ok(observed)
    }

    fn read(
        &self,
        address: &ResourceRef,
        _prior: &ObservedState,
    ) -> Result<Option<ObservedState>, ProviderError> {
        self.site.read_meta(area::BUCKETS, &address.name)
    }

    fn update(
        &self,
        address: &ResourceRef,
        desired: &Attributes,
        prior: &ObservedState,
    ) -> Result<ObservedState, ProviderError> {
        // Region is fixed at creation, like the real thing.
        if let (Some(new), Some(old)) = (desired.get("region"), prior.get("region")) {
            if new != old {
                return Err(ProviderError::permanent(
                    "immutable-attribute",
                    format!("{address}: region cannot change after creation ({old} -> {new})"),
                ));
            }
        }

        let observed = observe(
            address,
            desired,
            &[("bucket", Value::String(address.name.clone()))],
        );
        self.site.write_meta(area::BUCKETS, &address.name, &observed)?;
        Ok(observed)
    }

    fn delete(&self, address: &ResourceRef, prior: &ObservedState) -> Result<(), ProviderError> {
        let data = self.site.data_dir(area::BUCKETS, &address.name);
        if data.exists() {
            let occupied = fs::read_dir(&data)
                .map_err(|e| io_error("bucket-io", &e))?
                .next()
                .is_some();
            let force = prior
                .get("force_destroy")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if occupied && !force {
                return Err(ProviderError::permanent(
                    "bucket-not-empty",
                    format!("{address} still holds objects; set force_destroy to remove anyway"),
                ));
            }
            fs::remove_dir_all(&data).map_err(|e| io_error("bucket-io", &e))?;
        }
        self.site.remove_meta(area::BUCKETS, &address.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn desired(region: &str) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("region".to_string(), json!(region));
        attrs
    }

    #[test]
    fn test_create_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ObjectStores::new(LocalSite::new(dir.path()));
        let address = ResourceRef::new("object_store", "audio");

        let created = adapter.create(&address, &desired("local-1")).unwrap();
        assert_eq!(created.provider_id, "arn:local:object_store/audio");
        assert_eq!(created.get("bucket"), Some(&json!("audio")));
        assert_eq!(created.get("region"), Some(&json!("local-1")));

        let read = adapter.read(&address, &created).unwrap();
        assert_eq!(read, Some(created));
        assert!(dir.path().join("buckets").join("audio").is_dir());
    }

    #[test]
    fn test_read_reports_missing_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ObjectStores::new(LocalSite::new(dir.path()));
        let address = ResourceRef::new("object_store", "audio");

        let prior = ObservedState::new("arn:local:object_store/audio");
        assert_eq!(adapter.read(&address, &prior).unwrap(), None);
    }

    #[test]
    fn test_region_is_immutable() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ObjectStores::new(LocalSite::new(dir.path()));
        let address = ResourceRef::new("object_store", "audio");

        let created = adapter.create(&address, &desired("local-1")).unwrap();
        let err = adapter
            .update(&address, &desired("local-2"), &created)
            .unwrap_err();
        assert_eq!(err.code, "immutable-attribute");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_delete_refuses_occupied_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ObjectStores::new(LocalSite::new(dir.path()));
        let address = ResourceRef::new("object_store", "audio");

        let created = adapter.create(&address, &desired("local-1")).unwrap();
        fs::write(
            dir.path().join("buckets").join("audio").join("clip.mp3"),
            b"audio",
        )
        .unwrap();

        let err = adapter.delete(&address, &created).unwrap_err();
        assert_eq!(err.code, "bucket-not-empty");

        // Still present after the refused delete.
        assert!(adapter.read(&address, &created).unwrap().is_some());
    }

    #[test]
    fn test_force_destroy_removes_occupied_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ObjectStores::new(LocalSite::new(dir.path()));
        let address = ResourceRef::new("object_store", "audio");

        let mut attrs = desired("local-1");
        attrs.insert("force_destroy".to_string(), json!(true));
        let created = adapter.create(&address, &attrs).unwrap();
        fs::write(
            dir.path().join("buckets").join("audio").join("clip.mp3"),
            b"audio",
        )
        .unwrap();

        adapter.delete(&address, &created).unwrap();
        assert_eq!(adapter.read(&address, &created).unwrap(), None);
        assert!(!dir.path().join("buckets").join("audio").exists());
    }

    #[test]
    fn test_delete_missing_bucket_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ObjectStores::new(LocalSite::new(dir.path()));
        let address = ResourceRef::new("object_store", "audio");

        let prior = ObservedState::new("arn:local:object_store/audio");
        adapter.delete(&address, &prior).unwrap();
    }
}
