use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use converge::{Attributes, Resource, ResourceRef};

// ============================================================================
// Site Config Schema
// ============================================================================

/// The terral site configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct SiteConfig {
    /// Engine and backend settings
    #[serde(default)]
    pub settings: Settings,

    /// Declared resources, in file order
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceDecl>,

    /// Named outputs, each a `${kind.name.attribute}` expression
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

impl SiteConfig {
    /// Convert every declaration into an engine resource.
    ///
    /// `base` is the directory the configuration was loaded from; relative
    /// function sources resolve against it.
    pub fn to_resources(&self, base: &Path) -> Result<Vec<Resource>> {
        self.resources
            .iter()
            .map(|decl| decl.to_resource(base))
            .collect()
    }
}

/// Optional `[settings]` block
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Directory backing the managed site
    #[serde(default)]
    pub site_root: Option<String>,

    /// State file location (defaults to terral.state.json next to the config)
    #[serde(default)]
    pub state_file: Option<String>,

    /// Default number of parallel operations per wave
    #[serde(default)]
    pub jobs: Option<usize>,
}

// ============================================================================
// Resource Declarations
// ============================================================================

/// One `[[resource]]` block
#[derive(Debug, Deserialize, Clone)]
pub struct ResourceDecl {
    /// Resource kind (e.g. "object_store", "function")
    pub kind: String,

    /// Name, unique within the kind
    pub name: String,

    /// Explicit ordering dependencies as `kind.name` addresses
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Remaining keys become the desired attributes
    #[serde(flatten)]
    pub attributes: toml::Table,
}

impl ResourceDecl {
    /// Build the engine resource for this declaration.
    pub fn to_resource(&self, base: &Path) -> Result<Resource> {
        let address: ResourceRef = format!("{}.{}", self.kind, self.name)
            .parse()
            .with_context(|| format!("invalid resource address '{}.{}'", self.kind, self.name))?;

        let mut depends_on = Vec::new();
        for dep in &self.depends_on {
            let parsed = dep
                .parse::<ResourceRef>()
                .with_context(|| format!("{address}: invalid depends_on entry '{dep}'"))?;
            depends_on.push(parsed);
        }

        let mut attributes = Attributes::new();
        for (key, value) in &self.attributes {
            attributes.insert(key.clone(), toml_to_json(value.clone()));
        }

        if self.kind == "function" {
            stamp_source_hash(&address, &mut attributes, base)?;
        }

        Ok(Resource {
            address,
            attributes,
            depends_on,
        })
    }
}

/// Hash a function's source file so content edits show up as updates.
///
/// Rewrites `source` to an absolute path and adds `source_hash` with the
/// blake3 digest of the file contents.
fn stamp_source_hash(
    address: &ResourceRef,
    attributes: &mut Attributes,
    base: &Path,
) -> Result<()> {
    let Some(source) = attributes.get("source").and_then(Value::as_str) else {
        return Ok(());
    };

    let expanded = shellexpand::tilde(source);
    let mut path = Path::new(expanded.as_ref()).to_path_buf();
    if path.is_relative() {
        path = base.join(path);
    }

    let content = fs::read(&path)
        .with_context(|| format!("{address}: cannot read source file {}", path.display()))?;
    let digest = blake3::hash(&content);

    attributes.insert(
        "source".to_string(),
        Value::String(path.to_string_lossy().into_owned()),
    );
    attributes.insert(
        "source_hash".to_string(),
        Value::String(digest.to_hex().to_string()),
    );
    Ok(())
}

/// Map a TOML value onto the JSON value model used for attributes.
fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, item)| (key, toml_to_json(item)))
                .collect(),
        ),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_example_config() {
        let toml = r#"
[settings]
jobs = 2

[[resource]]
kind = "object_store"
name = "audio"
region = "local-1"
force_destroy = true

[[resource]]
kind = "function"
name = "synthesize"
runtime = "python3.12"
handler = "synthesize.handler"
depends_on = ["object_store.audio"]

[resource.environment]
S3_BUCKET = "${object_store.audio.bucket}"

[outputs]
bucket_arn = "${object_store.audio.arn}"
"#;

        let config: SiteConfig = toml::from_str(toml).expect("Failed to parse config");

        assert_eq!(config.settings.jobs, Some(2));
        assert_eq!(config.resources.len(), 2);
        assert_eq!(config.outputs["bucket_arn"], "${object_store.audio.arn}");

        let resources = config
            .to_resources(Path::new("."))
            .expect("Failed to convert resources");

        let store = &resources[0];
        assert_eq!(store.address, ResourceRef::new("object_store", "audio"));
        assert_eq!(store.attributes["region"], json!("local-1"));
        assert_eq!(store.attributes["force_destroy"], json!(true));
        assert!(!store.attributes.contains_key("kind"));
        assert!(!store.attributes.contains_key("name"));

        let function = &resources[1];
        assert_eq!(
            function.depends_on,
            vec![ResourceRef::new("object_store", "audio")]
        );
        assert_eq!(
            function.attributes["environment"]["S3_BUCKET"],
            json!("${object_store.audio.bucket}")
        );
    }

    #[test]
    fn test_toml_value_conversion() {
        let table: toml::Table = toml::from_str(
            r#"
count = 3
ratio = 0.5
enabled = false
tags = ["a", "b"]

[nested]
key = "value"
"#,
        )
        .expect("Failed to parse table");

        let converted = toml_to_json(toml::Value::Table(table));
        assert_eq!(converted["count"], json!(3));
        assert_eq!(converted["ratio"], json!(0.5));
        assert_eq!(converted["enabled"], json!(false));
        assert_eq!(converted["tags"], json!(["a", "b"]));
        assert_eq!(converted["nested"]["key"], json!("value"));
    }

    #[test]
    fn test_bad_depends_on_rejected() {
        let decl = ResourceDecl {
            kind: "function".to_string(),
            name: "synthesize".to_string(),
            depends_on: vec!["not-an-address".to_string()],
            attributes: toml::Table::new(),
        };

        let err = decl.to_resource(Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("depends_on"));
    }

    #[test]
    fn test_function_source_is_hashed() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join("handler.py"), b"def handler(): pass\n")
            .expect("Failed to write source");

        let mut attributes = toml::Table::new();
        attributes.insert(
            "source".to_string(),
            toml::Value::String("handler.py".to_string()),
        );
        let decl = ResourceDecl {
            kind: "function".to_string(),
            name: "synthesize".to_string(),
            depends_on: vec![],
            attributes,
        };

        let resource = decl.to_resource(dir.path()).expect("Failed to convert");

        let expected = blake3::hash(b"def handler(): pass\n").to_hex().to_string();
        assert_eq!(resource.attributes["source_hash"], json!(expected));

        let source = resource.attributes["source"].as_str().unwrap();
        assert!(Path::new(source).is_absolute());
    }

    #[test]
    fn test_missing_function_source_fails() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");

        let mut attributes = toml::Table::new();
        attributes.insert(
            "source".to_string(),
            toml::Value::String("nope.py".to_string()),
        );
        let decl = ResourceDecl {
            kind: "function".to_string(),
            name: "synthesize".to_string(),
            depends_on: vec![],
            attributes,
        };

        let err = decl.to_resource(dir.path()).unwrap_err();
        assert!(err.to_string().contains("source file"));
    }
}
