//! Attribute reference expressions.
//!
//! String attribute values may embed `${kind.name.attribute}` references to
//! another resource's outputs. References are parsed into [`AttrRef`] values
//! up front and resolved against recorded or freshly observed outputs, never
//! by blind text substitution: a value that is exactly one reference takes
//! the referenced output with its JSON type intact, while references inside
//! a longer string render as text.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::error::ConfigError;
use crate::resource::ResourceRef;

/// A parsed reference to another resource's output attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttrRef {
    /// The referenced resource
    pub resource: ResourceRef,
    /// The output attribute read from that resource
    pub attribute: String,
}

impl AttrRef {
    /// Create a reference to `resource`'s `attribute` output.
    pub fn new(resource: ResourceRef, attribute: impl Into<String>) -> Self {
        Self {
            resource,
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.attribute)
    }
}

/// A reference whose target output does not exist yet.
///
/// During planning this marks the attribute "known after apply"; during
/// application it is a hard error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unresolved reference {0}")]
pub struct Unresolved(pub AttrRef);

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{(\w+)\.([\w-]+)\.(\w+)\}").unwrap())
}

fn capture_to_ref(caps: &regex::Captures<'_>) -> AttrRef {
    AttrRef::new(ResourceRef::new(&caps[1], &caps[2]), &caps[3])
}

/// Parse a string that must be exactly one reference expression.
///
/// Used for output declarations, where bare literals make no sense.
pub fn parse(expr: &str) -> Result<AttrRef, ConfigError> {
    match pattern().captures(expr) {
        Some(caps) if caps.get(0).is_some_and(|m| m.len() == expr.len()) => {
            Ok(capture_to_ref(&caps))
        }
        _ => Err(ConfigError::BadReference {
            input: expr.to_string(),
        }),
    }
}

/// Collect every reference embedded in a value, including inside nested
/// arrays and objects. Duplicates are kept; callers dedupe as needed.
pub fn references(value: &Value) -> Vec<AttrRef> {
    let mut out = Vec::new();
    collect(value, &mut out);
    out
}

fn collect(value: &Value, out: &mut Vec<AttrRef>) {
    match value {
        Value::String(s) => {
            for caps in pattern().captures_iter(s) {
                out.push(capture_to_ref(&caps));
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect(item, out);
            }
        }
        _ => {}
    }
}

/// Resolve every reference in a value through `lookup`.
///
/// A string that is exactly one reference becomes the looked-up value with
/// its type preserved; embedded references render as text. The first
/// reference `lookup` cannot supply aborts resolution.
pub fn resolve<F>(value: &Value, lookup: &F) -> Result<Value, Unresolved>
where
    F: Fn(&AttrRef) -> Option<Value>,
{
    match value {
        Value::String(s) => resolve_string(s, lookup),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(item, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(key, item)| Ok((key.clone(), resolve(item, lookup)?)))
            .collect::<Result<serde_json::Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn resolve_string<F>(s: &str, lookup: &F) -> Result<Value, Unresolved>
where
    F: Fn(&AttrRef) -> Option<Value>,
{
    // Whole-string reference: keep the output's JSON type.
    if let Some(caps) = pattern().captures(s) {
        if caps.get(0).is_some_and(|m| m.len() == s.len()) {
            let attr_ref = capture_to_ref(&caps);
            return lookup(&attr_ref).ok_or(Unresolved(attr_ref));
        }
    }

    let mut rendered = String::with_capacity(s.len());
    let mut last = 0;
    for caps in pattern().captures_iter(s) {
        let whole = caps.get(0).unwrap();
        let attr_ref = capture_to_ref(&caps);
        let value = lookup(&attr_ref).ok_or(Unresolved(attr_ref))?;
        rendered.push_str(&s[last..whole.start()]);
        rendered.push_str(&render(&value));
        last = whole.end();
    }
    rendered.push_str(&s[last..]);
    Ok(Value::String(rendered))
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup_fixture(attr_ref: &AttrRef) -> Option<Value> {
        match (attr_ref.resource.to_string().as_str(), attr_ref.attribute.as_str()) {
            ("object_store.audio", "arn") => Some(json!("arn:local:store:::audio")),
            ("object_store.audio", "bucket") => Some(json!("audio")),
            ("function.synthesize", "timeout") => Some(json!(30)),
            _ => None,
        }
    }

    #[test]
    fn test_parse_single_reference() {
        let attr_ref = parse("${object_store.audio.arn}").unwrap();
        assert_eq!(attr_ref.resource, ResourceRef::new("object_store", "audio"));
        assert_eq!(attr_ref.attribute, "arn");
    }

    #[test]
    fn test_parse_rejects_embedded_or_malformed() {
        assert!(parse("prefix ${object_store.audio.arn}").is_err());
        assert!(parse("${object_store.audio}").is_err());
        assert!(parse("object_store.audio.arn").is_err());
    }

    #[test]
    fn test_references_in_nested_value() {
        let value = json!({
            "resources": ["${object_store.audio.arn}", "${object_store.audio.arn}/*"],
            "role": "${identity_role.runtime.arn}",
            "timeout": 30,
        });
        let refs = references(&value);
        assert_eq!(refs.len(), 3);
        assert!(refs.contains(&AttrRef::new(
            ResourceRef::new("identity_role", "runtime"),
            "arn"
        )));
    }

    #[test]
    fn test_resolve_whole_string_keeps_type() {
        let value = json!("${function.synthesize.timeout}");
        let resolved = resolve(&value, &lookup_fixture).unwrap();
        assert_eq!(resolved, json!(30));
    }

    #[test]
    fn test_resolve_embedded_renders_text() {
        let value = json!("${object_store.audio.arn}/*");
        let resolved = resolve(&value, &lookup_fixture).unwrap();
        assert_eq!(resolved, json!("arn:local:store:::audio/*"));

        let value = json!("timeout=${function.synthesize.timeout}s");
        let resolved = resolve(&value, &lookup_fixture).unwrap();
        assert_eq!(resolved, json!("timeout=30s"));
    }

    #[test]
    fn test_resolve_recurses_into_collections() {
        let value = json!({"env": {"S3_BUCKET": "${object_store.audio.bucket}"}});
        let resolved = resolve(&value, &lookup_fixture).unwrap();
        assert_eq!(resolved, json!({"env": {"S3_BUCKET": "audio"}}));
    }

    #[test]
    fn test_resolve_reports_unresolved() {
        let value = json!("${gateway_route.api.invoke_url}");
        let err = resolve(&value, &lookup_fixture).unwrap_err();
        assert_eq!(err.0.resource, ResourceRef::new("gateway_route", "api"));
        assert_eq!(err.0.attribute, "invoke_url");
    }

    #[test]
    fn test_literal_values_pass_through() {
        let value = json!({"memory": 128, "publish": true});
        assert_eq!(resolve(&value, &lookup_fixture).unwrap(), value);
        assert!(references(&value).is_empty());
    }
}
