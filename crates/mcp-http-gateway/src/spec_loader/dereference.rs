//! Intra-document `$ref` resolution.
//!
//! Produces a copy of the document with every internal reference replaced by
//! the referenced subtree. A reference already active on the resolution path
//! is a cycle and fails the whole document; external references are replaced
//! by a permissive empty schema.

use serde_json::{Map, Value};
use tracing::warn;

use crate::errors::SpecError;

pub fn dereference(doc: &Value) -> Result<Value, SpecError> {
    let mut active = Vec::new();
    resolve(doc, doc, &mut active)
}

fn resolve(node: &Value, root: &Value, active: &mut Vec<String>) -> Result<Value, SpecError> {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                return resolve_reference(reference, root, active);
            }
            let mut resolved = Map::with_capacity(map.len());
            for (key, value) in map {
                resolved.insert(key.clone(), resolve(value, root, active)?);
            }
            Ok(Value::Object(resolved))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(item, root, active))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn resolve_reference(
    reference: &str,
    root: &Value,
    active: &mut Vec<String>,
) -> Result<Value, SpecError> {
    let Some(pointer) = reference.strip_prefix('#') else {
        warn!(%reference, "External $ref is not supported, substituting an empty schema");
        return Ok(Value::Object(Map::new()));
    };
    if active.iter().any(|r| r == reference) {
        return Err(SpecError::Invalid(format!(
            "cycle in $ref chain at {reference}"
        )));
    }
    let Some(target) = root.pointer(pointer) else {
        warn!(%reference, "Unresolvable $ref, substituting an empty schema");
        return Ok(Value::Object(Map::new()));
    };
    active.push(reference.to_string());
    let resolved = resolve(target, root, active);
    active.pop();
    resolved
}
