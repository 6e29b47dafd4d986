//! Ordered JSON overlays over a base specification document.
//!
//! An overlay is a list of `{target, update}` entries. The target is a
//! dot-separated path expression (`paths./pets.get`, optional leading `$.`,
//! `*` matches every key at that level); the update is deep-merged into every
//! matched node. Entries apply in list order, each fully applied before the
//! next.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::errors::SpecError;

#[derive(Debug, Clone, Deserialize)]
pub struct OverlayEntry {
    pub target: String,
    pub update: Value,
}

/// Accepts either a bare array of entries or an object with an `overlays` key.
pub fn parse_overlay(doc: Value) -> Result<Vec<OverlayEntry>, SpecError> {
    let entries = match doc {
        Value::Array(_) => doc,
        Value::Object(mut map) => map
            .remove("overlays")
            .ok_or_else(|| SpecError::Parse("overlay document has no `overlays` array".into()))?,
        _ => {
            return Err(SpecError::Parse(
                "overlay document must be an array or an object".into(),
            ));
        }
    };
    serde_json::from_value(entries).map_err(SpecError::Json)
}

pub fn apply(base: &mut Value, entries: &[OverlayEntry]) {
    for entry in entries {
        let segments: Vec<&str> = target_segments(&entry.target);
        let mut matched = 0usize;
        visit(base, &segments, &entry.update, &mut matched);
        if matched == 0 {
            // Missing targets are non-fatal
            warn!(target = %entry.target, "Overlay target matched no nodes, skipping");
        }
    }
}

fn target_segments(target: &str) -> Vec<&str> {
    let target = target.strip_prefix("$.").unwrap_or(target);
    target.split('.').filter(|s| !s.is_empty()).collect()
}

fn visit(node: &mut Value, segments: &[&str], update: &Value, matched: &mut usize) {
    let Some((segment, rest)) = segments.split_first() else {
        *matched += 1;
        deep_merge(node, update);
        return;
    };
    match node {
        Value::Object(map) if *segment == "*" => {
            for child in map.values_mut() {
                visit(child, rest, update, matched);
            }
        }
        Value::Object(map) => {
            if let Some(child) = map.get_mut(*segment) {
                visit(child, rest, update, matched);
            }
        }
        Value::Array(items) if *segment == "*" => {
            for child in items.iter_mut() {
                visit(child, rest, update, matched);
            }
        }
        _ => {}
    }
}

/// Scalars replace, arrays concatenate, objects merge by key union with the
/// overlay winning on conflict.
pub fn deep_merge(base: &mut Value, update: &Value) {
    match (base, update) {
        (Value::Object(base_map), Value::Object(update_map)) => {
            for (key, value) in update_map {
                match base_map.get_mut(key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(update_items)) => {
            base_items.extend(update_items.iter().cloned());
        }
        (slot, value) => *slot = value.clone(),
    }
}
