//! Compiled tool descriptors and their dispatch plans.

use std::collections::HashMap;

use reqwest::header::HeaderMap;
use rmcp::model::Tool;
use serde_json::{Map, Value};
use url::Url;

/// One tool exposed to the MCP client: the protocol-visible [`Tool`] plus the
/// plan the dispatch engine uses to assemble the upstream request. The plan
/// is opaque to the protocol layer.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub tool: Tool,
    pub plan: Plan,
}

#[derive(Debug, Clone)]
pub enum Plan {
    Rest(RestPlan),
    Graphql(GraphqlPlan),
}

#[derive(Debug, Clone)]
pub struct RestPlan {
    pub method: String,
    pub path_template: String,
    pub base_url: Url,
    pub parameters: Vec<RestParameter>,
    /// Property names hoisted from the request body schema, used to assemble
    /// a body from top-level inputs when no explicit `requestBody` is given.
    pub body_properties: Vec<String>,
    pub has_request_body: bool,
    /// Static headers: custom headers, auth, and the gateway marker.
    pub headers: HeaderMap,
}

#[derive(Debug, Clone)]
pub struct RestParameter {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub style: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParamLocation {
    pub fn parse(location: &str) -> Option<Self> {
        match location {
            "path" => Some(Self::Path),
            "query" => Some(Self::Query),
            "header" => Some(Self::Header),
            "cookie" => Some(Self::Cookie),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphqlPlan {
    pub root_field: String,
    /// Precomputed selection set, deterministic for a given introspection
    /// result and path depth.
    pub selection_set: String,
    pub mcp_params: Vec<McpParam>,
    pub pagination_args: Vec<McpParam>,
    /// Parameters injected automatically at dispatch time; never part of the
    /// input schema.
    pub preset_params: Map<String, Value>,
    pub endpoint: Url,
    pub headers: HeaderMap,
}

/// A flattened filter or pagination parameter of a GraphQL root field.
///
/// `path` is the chain of input-object type names traversed to reach the
/// leaf (starting at the root filter type), `fields_path` the chain of input
/// field names, and `leaf` the terminal input field. The chains satisfy
/// `path.len() == fields_path.len() + 1` for filter leaves; pagination
/// parameters carry empty chains.
#[derive(Debug, Clone)]
pub struct McpParam {
    pub name: String,
    pub scalar: String,
    pub path: Vec<String>,
    pub fields_path: Vec<String>,
    pub leaf: String,
    pub description: String,
}

impl McpParam {
    /// Leaves inside an operational filter type collapse to a single `eq`
    /// terminal when the query is rebuilt.
    pub fn is_operational(&self) -> bool {
        self.path
            .last()
            .is_some_and(|t| t.contains("OperationFilterInput"))
    }
}

/// Session-unique tool naming: the first occurrence keeps the spec-derived
/// name, later ones get `_2`, `_3`, … in discovery order.
#[derive(Debug, Default)]
pub struct NameAllocator {
    taken: HashMap<String, usize>,
}

impl NameAllocator {
    pub fn assign(&mut self, base: &str) -> String {
        let count = self.taken.get(base).copied().unwrap_or(0) + 1;
        self.taken.insert(base.to_string(), count);
        if count == 1 {
            return base.to_string();
        }
        let mut suffix = count;
        loop {
            let candidate = format!("{base}_{suffix}");
            if !self.taken.contains_key(&candidate) {
                self.taken.insert(candidate.clone(), 1);
                return candidate;
            }
            suffix += 1;
        }
    }
}

/// Every tool description leads with the session-level description line.
pub fn tool_description(session_description: &str, resolved: &str) -> String {
    format!("MCP description: {session_description}. Tool description: {resolved}")
}

pub fn input_schema(properties: Map<String, Value>, required: Vec<String>) -> Map<String, Value> {
    let mut schema = Map::new();
    schema.insert("type".to_string(), Value::String("object".to_string()));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert(
            "required".to_string(),
            Value::Array(required.into_iter().map(Value::String).collect()),
        );
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_name_is_kept_collisions_are_suffixed() {
        let mut names = NameAllocator::default();
        assert_eq!(names.assign("getPet"), "getPet");
        assert_eq!(names.assign("getPet"), "getPet_2");
        assert_eq!(names.assign("getPet"), "getPet_3");
        assert_eq!(names.assign("listPets"), "listPets");
    }

    #[test]
    fn suffixed_name_never_collides_with_explicit_name() {
        let mut names = NameAllocator::default();
        assert_eq!(names.assign("op_2"), "op_2");
        assert_eq!(names.assign("op"), "op");
        // `op_2` is taken by an explicit operation, so the duplicate skips it
        assert_eq!(names.assign("op"), "op_3");
    }

    #[test]
    fn operational_filter_detection() {
        let param = McpParam {
            name: "name".into(),
            scalar: "String".into(),
            path: vec!["UserFilter".into(), "StringOperationFilterInput".into()],
            fields_path: vec!["name".into()],
            leaf: "eq".into(),
            description: String::new(),
        };
        assert!(param.is_operational());
    }
}
