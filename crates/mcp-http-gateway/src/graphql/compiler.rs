//! Compilation of a GraphQL introspection result into tool descriptors.
//!
//! Each query-root field becomes one tool. The compiler precomputes a
//! bounded-depth selection set and flattens the field's `where` input-object
//! graph into a single-level parameter surface; the inverse transformation
//! happens at dispatch time in [`super::query_builder`].
//!
//! The type graph is cyclic, so traversal is index-based: all introspected
//! types live in a flat table keyed by name, an explicit set of named types
//! on the current path guards against re-entry, and descent stops at the
//! configured path depth.

use std::collections::{HashMap, HashSet};

use reqwest::header::HeaderMap;
use rmcp::model::{Tool, ToolAnnotations};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};
use url::Url;

use crate::errors::SpecError;
use crate::filter::OperationFilter;
use crate::tools::{
    GraphqlPlan, McpParam, NameAllocator, Plan, ToolDescriptor, input_schema, tool_description,
};

use super::introspection::{FieldDef, FullType, IntrospectionSchema, TypeKind, TypeRef};

/// Logical connectors are structural, not filterable fields.
const CONNECTORS: [&str; 3] = ["or", "and", "any"];

pub struct GraphqlContext<'a> {
    pub session_description: &'a str,
    pub filter: &'a OperationFilter,
    pub endpoint: &'a Url,
    pub headers: &'a HeaderMap,
    pub preset_params: &'a Map<String, Value>,
    pub path_depth: usize,
}

pub fn compile(
    schema: &IntrospectionSchema,
    ctx: &GraphqlContext<'_>,
) -> Result<Vec<ToolDescriptor>, SpecError> {
    let compiler = Compiler {
        types: schema
            .types
            .iter()
            .filter_map(|t| t.name.as_deref().map(|name| (name, t)))
            .collect(),
        path_depth: ctx.path_depth,
    };
    let root_name = schema
        .query_type
        .as_ref()
        .and_then(|t| t.name.as_deref())
        .unwrap_or("Query");
    let root = compiler
        .types
        .get(root_name)
        .filter(|t| t.kind == TypeKind::Object)
        .ok_or_else(|| SpecError::Invalid(format!("no query root type {root_name}")))?;

    let mut names = NameAllocator::default();
    let mut descriptors = Vec::new();
    for field in root.fields.iter().flatten() {
        if !ctx.filter.retains_operation(&field.name, "", "") {
            debug!(field = %field.name, "Root field filtered out");
            continue;
        }
        match compiler.compile_field(field, ctx, &mut names) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(error) => warn!(field = %field.name, "Skipping root field: {error}"),
        }
    }
    debug!("Compiled {} GraphQL tools", descriptors.len());
    Ok(descriptors)
}

struct Compiler<'a> {
    types: HashMap<&'a str, &'a FullType>,
    path_depth: usize,
}

impl Compiler<'_> {
    fn compile_field(
        &self,
        field: &FieldDef,
        ctx: &GraphqlContext<'_>,
        names: &mut NameAllocator,
    ) -> Result<ToolDescriptor, SpecError> {
        let selection_set = self.selection_set(&field.ty);

        let mut pagination_args = Vec::new();
        let mut mcp_params = Vec::new();
        let mut seen = HashSet::new();
        for arg in &field.args {
            let innermost = arg.ty.innermost();
            if arg.name == "where" {
                if let Some(filter_type) = innermost
                    .name
                    .as_deref()
                    .filter(|_| innermost.kind == TypeKind::InputObject)
                    .and_then(|name| self.types.get(name))
                {
                    let mut type_path = vec![filter_type.name.clone().unwrap_or_default()];
                    self.flatten_filter(
                        filter_type,
                        &Vec::new(),
                        &mut type_path,
                        &mut seen,
                        &mut mcp_params,
                    );
                }
                continue;
            }
            if matches!(innermost.kind, TypeKind::Scalar | TypeKind::Enum) {
                let scalar = innermost.name.clone().unwrap_or_else(|| "String".into());
                pagination_args.push(McpParam {
                    name: arg.name.clone(),
                    description: arg
                        .description
                        .clone()
                        .unwrap_or_else(|| format!("Parameter: {}", arg.name)),
                    scalar,
                    path: Vec::new(),
                    fields_path: Vec::new(),
                    leaf: arg.name.clone(),
                });
            }
        }

        pagination_args.retain(|p| ctx.filter.retains_param(&field.name, &p.name));
        mcp_params.retain(|p| ctx.filter.retains_param(&field.name, &p.name));

        let mut properties = Map::new();
        for param in pagination_args.iter().chain(mcp_params.iter()) {
            if ctx.preset_params.contains_key(&param.name) {
                continue;
            }
            properties.insert(
                param.name.clone(),
                json!({
                    "type": scalar_json_type(&param.scalar),
                    "description": param.description,
                }),
            );
        }

        let name = names.assign(&field.name);
        let tool = Tool::new(
            name,
            tool_description(
                ctx.session_description,
                field.description.as_deref().unwrap_or_default(),
            ),
            input_schema(properties, Vec::new()),
        )
        .annotate(ToolAnnotations::new().read_only(true));

        Ok(ToolDescriptor {
            tool,
            plan: Plan::Graphql(GraphqlPlan {
                root_field: field.name.clone(),
                selection_set,
                mcp_params,
                pagination_args,
                preset_params: ctx.preset_params.clone(),
                endpoint: ctx.endpoint.clone(),
                headers: ctx.headers.clone(),
            }),
        })
    }

    /// Precompute the selection set for a root field's return type. The
    /// result is deterministic for a given introspection result and depth.
    fn selection_set(&self, ty: &TypeRef) -> String {
        let mut path = Vec::new();
        self.selection_for(ty, 0, &mut path)
    }

    fn selection_for(&self, ty: &TypeRef, depth: usize, path: &mut Vec<String>) -> String {
        if depth > self.path_depth {
            return String::new();
        }
        let innermost = ty.innermost();
        let Some(full) = innermost.name.as_deref().and_then(|n| self.types.get(n)) else {
            return String::new();
        };
        if !matches!(full.kind, TypeKind::Object | TypeKind::Interface) {
            return String::new();
        }
        let type_name = full.name.clone().unwrap_or_default();
        path.push(type_name);
        let mut parts = Vec::new();
        for field in full.fields.iter().flatten() {
            let field_type = field.ty.innermost();
            match field_type.kind {
                TypeKind::Scalar | TypeKind::Enum => parts.push(field.name.clone()),
                TypeKind::Object | TypeKind::Interface => {
                    // Back-references to the parent break the walk entirely
                    if field.name == "parent" {
                        continue;
                    }
                    // Connection edges stay compact: scalar subfields only
                    if field.name == "edges" {
                        let scalars = self.scalar_fields(field_type);
                        if !scalars.is_empty() {
                            parts.push(format!("{} {{ {} }}", field.name, scalars.join(" ")));
                        }
                        continue;
                    }
                    let already_on_path = field_type
                        .name
                        .as_deref()
                        .is_some_and(|n| path.iter().any(|p| p.as_str() == n));
                    if already_on_path {
                        continue;
                    }
                    let nested = self.selection_for(&field.ty, depth + 1, path);
                    if !nested.is_empty() {
                        parts.push(format!("{} {{ {} }}", field.name, nested));
                    }
                }
                _ => {}
            }
        }
        path.pop();
        parts.join(" ")
    }

    fn scalar_fields(&self, ty: &TypeRef) -> Vec<String> {
        ty.name
            .as_deref()
            .and_then(|n| self.types.get(n))
            .and_then(|full| full.fields.as_ref())
            .map(|fields| {
                fields
                    .iter()
                    .filter(|f| {
                        matches!(f.ty.innermost().kind, TypeKind::Scalar | TypeKind::Enum)
                    })
                    .map(|f| f.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Flatten a `where` input-object graph into McpParams. `fields_path`
    /// carries the input field names traversed so far, `type_path` the input
    /// type names (the cycle guard); descent is bounded by the path depth.
    fn flatten_filter(
        &self,
        input_type: &FullType,
        fields_path: &[String],
        type_path: &mut Vec<String>,
        seen: &mut HashSet<String>,
        out: &mut Vec<McpParam>,
    ) {
        let enclosing = input_type.name.clone().unwrap_or_default();
        let operational = enclosing.contains("OperationFilterInput");
        for input_field in input_type.input_fields.iter().flatten() {
            if CONNECTORS.contains(&input_field.name.as_str()) {
                continue;
            }
            let innermost = input_field.ty.innermost();
            if innermost.kind == TypeKind::InputObject {
                let Some(nested) = innermost.name.as_deref().and_then(|n| self.types.get(n))
                else {
                    continue;
                };
                let nested_name = nested.name.clone().unwrap_or_default();
                if fields_path.len() >= self.path_depth
                    || type_path.iter().any(|t| t == &nested_name)
                {
                    continue;
                }
                let mut nested_fields_path = fields_path.to_vec();
                nested_fields_path.push(input_field.name.clone());
                type_path.push(nested_name);
                self.flatten_filter(nested, &nested_fields_path, type_path, seen, out);
                type_path.pop();
                continue;
            }

            let scalar = innermost.name.clone().unwrap_or_else(|| "String".into());
            let flat_name = if operational {
                fields_path.join("_")
            } else if fields_path.is_empty() {
                input_field.name.clone()
            } else {
                format!("{}_{}", fields_path.join("_"), input_field.name)
            };
            if flat_name.is_empty() || !seen.insert(flat_name.clone()) {
                continue;
            }
            let display_path = if operational {
                fields_path.join(" -> ")
            } else {
                let mut chain = fields_path.to_vec();
                chain.push(input_field.name.clone());
                chain.join(" -> ")
            };
            out.push(McpParam {
                name: flat_name,
                description: format!(
                    "Filter parameter with next hierarcy of fields \"{display_path}\" and type of \"{scalar}\""
                ),
                scalar,
                path: type_path.clone(),
                fields_path: fields_path.to_vec(),
                leaf: input_field.name.clone(),
            });
        }
    }
}

fn scalar_json_type(scalar: &str) -> &'static str {
    match scalar {
        "Int" => "integer",
        "Float" => "number",
        "Boolean" => "boolean",
        _ => "string",
    }
}
