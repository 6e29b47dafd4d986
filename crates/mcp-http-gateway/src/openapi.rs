//! OpenAPI compilation: one tool descriptor per retained operation.

use reqwest::header::HeaderMap;
use rmcp::model::{Tool, ToolAnnotations};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};
use url::Url;

use crate::errors::SpecError;
use crate::filter::OperationFilter;
use crate::tools::{
    NameAllocator, ParamLocation, Plan, RestParameter, RestPlan, ToolDescriptor, input_schema,
    tool_description,
};

const METHODS: [&str; 7] = ["get", "post", "put", "patch", "delete", "head", "options"];

pub struct OpenApiCompiler<'a> {
    pub session_description: &'a str,
    pub filter: &'a OperationFilter,
    pub base_url: &'a Url,
    pub headers: &'a HeaderMap,
}

impl OpenApiCompiler<'_> {
    /// Walk every path/method pair of a dereferenced document and compile the
    /// retained operations. Individually unmappable operations are logged and
    /// skipped.
    pub fn compile(&self, doc: &Value) -> Result<Vec<ToolDescriptor>, SpecError> {
        let paths = doc
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| SpecError::Invalid("OpenAPI document has no paths object".into()))?;

        let mut names = NameAllocator::default();
        let mut descriptors = Vec::new();
        for (path, item) in paths {
            let Some(item) = item.as_object() else {
                continue;
            };
            for method in METHODS {
                let Some(operation) = item.get(method).and_then(Value::as_object) else {
                    continue;
                };
                match self.compile_operation(path, item, method, operation, &mut names) {
                    Ok(Some(descriptor)) => descriptors.push(descriptor),
                    Ok(None) => {}
                    Err(error) => {
                        warn!(%path, %method, "Skipping unmappable operation: {error}");
                    }
                }
            }
        }
        debug!("Compiled {} OpenAPI tools", descriptors.len());
        Ok(descriptors)
    }

    fn compile_operation(
        &self,
        path: &str,
        item: &Map<String, Value>,
        method: &str,
        operation: &Map<String, Value>,
        names: &mut NameAllocator,
    ) -> Result<Option<ToolDescriptor>, SpecError> {
        let method_upper = method.to_ascii_uppercase();
        let operation_id = operation
            .get("operationId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| synthesize_operation_id(&method_upper, path));

        if !self
            .filter
            .retains_operation(&operation_id, &method_upper, path)
        {
            debug!(%operation_id, "Operation filtered out");
            return Ok(None);
        }

        // Operation-level x-mcp wins over the path-level one
        let x_mcp = operation
            .get("x-mcp")
            .or_else(|| item.get("x-mcp"))
            .and_then(Value::as_object);
        let base_name = x_mcp
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .unwrap_or(&operation_id);
        let resolved_description = x_mcp
            .and_then(|m| m.get("description"))
            .and_then(Value::as_str)
            .or_else(|| operation.get("description").and_then(Value::as_str))
            .or_else(|| operation.get("summary").and_then(Value::as_str))
            .or_else(|| item.get("summary").and_then(Value::as_str))
            .unwrap_or_default();

        let mut properties = Map::new();
        let mut required = Vec::new();
        let mut parameters = Vec::new();
        for parameter in merged_parameters(item, operation) {
            let Some(name) = parameter.get("name").and_then(Value::as_str) else {
                return Err(SpecError::Invalid("parameter without a name".into()));
            };
            let Some(location) = parameter
                .get("in")
                .and_then(Value::as_str)
                .and_then(ParamLocation::parse)
            else {
                return Err(SpecError::Invalid(format!(
                    "parameter {name} has an unknown location"
                )));
            };
            let is_required = location == ParamLocation::Path
                || parameter
                    .get("required")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
            let description = parameter
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Parameter: {name}"));
            properties.insert(
                name.to_string(),
                property_schema(parameter.get("schema"), description),
            );
            if is_required {
                required.push(name.to_string());
            }
            parameters.push(RestParameter {
                name: name.to_string(),
                location,
                required: is_required,
                style: parameter
                    .get("style")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }

        let body_schema = operation
            .get("requestBody")
            .and_then(|b| b.pointer("/content/application~1json/schema"));
        let has_request_body = operation.get("requestBody").is_some();
        let mut body_properties = Vec::new();
        if has_request_body {
            properties.insert(
                "requestBody".to_string(),
                request_body_property(body_schema, &mut body_properties),
            );
            if operation
                .get("requestBody")
                .and_then(|b| b.get("required"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
            {
                required.push("requestBody".to_string());
            }
        }

        let name = names.assign(base_name);
        let tool = Tool::new(
            name,
            tool_description(self.session_description, resolved_description),
            input_schema(properties, required),
        )
        .annotate(ToolAnnotations::new().read_only(matches!(method, "get" | "head" | "options")));

        Ok(Some(ToolDescriptor {
            tool,
            plan: Plan::Rest(RestPlan {
                method: method_upper,
                path_template: path.to_string(),
                base_url: self.base_url.clone(),
                parameters,
                body_properties,
                has_request_body,
                headers: self.headers.clone(),
            }),
        }))
    }
}

/// Path-item parameters apply to every operation under the path; an
/// operation parameter with the same name and location overrides them.
fn merged_parameters<'a>(
    item: &'a Map<String, Value>,
    operation: &'a Map<String, Value>,
) -> Vec<&'a Map<String, Value>> {
    let op_params: Vec<&Map<String, Value>> = parameter_list(operation);
    let mut merged: Vec<&Map<String, Value>> = parameter_list(item)
        .into_iter()
        .filter(|p| {
            !op_params.iter().any(|o| {
                o.get("name") == p.get("name") && o.get("in") == p.get("in")
            })
        })
        .collect();
    merged.extend(op_params);
    merged
}

fn parameter_list(node: &Map<String, Value>) -> Vec<&Map<String, Value>> {
    node.get("parameters")
        .and_then(Value::as_array)
        .map(|params| params.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default()
}

fn synthesize_operation_id(method: &str, path: &str) -> String {
    format!(
        "{method}_{}",
        path.trim_start_matches('/')
            .replace('/', "_")
            .replace(['{', '}'], "")
    )
}

/// Map a JSON schema to a protocol-level primitive. Unknown and missing
/// types degrade to string.
fn property_schema(schema: Option<&Value>, description: String) -> Value {
    let schema_type = schema
        .and_then(|s| s.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("string");
    match schema_type {
        "integer" => json!({"type": "integer", "description": description}),
        "number" => json!({"type": "number", "description": description}),
        "boolean" => json!({"type": "boolean", "description": description}),
        "object" => {
            json!({"type": "object", "additionalProperties": true, "description": description})
        }
        "array" => json!({"type": "array", "items": {}, "description": description}),
        _ => json!({"type": "string", "description": description}),
    }
}

/// The synthetic `requestBody` property hoists the body object's own
/// properties one level; non-object bodies degrade to a permissive object.
fn request_body_property(schema: Option<&Value>, body_properties: &mut Vec<String>) -> Value {
    let Some(props) = schema
        .and_then(|s| s.get("properties"))
        .and_then(Value::as_object)
    else {
        return json!({"type": "object", "additionalProperties": true, "description": "Request body"});
    };
    let mut hoisted = Map::new();
    for (prop_name, prop_schema) in props {
        body_properties.push(prop_name.clone());
        let description = prop_schema
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Parameter: {prop_name}"));
        hoisted.insert(
            prop_name.clone(),
            property_schema(Some(prop_schema), description),
        );
    }
    let mut body = Map::new();
    body.insert("type".to_string(), json!("object"));
    body.insert("properties".to_string(), Value::Object(hoisted));
    if let Some(required) = schema
        .and_then(|s| s.get("required"))
        .and_then(Value::as_array)
    {
        body.insert("required".to_string(), Value::Array(required.clone()));
    }
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(doc: Value) -> Vec<ToolDescriptor> {
        compile_with_filter(doc, OperationFilter::default())
    }

    fn compile_with_filter(doc: Value, filter: OperationFilter) -> Vec<ToolDescriptor> {
        let base_url = Url::parse("http://upstream.test").unwrap();
        let headers = HeaderMap::new();
        let compiler = OpenApiCompiler {
            session_description: "Petstore gateway",
            filter: &filter,
            base_url: &base_url,
            headers: &headers,
        };
        compiler.compile(&doc).unwrap()
    }

    fn petstore() -> Value {
        json!({
            "openapi": "3.0.0",
            "paths": {
                "/pets": {
                    "get": {"operationId": "listPets", "summary": "List pets"},
                    "post": {
                        "operationId": "createPet",
                        "requestBody": {
                            "required": true,
                            "content": {"application/json": {"schema": {
                                "type": "object",
                                "properties": {
                                    "name": {"type": "string"},
                                    "age": {"type": "integer"}
                                },
                                "required": ["name"]
                            }}}
                        }
                    }
                },
                "/pets/{id}": {
                    "get": {
                        "operationId": "getPet",
                        "description": "Fetch one pet",
                        "parameters": [
                            {"name": "id", "in": "path", "required": true, "schema": {"type": "integer"}}
                        ]
                    },
                    "delete": {
                        "operationId": "deletePet",
                        "parameters": [
                            {"name": "id", "in": "path", "required": true, "schema": {"type": "integer"}}
                        ]
                    }
                }
            }
        })
    }

    fn tool_names(descriptors: &[ToolDescriptor]) -> Vec<&str> {
        descriptors.iter().map(|d| d.tool.name.as_ref()).collect()
    }

    #[test]
    fn compiles_one_tool_per_operation() {
        let tools = compile(petstore());
        let mut names = tool_names(&tools);
        names.sort();
        assert_eq!(names, vec!["createPet", "deletePet", "getPet", "listPets"]);
    }

    #[test]
    fn path_parameter_schema_and_description_prefix() {
        let tools = compile(petstore());
        let get_pet = tools
            .iter()
            .find(|d| d.tool.name == "getPet")
            .expect("getPet tool");
        assert_eq!(
            get_pet.tool.description.as_deref(),
            Some("MCP description: Petstore gateway. Tool description: Fetch one pet")
        );
        let schema = serde_json::to_value(get_pet.tool.input_schema.as_ref()).unwrap();
        assert_eq!(schema.pointer("/properties/id/type"), Some(&json!("integer")));
        assert_eq!(schema.pointer("/required/0"), Some(&json!("id")));
    }

    #[test]
    fn request_body_properties_are_hoisted() {
        let tools = compile(petstore());
        let create = tools.iter().find(|d| d.tool.name == "createPet").unwrap();
        let schema = serde_json::to_value(create.tool.input_schema.as_ref()).unwrap();
        assert_eq!(
            schema.pointer("/properties/requestBody/properties/name/type"),
            Some(&json!("string"))
        );
        assert_eq!(
            schema.pointer("/properties/requestBody/required/0"),
            Some(&json!("name"))
        );
        assert_eq!(schema.pointer("/required/0"), Some(&json!("requestBody")));
        let Plan::Rest(plan) = &create.plan else {
            panic!("expected a REST plan");
        };
        assert!(plan.has_request_body);
        let mut body_properties = plan.body_properties.clone();
        body_properties.sort();
        assert_eq!(body_properties, vec!["age", "name"]);
    }

    #[test]
    fn blacklist_glob_removes_matches() {
        let filter = OperationFilter::new(&[], &["delete*".to_string()]);
        let tools = compile_with_filter(petstore(), filter);
        let mut names = tool_names(&tools);
        names.sort();
        assert_eq!(names, vec!["createPet", "getPet", "listPets"]);
    }

    #[test]
    fn x_mcp_override_renames_tool() {
        let mut doc = petstore();
        crate::spec_loader::overlay::deep_merge(
            doc.pointer_mut("/paths/~1pets/get").unwrap(),
            &json!({"x-mcp": {"name": "pets_list"}}),
        );
        let tools = compile(doc);
        assert!(tool_names(&tools).contains(&"pets_list"));
        assert!(!tool_names(&tools).contains(&"listPets"));
    }

    #[test]
    fn missing_operation_id_is_synthesized() {
        let doc = json!({"paths": {"/pets/{id}/owner": {"get": {}}}});
        let tools = compile(doc);
        assert_eq!(tool_names(&tools), vec!["GET_pets_id_owner"]);
    }

    #[test]
    fn duplicate_names_are_suffixed_in_discovery_order() {
        let doc = json!({
            "paths": {
                "/a": {"get": {"operationId": "op"}},
                "/b": {"get": {"operationId": "op"}},
                "/c": {"get": {"operationId": "op"}}
            }
        });
        let tools = compile(doc);
        assert_eq!(tool_names(&tools), vec!["op", "op_2", "op_3"]);
    }

    #[test]
    fn description_prefix_is_idempotent_across_compilations() {
        let first: Vec<String> = compile(petstore())
            .iter()
            .filter_map(|d| d.tool.description.as_deref().map(str::to_string))
            .collect();
        let second: Vec<String> = compile(petstore())
            .iter()
            .filter_map(|d| d.tool.description.as_deref().map(str::to_string))
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn path_item_parameters_apply_to_all_operations() {
        let doc = json!({
            "paths": {
                "/pets/{id}": {
                    "parameters": [
                        {"name": "id", "in": "path", "required": true, "schema": {"type": "integer"}}
                    ],
                    "get": {"operationId": "getPet"}
                }
            }
        });
        let tools = compile(doc);
        let schema = serde_json::to_value(tools[0].tool.input_schema.as_ref()).unwrap();
        assert_eq!(schema.pointer("/properties/id/type"), Some(&json!("integer")));
    }

    #[test]
    fn document_without_paths_is_invalid() {
        let base_url = Url::parse("http://upstream.test").unwrap();
        let headers = HeaderMap::new();
        let compiler = OpenApiCompiler {
            session_description: "",
            filter: &OperationFilter::default(),
            base_url: &base_url,
            headers: &headers,
        };
        assert!(matches!(
            compiler.compile(&json!({"openapi": "3.0.0"})),
            Err(SpecError::Invalid(_))
        ));
    }
}
