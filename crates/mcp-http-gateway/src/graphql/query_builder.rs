//! Reconstruction of a GraphQL query from a flat parameter surface.
//!
//! The inverse of the compiler's `where` flattening: user-supplied flat
//! filter values are regrouped along their `fieldsPath` chains into a nested
//! `where` literal, pagination arguments render inline, and the precomputed
//! selection set completes the query.

use serde_json::{Map, Value};

use crate::tools::{GraphqlPlan, McpParam};

/// Build the full query string for one invocation. Preset parameters are
/// merged over the user inputs (preset wins) before reconstruction.
pub fn build_query(plan: &GraphqlPlan, inputs: &Map<String, Value>) -> String {
    let mut merged = inputs.clone();
    for (key, value) in &plan.preset_params {
        merged.insert(key.clone(), value.clone());
    }

    let selected: Vec<(&McpParam, &Value)> = plan
        .mcp_params
        .iter()
        .filter_map(|param| merged.get(&param.name).map(|value| (param, value)))
        .collect();
    let where_literal = build_where(&selected);

    let mut arguments = Vec::new();
    if !where_literal.is_empty() {
        arguments.push(format!("where: {where_literal}"));
    }
    for param in &plan.pagination_args {
        if let Some(value) = merged.get(&param.name) {
            arguments.push(format!("{}: {}", param.name, render_scalar(param, value)));
        }
    }

    let argument_segment = if arguments.is_empty() {
        String::new()
    } else {
        format!(" ({})", arguments.join(" "))
    };
    let selection_segment = if plan.selection_set.is_empty() {
        String::new()
    } else {
        format!(" {{ {} }}", plan.selection_set)
    };
    format!(
        "query Get_{root} {{ {root}{argument_segment}{selection_segment} }}",
        root = plan.root_field
    )
}

/// Rebuild the nested `where` literal from the selected flat parameters.
/// Parameters sharing a `fieldsPath` prefix descend together; sibling groups
/// join with `, ` inside one object literal.
pub fn build_where(selected: &[(&McpParam, &Value)]) -> String {
    if selected.is_empty() {
        return String::new();
    }
    build_object(selected, 0)
}

fn build_object(params: &[(&McpParam, &Value)], level: usize) -> String {
    let mut entries: Vec<String> = Vec::new();
    let mut groups: Vec<(&String, Vec<(&McpParam, &Value)>)> = Vec::new();
    for (param, value) in params.iter().copied() {
        match param.fields_path.get(level) {
            // fieldsPath exhausted: this parameter terminates here
            None => entries.push(terminal_entry(param, value)),
            Some(next) => match groups.iter_mut().find(|(key, _)| *key == next) {
                Some((_, group)) => group.push((param, value)),
                None => groups.push((next, vec![(param, value)])),
            },
        }
    }
    for (key, group) in groups {
        entries.push(format!("{key}: {}", build_object(&group, level + 1)));
    }
    format!("{{ {} }}", entries.join(", "))
}

fn terminal_entry(param: &McpParam, value: &Value) -> String {
    if param.is_operational() {
        format!("eq: {}", render_scalar(param, value))
    } else {
        format!("{}: {}", param.leaf, render_scalar(param, value))
    }
}

/// Numeric and boolean kinds render unquoted; everything else renders as a
/// double-quoted (JSON-escaped) string.
fn render_scalar(param: &McpParam, value: &Value) -> String {
    match param.scalar.as_str() {
        "Int" | "Float" | "Boolean" => match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
        _ => match value {
            Value::Number(n) => Value::String(n.to_string()).to_string(),
            Value::Bool(b) => Value::String(b.to_string()).to_string(),
            other => other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphql::compiler::tests::compile_test_schema;
    use crate::tools::Plan;
    use serde_json::json;

    fn users_plan() -> GraphqlPlan {
        let tools = compile_test_schema(Map::new());
        let Plan::Graphql(plan) = tools.into_iter().next().expect("users tool").plan else {
            panic!("expected a GraphQL plan");
        };
        plan
    }

    fn inputs(value: Value) -> Map<String, Value> {
        value.as_object().expect("object inputs").clone()
    }

    #[test]
    fn flat_filter_rebuilds_an_eq_branch() {
        let query = build_query(&users_plan(), &inputs(json!({"name": "Ada"})));
        insta::assert_snapshot!(
            query,
            @r#"query Get_users { users (where: { name: { eq: "Ada" } }) { id name status address { city } edges { cursor } } }"#
        );
    }

    #[test]
    fn sibling_branches_join_with_commas() {
        let query = build_query(&users_plan(), &inputs(json!({"name": "Ada", "age": 30})));
        assert!(query.contains("where: { name: { eq: \"Ada\" }, age: { eq: 30 } }"));
    }

    #[test]
    fn shared_prefixes_descend_together() {
        let plan = users_plan();
        let query = build_query(
            &plan,
            &inputs(json!({"address_city": "Paris", "address_geo_lat": 48.85})),
        );
        assert!(query.contains("where: { address: { city: \"Paris\", geo: { lat: 48.85 } } }"));
    }

    #[test]
    fn first_level_scalars_render_directly() {
        let query = build_query(&users_plan(), &inputs(json!({"isActive": true})));
        assert!(query.contains("where: { isActive: true }"));
    }

    #[test]
    fn pagination_args_render_inline_after_where() {
        let query = build_query(
            &users_plan(),
            &inputs(json!({"name": "Ada", "first": 10, "after": "abc"})),
        );
        assert!(query.contains(
            "users (where: { name: { eq: \"Ada\" } } first: 10 after: \"abc\")"
        ));
    }

    #[test]
    fn no_arguments_means_no_parentheses() {
        let query = build_query(&users_plan(), &Map::new());
        assert_eq!(
            query,
            "query Get_users { users { id name status address { city } edges { cursor } } }"
        );
    }

    #[test]
    fn preset_params_are_injected_and_win_over_user_input() {
        let mut preset = Map::new();
        preset.insert("tenantId".to_string(), json!("t1"));
        let tools = compile_test_schema(preset);
        let Plan::Graphql(plan) = tools.into_iter().next().expect("users tool").plan else {
            panic!("expected a GraphQL plan");
        };
        let query = build_query(&plan, &inputs(json!({"name": "Ada", "tenantId": "evil"})));
        assert!(query.contains("tenantId: { eq: \"t1\" }"));
        assert!(!query.contains("evil"));
    }

    #[test]
    fn string_values_are_json_escaped() {
        let query = build_query(&users_plan(), &inputs(json!({"name": "A\"da"})));
        assert!(query.contains("eq: \"A\\\"da\""));
    }

    #[test]
    fn reconstructed_queries_parse_as_graphql() {
        let cases = [
            json!({"name": "Ada"}),
            json!({"name": "Ada", "age": 30}),
            json!({"address_city": "Paris", "address_geo_lat": 48.85, "isActive": false}),
            json!({"name": "Ada", "first": 10, "after": "abc"}),
            json!({}),
        ];
        let plan = users_plan();
        for case in cases {
            let query = build_query(&plan, &inputs(case));
            apollo_compiler::parser::Parser::new()
                .parse_ast(&query, "reconstructed.graphql")
                .unwrap_or_else(|e| panic!("query {query} failed to parse: {e}"));
        }
    }
}
