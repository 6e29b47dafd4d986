//! Tool invocation: bind inputs, assemble the upstream request, execute it,
//! and map the response into a tool result or a typed error.
//!
//! Every upstream failure is mapped here; no transport- or HTTP-level error
//! type escapes past this boundary, and a failed invocation never takes the
//! session down.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::model::{CallToolResult, Content, ErrorCode};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::errors::McpError;
use crate::graphql::query_builder;
use crate::tools::{GraphqlPlan, ParamLocation, Plan, RestPlan, ToolDescriptor};

/// Characters escaped when a value is substituted into a path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'%')
    .add(b'/');

pub struct Invocation<'a> {
    pub inputs: Map<String, Value>,
    /// Dynamic headers captured from the inbound MCP request, layered over
    /// the plan's static headers.
    pub session_headers: HeaderMap,
    pub client: &'a reqwest::Client,
    pub cancellation: &'a CancellationToken,
}

pub async fn invoke(
    descriptor: &ToolDescriptor,
    invocation: Invocation<'_>,
) -> Result<CallToolResult, McpError> {
    let mut request_id = Uuid::new_v4().simple().to_string();
    request_id.truncate(8);
    let tool = descriptor.tool.name.as_ref();
    info!(%request_id, %tool, "Invoking tool");

    let result = match &descriptor.plan {
        Plan::Rest(plan) => invoke_rest(plan, &invocation, &request_id).await,
        Plan::Graphql(plan) => invoke_graphql(plan, &invocation, &request_id).await,
    };
    match &result {
        Ok(outcome) => info!(
            %request_id,
            %tool,
            is_error = outcome.is_error.unwrap_or(false),
            "Upstream call completed"
        ),
        Err(error) => warn!(%request_id, %tool, "Upstream call failed: {error}"),
    }
    result
}

async fn invoke_rest(
    plan: &RestPlan,
    invocation: &Invocation<'_>,
    request_id: &str,
) -> Result<CallToolResult, McpError> {
    let url = build_url(plan, &invocation.inputs)?;
    let headers = build_headers(plan, invocation)?;
    debug!(%request_id, method = %plan.method, %url, "Assembled upstream request");

    let method = reqwest::Method::from_bytes(plan.method.as_bytes())
        .map_err(|_| internal(format!("invalid HTTP method {}", plan.method), None))?;
    let mut request = invocation.client.request(method, url).headers(headers);
    if let Some(body) = build_body(plan, &invocation.inputs) {
        request = request.json(&body);
    }

    let response = execute(request, invocation.cancellation).await?;
    let status = response.status();
    let body_text = response
        .text()
        .await
        .map_err(|e| internal(format!("Failed to read upstream response body: {e}"), None))?;
    if status.is_success() || status.is_redirection() {
        Ok(CallToolResult::success(vec![Content::text(body_text)]))
    } else {
        Err(status_error(status, body_text))
    }
}

async fn invoke_graphql(
    plan: &GraphqlPlan,
    invocation: &Invocation<'_>,
    request_id: &str,
) -> Result<CallToolResult, McpError> {
    let query = query_builder::build_query(plan, &invocation.inputs);
    debug!(%request_id, %query, "Reconstructed GraphQL query");

    let mut headers = plan.headers.clone();
    for (name, value) in &invocation.session_headers {
        headers.insert(name.clone(), value.clone());
    }
    let request = invocation
        .client
        .post(plan.endpoint.clone())
        .headers(headers)
        .json(&serde_json::json!({ "query": query }));

    let response = execute(request, invocation.cancellation).await?;
    let status = response.status();
    if !(status.is_success() || status.is_redirection()) {
        let body_text = response.text().await.unwrap_or_default();
        return Err(status_error(status, body_text));
    }
    let body: Value = response
        .json()
        .await
        .map_err(|e| internal(format!("Failed to read GraphQL response body: {e}"), None))?;

    let has_errors = body
        .get("errors")
        .is_some_and(|errors| !errors.is_null());
    let data = body.get("data").filter(|data| !data.is_null());
    let text = match data {
        Some(data) => serde_json::to_string(data),
        None => serde_json::to_string(&body),
    }
    .map_err(|e| internal(format!("Unserializable GraphQL response: {e}"), None))?;

    // A response with errors still surfaces its data; only a null data
    // payload marks the result as an error.
    if has_errors && data.is_none() {
        Ok(CallToolResult::error(vec![Content::text(text)]))
    } else {
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

fn build_url(plan: &RestPlan, inputs: &Map<String, Value>) -> Result<Url, McpError> {
    let mut path = plan.path_template.clone();
    for parameter in &plan.parameters {
        if parameter.location != ParamLocation::Path {
            continue;
        }
        let placeholder = format!("{{{}}}", parameter.name);
        match inputs.get(&parameter.name) {
            Some(value) => {
                let encoded =
                    utf8_percent_encode(&scalar_string(value), PATH_SEGMENT).to_string();
                path = path.replace(&placeholder, &encoded);
            }
            None if parameter.required => {
                return Err(invalid_params(format!(
                    "Missing required parameter: {}",
                    parameter.name
                )));
            }
            None => {}
        }
    }

    let base = plan.base_url.as_str().trim_end_matches('/');
    let mut url = Url::parse(&format!("{base}{path}"))
        .map_err(|e| internal(format!("Invalid upstream URL: {e}"), None))?;

    {
        let mut query_pairs = url.query_pairs_mut();
        for parameter in &plan.parameters {
            if parameter.location != ParamLocation::Query {
                continue;
            }
            match inputs.get(&parameter.name) {
                // Arrays serialize as repeated keys
                Some(Value::Array(items)) => {
                    for item in items {
                        query_pairs.append_pair(&parameter.name, &scalar_string(item));
                    }
                }
                Some(value) => {
                    query_pairs.append_pair(&parameter.name, &scalar_string(value));
                }
                None if parameter.required => {
                    return Err(invalid_params(format!(
                        "Missing required parameter: {}",
                        parameter.name
                    )));
                }
                None => {}
            }
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url)
}

fn build_headers(plan: &RestPlan, invocation: &Invocation<'_>) -> Result<HeaderMap, McpError> {
    let mut headers = plan.headers.clone();
    for (name, value) in &invocation.session_headers {
        headers.insert(name.clone(), value.clone());
    }
    let mut cookies = Vec::new();
    for parameter in &plan.parameters {
        let Some(value) = invocation.inputs.get(&parameter.name) else {
            if parameter.required
                && matches!(
                    parameter.location,
                    ParamLocation::Header | ParamLocation::Cookie
                )
            {
                return Err(invalid_params(format!(
                    "Missing required parameter: {}",
                    parameter.name
                )));
            }
            continue;
        };
        match parameter.location {
            ParamLocation::Header => {
                let name = HeaderName::from_bytes(parameter.name.as_bytes())
                    .map_err(|e| invalid_params(format!("Invalid header name: {e}")))?;
                let value = HeaderValue::from_str(&scalar_string(value))
                    .map_err(|e| invalid_params(format!("Invalid header value: {e}")))?;
                headers.insert(name, value);
            }
            ParamLocation::Cookie => {
                cookies.push(format!("{}={}", parameter.name, scalar_string(value)));
            }
            _ => {}
        }
    }
    if !cookies.is_empty() {
        let value = HeaderValue::from_str(&cookies.join("; "))
            .map_err(|e| invalid_params(format!("Invalid cookie value: {e}")))?;
        headers.insert(reqwest::header::COOKIE, value);
    }
    Ok(headers)
}

fn build_body(plan: &RestPlan, inputs: &Map<String, Value>) -> Option<Value> {
    if !plan.has_request_body {
        return None;
    }
    // An explicit requestBody input wins; otherwise the body is assembled
    // from the hoisted top-level properties the user provided.
    if let Some(body) = inputs.get("requestBody") {
        return Some(body.clone());
    }
    let hoisted: Map<String, Value> = plan
        .body_properties
        .iter()
        .filter_map(|name| inputs.get(name).map(|v| (name.clone(), v.clone())))
        .collect();
    if hoisted.is_empty() {
        None
    } else {
        Some(Value::Object(hoisted))
    }
}

async fn execute(
    request: reqwest::RequestBuilder,
    cancellation: &CancellationToken,
) -> Result<reqwest::Response, McpError> {
    tokio::select! {
        _ = cancellation.cancelled() => Err(internal("Invocation cancelled".to_string(), None)),
        result = request.send() => result.map_err(|e| {
            if e.is_timeout() {
                internal(format!("Upstream request timed out: {e}"), None)
            } else {
                internal(format!("Failed to send upstream request: {e}"), None)
            }
        }),
    }
}

fn status_error(status: reqwest::StatusCode, body: String) -> McpError {
    let data = Some(serde_json::json!({
        "status": status.as_u16(),
        "body": body,
    }));
    match status.as_u16() {
        400 | 404 => McpError::new(
            ErrorCode::INVALID_PARAMS,
            format!("Upstream rejected the request with status {status}"),
            data,
        ),
        401 | 403 => internal(
            format!("Upstream authentication failed with status {status}"),
            data,
        ),
        _ => internal(format!("Upstream returned status {status}"), data),
    }
}

fn invalid_params(message: String) -> McpError {
    McpError::new(ErrorCode::INVALID_PARAMS, message, None)
}

fn internal(message: String, data: Option<Value>) -> McpError {
    McpError::new(ErrorCode::INTERNAL_ERROR, message, data)
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
