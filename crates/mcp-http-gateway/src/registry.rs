//! Per-session tool registries and the process-wide session map.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;
use std::time::SystemTime;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::model::Tool;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::ServerError;
use crate::filter::OperationFilter;
use crate::graphql::compiler::{GraphqlContext, compile as compile_graphql};
use crate::openapi::OpenApiCompiler;
use crate::server_config::{GatewayConfig, SpecType};
use crate::spec_loader::SpecLoader;
use crate::tools::ToolDescriptor;

/// The tools of one session. Read-only after compilation, so concurrent
/// invocations share it freely.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        let index = tools
            .iter()
            .enumerate()
            .map(|(i, d)| (d.tool.name.to_string(), i))
            .collect();
        Self { tools, index }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).and_then(|i| self.tools.get(*i))
    }

    pub fn tool_list(&self) -> Vec<Tool> {
        self.tools.iter().map(|d| d.tool.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Compile the configured spec into a session registry. Called once per
/// session; the session headers participate both in fetching the spec and,
/// later, in every upstream call.
pub async fn compile_tools(
    config: &GatewayConfig,
    client: &reqwest::Client,
    session_headers: &HeaderMap,
) -> Result<ToolRegistry, ServerError> {
    let filter =
        OperationFilter::from_config(config.whitelist.as_deref(), config.blacklist.as_deref());
    let mut loading_headers = parse_headers(&config.custom_headers)?;
    for (name, value) in session_headers {
        loading_headers.insert(name.clone(), value.clone());
    }
    let loader = SpecLoader::new(client, &loading_headers);

    let descriptors = match config.spec_type {
        SpecType::Openapi => {
            let location = config.spec.as_deref().ok_or(ServerError::NoSpec)?;
            let base_url = config.target_url.as_ref().ok_or(ServerError::NoTargetUrl)?;
            let doc = loader.load_openapi(location, &config.overlay_list()).await?;
            let headers = plan_headers(config, Some(&doc))?;
            let compiler = OpenApiCompiler {
                session_description: &config.description,
                filter: &filter,
                base_url,
                headers: &headers,
            };
            compiler.compile(&doc)?
        }
        SpecType::Graphql => {
            let endpoint = config.target_url.as_ref().ok_or(ServerError::NoTargetUrl)?;
            let location = config
                .spec
                .clone()
                .unwrap_or_else(|| endpoint.as_str().to_string());
            let schema = loader.load_introspection(&location).await?;
            let headers = plan_headers(config, None)?;
            let ctx = GraphqlContext {
                session_description: &config.description,
                filter: &filter,
                endpoint,
                headers: &headers,
                preset_params: &config.preset_params,
                path_depth: config.path_depth,
            };
            compile_graphql(&schema, &ctx)?
        }
    };
    debug!("Session registry holds {} tools", descriptors.len());
    Ok(ToolRegistry::new(descriptors))
}

/// The static header set recorded in every plan: custom headers, preset
/// auth, and the gateway marker.
fn plan_headers(config: &GatewayConfig, doc: Option<&Value>) -> Result<HeaderMap, ServerError> {
    let mut headers = parse_headers(&config.custom_headers)?;
    if let Some((name, value)) = auth_header(config, doc)? {
        headers.insert(name, value);
    }
    if !config.disable_x_mcp {
        headers.insert(
            HeaderName::from_static("x-mcp"),
            HeaderValue::from_static("1"),
        );
    }
    Ok(headers)
}

/// Preset auth: the named security scheme (resolved against the document's
/// `securitySchemes`) wins over the bare `apiKey` bearer credential.
fn auth_header(
    config: &GatewayConfig,
    doc: Option<&Value>,
) -> Result<Option<(HeaderName, HeaderValue)>, ServerError> {
    if let Some(scheme_name) = config.security_scheme_name.as_deref()
        && let Some(credential) = config.security_credentials.get(scheme_name)
    {
        let scheme = doc
            .and_then(|d| d.get("components"))
            .and_then(|c| c.get("securitySchemes"))
            .and_then(|s| s.get(scheme_name));
        if let Some(scheme) = scheme {
            let scheme_type = scheme.get("type").and_then(Value::as_str);
            if scheme_type == Some("apiKey")
                && scheme.get("in").and_then(Value::as_str) == Some("header")
                && let Some(header_name) = scheme.get("name").and_then(Value::as_str)
            {
                return Ok(Some((
                    HeaderName::from_str(header_name)?,
                    HeaderValue::from_str(credential)?,
                )));
            }
            if scheme_type == Some("http")
                && scheme.get("scheme").and_then(Value::as_str) == Some("basic")
            {
                return Ok(Some((
                    reqwest::header::AUTHORIZATION,
                    HeaderValue::from_str(&format!("Basic {credential}"))?,
                )));
            }
        }
        return Ok(Some((
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {credential}"))?,
        )));
    }
    if let Some(api_key) = config.api_key.as_deref() {
        return Ok(Some((
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))?,
        )));
    }
    Ok(None)
}

fn parse_headers(headers: &HashMap<String, String>) -> Result<HeaderMap, ServerError> {
    let mut parsed = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        parsed.insert(HeaderName::from_str(name)?, HeaderValue::from_str(value)?);
    }
    Ok(parsed)
}

/// The only process-wide mutable state: the map of live sessions, guarded
/// for single-writer many-reader access. Owned by the server entrypoint and
/// passed by parameter.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionInfo>>,
}

#[derive(Debug)]
struct SessionInfo {
    #[allow(dead_code)]
    created_at: SystemTime,
    cancellation: CancellationToken,
}

impl SessionRegistry {
    pub fn register(&self, session_id: Uuid, cancellation: CancellationToken) {
        let count = {
            let mut sessions = match self.sessions.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            sessions.insert(
                session_id,
                SessionInfo {
                    created_at: SystemTime::now(),
                    cancellation,
                },
            );
            sessions.len()
        };
        info!(%session_id, sessions = count, "Session started");
    }

    /// Remove a session and abort its in-flight upstream requests.
    pub fn deregister(&self, session_id: &Uuid) {
        let removed = {
            let mut sessions = match self.sessions.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            sessions.remove(session_id)
        };
        if let Some(session) = removed {
            session.cancellation.cancel();
            info!(%session_id, "Session closed");
        }
    }

    pub fn len(&self) -> usize {
        match self.sessions.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
