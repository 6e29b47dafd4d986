//! The MCP protocol surface of one session.
//!
//! The serving layer constructs one handler per session; its state is shared
//! with nothing but the process-wide configuration and session map. Tools
//! are compiled lazily on the first request that needs them, because the
//! spec fetch may depend on credentials captured from the inbound request.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ErrorCode, Implementation, InitializeRequestParam,
    InitializeResult, ListToolsResult, PaginatedRequestParam, ServerCapabilities, ServerInfo,
};
use rmcp::service::RequestContext;
use rmcp::{RoleServer, ServerHandler};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::dispatch::{self, Invocation};
use crate::errors::{McpError, ServerError};
use crate::forward_headers::ForwardHeaders;
use crate::registry::{SessionRegistry, ToolRegistry, compile_tools};
use crate::server_config::GatewayConfig;

/// Process-wide state, owned by the server entrypoint and handed to every
/// session by parameter.
pub struct SharedState {
    pub config: GatewayConfig,
    pub client: reqwest::Client,
    pub sessions: SessionRegistry,
    pub cancellation: CancellationToken,
}

impl SharedState {
    pub fn new(config: GatewayConfig, cancellation: CancellationToken) -> Result<Self, ServerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ServerError::HttpClient)?;
        Ok(Self {
            config,
            client,
            sessions: SessionRegistry::default(),
            cancellation,
        })
    }
}

#[derive(Clone)]
pub struct GatewayHandler(Arc<GatewaySession>);

struct GatewaySession {
    shared: Arc<SharedState>,
    session_id: Uuid,
    cancellation: CancellationToken,
    registry: RwLock<Option<Arc<ToolRegistry>>>,
    /// Forwardable headers captured when the session initialized
    session_headers: RwLock<HeaderMap>,
}

impl GatewayHandler {
    pub fn new(shared: Arc<SharedState>) -> Self {
        let session_id = Uuid::new_v4();
        let cancellation = shared.cancellation.child_token();
        shared.sessions.register(session_id, cancellation.clone());
        Self(Arc::new(GatewaySession {
            shared,
            session_id,
            cancellation,
            registry: RwLock::new(None),
            session_headers: RwLock::new(HeaderMap::new()),
        }))
    }

    /// Compile the spec on first use and cache the result for the session's
    /// lifetime.
    async fn ensure_registry(&self, headers: &HeaderMap) -> Result<Arc<ToolRegistry>, McpError> {
        if let Some(registry) = self.0.registry.read().await.as_ref() {
            return Ok(registry.clone());
        }
        let mut guard = self.0.registry.write().await;
        if let Some(registry) = guard.as_ref() {
            return Ok(registry.clone());
        }
        let registry = compile_tools(&self.0.shared.config, &self.0.shared.client, headers)
            .await
            .map_err(|error| {
                error!("Failed to materialize tools: {error}");
                McpError::new(
                    ErrorCode::INTERNAL_ERROR,
                    format!("Failed to materialize tools: {error}"),
                    None,
                )
            })?;
        let registry = Arc::new(registry);
        *guard = Some(registry.clone());
        info!(
            session_id = %self.0.session_id,
            tools = registry.len(),
            "Materialized session tools"
        );
        Ok(registry)
    }

    /// Session headers captured at initialize, with the current request's
    /// forwardable headers layered on top.
    async fn merged_headers(&self, request_headers: Option<&ForwardHeaders>) -> HeaderMap {
        let mut headers = self.0.session_headers.read().await.clone();
        if let Some(forward) = request_headers {
            for (name, value) in &forward.0 {
                headers.insert(name.clone(), value.clone());
            }
        }
        headers
    }
}

impl Drop for GatewaySession {
    fn drop(&mut self) {
        self.cancellation.cancel();
        self.shared.sessions.deregister(&self.session_id);
    }
}

impl ServerHandler for GatewayHandler {
    async fn initialize(
        &self,
        _request: InitializeRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        if let Some(forward) = context.extensions.get::<ForwardHeaders>() {
            let mut headers = self.0.session_headers.write().await;
            *headers = forward.0.clone();
        }
        Ok(self.get_info())
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let headers = self
            .merged_headers(context.extensions.get::<ForwardHeaders>())
            .await;
        let registry = self.ensure_registry(&headers).await?;
        Ok(ListToolsResult {
            next_cursor: None,
            tools: registry.tool_list(),
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let headers = self
            .merged_headers(context.extensions.get::<ForwardHeaders>())
            .await;
        let registry = self.ensure_registry(&headers).await?;
        let descriptor = registry
            .get(request.name.as_ref())
            .ok_or_else(|| tool_not_found(&request.name))?;
        dispatch::invoke(
            descriptor,
            Invocation {
                inputs: request.arguments.unwrap_or_default(),
                session_headers: headers,
                client: &self.0.shared.client,
                cancellation: &self.0.cancellation,
            },
        )
        .await
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "MCP HTTP Gateway".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

fn tool_not_found(name: &str) -> McpError {
    McpError::new(
        ErrorCode::METHOD_NOT_FOUND,
        format!("Tool {name} not found"),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;
    use url::Url;

    fn shared(config: GatewayConfig) -> Arc<SharedState> {
        Arc::new(SharedState::new(config, CancellationToken::new()).unwrap())
    }

    #[tokio::test]
    async fn sessions_register_and_deregister_with_the_process_map() {
        let shared = shared(GatewayConfig::default());
        let handler = GatewayHandler::new(shared.clone());
        assert_eq!(shared.sessions.len(), 1);
        let clone = handler.clone();
        drop(handler);
        assert_eq!(shared.sessions.len(), 1, "clones share the session");
        drop(clone);
        assert!(shared.sessions.is_empty());
    }

    #[tokio::test]
    async fn registry_compiles_once_and_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let spec_mock = server
            .mock("GET", "/openapi.json")
            .with_status(200)
            .with_body(
                json!({"paths": {"/pets/{id}": {"get": {
                    "operationId": "getPet",
                    "parameters": [{"name": "id", "in": "path", "required": true,
                                     "schema": {"type": "integer"}}]
                }}}})
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let config = GatewayConfig {
            spec: Some(format!("{}/openapi.json", server.url())),
            target_url: Some(Url::parse(&server.url()).unwrap()),
            ..Default::default()
        };
        let handler = GatewayHandler::new(shared(config));
        let first = handler.ensure_registry(&HeaderMap::new()).await.unwrap();
        let second = handler.ensure_registry(&HeaderMap::new()).await.unwrap();
        spec_mock.assert_async().await;
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.get("getPet").is_some());
    }

    #[tokio::test]
    async fn compiled_tools_dispatch_against_the_upstream() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/openapi.json")
            .with_status(200)
            .with_body(
                json!({"paths": {"/pets/{id}": {"get": {
                    "operationId": "getPet",
                    "parameters": [{"name": "id", "in": "path", "required": true,
                                     "schema": {"type": "integer"}}]
                }}}})
                .to_string(),
            )
            .create_async()
            .await;
        let upstream = server
            .mock("GET", "/pets/7")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(r#"{"id": 7}"#)
            .create_async()
            .await;

        let config = GatewayConfig {
            spec: Some(format!("{}/openapi.json", server.url())),
            target_url: Some(Url::parse(&server.url()).unwrap()),
            ..Default::default()
        };
        let shared = shared(config);
        let handler = GatewayHandler::new(shared.clone());

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer tok"));
        let registry = handler.ensure_registry(&headers).await.unwrap();
        let descriptor = registry.get("getPet").unwrap();
        let result = dispatch::invoke(
            descriptor,
            Invocation {
                inputs: json!({"id": 7}).as_object().cloned().unwrap(),
                session_headers: headers,
                client: &shared.client,
                cancellation: &shared.cancellation,
            },
        )
        .await
        .unwrap();

        upstream.assert_async().await;
        assert_ne!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn failed_compilation_is_an_internal_error() {
        let config = GatewayConfig {
            spec: Some("/no/such/spec.json".into()),
            target_url: Some(Url::parse("http://upstream.test").unwrap()),
            ..Default::default()
        };
        let handler = GatewayHandler::new(shared(config));
        let error = handler
            .ensure_registry(&HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::INTERNAL_ERROR);
    }

    #[test]
    fn unknown_tools_map_to_method_not_found() {
        let error = tool_not_found("missing");
        assert_eq!(error.code, ErrorCode::METHOD_NOT_FOUND);
        assert!(error.message.contains("missing"));
    }
}
