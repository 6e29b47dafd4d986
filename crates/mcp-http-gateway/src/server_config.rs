//! Common configuration options for the gateway core.
//!
//! The JSON config file uses camelCase keys; environment variables use the
//! snake_case field names. Both spellings are accepted through aliases.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::filter::split_list;

/// Which compiler a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SpecType {
    #[default]
    Openapi,
    Graphql,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Selects the compiler
    #[serde(rename = "type")]
    pub spec_type: SpecType,

    /// OpenAPI document or saved introspection result, as a file path or URL
    #[serde(alias = "openapiSpecPath", alias = "openapi_spec_path")]
    pub spec: Option<String>,

    /// Comma-separated overlay locations, applied in order (OpenAPI only)
    pub overlays: Option<String>,

    /// Upstream base URL (OpenAPI) or GraphQL endpoint
    #[serde(alias = "targetUrl", alias = "targetApiBaseUrl", alias = "target_api_base_url")]
    pub target_url: Option<Url>,

    /// Comma-separated patterns restricting the tool set
    pub whitelist: Option<String>,

    /// Comma-separated patterns removing tools; consulted only when the
    /// whitelist is empty
    pub blacklist: Option<String>,

    /// Parameters injected into every invocation and hidden from input
    /// schemas
    #[serde(alias = "presetParams")]
    pub preset_params: Map<String, Value>,

    /// Bearer credential used when no security scheme is named
    #[serde(alias = "apiKey")]
    pub api_key: Option<String>,

    /// Name of the OpenAPI security scheme to satisfy
    #[serde(alias = "securitySchemeName")]
    pub security_scheme_name: Option<String>,

    /// Credentials keyed by security scheme name
    #[serde(alias = "securityCredentials")]
    pub security_credentials: HashMap<String, String>,

    /// Hard-coded headers to include in every upstream request
    #[serde(alias = "customHeaders")]
    pub custom_headers: HashMap<String, String>,

    /// Suppress the `X-MCP: 1` marker header
    #[serde(alias = "disableXMcp")]
    pub disable_x_mcp: bool,

    /// Session-level description prepended to every tool description
    pub description: String,

    /// Maximum recursion depth for GraphQL selection sets and filter
    /// flattening
    #[serde(alias = "pathDepth")]
    pub path_depth: usize,

    /// Timeout applied to every upstream call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            spec_type: SpecType::default(),
            spec: None,
            overlays: None,
            target_url: None,
            whitelist: None,
            blacklist: None,
            preset_params: Map::new(),
            api_key: None,
            security_scheme_name: None,
            security_credentials: HashMap::new(),
            custom_headers: HashMap::new(),
            disable_x_mcp: false,
            description: String::new(),
            path_depth: 3,
            timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    pub fn overlay_list(&self) -> Vec<String> {
        split_list(self.overlays.as_deref())
    }
}
