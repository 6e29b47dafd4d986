//! Cross Origin Resource Sharing configuration for the HTTP transports.
//!
//! The gateway defaults to the permissive posture the MCP endpoint needs:
//! any origin may call it, and the `mcp-session-id` header is exposed so
//! browser clients can continue a session.

use http::{HeaderName, HeaderValue, Method};
use serde::Deserialize;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders};

use crate::errors::ServerError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Set to false to allow only the listed origins
    pub allow_any_origin: bool,

    /// The origin(s) to allow requests from when `allow_any_origin` is off
    pub origins: Vec<String>,

    /// Allowed request methods
    pub methods: Vec<String>,

    /// Headers to allow; when empty the server mirrors the client's
    /// `Access-Control-Request-Headers`
    pub allow_headers: Vec<String>,

    /// Response headers made available to browser scripts
    pub expose_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_any_origin: true,
            origins: Vec::new(),
            methods: vec!["GET".into(), "POST".into(), "DELETE".into(), "OPTIONS".into()],
            allow_headers: Vec::new(),
            expose_headers: vec!["mcp-session-id".into()],
        }
    }
}

impl CorsConfig {
    pub fn into_layer(self) -> Result<CorsLayer, ServerError> {
        let mut cors = CorsLayer::new();

        if self.allow_any_origin {
            cors = cors.allow_origin(AllowOrigin::any());
        } else if !self.origins.is_empty() {
            let origins = self
                .origins
                .iter()
                .map(|origin| {
                    HeaderValue::from_str(origin)
                        .map_err(|_| ServerError::Cors(format!("origin '{origin}' is not valid")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            cors = cors.allow_origin(origins);
        }

        if !self.methods.is_empty() {
            let methods = self
                .methods
                .iter()
                .map(|method| {
                    Method::from_bytes(method.as_bytes())
                        .map_err(|_| ServerError::Cors(format!("method '{method}' is not valid")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            cors = cors.allow_methods(AllowMethods::list(methods));
        }

        if self.allow_headers.is_empty() {
            cors = cors.allow_headers(AllowHeaders::mirror_request());
        } else {
            let headers = parse_header_names(&self.allow_headers)?;
            cors = cors.allow_headers(headers);
        }

        if !self.expose_headers.is_empty() {
            let headers = parse_header_names(&self.expose_headers)?;
            cors = cors.expose_headers(ExposeHeaders::list(headers));
        }

        Ok(cors)
    }
}

fn parse_header_names(names: &[String]) -> Result<Vec<HeaderName>, ServerError> {
    names
        .iter()
        .map(|name| {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ServerError::Cors(format!("header name '{name}' is not valid")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_allows_any_origin_and_exposes_session_id() {
        let config = CorsConfig::default();
        assert!(config.allow_any_origin);
        assert_eq!(config.expose_headers, vec!["mcp-session-id"]);
        assert!(config.into_layer().is_ok());
    }

    #[test]
    fn explicit_origins_are_validated() {
        let config = CorsConfig {
            allow_any_origin: false,
            origins: vec!["https://example.com".into()],
            ..Default::default()
        };
        assert!(config.into_layer().is_ok());

        let invalid = CorsConfig {
            allow_any_origin: false,
            origins: vec!["not\na\norigin".into()],
            ..Default::default()
        };
        assert!(matches!(invalid.into_layer(), Err(ServerError::Cors(_))));
    }

    #[test]
    fn invalid_method_is_rejected() {
        let config = CorsConfig {
            methods: vec!["INVALID\nMETHOD".into()],
            ..Default::default()
        };
        assert!(matches!(config.into_layer(), Err(ServerError::Cors(_))));
    }
}
