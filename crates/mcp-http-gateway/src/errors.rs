use reqwest::header::{InvalidHeaderName, InvalidHeaderValue};
use rmcp::serde_json;

/// An error loading or interpreting an upstream API specification
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("Specification not found: {0}")]
    NotFound(String),

    #[error("Could not parse specification: {0}")]
    Parse(String),

    #[error("Invalid specification: {0}")]
    Invalid(String),

    #[error("Failed to fetch specification: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// An error in server initialization
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to load specification: {0}")]
    Spec(#[from] SpecError),

    #[error("No specification source configured")]
    NoSpec,

    #[error("No target URL configured")]
    NoTargetUrl,

    #[error("invalid header value: {0}")]
    HeaderValue(#[from] InvalidHeaderValue),

    #[error("invalid header name: {0}")]
    HeaderName(#[from] InvalidHeaderName),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid CORS configuration: {0}")]
    Cors(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(reqwest::Error),
}

/// An MCP tool error
pub type McpError = rmcp::model::ErrorData;
