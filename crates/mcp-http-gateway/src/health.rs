//! Liveness endpoint for the HTTP transports.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
}

#[derive(Debug, Serialize)]
pub struct Health {
    status: HealthStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Set to true to enable the health check
    pub enabled: bool,

    /// Optionally set a custom healthcheck path
    /// Defaults to /health
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/health".to_string(),
        }
    }
}

/// A serving process that can answer the health route is, by definition,
/// live; session state never gates it.
pub fn health_state() -> (Health, StatusCode) {
    (
        Health {
            status: HealthStatus::Up,
        },
        StatusCode::OK,
    )
}
