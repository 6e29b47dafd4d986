//! Serving surface: the two HTTP transports and process shutdown.
//!
//! Both transports expose the single `/mcp` endpoint. Session lifecycle is
//! the transport's: each new session gets a fresh handler from the factory,
//! and dropping the handler tears the session down.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use rmcp::transport::sse_server::SseServerConfig;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::{SseServer, StreamableHttpService};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::cors::CorsConfig;
use crate::errors::ServerError;
use crate::forward_headers::capture_forward_headers;
use crate::health::{HealthCheckConfig, health_state};
use crate::server_handler::{GatewayHandler, SharedState};

/// How long in-flight sessions may drain after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Streamable HTTP messages on `POST /mcp`
    #[default]
    Stream,

    /// Server-sent events: `GET /mcp` opens the stream,
    /// `POST /mcp?sessionId=…` delivers messages
    Sse,
}

#[derive(Debug, Clone)]
pub struct Transport {
    pub kind: TransportKind,
    pub address: IpAddr,
    pub port: u16,
}

impl Transport {
    pub fn default_address() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    pub fn default_port() -> u16 {
        5000
    }
}

pub struct Server {
    shared: Arc<SharedState>,
    transport: Transport,
    cors: CorsConfig,
    health_check: HealthCheckConfig,
}

impl Server {
    pub fn new(
        shared: Arc<SharedState>,
        transport: Transport,
        cors: CorsConfig,
        health_check: HealthCheckConfig,
    ) -> Self {
        Self {
            shared,
            transport,
            cors,
            health_check,
        }
    }

    pub async fn start(self) -> Result<(), ServerError> {
        let listen_address = SocketAddr::new(self.transport.address, self.transport.port);
        match self.transport.kind {
            TransportKind::Stream => self.serve_streamable_http(listen_address).await,
            TransportKind::Sse => self.serve_sse(listen_address).await,
        }
    }

    async fn serve_streamable_http(self, listen_address: SocketAddr) -> Result<(), ServerError> {
        info!(address = %listen_address, "Starting gateway in Streamable HTTP mode");
        let shared = self.shared.clone();
        let service = StreamableHttpService::new(
            move || Ok(GatewayHandler::new(shared.clone())),
            LocalSessionManager::default().into(),
            Default::default(),
        );
        let router = self.decorate(Router::new().nest_service("/mcp", service))?;
        let listener = tokio::net::TcpListener::bind(listen_address).await?;
        self.run(listener, router).await
    }

    async fn serve_sse(self, listen_address: SocketAddr) -> Result<(), ServerError> {
        info!(address = %listen_address, "Starting gateway in SSE mode");
        let (sse_server, router) = SseServer::new(SseServerConfig {
            bind: listen_address,
            sse_path: "/mcp".to_string(),
            post_path: "/mcp".to_string(),
            ct: self.shared.cancellation.child_token(),
            sse_keep_alive: None,
        });
        let router = self.decorate(router)?;
        let listener = tokio::net::TcpListener::bind(listen_address).await?;
        let shared = self.shared.clone();
        sse_server.with_service(move || GatewayHandler::new(shared.clone()));
        self.run(listener, router).await
    }

    /// Shared route decoration: header capture, CORS, optional health route.
    fn decorate(&self, router: Router) -> Result<Router, ServerError> {
        let mut router = router
            .layer(axum::middleware::from_fn(capture_forward_headers))
            .layer(self.cors.clone().into_layer()?);
        if self.health_check.enabled {
            router = router.route(&self.health_check.path, get(health_endpoint));
        }
        Ok(router)
    }

    async fn run(
        &self,
        listener: tokio::net::TcpListener,
        router: Router,
    ) -> Result<(), ServerError> {
        let cancellation = self.shared.cancellation.clone();
        let graceful = {
            let cancellation = cancellation.clone();
            async move {
                shutdown_signal().await;
                info!("Shutdown signal received, draining sessions");
                cancellation.cancel();
            }
        };
        let server = axum::serve(listener, router).with_graceful_shutdown(graceful);
        tokio::select! {
            result = server => result?,
            _ = async {
                cancellation.cancelled().await;
                tokio::time::sleep(SHUTDOWN_GRACE).await;
            } => {
                warn!("Forcing shutdown after the grace period");
            }
        }
        Ok(())
    }
}

async fn health_endpoint() -> (axum::http::StatusCode, Json<serde_json::Value>) {
    let (health, status_code) = health_state();
    (status_code, Json(json!(health)))
}

#[allow(clippy::expect_used)]
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
