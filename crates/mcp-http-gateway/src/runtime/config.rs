//! Configuration for the gateway binary.

use std::net::IpAddr;

use serde::Deserialize;

use super::logging::Logging;
use crate::cors::CorsConfig;
use crate::health::HealthCheckConfig;
use crate::server::{Transport, TransportKind};
use crate::server_config::GatewayConfig;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Core gateway options, at the top level of the config file
    #[serde(flatten)]
    pub gateway: GatewayConfig,

    /// The transport serving `/mcp`
    pub transport: TransportKind,

    /// The IP address to bind to
    pub address: IpAddr,

    /// The port to bind to
    pub port: u16,

    /// Logging configuration
    pub logging: Logging,

    /// CORS configuration
    pub cors: CorsConfig,

    /// Health check configuration
    pub health_check: HealthCheckConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            transport: TransportKind::default(),
            address: Transport::default_address(),
            port: Transport::default_port(),
            logging: Logging::default(),
            cors: CorsConfig::default(),
            health_check: HealthCheckConfig::default(),
        }
    }
}

impl Config {
    pub fn transport(&self) -> Transport {
        Transport {
            kind: self.transport,
            address: self.address,
            port: self.port,
        }
    }
}
