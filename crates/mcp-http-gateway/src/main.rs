use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use mcp_http_gateway::errors::ServerError;
use mcp_http_gateway::runtime;
use mcp_http_gateway::server::{Server, TransportKind};
use mcp_http_gateway::server_config::SpecType;
use mcp_http_gateway::server_handler::SharedState;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

/// Clap styling
const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

/// Arguments to the gateway
#[derive(Debug, clap::Parser)]
#[command(
    styles = STYLES,
    about = "MCP HTTP Gateway - expose an OpenAPI or GraphQL API as MCP tools",
)]
struct Args {
    /// The path to the JSON configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// The kind of upstream specification
    #[arg(long = "type", value_enum)]
    spec_type: Option<SpecType>,

    /// The transport serving /mcp
    #[arg(long, value_enum)]
    transport: Option<TransportKind>,

    /// The OpenAPI document or saved introspection result (path or URL)
    #[arg(long, short = 's')]
    spec: Option<String>,

    /// Comma-separated overlay locations applied in order
    #[arg(long)]
    overlays: Option<String>,

    /// The upstream base URL or GraphQL endpoint
    #[arg(long, short = 'e')]
    target_url: Option<Url>,

    /// Comma-separated patterns restricting the tool set
    #[arg(long)]
    whitelist: Option<String>,

    /// Comma-separated patterns removing tools
    #[arg(long)]
    blacklist: Option<String>,

    /// Session-level description prepended to every tool description
    #[arg(long)]
    description: Option<String>,

    /// Maximum recursion depth in the GraphQL compiler
    #[arg(long)]
    path_depth: Option<usize>,

    /// Bearer credential for the upstream API
    #[arg(long, env = "API_KEY")]
    api_key: Option<String>,

    /// The IP address to bind to
    ///
    /// [default: 127.0.0.1]
    #[arg(long)]
    address: Option<IpAddr>,

    /// The port to bind to
    ///
    /// [default: 5000]
    #[arg(long)]
    port: Option<u16>,
}

impl Args {
    /// The CLI layer of the config figment: only the arguments actually
    /// given.
    fn overrides(&self) -> Map<String, Value> {
        let mut overrides = Map::new();
        let mut set = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                overrides.insert(key.to_string(), value);
            }
        };
        set(
            "type",
            self.spec_type.map(|t| {
                Value::String(
                    match t {
                        SpecType::Openapi => "openapi",
                        SpecType::Graphql => "graphql",
                    }
                    .to_string(),
                )
            }),
        );
        set(
            "transport",
            self.transport.map(|t| {
                Value::String(
                    match t {
                        TransportKind::Stream => "stream",
                        TransportKind::Sse => "sse",
                    }
                    .to_string(),
                )
            }),
        );
        set("spec", self.spec.clone().map(Value::String));
        set("overlays", self.overlays.clone().map(Value::String));
        set(
            "target_url",
            self.target_url
                .as_ref()
                .map(|u| Value::String(u.as_str().to_string())),
        );
        set("whitelist", self.whitelist.clone().map(Value::String));
        set("blacklist", self.blacklist.clone().map(Value::String));
        set("description", self.description.clone().map(Value::String));
        set("path_depth", self.path_depth.map(|d| Value::Number(d.into())));
        set("api_key", self.api_key.clone().map(Value::String));
        set(
            "address",
            self.address.map(|a| Value::String(a.to_string())),
        );
        set("port", self.port.map(|p| Value::Number(p.into())));
        overrides
    }
}

/// Fatal-init checks: a session can never materialize tools without these.
#[allow(clippy::result_large_err)]
fn validate(config: &runtime::Config) -> Result<(), ServerError> {
    if config.gateway.target_url.is_none() {
        return Err(ServerError::NoTargetUrl);
    }
    if config.gateway.spec_type == SpecType::Openapi && config.gateway.spec.is_none() {
        return Err(ServerError::NoSpec);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_file = runtime::discover_config_file(args.config.clone());
    let config = runtime::load_config(args.overrides(), config_file)?;
    let _logging_guard = config.logging.setup()?;

    info!("MCP HTTP Gateway v{}", env!("CARGO_PKG_VERSION"));
    validate(&config)?;

    let transport = config.transport();
    let cancellation = CancellationToken::new();
    let shared = Arc::new(SharedState::new(config.gateway, cancellation)?);
    Server::new(shared, transport, config.cors, config.health_check)
        .start()
        .await?;
    Ok(())
}
