//! Runtime utilities
//!
//! This module is only used by the main binary and provides helper code
//! related to runtime configuration.

mod config;
pub mod logging;

use std::path::PathBuf;

pub use config::Config;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde_json::{Map, Value};

/// Separator to use when drilling down into nested options in the env figment
const ENV_NESTED_SEPARATOR: &str = "__";

/// Top-level config keys recognized as bare environment variables.
const ENV_KEYS: [&str; 17] = [
    "type",
    "transport",
    "path_depth",
    "spec",
    "openapi_spec_path",
    "overlays",
    "target_url",
    "target_api_base_url",
    "whitelist",
    "blacklist",
    "api_key",
    "security_scheme_name",
    "disable_x_mcp",
    "description",
    "address",
    "port",
    "timeout",
];

/// Merge the configuration sources. Precedence, high to low: CLI overrides,
/// environment, JSON config file, defaults.
#[allow(clippy::result_large_err)]
pub fn load_config(
    cli_overrides: Map<String, Value>,
    config_file: Option<PathBuf>,
) -> Result<Config, figment::Error> {
    let mut figment = Figment::new()
        .join(Serialized::defaults(cli_overrides))
        .join(Env::prefixed("").only(&ENV_KEYS))
        .join(Env::prefixed("MCP_GATEWAY_").split(ENV_NESTED_SEPARATOR));
    if let Some(path) = config_file {
        figment = figment.join(Json::file(path));
    }
    let mut config: Config = figment.extract()?;
    collect_header_env(&mut config, std::env::vars());
    Ok(config)
}

/// Config file discovery: `--config` wins, then the `CONFIG_FILE` variable,
/// then the well-known names in the working directory.
pub fn discover_config_file(cli_path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path);
    }
    if let Ok(path) = std::env::var("CONFIG_FILE") {
        return Some(PathBuf::from(path));
    }
    ["config.json", "openapi-mcp.json", ".openapi-mcp.json"]
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

/// `HEADER_FOO_BAR=v` becomes the static header `FOO-BAR: v` on every
/// upstream call.
fn collect_header_env(config: &mut Config, vars: impl Iterator<Item = (String, String)>) {
    for (key, value) in vars {
        if let Some(name) = key.strip_prefix("HEADER_")
            && !name.is_empty()
        {
            config
                .gateway
                .custom_headers
                .insert(name.replace('_', "-"), value);
        }
    }
}
