//! Logging config and utilities
//!
//! This module is only used by the main binary and provides logging config
//! structures and setup helper functions

use std::path::PathBuf;

use serde::Deserialize;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Logging related options
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level to use for tracing
    #[serde(deserialize_with = "level_from_str")]
    pub level: Level,

    /// The output path to use for logging; stderr when unset
    pub path: Option<PathBuf>,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            path: None,
        }
    }
}

impl Logging {
    /// Sets up either file logging or stderr logging depending on provided
    /// configuration options. The returned guard must stay alive for the
    /// process lifetime.
    pub fn setup(&self) -> Result<Option<WorkerGuard>, anyhow::Error> {
        let mut env_filter = EnvFilter::from_default_env().add_directive(self.level.into());
        if self.level == Level::INFO {
            env_filter = env_filter.add_directive("rmcp=warn".parse()?);
        }

        let (writer, guard, with_ansi) = self
            .path
            .clone()
            .and_then(|path| {
                std::fs::create_dir_all(&path)
                    .map(|_| path)
                    .inspect_err(|e| eprintln!("Error creating log directory: {e:?}"))
                    .ok()
            })
            .and_then(|path| {
                RollingFileAppender::builder()
                    .rotation(Rotation::NEVER)
                    .filename_prefix("mcp_http_gateway")
                    .filename_suffix("log")
                    .build(path)
                    .inspect_err(|e| eprintln!("Error building log file: {e:?}"))
                    .ok()
            })
            .map(|appender| {
                let (non_blocking_appender, guard) = tracing_appender::non_blocking(appender);
                (
                    BoxMakeWriter::new(non_blocking_appender),
                    Some(guard),
                    false,
                )
            })
            .unwrap_or_else(|| {
                if self.path.is_some() {
                    eprintln!("Log file setup failed - falling back to stderr");
                }
                (BoxMakeWriter::new(std::io::stderr), None, true)
            });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(with_ansi)
                    .with_target(false),
            )
            .init();

        Ok(guard)
    }
}

fn level_from_str<'de, D>(deserializer: D) -> Result<Level, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    value
        .parse()
        .map_err(|_| serde::de::Error::custom(format!("invalid log level: {value}")))
}
