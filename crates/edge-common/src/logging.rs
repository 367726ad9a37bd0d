//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Tracing bootstrap for the adapter runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

pub const LOG_ENV: &str = "EDGE_LOG";

static GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

/// Output format of the stdout layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Resolve the filter: `EDGE_LOG`, then `RUST_LOG`, then the configured level.
pub fn resolve_filter(env_directive: Option<&str>, fallback: &str) -> EnvFilter {
    let fallback_filter = || EnvFilter::try_new(fallback).unwrap_or_else(|_| EnvFilter::new("info"));
    match env_directive {
        Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!("invalid {} directive ({}); using '{}'", LOG_ENV, err, fallback);
            fallback_filter()
        }),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback_filter()),
    }
}

/// Install the global subscriber for `service_name`.
///
/// Stdout gets JSON or pretty output per `config.format`. With `config.file`
/// set, a daily rolling JSON file is also written under `config.directory`.
/// Calling this twice keeps the first subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let env_directive = std::env::var(LOG_ENV).ok();
    let filter = resolve_filter(env_directive.as_deref(), &config.level);

    let mut guards = Vec::with_capacity(2);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = if config.file {
        std::fs::create_dir_all(&config.directory)?;
        let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
        let (file_writer, file_guard) =
            tracing_appender::non_blocking(daily(&config.directory, format!("{}.log", prefix)));
        guards.push(file_guard);
        Some(
            fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(file_writer)
                .boxed(),
        )
    } else {
        None
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    if installed {
        let _ = GUARDS.set(guards);
    }

    info!(
        service = %service_name,
        format = ?config.format,
        file = config.file,
        log_dir = %config.directory.display(),
        "tracing initialised"
    );
    Ok(())
}
