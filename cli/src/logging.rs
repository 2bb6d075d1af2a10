// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tracing subscriber setup
//!
//! Filter precedence: `RUST_LOG`, then `--log-level` / `CONCORD_LOG_LEVEL`,
//! then the configuration file, then `info`. The output format (`compact` or
//! `json`) follows `--log-format`, then the configuration file.

use anyhow::{Context, Result};
use std::path::PathBuf;

use concord_core::config::{CoordinatorConfigManifest, ObservabilityConfig};

/// Resolve level and format before the subscriber exists.
///
/// Reads the configuration file directly so nothing is logged yet; an
/// unreadable file falls back to defaults and is reported later by the
/// command that loads it.
pub fn preferences(
    config_path: Option<PathBuf>,
    level: Option<String>,
    format: Option<String>,
) -> ObservabilityConfig {
    let from_file = config_path
        .or_else(CoordinatorConfigManifest::discover_config)
        .and_then(|path| CoordinatorConfigManifest::from_yaml_file(path).ok())
        .map(|config| config.spec.observability)
        .unwrap_or_default();

    ObservabilityConfig {
        log_level: level.unwrap_or(from_file.log_level),
        log_format: format.unwrap_or(from_file.log_format),
    }
}

/// Initialize tracing subscriber for logging
pub fn init_logging(preferences: &ObservabilityConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&preferences.log_level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match preferences.log_format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        other => anyhow::bail!("Unknown log format '{}' (expected compact or json)", other),
    }

    Ok(())
}
