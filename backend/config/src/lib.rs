//! `cadence-config` — Cadence runtime configuration management.
//!
//! Provides:
//! - Typed config schema (scheduler, queue, storage, logging, server, handlers)
//! - YAML loading from the config directory
//! - `${ENV_VAR}` substitution
//! - Default value application
//! - Schema validation

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

// Re-export most-used types at crate root.
pub use defaults::apply_all_defaults;
pub use env::{collect_referenced_vars, resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_raw_config};
pub use schema::{
    CadenceConfig, HandlerConfig, LoggingConfig, QueueConfig, SchedulerConfig, ServerConfig,
    StorageConfig,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Context, Result};
use std::path::Path;

/// Load, apply env substitution, apply defaults and validate a config file.
///
/// This is the main entry point for loading a config at runtime. Warnings
/// are logged; any validation error fails the load.
pub async fn load_and_prepare(path: &Path) -> Result<CadenceConfig> {
    let (config, report) = load_with_report(path).await?;
    if !report.is_valid() {
        bail!(
            "Config at {} has {} error(s); first: {}",
            path.display(),
            report.errors.len(),
            report.errors[0]
        );
    }
    Ok(config)
}

/// Like [`load_and_prepare`], but hands the validation report back instead
/// of failing on errors.
pub async fn load_with_report(path: &Path) -> Result<(CadenceConfig, ValidationReport)> {
    let raw = load_raw_config(path).await?;

    // Substitute ${VAR} env vars.
    let value = resolve_env_vars(&raw).context("Failed to resolve env vars in config")?;

    // Deserialize to typed config.
    let config: CadenceConfig =
        serde_json::from_value(value).context("Failed to deserialize config after processing")?;

    // Apply defaults.
    let config = apply_all_defaults(config);

    // Validate.
    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }

    Ok((config, report))
}
