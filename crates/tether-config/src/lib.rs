// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration for the Tether session bridge.
//!
//! Every section has compiled defaults, so an empty file is a complete
//! configuration. Extraction failures and semantic validation failures are
//! both reported as [`ConfigError`] diagnostics, all of them at once.

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::{Path, PathBuf};

pub use diagnostic::{ConfigError, ConfigSource, render_errors};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::TetherConfig;

/// Load the standard file layers plus `TETHER_*` env, then validate.
pub fn load_and_validate() -> Result<TetherConfig, Vec<ConfigError>> {
    checked(loader::load_config(), || read_sources(&loader::config_files()))
}

/// Load one file (env still applies) and validate it.
pub fn load_and_validate_path(path: &Path) -> Result<TetherConfig, Vec<ConfigError>> {
    checked(loader::load_config_from_path(path), || {
        read_sources(&[path.to_path_buf()])
    })
}

/// Validate an inline TOML document. Env is not consulted.
pub fn load_and_validate_str(toml_content: &str) -> Result<TetherConfig, Vec<ConfigError>> {
    checked(loader::load_config_from_str(toml_content), || {
        vec![ConfigSource {
            name: "<inline>".into(),
            content: toml_content.into(),
        }]
    })
}

fn checked(
    loaded: Result<TetherConfig, figment::Error>,
    sources: impl FnOnce() -> Vec<ConfigSource>,
) -> Result<TetherConfig, Vec<ConfigError>> {
    let config = loaded.map_err(|err| diagnostic::from_figment(err, &sources()))?;
    validation::validate_config(&config)?;
    Ok(config)
}

fn read_sources(paths: &[PathBuf]) -> Vec<ConfigSource> {
    paths
        .iter()
        .filter_map(|path| {
            let content = std::fs::read_to_string(path).ok()?;
            Some(ConfigSource {
                name: path.display().to_string(),
                content,
            })
        })
        .collect()
}
