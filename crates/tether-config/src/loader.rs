// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./tether.toml` > `~/.config/tether/tether.toml` > `/etc/tether/tether.toml`
//! with environment variable overrides via `TETHER_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::TetherConfig;

/// Top-level sections that env var names are split on.
const SECTIONS: &[&str] = &[
    "server", "storage", "session", "outbox", "notify", "sync", "gateway", "bridge",
];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/tether/tether.toml` (system-wide)
/// 3. `~/.config/tether/tether.toml` (user XDG config)
/// 4. `./tether.toml` (local directory)
/// 5. `TETHER_*` environment variables
pub fn load_config() -> Result<TetherConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<TetherConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(TetherConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<TetherConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(TetherConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// TOML layers in merge order, lowest precedence first.
pub fn config_files() -> Vec<PathBuf> {
    let mut files = vec![PathBuf::from("/etc/tether/tether.toml")];
    if let Some(dir) = dirs::config_dir() {
        files.push(dir.join("tether/tether.toml"));
    }
    files.push(PathBuf::from("tether.toml"));
    files
}

/// The full layered figment: defaults, [`config_files`], then env.
pub fn build_figment() -> Figment {
    config_files()
        .into_iter()
        .fold(
            Figment::new().merge(Serialized::defaults(TetherConfig::default())),
            |figment, file| figment.merge(Toml::file(file)),
        )
        .merge(env_provider())
}

/// Map a lowercased, prefix-stripped env key to a dotted config path.
///
/// Only the leading section is split off, so `session_pairing_wait_secs`
/// maps to `session.pairing_wait_secs`, never `session.pairing.wait_secs`.
pub fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

fn env_provider() -> Env {
    Env::prefixed("TETHER_").map(|key| map_env_key(key.as_str()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_split_on_section_only() {
        assert_eq!(
            map_env_key("session_pairing_wait_secs"),
            "session.pairing_wait_secs"
        );
        assert_eq!(map_env_key("storage_database_path"), "storage.database_path");
        assert_eq!(map_env_key("sync_max_limit"), "sync.max_limit");
        assert_eq!(map_env_key("notify_queue_capacity"), "notify.queue_capacity");
        assert_eq!(map_env_key("unknown"), "unknown");
    }
}
