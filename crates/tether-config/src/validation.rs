// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as valid bind addresses, non-empty paths, and consistent timeouts.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::TetherConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &TetherConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    let host = config.server.host.trim();
    if host.is_empty() {
        fail("server.host must not be empty".to_string());
    } else {
        let is_valid_ip = host.parse::<std::net::IpAddr>().is_ok();
        let is_valid_hostname = host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == ':');
        if !is_valid_ip && !is_valid_hostname {
            fail(format!(
                "server.host `{host}` is not a valid IP address or hostname"
            ));
        }
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    let session = &config.session;
    if session.integration.trim().is_empty() {
        fail("session.integration must not be empty".to_string());
    }
    if session.pairing_wait_secs == 0 {
        fail("session.pairing_wait_secs must be at least 1".to_string());
    }
    if session.pairing_wait_secs > session.pairing_code_ttl_secs {
        fail(format!(
            "session.pairing_wait_secs ({}) must not exceed session.pairing_code_ttl_secs ({})",
            session.pairing_wait_secs, session.pairing_code_ttl_secs
        ));
    }
    if session.sweep_interval_secs == 0 {
        fail("session.sweep_interval_secs must be at least 1".to_string());
    }
    if session.event_buffer == 0 {
        fail("session.event_buffer must be at least 1".to_string());
    }

    if config.outbox.batch_size == 0 {
        fail("outbox.batch_size must be at least 1".to_string());
    }
    if config.outbox.poll_interval_ms == 0 {
        fail("outbox.poll_interval_ms must be at least 1".to_string());
    }

    let notify = &config.notify;
    if notify.queue_capacity == 0 {
        fail("notify.queue_capacity must be at least 1".to_string());
    }
    if notify.heartbeat_interval_secs == 0 {
        fail("notify.heartbeat_interval_secs must be at least 1".to_string());
    }
    if notify.heartbeat_timeout_secs <= notify.heartbeat_interval_secs {
        fail(format!(
            "notify.heartbeat_timeout_secs ({}) must exceed notify.heartbeat_interval_secs ({})",
            notify.heartbeat_timeout_secs, notify.heartbeat_interval_secs
        ));
    }

    if config.sync.max_limit == 0 {
        fail("sync.max_limit must be at least 1".to_string());
    }
    if config.sync.default_limit == 0 || config.sync.default_limit > config.sync.max_limit {
        fail(format!(
            "sync.default_limit must be between 1 and sync.max_limit ({}), got {}",
            config.sync.max_limit, config.sync.default_limit
        ));
    }

    let mut seen_tokens = HashSet::new();
    for (token, account) in &config.gateway.tokens {
        if token.trim().is_empty() {
            fail("gateway.tokens must not contain an empty token".to_string());
        }
        if account.trim().is_empty() {
            fail("gateway.tokens must map every token to a non-empty account id".to_string());
        }
        if !seen_tokens.insert(token.trim()) {
            fail("gateway.tokens contains the same token twice after trimming".to_string());
        }
    }

    let url = config.bridge.url.trim();
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        fail(format!("bridge.url `{url}` must start with ws:// or wss://"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_error(errors: &[ConfigError], needle: &str) -> bool {
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains(needle)))
    }

    #[test]
    fn default_config_validates() {
        let config = TetherConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = TetherConfig::default();
        config.storage.database_path = "".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "database_path"));
    }

    #[test]
    fn pairing_wait_longer_than_code_ttl_fails() {
        let mut config = TetherConfig::default();
        config.session.pairing_wait_secs = 300;
        config.session.pairing_code_ttl_secs = 120;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "pairing_wait_secs"));
    }

    #[test]
    fn heartbeat_timeout_must_exceed_interval() {
        let mut config = TetherConfig::default();
        config.notify.heartbeat_interval_secs = 30;
        config.notify.heartbeat_timeout_secs = 30;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "heartbeat_timeout_secs"));
    }

    #[test]
    fn default_limit_above_max_fails() {
        let mut config = TetherConfig::default();
        config.sync.default_limit = 5000;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "sync.default_limit"));
    }

    #[test]
    fn empty_token_account_fails() {
        let mut config = TetherConfig::default();
        config.gateway.tokens.insert("secret".into(), " ".into());
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "gateway.tokens"));
    }

    #[test]
    fn collects_every_error() {
        let mut config = TetherConfig::default();
        config.storage.database_path = String::new();
        config.outbox.batch_size = 0;
        config.bridge.url = "http://bridge".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn invalid_host_fails() {
        let mut config = TetherConfig::default();
        config.server.host = "bad host!".into();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "server.host"));
    }
}
