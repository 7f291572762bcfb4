// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns figment extraction failures into miette diagnostics.
//!
//! Key suggestions come from the keys [`TetherConfig`] itself serializes, so
//! help text follows the configuration surface as it changes. A key that is
//! valid in another section is pointed at that section instead.

#![allow(unused_assignments)] // miette's Diagnostic derive trips this lint

use std::collections::BTreeMap;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::model::TetherConfig;

/// Minimum Jaro-Winkler score for a "did you mean" hint.
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// A TOML document that fed the configuration, kept for source spans.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// File path, or `<inline>` for string input.
    pub name: String,
    pub content: String,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// A key or section tether does not know.
    #[error("unknown configuration key `{path}`")]
    #[diagnostic(code(tether::config::unknown_key), help("{help}"))]
    UnknownKey {
        /// Dotted location, e.g. `session.pairing_wiat_secs`.
        path: String,
        key: String,
        suggestion: Option<String>,
        help: String,
        #[label("not a tether setting")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("invalid type for `{key}`: {detail}")]
    #[diagnostic(code(tether::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        key: String,
        detail: String,
        expected: String,
        #[label("wrong type here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value that parsed but is not usable.
    #[error("validation error: {message}")]
    #[diagnostic(code(tether::config::validation))]
    Validation { message: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(tether::config::other))]
    Other(String),
}

/// Section name to the keys it accepts, read off the serialized defaults.
pub fn config_surface() -> BTreeMap<String, Vec<String>> {
    let Ok(toml::Value::Table(root)) = toml::Value::try_from(TetherConfig::default()) else {
        return BTreeMap::new();
    };
    root.into_iter()
        .map(|(section, value)| {
            let keys = match value {
                toml::Value::Table(table) => table.keys().cloned().collect(),
                _ => Vec::new(),
            };
            (section, keys)
        })
        .collect()
}

/// Convert every error inside a `figment::Error` into a diagnostic.
pub fn from_figment(err: figment::Error, sources: &[ConfigSource]) -> Vec<ConfigError> {
    use figment::error::Kind;

    let surface = config_surface();
    err.into_iter()
        .map(|error| match &error.kind {
            Kind::UnknownField(field, _) => {
                unknown_key(&surface, error.path.first().map(String::as_str), field, sources)
            }
            Kind::InvalidType(actual, expected) => {
                let (span, src) = match error.path.as_slice() {
                    [section, key] => locate(sources, Some(section.as_str()), key),
                    [key] => locate(sources, None, key),
                    _ => None,
                }
                .unzip();
                ConfigError::InvalidType {
                    key: error.path.join("."),
                    detail: format!("found {actual}"),
                    expected: expected.to_string(),
                    span,
                    src,
                }
            }
            _ => ConfigError::Other(error.to_string()),
        })
        .collect()
}

fn unknown_key(
    surface: &BTreeMap<String, Vec<String>>,
    section: Option<&str>,
    key: &str,
    sources: &[ConfigSource],
) -> ConfigError {
    let candidates: Vec<&str> = match section {
        Some(section) => surface
            .get(section)
            .map(|keys| keys.iter().map(String::as_str).collect())
            .unwrap_or_default(),
        None => surface.keys().map(String::as_str).collect(),
    };
    let suggestion = closest(key, &candidates);

    // Only meaningful inside a section: top-level entries are sections.
    let home = section.and_then(|section| {
        surface
            .iter()
            .find(|(other, keys)| other.as_str() != section && keys.iter().any(|k| k == key))
            .map(|(other, _)| other.clone())
    });

    let help = match (&home, &suggestion) {
        (Some(home), _) => format!("`{key}` belongs in the [{home}] section"),
        (None, Some(suggestion)) => format!("did you mean `{suggestion}`?"),
        (None, None) => format!("expected one of: {}", candidates.join(", ")),
    };
    let (span, src) = locate(sources, section, key).unzip();

    ConfigError::UnknownKey {
        path: match section {
            Some(section) => format!("{section}.{key}"),
            None => key.to_string(),
        },
        key: key.to_string(),
        suggestion,
        help,
        span,
        src,
    }
}

/// Best candidate above [`SUGGESTION_THRESHOLD`].
pub fn closest(unknown: &str, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .map(|candidate| (strsim::jaro_winkler(unknown, candidate), *candidate))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, candidate)| candidate.to_string())
}

/// Later layers win, so the last source mentioning the key is the culprit.
fn locate(
    sources: &[ConfigSource],
    section: Option<&str>,
    key: &str,
) -> Option<(SourceSpan, NamedSource<String>)> {
    sources.iter().rev().find_map(|source| {
        key_span(&source.content, section, key)
            .map(|span| (span, NamedSource::new(&source.name, source.content.clone())))
    })
}

/// Span of `key = ...` inside `[section]`. With no section, a top-level
/// key or a table header named `key` matches.
pub fn key_span(content: &str, section: Option<&str>, key: &str) -> Option<SourceSpan> {
    let mut current: Option<&str> = None;
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let trimmed = line.trim();
        if let Some(header) = trimmed.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            let header = header.trim();
            if section.is_none() && header == key {
                return line.find(key).map(|at| SourceSpan::new((offset + at).into(), key.len()));
            }
            current = Some(header);
        } else if current == section {
            let assigns = trimmed
                .strip_prefix(key)
                .is_some_and(|rest| rest.trim_start().starts_with('='));
            if assigns {
                let indent = line.len() - line.trim_start().len();
                return Some(SourceSpan::new((offset + indent).into(), key.len()));
            }
        }
        offset += line.len();
    }
    None
}

/// Print every diagnostic to stderr with miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    let handler = miette::GraphicalReportHandler::new();
    let mut out = String::new();
    for error in errors {
        if handler.render_report(&mut out, error).is_err() {
            out.push_str(&format!("error: {error}\n"));
        }
    }
    eprint!("{out}");
    eprintln!("tether: {} configuration error(s)", errors.len());
}
