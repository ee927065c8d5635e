//! Configuration types shared by both run modes.
//!
//! - `headers`: the response header list and its JSON decoding rules
//! - `env`: environment-driven settings for the single-instance binary

mod env;
mod headers;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use env::{UpstreamEnv, HEALTH_CHECK_PATH};
pub use headers::ResponseHeaders;

/// Errors raised while turning raw configuration into validated settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    InvalidVar { name: &'static str, reason: String },
    #[error("Response headers are not valid JSON ({layer} decode): {reason}")]
    HeaderEncoding { layer: &'static str, reason: String },
    #[error("Response headers must decode to a JSON object, got {0}")]
    HeaderShape(String),
    #[error("Invalid response header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },
}

/// Ordered path patterns an instance answers with its configured status.
///
/// Accepts either the `|`-delimited form used by `APP_PATHS` or a JSON list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawMatchingPaths", into = "Vec<String>")]
pub struct MatchingPaths(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMatchingPaths {
    Delimited(String),
    List(Vec<String>),
}

impl From<RawMatchingPaths> for MatchingPaths {
    fn from(raw: RawMatchingPaths) -> Self {
        match raw {
            RawMatchingPaths::Delimited(s) => Self::parse_delimited(&s),
            RawMatchingPaths::List(paths) => {
                Self(paths.into_iter().filter(|p| !p.is_empty()).collect())
            }
        }
    }
}

impl From<MatchingPaths> for Vec<String> {
    fn from(paths: MatchingPaths) -> Self {
        paths.0
    }
}

impl MatchingPaths {
    pub fn new(paths: Vec<String>) -> Self {
        Self(paths)
    }

    /// Split a `|`-delimited pattern list. Empty segments are dropped.
    pub fn parse_delimited(s: &str) -> Self {
        Self(
            s.split('|')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
