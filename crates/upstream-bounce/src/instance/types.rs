//! Type definitions for upstream instance management.

use crate::config::{ConfigError, MatchingPaths, ResponseHeaders};
use crate::echo::Scheme;
use crate::routes::RouteError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Instance Configuration
// ============================================================================

/// Configuration for one upstream instance, as posted to `/startServer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub instance_number: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cluster_name: String,
    /// `|`-delimited string or list; empty means only the 404 catch-all
    #[serde(default, deserialize_with = "null_as_default")]
    pub matching_paths: MatchingPaths,
    #[serde(default = "default_response_code")]
    pub response_code: u16,
    /// `runHTTPS` is the field name older harness clients send
    #[serde(default, rename = "useHTTPS", alias = "runHTTPS", alias = "useHttps")]
    pub use_https: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<ResponseHeaders>,
    /// 0 asks the OS for an ephemeral port
    #[serde(default, deserialize_with = "null_as_default")]
    pub port: u16,
    /// Bind address (default: 0.0.0.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Reserved readiness path answered with a bare 200
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_path: Option<String>,
}

fn default_response_code() -> u16 {
    200
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            instance_number: 0,
            cluster_name: String::new(),
            matching_paths: MatchingPaths::default(),
            response_code: default_response_code(),
            use_https: false,
            response_headers: None,
            port: 0,
            host: None,
            health_check_path: None,
        }
    }
}

impl InstanceConfig {
    pub fn scheme(&self) -> Scheme {
        if self.use_https {
            Scheme::Https
        } else {
            Scheme::Http
        }
    }
}

/// Summary of a running instance for listings and stop results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub port: u16,
    pub protocol: Scheme,
    pub cluster_name: String,
    pub instance_number: i64,
    pub matching_paths: MatchingPaths,
    pub response_code: u16,
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle of one instance. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Unbound,
    /// Acquiring the socket; retries while the port is in use
    Binding,
    Listening,
    Closed,
}

impl InstanceState {
    pub fn can_transition_to(self, next: InstanceState) -> bool {
        use InstanceState::*;
        matches!(
            (self, next),
            (Unbound, Binding) | (Binding, Listening) | (Binding, Closed) | (Listening, Closed)
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceState::Unbound => "unbound",
            InstanceState::Binding => "binding",
            InstanceState::Listening => "listening",
            InstanceState::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("Invalid instance configuration: {0}")]
    Config(String),
    #[error("Failed to load TLS credentials: {0}")]
    Tls(String),
    #[error("Failed to bind port {0}: {1}")]
    BindError(u16, String),
    #[error("Instance not found on port {0}")]
    NotFound(u16),
    #[error("Instance on port {0} is already closed")]
    AlreadyClosed(u16),
    #[error("Invalid instance state transition from {from} to {to}")]
    InvalidTransition {
        from: InstanceState,
        to: InstanceState,
    },
}

impl From<RouteError> for InstanceError {
    fn from(e: RouteError) -> Self {
        InstanceError::Config(e.to_string())
    }
}

impl From<ConfigError> for InstanceError {
    fn from(e: ConfigError) -> Self {
        InstanceError::Config(e.to_string())
    }
}
