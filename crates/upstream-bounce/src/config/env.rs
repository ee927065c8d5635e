//! Environment-driven settings for the single-instance `fake-upstream` binary.

use super::{ConfigError, MatchingPaths, ResponseHeaders};
use crate::instance::InstanceConfig;
use hyper::StatusCode;

/// Readiness path served with a bare 200 in single-instance mode.
pub const HEALTH_CHECK_PATH: &str = "/INTERNALHEALTHCHECKFORSTARTUP";

/// Validated settings read once at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamEnv {
    pub instance_number: i64,
    pub cluster_name: String,
    pub app_paths: MatchingPaths,
    pub response_code: u16,
    pub response_headers: Option<ResponseHeaders>,
    pub use_https: bool,
}

impl UpstreamEnv {
    /// Read from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through an arbitrary lookup, so tests need not touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let instance_number = required(&lookup, "INSTANCE_NUMBER")?
            .trim()
            .parse::<i64>()
            .map_err(|e| ConfigError::InvalidVar {
                name: "INSTANCE_NUMBER",
                reason: e.to_string(),
            })?;

        let cluster_name = required(&lookup, "CLUSTER_NAME")?;

        let response_code = required(&lookup, "RESPONSE_CODE")?
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|code| StatusCode::from_u16(*code).is_ok())
            .ok_or_else(|| ConfigError::InvalidVar {
                name: "RESPONSE_CODE",
                reason: "expected an HTTP status code between 100 and 999".to_string(),
            })?;

        let app_paths = lookup("APP_PATHS")
            .map(|raw| MatchingPaths::parse_delimited(&raw))
            .unwrap_or_default();

        let response_headers = match lookup("RESPONSE_HEADERS") {
            Some(raw) if !raw.is_empty() => Some(ResponseHeaders::from_double_encoded(&raw)?),
            _ => None,
        };

        let use_https = lookup("USE_HTTPS").as_deref() == Some("https");

        Ok(Self {
            instance_number,
            cluster_name,
            app_paths,
            response_code,
            response_headers,
            use_https,
        })
    }

    /// Instance configuration for this process, listening on `port`.
    pub fn into_instance_config(self, port: u16) -> InstanceConfig {
        InstanceConfig {
            instance_number: self.instance_number,
            cluster_name: self.cluster_name,
            matching_paths: self.app_paths,
            response_code: self.response_code,
            use_https: self.use_https,
            response_headers: self.response_headers,
            port,
            host: None,
            health_check_path: Some(HEALTH_CHECK_PATH.to_string()),
        }
    }
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).ok_or(ConfigError::MissingVar(name))
}
