//! InstanceRegistry - lifecycle management for many upstream instances.
//!
//! Every running instance is keyed by the port it actually bound. The lock is
//! never held across an await: instances are started first and inserted after,
//! and removals signal shutdown under the lock but wait for it outside.

use super::bind::RetryPolicy;
use super::core::{wait_for_shutdown, UpstreamInstance};
use super::types::{InstanceConfig, InstanceError, InstanceSummary};
use crate::tls::TlsCredentials;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// Default directory holding `internal.key` and `internal.cert`.
pub const DEFAULT_TLS_DIR: &str = "/app";

/// Settings shared by every instance the registry creates.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub tls: TlsCredentials,
    pub retry: RetryPolicy,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            tls: TlsCredentials::in_dir(PathBuf::from(DEFAULT_TLS_DIR)),
            retry: RetryPolicy::default(),
        }
    }
}

/// Process-wide table of running instances, keyed by port.
#[derive(Debug)]
pub struct InstanceRegistry {
    instances: RwLock<HashMap<u16, UpstreamInstance>>,
    settings: RegistrySettings,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new(RegistrySettings::default())
    }
}

impl InstanceRegistry {
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Start an instance and register it under its bound port.
    ///
    /// Returns the port, which differs from `config.port` only when that was 0.
    pub async fn create(&self, config: InstanceConfig) -> Result<u16, InstanceError> {
        let instance =
            UpstreamInstance::start(config, &self.settings.tls, self.settings.retry).await?;
        let port = instance.port();

        let stale = self.instances.write().insert(port, instance);
        if let Some(stale) = stale {
            // The OS handed us the port, so whatever was registered there is no longer serving
            warn!("Replacing stale registry entry on port {}", port);
            if let Ok(task) = stale.signal_close() {
                wait_for_shutdown(port, task).await;
            }
        }

        info!("Registered instance on port {}", port);
        Ok(port)
    }

    /// Stop the instance on `port` and wait until its listener is released.
    pub async fn stop_by_port(&self, port: u16) -> Result<InstanceSummary, InstanceError> {
        let (summary, task) = {
            let mut instances = self.instances.write();
            let instance = instances
                .remove(&port)
                .ok_or(InstanceError::NotFound(port))?;
            (instance.summary(), instance.signal_close()?)
        };

        wait_for_shutdown(port, task).await;
        info!("Stopped instance on port {}", port);
        Ok(summary)
    }

    /// Stop every instance. Returns how many were running.
    pub async fn reset_all(&self) -> usize {
        let tasks: Vec<_> = {
            let mut instances = self.instances.write();
            instances
                .drain()
                .map(|(port, instance)| (port, instance.signal_close()))
                .collect()
        };

        let count = tasks.len();
        for (port, task) in tasks {
            match task {
                Ok(task) => wait_for_shutdown(port, task).await,
                Err(e) => warn!("Skipping instance on port {}: {}", port, e),
            }
        }

        info!("Reset {} instances", count);
        count
    }

    /// Summaries of all running instances, ordered by port.
    pub fn list(&self) -> Vec<InstanceSummary> {
        let mut summaries: Vec<_> = self
            .instances
            .read()
            .values()
            .map(UpstreamInstance::summary)
            .collect();
        summaries.sort_by_key(|s| s.port);
        summaries
    }

    pub fn contains(&self, port: u16) -> bool {
        self.instances.read().contains_key(&port)
    }

    pub fn count(&self) -> usize {
        self.instances.read().len()
    }
}
