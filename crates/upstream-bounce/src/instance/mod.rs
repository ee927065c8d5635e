//! Fake upstream instances and the registry that owns them.
//!
//! This module provides:
//! - `InstanceRegistry`: create, stop and reset instances by port
//! - `UpstreamInstance`: one HTTP or HTTPS echo server on its own port
//! - `InstanceConfig`: configuration for creating an instance
//!
//! ## Module Structure
//!
//! - `types`: configuration, lifecycle state and errors
//! - `bind`: port binding with retry while the address is in use
//! - `handler`: HTTP request handling for instances
//! - `core`: UpstreamInstance and its accept loop
//! - `registry`: InstanceRegistry

mod bind;
mod core;
mod handler;
mod registry;
mod types;

#[cfg(test)]
mod tests;

pub use bind::{PortBinder, RetryPolicy, DEFAULT_RETRY_DELAY};
pub use self::core::{UpstreamInstance, DEFAULT_BIND_HOST};
pub use registry::{InstanceRegistry, RegistrySettings, DEFAULT_TLS_DIR};
pub use types::{InstanceConfig, InstanceError, InstanceState, InstanceSummary};
