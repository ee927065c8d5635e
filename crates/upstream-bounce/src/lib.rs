//! Fake upstream servers for reverse-proxy testing.
//!
//! Two roles live in this crate:
//! - an echo upstream that answers every request with a JSON description of
//!   what it received, tagged with the cluster and instance that served it;
//! - a bounce manager that starts, stops and resets such upstreams on demand
//!   through a small control API.

pub mod config;
pub mod control_api;
pub mod echo;
pub mod instance;
pub mod routes;
pub mod tls;

mod network;

pub use control_api::ControlServer;
pub use instance::{InstanceConfig, InstanceError, InstanceRegistry, RegistrySettings};
