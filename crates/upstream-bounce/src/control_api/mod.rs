//! Control API for the bounce manager.
//!
//! This module provides a small REST surface for test harnesses:
//! - Starting an upstream instance from a JSON config
//! - Stopping one instance by port
//! - Resetting (stopping) every instance
//! - Health and listing endpoints
//!
//! The API listens on a configurable port (default: 3000).

mod handlers;
mod router;
mod server;
pub(crate) mod types;

pub use server::ControlServer;
