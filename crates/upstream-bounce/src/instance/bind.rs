//! Port binding with retry.
//!
//! Instance creation can race with other instances releasing the same port
//! during test teardown, so an address-in-use failure is not final: the binder
//! waits a fixed delay and tries the same port again. Any other failure ends
//! the attempt.

use super::types::{InstanceError, InstanceState};
use crate::network::bind_listener;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, warn};

/// Default pause between attempts while a port is in use.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// How long and how often to retry an address-in-use bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// `None` retries until the port frees up or a different error occurs
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RETRY_DELAY,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }
}

/// Drives one socket through `Unbound -> Binding -> Listening`, or to `Closed`
/// when binding fails for good.
#[derive(Debug)]
pub struct PortBinder {
    addr: SocketAddr,
    policy: RetryPolicy,
    state: InstanceState,
    attempts: u32,
}

impl PortBinder {
    pub fn new(addr: SocketAddr, policy: RetryPolicy) -> Self {
        Self {
            addr,
            policy,
            state: InstanceState::Unbound,
            attempts: 0,
        }
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn transition(&mut self, next: InstanceState) -> Result<(), InstanceError> {
        if !self.state.can_transition_to(next) {
            return Err(InstanceError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("Binder for {}: {} -> {}", self.addr, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Bind the listener, retrying while the address is in use.
    pub async fn bind(&mut self) -> Result<TcpListener, InstanceError> {
        self.transition(InstanceState::Binding)?;
        let port = self.addr.port();

        loop {
            self.attempts += 1;
            match bind_listener(self.addr) {
                Ok(listener) => {
                    self.transition(InstanceState::Listening)?;
                    return Ok(listener);
                }
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    if let Some(max) = self.policy.max_attempts {
                        if self.attempts >= max {
                            self.transition(InstanceState::Closed)?;
                            return Err(InstanceError::BindError(
                                port,
                                format!("address still in use after {} attempts", self.attempts),
                            ));
                        }
                    }
                    if self.attempts == 1 {
                        warn!("Address {} in use, retrying...", self.addr);
                    } else {
                        debug!("Address {} in use (attempt {})", self.addr, self.attempts);
                    }
                    tokio::time::sleep(self.policy.delay).await;
                }
                Err(e) => {
                    self.transition(InstanceState::Closed)?;
                    return Err(InstanceError::BindError(port, e.to_string()));
                }
            }
        }
    }
}
