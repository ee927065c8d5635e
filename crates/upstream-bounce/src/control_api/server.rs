//! Control API listener.
//!
//! Every accepted connection gets its own task speaking HTTP/1.1, and every
//! request on it is dispatched through [`route_request`] against the shared
//! instance registry.

use crate::control_api::router::route_request;
use crate::instance::InstanceRegistry;
use crate::network::accept_retry_delay;
use anyhow::Context;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// The bounce manager's HTTP front end.
pub struct ControlServer {
    addr: SocketAddr,
    registry: Arc<InstanceRegistry>,
}

impl ControlServer {
    pub fn new(addr: SocketAddr, registry: Arc<InstanceRegistry>) -> Self {
        Self { addr, registry }
    }

    /// Resolve `host` (IP literal of either family, or a hostname) to the
    /// first address the resolver returns.
    pub async fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
        tokio::net::lookup_host((host, port))
            .await
            .with_context(|| format!("cannot resolve control host '{host}'"))?
            .next()
            .with_context(|| format!("no address found for control host '{host}'"))
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Bind the configured address and serve on it.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("cannot bind control API on {}", self.addr))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener. Only returns on a listener that
    /// cannot report its own address; accept failures are logged and retried.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let local = listener.local_addr()?;
        info!("Upstream bounce control API listening on http://{}", local);

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => self.spawn_connection(stream, peer),
                Err(e) => {
                    let delay = accept_retry_delay(&e);
                    warn!(
                        "Control API accept on {} failed: {} (retrying in {:?})",
                        local, e, delay
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let service = service_fn(move |req| route_request(req, Arc::clone(&registry)));
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Control API connection from {} ended: {}", peer, e);
            }
        });
    }
}
