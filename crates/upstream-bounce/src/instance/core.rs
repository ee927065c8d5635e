//! Core UpstreamInstance struct and its serving loop.

use super::bind::{PortBinder, RetryPolicy};
use super::handler::{handle_instance_request, InstanceContext};
use super::types::{InstanceConfig, InstanceError, InstanceState, InstanceSummary};
use crate::echo::{EchoResponder, Scheme};
use crate::network::accept_retry_delay;
use crate::routes::RouteTable;
use crate::tls::TlsCredentials;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

/// Bind address used when the config leaves `host` unset.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// One running fake upstream server.
///
/// Dropping an instance without calling [`UpstreamInstance::stop`] still shuts
/// the server down, since the accept loop exits once the shutdown sender is gone.
pub struct UpstreamInstance {
    config: InstanceConfig,
    port: u16,
    scheme: Scheme,
    state: Mutex<InstanceState>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for UpstreamInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamInstance")
            .field("port", &self.port)
            .field("scheme", &self.scheme)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl UpstreamInstance {
    /// Validate `config`, bind its port (retrying while in use) and start serving.
    ///
    /// Everything that can be checked without the network is checked before
    /// binding, so a bad pattern or missing certificate never holds a port.
    pub async fn start(
        config: InstanceConfig,
        tls: &TlsCredentials,
        policy: RetryPolicy,
    ) -> Result<Self, InstanceError> {
        let status = StatusCode::from_u16(config.response_code).map_err(|_| {
            InstanceError::Config(format!("Invalid response code {}", config.response_code))
        })?;
        let routes = RouteTable::install(
            config.matching_paths.as_slice(),
            status,
            config.health_check_path.clone(),
        )?;
        let responder = EchoResponder::new(
            config.cluster_name.clone(),
            config.instance_number,
            config.response_headers.clone(),
        );

        let scheme = config.scheme();
        let tls_acceptor = match scheme {
            Scheme::Https => Some(
                tls.acceptor()
                    .map_err(|e| InstanceError::Tls(e.to_string()))?,
            ),
            Scheme::Http => None,
        };

        let addr = resolve_bind_addr(&config).await?;
        let mut binder = PortBinder::new(addr, policy);
        let listener = binder.bind().await?;
        let port = listener
            .local_addr()
            .map_err(|e| InstanceError::BindError(config.port, e.to_string()))?
            .port();

        info!(
            "Instance {} of cluster '{}' listening on {}://{}:{} ({} path patterns)",
            config.instance_number,
            config.cluster_name,
            scheme,
            addr.ip(),
            port,
            routes.len()
        );

        let ctx = Arc::new(InstanceContext {
            port,
            scheme,
            routes,
            responder,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, ctx, tls_acceptor, shutdown_rx));

        Ok(Self {
            config,
            port,
            scheme,
            state: Mutex::new(binder.state()),
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn state(&self) -> InstanceState {
        *self.state.lock()
    }

    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            port: self.port,
            protocol: self.scheme,
            cluster_name: self.config.cluster_name.clone(),
            instance_number: self.config.instance_number,
            matching_paths: self.config.matching_paths.clone(),
            response_code: self.config.response_code,
        }
    }

    /// Move to `Closed` and signal the accept loop and open connections.
    ///
    /// Returns the serving task so the caller can wait for the listener to be
    /// released outside of any lock it holds.
    pub(crate) fn signal_close(&self) -> Result<Option<JoinHandle<()>>, InstanceError> {
        {
            let mut state = self.state.lock();
            if *state == InstanceState::Closed {
                return Err(InstanceError::AlreadyClosed(self.port));
            }
            if !state.can_transition_to(InstanceState::Closed) {
                return Err(InstanceError::InvalidTransition {
                    from: *state,
                    to: InstanceState::Closed,
                });
            }
            *state = InstanceState::Closed;
        }
        // Receivers may already be gone if the accept loop died; nothing to signal then
        let _ = self.shutdown_tx.send(true);
        Ok(self.task.lock().take())
    }

    /// Stop serving and wait until the port is released.
    pub async fn stop(&self) -> Result<(), InstanceError> {
        let task = self.signal_close()?;
        wait_for_shutdown(self.port, task).await;
        Ok(())
    }
}

/// Wait for a serving task returned by `signal_close`.
pub(crate) async fn wait_for_shutdown(port: u16, task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        if let Err(e) = task.await {
            error!("Instance on port {} did not shut down cleanly: {}", port, e);
        }
    }
}

async fn resolve_bind_addr(config: &InstanceConfig) -> Result<SocketAddr, InstanceError> {
    let host = config.host.as_deref().unwrap_or(DEFAULT_BIND_HOST);
    tokio::net::lookup_host((host, config.port))
        .await
        .map_err(|e| InstanceError::BindError(config.port, format!("cannot resolve '{host}': {e}")))?
        .next()
        .ok_or_else(|| {
            InstanceError::BindError(config.port, format!("no address found for '{host}'"))
        })
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<InstanceContext>,
    tls_acceptor: Option<TlsAcceptor>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let port = ctx.port;
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let ctx = Arc::clone(&ctx);
                        let shutdown = shutdown_rx.clone();
                        let tls_acceptor = tls_acceptor.clone();
                        tokio::spawn(async move {
                            match tls_acceptor {
                                Some(acceptor) => match acceptor.accept(stream).await {
                                    Ok(tls_stream) => {
                                        serve_connection(TokioIo::new(tls_stream), ctx, shutdown, addr).await
                                    }
                                    Err(e) => debug!("TLS handshake failed from {}: {}", addr, e),
                                },
                                None => serve_connection(TokioIo::new(stream), ctx, shutdown, addr).await,
                            }
                        });
                    }
                    Err(e) => {
                        let delay = accept_retry_delay(&e);
                        error!("Accept error on port {}: {} (retrying in {:?})", port, e, delay);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                info!("Instance on port {} shutting down", port);
                break;
            }
        }
    }
}

async fn serve_connection<I>(
    io: TokioIo<I>,
    ctx: Arc<InstanceContext>,
    mut shutdown: watch::Receiver<bool>,
    client_addr: SocketAddr,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let port = ctx.port;
    let service = service_fn(move |req| {
        let ctx = Arc::clone(&ctx);
        async move { handle_instance_request(req, ctx, client_addr).await }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!("Connection error on port {}: {}", port, e);
            }
        }
        _ = shutdown.changed() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                debug!("Connection error during shutdown on port {}: {}", port, e);
            }
        }
    }
}
