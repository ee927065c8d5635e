//! Instance handlers: start, stop, reset, list.

use crate::control_api::types::*;
use crate::instance::{InstanceConfig, InstanceError, InstanceRegistry};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Body forms accepted by `POST /stopServer`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StopRequest {
    Port(u16),
    Text(String),
    Object { port: PortField },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortField {
    Number(u16),
    Text(String),
}

fn parse_port_text(text: &str) -> Result<u16, String> {
    text.trim()
        .parse()
        .map_err(|_| format!("Invalid port number: {text}"))
}

/// Extract the port from a stop request body.
pub(crate) fn parse_stop_port(body: &[u8]) -> Result<u16, String> {
    let request: StopRequest =
        serde_json::from_slice(body).map_err(|e| format!("Invalid stop request: {e}"))?;
    match request {
        StopRequest::Port(port) | StopRequest::Object { port: PortField::Number(port) } => {
            Ok(port)
        }
        StopRequest::Text(text) | StopRequest::Object { port: PortField::Text(text) } => {
            parse_port_text(&text)
        }
    }
}

/// Map an instance error to its HTTP status.
pub(crate) fn error_status(err: &InstanceError) -> StatusCode {
    match err {
        InstanceError::Config(_) => StatusCode::BAD_REQUEST,
        InstanceError::NotFound(_) => StatusCode::NOT_FOUND,
        InstanceError::Tls(_)
        | InstanceError::BindError(..)
        | InstanceError::AlreadyClosed(_)
        | InstanceError::InvalidTransition { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn instance_error_response(err: &InstanceError) -> Response<Full<Bytes>> {
    error_response(error_status(err), &err.to_string())
}

/// POST /startServer - Start an instance, answer with its port
pub async fn handle_start(
    req: Request<Incoming>,
    registry: Arc<InstanceRegistry>,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(e.status(), &e.to_string()),
    };

    let config: InstanceConfig = match serde_json::from_slice(&body) {
        Ok(c) => c,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid instance JSON: {e}"),
            )
        }
    };

    // Runs detached so a client hanging up mid-retry does not abandon the bind
    let created = tokio::spawn(async move { registry.create(config).await }).await;

    match created {
        Ok(Ok(port)) => {
            info!("Started instance on port {}", port);
            text_response(StatusCode::OK, port.to_string())
        }
        Ok(Err(e)) => {
            warn!("Failed to start instance: {}", e);
            instance_error_response(&e)
        }
        Err(e) => {
            error!("Instance start task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// POST /stopServer - Stop the instance on the given port
pub async fn handle_stop(
    req: Request<Incoming>,
    registry: Arc<InstanceRegistry>,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(e.status(), &e.to_string()),
    };

    let port = match parse_stop_port(&body) {
        Ok(p) => p,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };

    match registry.stop_by_port(port).await {
        Ok(_) => build_response(StatusCode::OK, Bytes::new()),
        Err(e) => instance_error_response(&e),
    }
}

/// POST /reset - Stop every instance
pub async fn handle_reset(registry: Arc<InstanceRegistry>) -> Response<Full<Bytes>> {
    let closed = registry.reset_all().await;
    info!("Reset closed {} instances", closed);
    build_response(StatusCode::OK, Bytes::new())
}

/// GET /servers - List running instances
pub fn handle_list(registry: Arc<InstanceRegistry>) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &ListServersResponse {
            servers: registry.list(),
        },
    )
}
