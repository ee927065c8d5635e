//! System handlers.

use crate::control_api::types::build_response;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};

/// GET /health - Liveness of the control server itself
pub fn handle_health() -> Response<Full<Bytes>> {
    build_response(StatusCode::OK, Bytes::new())
}
