//! Request handling for upstream instances.

use crate::control_api::types::{build_response, read_body, BodyError, MAX_BODY_BYTES};
use crate::echo::{parse_body, EchoResponder, ParsedBody, RequestSnapshot, Scheme};
use crate::routes::{RouteMatch, RouteTable};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Immutable per-instance state shared by every connection.
#[derive(Debug)]
pub struct InstanceContext {
    pub port: u16,
    pub scheme: Scheme,
    pub routes: RouteTable,
    pub responder: EchoResponder,
}

/// Handle a request to an instance
pub async fn handle_instance_request(
    req: Request<Incoming>,
    ctx: Arc<InstanceContext>,
    client_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, mut body) = req.into_parts();

    let resolved = ctx.routes.resolve(&parts.method, parts.uri.path());
    let Some(status) = resolved.echo_status() else {
        return Ok(build_response(StatusCode::OK, Bytes::new()));
    };
    let params = match resolved {
        RouteMatch::Matched { params, .. } => params,
        _ => BTreeMap::new(),
    };

    let bytes = match read_body(&mut body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(BodyError::TooLarge(limit)) => {
            warn!(
                "Body over {} bytes on port {} from {}",
                limit, ctx.port, client_addr
            );
            let snapshot = RequestSnapshot::capture(&parts, ctx.scheme, params, Value::Null);
            return Ok(ctx
                .responder
                .respond(StatusCode::PAYLOAD_TOO_LARGE, snapshot));
        }
        Err(e) => {
            debug!("{} from {}", e, client_addr);
            Bytes::new()
        }
    };

    // A body that claims to be JSON but isn't still gets the full echo, as a 400
    let (status, body_value) = match parse_body(&parts.headers, &bytes) {
        ParsedBody::Parsed(value) => (status, value),
        ParsedBody::Malformed(reason) => {
            warn!(
                "Malformed JSON body on port {} from {}: {}",
                ctx.port, client_addr, reason
            );
            (StatusCode::BAD_REQUEST, Value::Null)
        }
    };

    debug!(
        "{} {} on port {} -> {}",
        parts.method,
        parts.uri,
        ctx.port,
        status.as_u16()
    );

    let snapshot = RequestSnapshot::capture(&parts, ctx.scheme, params, body_value);
    Ok(ctx.responder.respond(status, snapshot))
}
