//! Route dispatch logic for the control API.

use crate::control_api::handlers::{instances, system};
use crate::control_api::types::not_found;
use crate::instance::InstanceRegistry;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::debug;

/// Control endpoints, resolved from method and path.
#[derive(Debug, PartialEq, Eq)]
enum ControlRoute {
    StartServer,
    StopServer,
    Reset,
    Health,
    ListServers,
}

impl ControlRoute {
    fn parse(method: &Method, path: &str) -> Option<Self> {
        match (method, path) {
            (&Method::POST, "/startServer") => Some(ControlRoute::StartServer),
            (&Method::POST, "/stopServer") => Some(ControlRoute::StopServer),
            (&Method::POST, "/reset") => Some(ControlRoute::Reset),
            (&Method::GET, "/health") => Some(ControlRoute::Health),
            (&Method::GET, "/servers") => Some(ControlRoute::ListServers),
            _ => None,
        }
    }
}

/// Main request router
pub async fn route_request(
    req: Request<Incoming>,
    registry: Arc<InstanceRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    debug!("Control API: {} {}", req.method(), req.uri().path());

    let Some(route) = ControlRoute::parse(req.method(), req.uri().path()) else {
        return Ok(not_found());
    };

    let response = match route {
        ControlRoute::StartServer => instances::handle_start(req, registry).await,
        ControlRoute::StopServer => instances::handle_stop(req, registry).await,
        ControlRoute::Reset => instances::handle_reset(registry).await,
        ControlRoute::Health => system::handle_health(),
        ControlRoute::ListServers => instances::handle_list(registry),
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_route_parse() {
        assert_eq!(
            ControlRoute::parse(&Method::POST, "/startServer"),
            Some(ControlRoute::StartServer)
        );
        assert_eq!(
            ControlRoute::parse(&Method::POST, "/stopServer"),
            Some(ControlRoute::StopServer)
        );
        assert_eq!(
            ControlRoute::parse(&Method::POST, "/reset"),
            Some(ControlRoute::Reset)
        );
        assert_eq!(
            ControlRoute::parse(&Method::GET, "/health"),
            Some(ControlRoute::Health)
        );
        assert_eq!(
            ControlRoute::parse(&Method::GET, "/servers"),
            Some(ControlRoute::ListServers)
        );
    }

    #[test]
    fn test_control_route_wrong_method_or_path() {
        assert_eq!(ControlRoute::parse(&Method::GET, "/startServer"), None);
        assert_eq!(ControlRoute::parse(&Method::POST, "/health"), None);
        assert_eq!(ControlRoute::parse(&Method::GET, "/"), None);
        assert_eq!(ControlRoute::parse(&Method::POST, "/startserver"), None);
    }
}
