//! Echo response building.

use super::snapshot::RequestSnapshot;
use crate::config::ResponseHeaders;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};

/// JSON body every instance answers with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoPayload {
    pub cluster: String,
    pub instance: i64,
    pub request: RequestSnapshot,
}

/// Identity and header settings an instance stamps on every response.
#[derive(Debug, Clone)]
pub struct EchoResponder {
    cluster: String,
    instance: i64,
    headers: ResponseHeaders,
}

impl EchoResponder {
    pub fn new(cluster: impl Into<String>, instance: i64, headers: Option<ResponseHeaders>) -> Self {
        Self {
            cluster: cluster.into(),
            instance,
            headers: headers.unwrap_or_default(),
        }
    }

    pub fn payload(&self, request: RequestSnapshot) -> EchoPayload {
        EchoPayload {
            cluster: self.cluster.clone(),
            instance: self.instance,
            request,
        }
    }

    /// Build the full response: configured headers first, then status and body.
    pub fn respond(&self, status: StatusCode, request: RequestSnapshot) -> Response<Full<Bytes>> {
        let body = serde_json::to_vec(&self.payload(request)).unwrap_or_else(|_| b"{}".to_vec());

        let mut response = Response::new(Full::new(Bytes::from(body)));
        self.headers.apply(response.headers_mut());
        response
            .headers_mut()
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/json; charset=utf-8"));
        *response.status_mut() = status;
        response
    }
}
