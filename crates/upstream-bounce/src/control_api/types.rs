//! Response types and helpers for the control API.

use crate::instance::InstanceSummary;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Largest request body either server buffers.
pub const MAX_BODY_BYTES: usize = 100 * 1024;

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("Request body exceeds {0} bytes")]
    TooLarge(usize),

    #[error("Failed to read request body: {0}")]
    Read(String),
}

impl BodyError {
    pub fn status(&self) -> StatusCode {
        match self {
            BodyError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            BodyError::Read(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Error body shared by every failing control call.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub errors: Vec<ErrorDetail>,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Response for `GET /servers`
#[derive(Debug, Serialize)]
pub struct ListServersResponse {
    pub servers: Vec<InstanceSummary>,
}

// =============================================================================
// Response helper functions
// =============================================================================

/// Pretty-printed JSON body with a JSON content type.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
    build_response_with_headers(status, [("Content-Type", "application/json")], json)
}

/// UTF-8 text body, used for the port returned by `/startServer`.
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    build_response_with_headers(status, [("Content-Type", "text/plain; charset=utf-8")], body)
}

/// Build an HTTP response with the given status and body.
///
/// Falls back to a bare 500 if the builder rejects its input.
pub fn build_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .unwrap_or_else(|_| internal_error_fallback())
}

/// Like [`build_response`], with extra headers.
pub fn build_response_with_headers(
    status: StatusCode,
    headers: impl IntoIterator<Item = (impl AsRef<str>, impl AsRef<str>)>,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(status);
    for (key, value) in headers {
        builder = builder.header(key.as_ref(), value.as_ref());
    }
    builder
        .body(Full::new(body.into()))
        .unwrap_or_else(|_| internal_error_fallback())
}

fn internal_error_fallback() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from("Internal Server Error")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

/// `{"errors": [{"code", "message"}]}` body with `status`.
pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let error = ErrorResponse {
        errors: vec![ErrorDetail {
            code: status.as_str().to_string(),
            message: message.to_string(),
        }],
    };
    json_response(status, &error)
}

/// 404 for any unknown control route.
pub fn not_found() -> Response<Full<Bytes>> {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

/// Buffer at most `limit` bytes of `body`.
///
/// The remainder of an oversized body is read and discarded, so the client
/// gets the 413 rather than a reset connection.
pub async fn read_body(body: &mut Incoming, limit: usize) -> Result<Bytes, BodyError> {
    match Limited::new(&mut *body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => {
            while let Some(frame) = body.frame().await {
                if frame.is_err() {
                    break;
                }
            }
            Err(BodyError::TooLarge(limit))
        }
        Err(e) => Err(BodyError::Read(e.to_string())),
    }
}

/// Read a control request body, capped at [`MAX_BODY_BYTES`].
pub async fn collect_body(req: Request<Incoming>) -> Result<Bytes, BodyError> {
    let mut body = req.into_body();
    read_body(&mut body, MAX_BODY_BYTES).await
}
