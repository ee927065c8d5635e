//! Echo payload construction.
//!
//! - `snapshot`: captures what an instance observed about one request
//! - `builder`: wraps a snapshot with cluster identity and writes the response

mod builder;
mod snapshot;

pub use builder::{EchoPayload, EchoResponder};
pub use snapshot::{parse_body, parse_cookies, parse_query, ParsedBody, RequestSnapshot, Scheme};
