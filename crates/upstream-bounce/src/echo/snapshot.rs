//! Request snapshot capture.

use hyper::header::{HeaderMap, CONTENT_TYPE, COOKIE, HOST};
use hyper::http::request::Parts;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Transport scheme an instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an instance observed about one inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    pub base_url: String,
    pub body: Value,
    pub cookies: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub hostname: Option<String>,
    pub url_to_rp: Option<String>,
    pub url_to_application: String,
    pub params: BTreeMap<String, String>,
    pub path: String,
    pub protocol: Scheme,
    pub query: Map<String, Value>,
    pub secure: bool,
    pub signed_cookies: BTreeMap<String, String>,
    pub xhr: bool,
}

impl RequestSnapshot {
    /// Capture a snapshot from the request head, route captures and parsed body.
    pub fn capture(
        parts: &Parts,
        scheme: Scheme,
        params: BTreeMap<String, String>,
        body: Value,
    ) -> Self {
        let host = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()));

        let original_url = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let url_to_application = format!(
            "{}://{}{}",
            scheme,
            host.as_deref().unwrap_or(""),
            original_url
        );

        let xhr = parts
            .headers
            .get("x-requested-with")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("xmlhttprequest"))
            .unwrap_or(false);

        Self {
            base_url: String::new(),
            body,
            cookies: parse_cookies(&parts.headers),
            headers: flatten_headers(&parts.headers),
            hostname: host.as_deref().map(strip_port),
            url_to_rp: host,
            url_to_application,
            params,
            path: parts.uri.path().to_string(),
            protocol: scheme,
            query: parse_query(parts.uri.query().unwrap_or("")),
            secure: scheme == Scheme::Https,
            // No signing secret is configured, so nothing verifies as signed
            signed_cookies: BTreeMap::new(),
            xhr,
        }
    }
}

/// Result of decoding a request body according to its content type.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    Parsed(Value),
    /// Declared as JSON but failed to parse
    Malformed(String),
}

/// Decode a body: JSON and urlencoded forms are parsed, anything else is text.
/// An empty body is an empty object.
pub fn parse_body(headers: &HeaderMap, bytes: &[u8]) -> ParsedBody {
    if bytes.is_empty() {
        return ParsedBody::Parsed(Value::Object(Map::new()));
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(';')
                .next()
                .unwrap_or("")
                .trim()
                .to_ascii_lowercase()
        })
        .unwrap_or_default();

    if content_type == "application/json" || content_type.ends_with("+json") {
        match serde_json::from_slice(bytes) {
            Ok(value) => ParsedBody::Parsed(value),
            Err(e) => ParsedBody::Malformed(e.to_string()),
        }
    } else if content_type == "application/x-www-form-urlencoded" {
        ParsedBody::Parsed(Value::Object(parse_query(&String::from_utf8_lossy(bytes))))
    } else {
        ParsedBody::Parsed(Value::String(String::from_utf8_lossy(bytes).into_owned()))
    }
}

/// Parse all `Cookie` headers. The first occurrence of a name wins.
pub fn parse_cookies(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            cookies
                .entry(name.to_string())
                .or_insert_with(|| decode_component(value));
        }
    }
    cookies
}

/// Parse a query string. Repeated keys collect into an array.
pub fn parse_query(query: &str) -> Map<String, Value> {
    let mut out = Map::new();
    for pair in query.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_form(key);
        let value = Value::String(decode_form(value));
        match out.get_mut(&key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                out.insert(key, value);
            }
        }
    }
    out
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        out.insert(name.as_str().to_string(), joined);
    }
    out
}

fn strip_port(host: &str) -> String {
    if host.starts_with('[') {
        // IPv6 literal, keep the brackets
        return match host.find(']') {
            Some(end) => host[..=end].to_string(),
            None => host.to_string(),
        };
    }
    host.split(':').next().unwrap_or(host).to_string()
}

fn decode_component(s: &str) -> String {
    urlencoding::decode(s)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

fn decode_form(s: &str) -> String {
    decode_component(&s.replace('+', " "))
}
