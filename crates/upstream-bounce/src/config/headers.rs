//! Response header configuration.
//!
//! Headers are validated once, when the configuration is built, and kept as an
//! ordered list so they are applied to every response in the same order.

use super::ConfigError;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered `(name, value)` pairs set on every response an instance writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawResponseHeaders", into = "Map<String, Value>")]
pub struct ResponseHeaders(Vec<(HeaderName, HeaderValue)>);

/// Wire forms accepted in an instance config: a plain object, or a string
/// carrying one more JSON-encoded layer of that object.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawResponseHeaders {
    Map(Map<String, Value>),
    Encoded(String),
}

impl TryFrom<RawResponseHeaders> for ResponseHeaders {
    type Error = ConfigError;

    fn try_from(raw: RawResponseHeaders) -> Result<Self, Self::Error> {
        match raw {
            RawResponseHeaders::Map(map) => Self::from_map(&map),
            RawResponseHeaders::Encoded(text) => Self::from_encoded(&text),
        }
    }
}

impl From<ResponseHeaders> for Map<String, Value> {
    fn from(headers: ResponseHeaders) -> Self {
        headers
            .0
            .into_iter()
            .map(|(name, value)| {
                let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
                (name.as_str().to_string(), Value::String(value))
            })
            .collect()
    }
}

impl ResponseHeaders {
    /// Build from a decoded JSON object. Values must be scalars.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, ConfigError> {
        let mut pairs = Vec::with_capacity(map.len());
        for (name, value) in map {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(ConfigError::InvalidHeader {
                        name: name.clone(),
                        reason: format!("value must be a string, number or boolean, got {other}"),
                    })
                }
            };
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(&text).map_err(|e| ConfigError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            pairs.push((header_name, header_value));
        }
        Ok(Self(pairs))
    }

    /// Decode one JSON layer that must yield an object.
    pub fn from_encoded(text: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ConfigError::HeaderEncoding {
                layer: "inner",
                reason: e.to_string(),
            })?;
        match value {
            Value::Object(map) => Self::from_map(&map),
            other => Err(ConfigError::HeaderShape(json_kind(&other).to_string())),
        }
    }

    /// Decode the `RESPONSE_HEADERS` environment form: a JSON string literal
    /// whose content is itself a JSON-encoded object.
    pub fn from_double_encoded(raw: &str) -> Result<Self, ConfigError> {
        let inner: String =
            serde_json::from_str(raw).map_err(|e| ConfigError::HeaderEncoding {
                layer: "outer",
                reason: e.to_string(),
            })?;
        Self::from_encoded(&inner)
    }

    /// Set every configured header, in order. Later duplicates overwrite earlier ones.
    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.0 {
            headers.insert(name.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.0.iter().map(|(n, v)| (n, v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
