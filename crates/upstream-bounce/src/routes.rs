//! Path routing for upstream instances.
//!
//! Patterns follow Express 4 path syntax:
//! - `:name` captures up to the next `/` (or `.` when the param follows a `.`);
//! - `:name?` makes the param and its leading separator optional;
//! - `:name(\d+)` restricts the capture with a custom regex;
//! - a bare `*` anywhere captures greedily into `params["0"]`, `params["1"]`, ...
//!
//! Each pattern is compiled once into an anchored, case-insensitive regex that
//! tolerates one trailing slash. Patterns are tried in the order they were
//! supplied and the first match wins. Anything left unmatched falls through to
//! the 404 echo.

use hyper::{Method, StatusCode};
use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("Invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Outcome of resolving one request against the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatch<'a> {
    /// Reserved readiness path: bare 200, no echo
    HealthCheck,
    /// An explicit pattern matched
    Matched {
        status: StatusCode,
        pattern: &'a str,
        params: BTreeMap<String, String>,
    },
    /// Catch-all 404 echo
    Fallback,
}

impl RouteMatch<'_> {
    /// Status the echo handler answers with, `None` for the health check.
    pub fn echo_status(&self) -> Option<StatusCode> {
        match self {
            RouteMatch::HealthCheck => None,
            RouteMatch::Matched { status, .. } => Some(*status),
            RouteMatch::Fallback => Some(StatusCode::NOT_FOUND),
        }
    }
}

/// One pattern compiled to a regex. Capture group `p{i}` holds `keys[i]`.
#[derive(Debug)]
struct CompiledRoute {
    pattern: String,
    regex: Regex,
    keys: Vec<String>,
}

impl CompiledRoute {
    fn compile(pattern: &str) -> Result<Self, RouteError> {
        let (source, keys) = pattern_to_regex(pattern);
        let regex = RegexBuilder::new(&source)
            .case_insensitive(true)
            .build()
            .map_err(|e| RouteError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            keys,
        })
    }

    fn captures(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let caps = self.regex.captures(path)?;
        let params = self
            .keys
            .iter()
            .enumerate()
            .filter_map(|(i, key)| {
                // Optional params that did not participate are left out
                let value = caps.name(&group_name(i))?.as_str();
                let value = urlencoding::decode(value)
                    .map(|d| d.into_owned())
                    .unwrap_or_else(|_| value.to_string());
                Some((key.clone(), value))
            })
            .collect();
        Some(params)
    }
}

/// Ordered set of patterns bound to one fixed status.
#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
    status: StatusCode,
    health_check: Option<String>,
}

impl RouteTable {
    /// Compile `patterns`; every method on a matching path answers with `status`.
    pub fn install(
        patterns: &[String],
        status: StatusCode,
        health_check: Option<String>,
    ) -> Result<Self, RouteError> {
        let routes = patterns
            .iter()
            .map(|p| CompiledRoute::compile(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            routes,
            status,
            health_check,
        })
    }

    pub fn resolve(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        if let Some(ref health) = self.health_check {
            let readiness_method = *method == Method::GET || *method == Method::HEAD;
            if readiness_method && path.eq_ignore_ascii_case(health) {
                return RouteMatch::HealthCheck;
            }
        }

        for route in &self.routes {
            if let Some(params) = route.captures(path) {
                return RouteMatch::Matched {
                    status: self.status,
                    pattern: &route.pattern,
                    params,
                };
            }
        }

        RouteMatch::Fallback
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn group_name(index: usize) -> String {
    format!("p{index}")
}

/// Parsed `:name(capture)*?` token.
struct ParamToken {
    name: String,
    capture: Option<String>,
    star: bool,
    optional: bool,
    /// Index just past the token
    end: usize,
}

/// Parse a param token whose `:` sits at `colon`.
fn parse_param(chars: &[char], colon: usize) -> Option<ParamToken> {
    let mut i = colon + 1;
    let name: String = chars[i..]
        .iter()
        .take_while(|c| c.is_ascii_alphanumeric() || **c == '_')
        .collect();
    if name.is_empty() {
        return None;
    }
    i += name.len();

    let mut capture = None;
    if chars.get(i) == Some(&'(') {
        if let Some(close) = chars[i..].iter().position(|c| *c == ')') {
            capture = Some(chars[i + 1..i + close].iter().collect());
            i += close + 1;
        }
    }

    let star = chars.get(i) == Some(&'*');
    if star {
        i += 1;
    }
    let optional = chars.get(i) == Some(&'?');
    if optional {
        i += 1;
    }

    Some(ParamToken {
        name,
        capture,
        star,
        optional,
        end: i,
    })
}

/// Translate an Express path into regex source and its ordered param names.
///
/// `/`, `.` and other literal characters are escaped, while `?`, `+` and
/// parentheses keep their regex meaning as they do in Express.
fn pattern_to_regex(pattern: &str) -> (String, Vec<String>) {
    let chars: Vec<char> = pattern.chars().collect();
    let mut source = String::from("^");
    let mut keys = Vec::new();
    let mut stars = 0usize;
    let mut i = 0;

    while i < chars.len() {
        // A param swallows the `/` and/or `.` directly in front of it
        let lead = match (chars[i], chars.get(i + 1), chars.get(i + 2)) {
            ('/', Some('.'), Some(':')) => Some((true, true, i + 2)),
            ('/', Some(':'), _) => Some((true, false, i + 1)),
            ('.', Some(':'), _) => Some((false, true, i + 1)),
            (':', _, _) => Some((false, false, i)),
            _ => None,
        };

        if let Some((slash, format, colon)) = lead {
            if let Some(param) = parse_param(&chars, colon) {
                let slash = if slash { "/" } else { "" };
                let format = if format { "\\." } else { "" };
                let group = group_name(keys.len());
                let capture = param
                    .capture
                    .unwrap_or_else(|| format!("[^/{format}]+?"));

                if !param.optional {
                    source.push_str(slash);
                }
                source.push_str("(?:");
                source.push_str(format);
                if param.optional {
                    source.push_str(slash);
                }
                source.push_str(&format!("(?P<{group}>{capture})"));
                if param.star {
                    source.push_str(&format!("(?:[/{format}].+?)?"));
                }
                source.push(')');
                if param.optional {
                    source.push('?');
                }

                keys.push(param.name);
                i = param.end;
                continue;
            }
        }

        match chars[i] {
            '*' => {
                source.push_str(&format!("(?P<{}>.*)", group_name(keys.len())));
                keys.push(stars.to_string());
                stars += 1;
            }
            '(' => source.push_str("(?:"),
            c @ (')' | '?' | '+') => source.push(c),
            c => source.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
        i += 1;
    }

    // Non-strict routing: one trailing slash is optional
    if pattern.ends_with('/') {
        source.push('?');
    } else {
        source.push_str("/?");
    }
    source.push('$');

    (source, keys)
}
