//! Forward/download request payloads and their validation.
//!
//! Payloads are checked completely before the session or the network is
//! touched; every problem surfaces as a 400.

use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use url::Url;

use crate::error::ApiError;
use crate::session::{HeaderSet, StoredCookie};

/// Methods the proxy will forward.
pub const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Bounds for the per-call timeout, in seconds.
pub const TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=300;

const COOKIE_FIELDS: [&str; 3] = ["value", "domain", "path"];

/// Body of `/forward`, `/download` and `/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardPayload {
    /// Destination URL.
    pub url: String,
    /// GET unless the endpoint supplies another default.
    #[serde(default)]
    pub method: Option<String>,
    /// Query string parameters.
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
    /// Form object or raw string body.
    #[serde(default)]
    pub data: Option<Value>,
    /// JSON body, ignored when `data` is present.
    #[serde(default)]
    pub json_data: Option<Value>,
    /// Per-call header overrides.
    #[serde(default)]
    pub headers: Option<Map<String, Value>>,
    /// Cookies to inject into the session before the call, keyed by name.
    #[serde(default)]
    pub cookies: Option<Map<String, Value>>,
    /// Timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default = "default_true")]
    pub allow_redirects: bool,
}

const DEFAULT_METHOD: &str = "GET";

fn default_true() -> bool {
    true
}

/// Request body to send upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundBody {
    Empty,
    Form(Vec<(String, String)>),
    Raw(String),
    Json(Value),
}

impl OutboundBody {
    /// Approximate serialized size, reported back in `request_info`.
    pub fn size_hint(&self) -> usize {
        match self {
            OutboundBody::Empty => 0,
            OutboundBody::Form(pairs) => pairs.iter().map(|(k, v)| k.len() + v.len() + 2).sum(),
            OutboundBody::Raw(s) => s.len(),
            OutboundBody::Json(v) => v.to_string().len(),
        }
    }
}

/// A validated outbound call.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// Target with `params` already applied to the query string.
    pub url: Url,
    /// URL as supplied by the caller.
    pub original_url: String,
    pub headers: HeaderSet,
    pub cookies: Vec<StoredCookie>,
    pub body: OutboundBody,
    pub timeout_secs: u64,
    pub allow_redirects: bool,
}

impl OutboundRequest {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ForwardPayload {
    /// Use `method` when the caller sent none.
    pub fn with_default_method(mut self, method: &str) -> Self {
        self.method.get_or_insert_with(|| method.to_string());
        self
    }

    /// Validate into an outbound request. `default_timeout` applies when the
    /// payload carries none.
    pub fn validate(self, default_timeout: u64) -> Result<OutboundRequest, ApiError> {
        let method = validate_method(self.method.as_deref().unwrap_or(DEFAULT_METHOD))?;
        let mut url = validate_url(&self.url)?;

        let timeout_secs = self.timeout.unwrap_or(default_timeout);
        if !TIMEOUT_RANGE.contains(&timeout_secs) {
            return Err(ApiError::Validation(format!(
                "Timeout must be between {} and {} seconds",
                TIMEOUT_RANGE.start(),
                TIMEOUT_RANGE.end()
            )));
        }

        if let Some(params) = &self.params {
            let pairs = flatten_pairs("params", params)?;
            if !pairs.is_empty() {
                url.query_pairs_mut().extend_pairs(pairs);
            }
        }

        let headers = match &self.headers {
            Some(map) => string_headers(map)?,
            None => HeaderSet::new(),
        };

        let cookies = match &self.cookies {
            Some(map) => validate_cookies(map)?,
            None => Vec::new(),
        };

        let body = match (self.data, self.json_data) {
            (Some(Value::Object(form)), _) => OutboundBody::Form(flatten_pairs("data", &form)?),
            (Some(Value::String(raw)), _) => OutboundBody::Raw(raw),
            (Some(Value::Null), json) | (None, json) => match json {
                Some(Value::Null) | None => OutboundBody::Empty,
                Some(json) => OutboundBody::Json(json),
            },
            (Some(_), _) => {
                return Err(ApiError::Validation(
                    "Field 'data' must be an object or a string".to_string(),
                ))
            }
        };

        Ok(OutboundRequest {
            method,
            url,
            original_url: self.url,
            headers,
            cookies,
            body,
            timeout_secs,
            allow_redirects: self.allow_redirects,
        })
    }
}

/// Normalize to upper case and check against [`ALLOWED_METHODS`].
pub fn validate_method(method: &str) -> Result<Method, ApiError> {
    let upper = method.trim().to_ascii_uppercase();
    if !ALLOWED_METHODS.contains(&upper.as_str()) {
        return Err(ApiError::Validation(format!(
            "Invalid HTTP method. Must be one of: {}",
            ALLOWED_METHODS.join(", ")
        )));
    }
    Method::from_bytes(upper.as_bytes()).map_err(|e| ApiError::Validation(e.to_string()))
}

/// Require an absolute http(s) URL.
pub fn validate_url(url: &str) -> Result<Url, ApiError> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ApiError::Validation(
            "URL must start with http:// or https://".to_string(),
        ));
    }
    Url::parse(url).map_err(|e| ApiError::Validation(format!("Invalid URL '{url}': {e}")))
}

/// Validate a string → string header object.
pub fn string_headers(map: &Map<String, Value>) -> Result<HeaderSet, ApiError> {
    let mut pairs = Vec::with_capacity(map.len());
    for (name, value) in map {
        match value {
            Value::String(v) => pairs.push((name.clone(), v.clone())),
            _ => {
                return Err(ApiError::Validation(format!(
                    "Header '{name}' must have a string value"
                )))
            }
        }
    }
    HeaderSet::try_from_pairs(pairs).map_err(|e| ApiError::Validation(e.to_string()))
}

fn validate_cookies(map: &Map<String, Value>) -> Result<Vec<StoredCookie>, ApiError> {
    let mut cookies = Vec::with_capacity(map.len());
    for (name, entry) in map {
        let Value::Object(fields) = entry else {
            return Err(ApiError::Validation(format!(
                "Cookie value for \"{name}\" must be a dictionary"
            )));
        };
        if fields.len() != COOKIE_FIELDS.len() || !COOKIE_FIELDS.iter().all(|f| fields.contains_key(*f)) {
            return Err(ApiError::Validation(format!(
                "Cookie \"{name}\" must have keys: {}",
                COOKIE_FIELDS.join(", ")
            )));
        }
        let mut values = [""; 3];
        for (slot, field) in values.iter_mut().zip(COOKIE_FIELDS) {
            match fields.get(field) {
                Some(Value::String(s)) => *slot = s.as_str(),
                _ => {
                    return Err(ApiError::Validation(format!(
                        "Cookie \"{name}\" field \"{field}\" must be a string"
                    )))
                }
            }
        }
        let [value, domain, path] = values;
        cookies.push(StoredCookie::new(name.clone(), value, domain, path));
    }
    Ok(cookies)
}

/// Turn a JSON object into key/value pairs: scalars stringified, arrays
/// expanded into repeated keys, nulls skipped.
fn flatten_pairs(field: &str, map: &Map<String, Value>) -> Result<Vec<(String, String)>, ApiError> {
    let mut pairs = Vec::new();
    for (key, value) in map {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = scalar(item) {
                        pairs.push((key.clone(), s));
                    } else if !item.is_null() {
                        return Err(nested(field, key));
                    }
                }
            }
            other => match scalar(other) {
                Some(s) => pairs.push((key.clone(), s)),
                None => return Err(nested(field, key)),
            },
        }
    }
    Ok(pairs)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn nested(field: &str, key: &str) -> ApiError {
    ApiError::Validation(format!("Field '{field}.{key}' must be a scalar or a list of scalars"))
}
