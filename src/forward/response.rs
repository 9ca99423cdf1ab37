//! Normalized view of a target response.

use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::session::StoredCookie;

/// Filename used when the target gives none.
pub const DEFAULT_FILENAME: &str = "downloaded_file";

/// Content type used for downloads when the target gives none.
pub const DEFAULT_DOWNLOAD_TYPE: &str = "application/octet-stream";

/// Body of a successful `/forward` reply.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedResponse {
    pub status: String,
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    /// Cookies set by the target during this call, across all hops.
    pub cookies: Vec<StoredCookie>,
    /// The session jar after the call.
    pub session_cookies: Vec<StoredCookie>,
    pub url: String,
    /// Seconds, rounded to milliseconds.
    pub elapsed: f64,
    pub encoding: Option<String>,
    pub ok: bool,
    pub history: Vec<String>,
    pub content_type: String,
    pub body: String,
    pub request_info: RequestInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestInfo {
    pub method: String,
    pub original_url: String,
    pub final_url: String,
    pub redirects_count: usize,
    pub request_size_bytes: usize,
    pub response_size_bytes: usize,
}

/// Flatten a header map; repeated names are joined with `", "`.
pub fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    flat
}

pub fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
}

/// `charset` parameter of a content type, lowercased.
pub fn charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
            .filter(|v| !v.is_empty())
    })
}

static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"filename="?([^";]+)"?"#).expect("FILENAME_RE should compile"));

/// Filename from a `Content-Disposition` value, or [`DEFAULT_FILENAME`].
pub fn filename_from_disposition(disposition: Option<&str>) -> String {
    disposition
        .and_then(|value| FILENAME_RE.captures(value))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
}

/// Seconds with millisecond precision.
pub fn round_secs(elapsed: std::time::Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, SET_COOKIE};
    use std::time::Duration;

    #[test]
    fn test_filename_extraction() {
        assert_eq!(filename_from_disposition(Some(r#"attachment; filename="report.pdf""#)), "report.pdf");
        assert_eq!(filename_from_disposition(Some("attachment; filename=data.csv; size=10")), "data.csv");
        assert_eq!(filename_from_disposition(Some("inline")), DEFAULT_FILENAME);
        assert_eq!(filename_from_disposition(None), DEFAULT_FILENAME);
    }

    #[test]
    fn test_charset() {
        assert_eq!(charset("text/html; charset=UTF-8").as_deref(), Some("utf-8"));
        assert_eq!(charset(r#"text/plain; format=flowed; charset="ISO-8859-1""#).as_deref(), Some("iso-8859-1"));
        assert_eq!(charset("application/json"), None);
    }

    #[test]
    fn test_repeated_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let flat = flatten_headers(&headers);
        assert_eq!(flat["set-cookie"], "a=1, b=2");
        assert_eq!(flat["content-type"], "text/plain");
    }

    #[test]
    fn test_round_secs() {
        assert_eq!(round_secs(Duration::from_micros(1_234_567)), 1.235);
    }
}
