//! Per-session cookie jar.
//!
//! # Responsibilities
//! - Store cookies keyed by `(name, domain, path)`
//! - Select the cookies an outbound URL should carry (domain/path match)
//! - Apply `Set-Cookie` values captured from target responses
//!
//! # Design Decisions
//! - Domains are stored lowercase without a leading dot
//! - A domain matches itself and its subdomains; an empty domain matches any host
//! - A `Set-Cookie` is only accepted for a domain the responding host matches
//! - `Secure` cookies are only sent over https
//! - Insertion order is kept so listings stay stable across calls

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use url::Url;

/// A cookie as stored in a session and reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub secure: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl StoredCookie {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl AsRef<str>,
        path: impl Into<String>,
    ) -> Self {
        let path = path.into();
        Self {
            name: name.into(),
            value: value.into(),
            domain: normalize_domain(domain.as_ref()),
            path: if path.is_empty() { "/".to_string() } else { path },
            secure: false,
        }
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    fn same_key(&self, name: &str, domain: &str, path: &str) -> bool {
        self.name == name && self.domain == domain && self.path == path
    }

    fn matches(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        (!self.secure || url.scheme() == "https")
            && domain_matches(&host, &self.domain)
            && path_matches(url.path(), &self.path)
    }
}

/// A `Set-Cookie` value as received from a target server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: bool,
    /// `Max-Age<=0` or an `Expires` date in the past.
    pub expired: bool,
}

impl SetCookie {
    /// Convert a cookie parsed by the outbound client.
    pub fn from_response_cookie(cookie: &reqwest::cookie::Cookie<'_>) -> Self {
        let expired = cookie.max_age().is_some_and(|age| age.is_zero())
            || cookie.expires().is_some_and(|at| at <= SystemTime::now());
        Self {
            name: cookie.name().to_string(),
            value: cookie.value().to_string(),
            domain: cookie.domain().map(str::to_string),
            path: cookie.path().map(str::to_string),
            secure: cookie.secure(),
            expired,
        }
    }

    /// Resolve the stored form for a response received from `url`.
    ///
    /// Returns `None` when the `Domain` attribute names a domain the
    /// responding host does not belong to.
    pub fn resolve(&self, url: &Url) -> Option<StoredCookie> {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let domain = match self.domain.as_deref() {
            Some(d) if !d.trim().is_empty() => normalize_domain(d),
            _ => host.clone(),
        };
        if domain.is_empty() || !domain_matches(&host, &domain) {
            return None;
        }
        let path = match self.path.as_deref() {
            Some(p) if p.starts_with('/') => p.to_string(),
            _ => default_path(url),
        };
        Some(StoredCookie::new(self.name.clone(), self.value.clone(), domain, path).with_secure(self.secure))
    }
}

/// Ordered cookie collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: Vec<StoredCookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite by `(name, domain, path)`.
    pub fn upsert(&mut self, cookie: StoredCookie) {
        match self
            .cookies
            .iter_mut()
            .find(|c| c.same_key(&cookie.name, &cookie.domain, &cookie.path))
        {
            Some(existing) => {
                existing.value = cookie.value;
                existing.secure = cookie.secure;
            }
            None => self.cookies.push(cookie),
        }
    }

    pub fn remove(&mut self, name: &str, domain: &str, path: &str) -> Option<StoredCookie> {
        let domain = normalize_domain(domain);
        let index = self
            .cookies
            .iter()
            .position(|c| c.same_key(name, &domain, path))?;
        Some(self.cookies.remove(index))
    }

    /// Apply a `Set-Cookie` received from `url`.
    ///
    /// Returns the stored cookie, or `None` when the value deleted one or
    /// was rejected for a foreign domain.
    pub fn apply(&mut self, set_cookie: &SetCookie, url: &Url) -> Option<StoredCookie> {
        let Some(cookie) = set_cookie.resolve(url) else {
            tracing::debug!(
                cookie = %set_cookie.name,
                domain = set_cookie.domain.as_deref().unwrap_or_default(),
                host = url.host_str().unwrap_or_default(),
                "Rejected Set-Cookie for a foreign domain"
            );
            return None;
        };
        if set_cookie.expired {
            self.remove(&cookie.name, &cookie.domain, &cookie.path);
            return None;
        }
        self.upsert(cookie.clone());
        Some(cookie)
    }

    /// Cookies to send with a request to `url`, longest path first.
    pub fn matching(&self, url: &Url) -> Vec<&StoredCookie> {
        let mut matched: Vec<_> = self.cookies.iter().filter(|c| c.matches(url)).collect();
        matched.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        matched
    }

    /// `Cookie` header value for `url`, if any cookie matches.
    pub fn header_value(&self, url: &Url) -> Option<String> {
        let matched = self.matching(url);
        if matched.is_empty() {
            return None;
        }
        Some(
            matched
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn to_vec(&self) -> Vec<StoredCookie> {
        self.cookies.clone()
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn domain_matches(host: &str, domain: &str) -> bool {
    if domain.is_empty() || host == domain {
        return true;
    }
    host.len() > domain.len()
        && host.ends_with(domain)
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path || cookie_path == "/" {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

/// Default cookie path for a response from `url` (RFC 6265 5.1.4).
fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}
