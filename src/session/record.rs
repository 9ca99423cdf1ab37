//! Session record abstraction.
//!
//! # Responsibilities
//! - Hold the immutable provenance of a session (id, client, creation time)
//! - Track activity (last touch, request count) for idle expiry
//! - Own the session's header set, cookie jar and outbound client
//!
//! # Design Decisions
//! - Mutable state sits behind a per-record mutex, held only briefly
//! - The outbound client is released exactly once; later calls see it gone

use reqwest::Client;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::session::cookies::{CookieJar, SetCookie, StoredCookie};
use crate::session::headers::HeaderSet;

/// Settings for the per-session outbound client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Skip certificate verification (intranet and intercepting proxies).
    pub accept_invalid_certs: bool,
    /// Honor `HTTP_PROXY`/`HTTPS_PROXY` from the environment.
    pub use_env_proxy: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            accept_invalid_certs: true,
            use_env_proxy: true,
        }
    }
}

impl ClientSettings {
    /// Build a fresh client with its own connection pool.
    ///
    /// Redirects are disabled; the forwarder follows them itself so that
    /// cookies set on intermediate hops are captured.
    pub fn build(&self) -> Result<Client, reqwest::Error> {
        let mut builder = Client::builder()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .redirect(reqwest::redirect::Policy::none());
        if !self.use_env_proxy {
            builder = builder.no_proxy();
        }
        builder.build()
    }
}

/// Mutable per-session state.
#[derive(Debug)]
struct SessionState {
    last_activity: Instant,
    last_activity_at: SystemTime,
    request_count: u64,
    headers: HeaderSet,
    cookies: CookieJar,
}

/// One isolated client context.
#[derive(Debug)]
pub struct SessionRecord {
    id: String,
    client_ip: String,
    user_agent: String,
    created_at: SystemTime,
    client: Mutex<Option<Client>>,
    released: AtomicBool,
    state: Mutex<SessionState>,
}

impl SessionRecord {
    pub fn new(id: String, client_ip: String, user_agent: String, client: Client) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            client_ip,
            user_agent,
            created_at: now,
            client: Mutex::new(Some(client)),
            released: AtomicBool::new(false),
            state: Mutex::new(SessionState {
                last_activity: Instant::now(),
                last_activity_at: now,
                request_count: 0,
                headers: HeaderSet::new(),
                cookies: CookieJar::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Record activity at `now`. Never moves `last_activity` backwards.
    pub fn touch(&self, now: Instant) {
        let mut state = self.state();
        if now > state.last_activity {
            state.last_activity = now;
        }
        state.last_activity_at = SystemTime::now();
        state.request_count += 1;
    }

    /// True if idle for longer than `timeout` as of `now`.
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.state().last_activity) > timeout
    }

    pub fn idle(&self) -> Duration {
        self.state().last_activity.elapsed()
    }

    pub fn request_count(&self) -> u64 {
        self.state().request_count
    }

    pub fn headers(&self) -> HeaderSet {
        self.state().headers.clone()
    }

    /// Replace the header set wholesale.
    pub fn set_headers(&self, headers: HeaderSet) {
        self.state().headers = headers;
    }

    pub fn cookies(&self) -> Vec<StoredCookie> {
        self.state().cookies.to_vec()
    }

    /// Copy of the jar, for computing outbound `Cookie` headers off-lock.
    pub fn cookie_jar(&self) -> CookieJar {
        self.state().cookies.clone()
    }

    /// Insert/overwrite each cookie by `(name, domain, path)`.
    pub fn merge_cookies<I>(&self, cookies: I)
    where
        I: IntoIterator<Item = StoredCookie>,
    {
        let mut state = self.state();
        for cookie in cookies {
            state.cookies.upsert(cookie);
        }
    }

    /// Apply `Set-Cookie` values captured from responses, each paired with
    /// the URL it was received from.
    pub fn apply_set_cookies<'a, I>(&self, captured: I)
    where
        I: IntoIterator<Item = &'a (SetCookie, url::Url)>,
    {
        let mut state = self.state();
        for (set_cookie, url) in captured {
            state.cookies.apply(set_cookie, url);
        }
    }

    /// Handle to the outbound client, or `None` once released.
    pub fn client(&self) -> Option<Client> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Release the outbound client. Returns true only for the call that
    /// actually released it.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        drop(self.client.lock().unwrap_or_else(PoisonError::into_inner).take());
        tracing::debug!(session = %short_id(&self.id), "Session client released");
        true
    }

    /// Start over with `client`: headers and cookies are cleared and the
    /// previous client is dropped. Returns false, dropping `client`, if the
    /// record was already released.
    pub fn reset(&self, client: Client) -> bool {
        let previous = {
            let mut slot = self.client.lock().unwrap_or_else(PoisonError::into_inner);
            // checked under the slot lock; `release` takes the slot after setting the flag
            if self.released.load(Ordering::Acquire) {
                return false;
            }
            slot.replace(client)
        };
        drop(previous);

        let mut state = self.state();
        state.headers = HeaderSet::new();
        state.cookies = CookieJar::new();
        tracing::debug!(session = %short_id(&self.id), "Session state reset");
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Serializable view for introspection endpoints.
    pub fn info(&self) -> SessionInfo {
        let state = self.state();
        SessionInfo {
            session_id: self.id.clone(),
            client_ip: self.client_ip.clone(),
            user_agent: self.user_agent.clone(),
            created_at: unix_secs(self.created_at),
            last_activity: unix_secs(state.last_activity_at),
            request_count: state.request_count,
            idle_secs: state.last_activity.elapsed().as_secs(),
            headers: state.headers.clone(),
            cookies: state.cookies.to_vec(),
            verify_ssl: false,
        }
    }
}

/// Snapshot of a session returned by `get-session-info`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub client_ip: String,
    pub user_agent: String,
    pub created_at: u64,
    pub last_activity: u64,
    pub request_count: u64,
    pub idle_secs: u64,
    pub headers: HeaderSet,
    pub cookies: Vec<StoredCookie>,
    pub verify_ssl: bool,
}

fn unix_secs(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// First eight characters of a session id, for logs.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
