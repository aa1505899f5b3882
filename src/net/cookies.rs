//! Cookie store and policy abstractions.
//!
//! Request cookies are resolved before a request reaches a handler or the
//! network, and response cookies are written one at a time, each write
//! awaited before the next begins. Callers only report headers as complete
//! after [`save_response_cookies`] returns.

use async_trait::async_trait;
use cookie::Cookie;
use http::header::{HeaderValue, COOKIE, SET_COOKIE};
use http::HeaderMap;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};
use url::Url;

use crate::net::request::{LoadFlags, Request};

/// Asynchronous cookie storage.
#[async_trait]
pub trait CookieStore: Send + Sync {
    /// Returns the `Cookie` header line for `url` (empty if none apply).
    async fn get_cookie_line(&self, url: &Url) -> String;

    /// Stores one `Set-Cookie` line received from `url`. Returns true if the
    /// cookie was stored.
    async fn set_cookie(&self, url: &Url, cookie_line: &str) -> bool;
}

/// Decides which cookies may be read or written.
pub trait CookiePolicy: Send + Sync {
    /// Returns true if cookies may be sent with a request to `url`.
    fn can_get_cookies(&self, _url: &Url, _first_party: &Url) -> bool {
        true
    }

    /// Returns true if `cookie_line` received from `url` may be stored.
    fn can_set_cookie(&self, _url: &Url, _first_party: &Url, _cookie_line: &str) -> bool {
        true
    }
}

/// Policy that accepts every cookie.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllCookies;

impl CookiePolicy for AllowAllCookies {}

/// A cookie held by [`InMemoryCookieStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    /// True if `domain` came from a `Domain` attribute and matches subdomains.
    pub domain_wide: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
}

impl StoredCookie {
    /// Parses a `Set-Cookie` line received from `url`. Returns the cookie and
    /// whether it asks to be deleted (`Max-Age` <= 0).
    pub fn parse(url: &Url, line: &str) -> Option<(Self, bool)> {
        let parsed = match Cookie::parse(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                trace!("Unparsable cookie from {}: {}", url, e);
                return None;
            }
        };
        if parsed.name().is_empty() {
            return None;
        }

        let host = url.host_str()?.to_ascii_lowercase();
        let (domain, domain_wide) = match parsed.domain() {
            Some(domain) => {
                let domain = domain.trim_start_matches('.').to_ascii_lowercase();
                // A host may only set cookies for itself or a parent domain.
                if domain != host && !host.ends_with(&format!(".{}", domain)) {
                    return None;
                }
                (domain, true)
            }
            None => (host, false),
        };
        let path = parsed
            .path()
            .filter(|path| path.starts_with('/'))
            .map(str::to_string)
            .unwrap_or_else(|| default_path(url));
        let expired = parsed
            .max_age()
            .is_some_and(|max_age| max_age.whole_seconds() <= 0);

        let cookie = StoredCookie {
            name: parsed.name().to_string(),
            value: parsed.value().to_string(),
            domain,
            domain_wide,
            path,
            secure: parsed.secure().unwrap_or(false),
            http_only: parsed.http_only().unwrap_or(false),
        };
        Some((cookie, expired))
    }

    /// Returns true if this cookie should be sent with a request to `url`.
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let domain_ok = host == self.domain
            || (self.domain_wide && host.ends_with(&format!(".{}", self.domain)));
        let path_ok = url.path().starts_with(&self.path);
        let secure_ok = !self.secure || url.scheme() == "https";
        domain_ok && path_ok && secure_ok
    }
}

fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => path[..index].to_string(),
    }
}

/// Process-local cookie store.
#[derive(Debug, Default)]
pub struct InMemoryCookieStore {
    cookies: RwLock<Vec<StoredCookie>>,
}

impl InMemoryCookieStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all stored cookies.
    pub fn cookies(&self) -> Vec<StoredCookie> {
        self.cookies.read().clone()
    }

    /// Returns the number of stored cookies.
    pub fn len(&self) -> usize {
        self.cookies.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.cookies.read().is_empty()
    }

    /// Removes every cookie.
    pub fn clear(&self) {
        self.cookies.write().clear();
    }
}

#[async_trait]
impl CookieStore for InMemoryCookieStore {
    async fn get_cookie_line(&self, url: &Url) -> String {
        self.cookies
            .read()
            .iter()
            .filter(|cookie| cookie.matches(url))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    async fn set_cookie(&self, url: &Url, cookie_line: &str) -> bool {
        let Some((cookie, expired)) = StoredCookie::parse(url, cookie_line) else {
            debug!("Ignoring malformed cookie from {}", url);
            return false;
        };

        let mut cookies = self.cookies.write();
        cookies.retain(|existing| {
            !(existing.name == cookie.name
                && existing.domain == cookie.domain
                && existing.path == cookie.path)
        });
        if !expired {
            cookies.push(cookie);
        }
        true
    }
}

/// Merges stored cookies for the request URL into its `Cookie` header.
///
/// Does nothing when the request carries `DO_NOT_SEND_COOKIES` or the policy
/// refuses access.
pub async fn attach_request_cookies(
    store: &dyn CookieStore,
    policy: &dyn CookiePolicy,
    request: &mut Request,
) {
    if request.load_flags.contains(LoadFlags::DO_NOT_SEND_COOKIES) {
        return;
    }
    if !policy.can_get_cookies(&request.url, request.cookie_first_party()) {
        debug!("Cookie policy blocked cookies for {}", request.url);
        return;
    }

    let line = store.get_cookie_line(&request.url).await;
    if line.is_empty() {
        return;
    }

    match HeaderValue::from_str(&line) {
        Ok(value) => {
            request.headers.insert(COOKIE, value);
        }
        Err(e) => warn!("Dropping unencodable cookie line for {}: {}", request.url, e),
    }
}

/// Offers every `Set-Cookie` header to the policy and writes the accepted
/// ones to the store sequentially. Returns the number of cookies stored.
pub async fn save_response_cookies(
    store: &dyn CookieStore,
    policy: &dyn CookiePolicy,
    request: &Request,
    headers: &HeaderMap,
) -> usize {
    if request.load_flags.contains(LoadFlags::DO_NOT_SAVE_COOKIES) {
        return 0;
    }

    let lines: Vec<String> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect();

    let mut saved = 0;
    for line in &lines {
        if !policy.can_set_cookie(&request.url, request.cookie_first_party(), line) {
            debug!("Cookie policy rejected cookie from {}", request.url);
            continue;
        }
        if store.set_cookie(&request.url, line).await {
            saved += 1;
        }
    }
    saved
}
