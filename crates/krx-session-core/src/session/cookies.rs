//! Cookie jar shared between a live `reqwest::Client` and the session file.
//!
//! Cookies are keyed by name only, which is how the session file stores them.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::Utc;
use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One cookie as persisted in the session file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    /// Unix timestamp in seconds; `None` for a session cookie
    #[serde(default)]
    pub expires: Option<i64>,
}

impl StoredCookie {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            domain: None,
            path: Some("/".to_string()),
            secure: false,
            expires: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires
            .map(|ts| ts <= Utc::now().timestamp())
            .unwrap_or(false)
    }

    fn matches(&self, url: &Url) -> bool {
        if self.is_expired() {
            return false;
        }
        if self.secure && url.scheme() != "https" {
            return false;
        }
        let host = url.host_str().unwrap_or_default();
        let domain_ok = match self.domain.as_deref() {
            None | Some("") => true,
            Some(domain) => domain_matches(host, domain),
        };
        let path_ok = match self.path.as_deref() {
            None | Some("") => true,
            Some(path) => path_matches(url.path(), path),
        };
        domain_ok && path_ok
    }
}

/// A leading `.` marks a `Domain` cookie, which also matches subdomains.
/// Anything else is host-only and must match the host exactly.
fn domain_matches(host: &str, domain: &str) -> bool {
    match domain.strip_prefix('.') {
        Some(domain) => {
            host.eq_ignore_ascii_case(domain)
                || (host.len() > domain.len()
                    && host
                        .to_ascii_lowercase()
                        .ends_with(&format!(".{}", domain.to_ascii_lowercase())))
        }
        None => host.eq_ignore_ascii_case(domain),
    }
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path[cookie_path.len()..].starts_with('/'))
}

#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: RwLock<BTreeMap<String, StoredCookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a jar from the cookie map of a session record
    pub fn from_cookies(cookies: BTreeMap<String, StoredCookie>) -> Self {
        Self {
            cookies: RwLock::new(cookies),
        }
    }

    /// Copy of every cookie currently held, for persistence
    pub fn snapshot(&self) -> BTreeMap<String, StoredCookie> {
        match self.cookies.read() {
            Ok(cookies) => cookies.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn insert(&self, name: impl Into<String>, cookie: StoredCookie) {
        let mut cookies = match self.cookies.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cookies.insert(name.into(), cookie);
    }

    pub fn get(&self, name: &str) -> Option<StoredCookie> {
        self.snapshot().remove(name)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of all cookies, sorted
    pub fn names(&self) -> Vec<String> {
        self.snapshot().into_keys().collect()
    }

    /// Apply one `Set-Cookie` header received from `url`
    fn apply_set_cookie(&self, header: &str, url: &Url) {
        let parsed = match cookie::Cookie::parse(header) {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed Set-Cookie header");
                return;
            }
        };

        let now = Utc::now().timestamp();
        let expires = if let Some(max_age) = parsed.max_age() {
            Some(now.saturating_add(max_age.whole_seconds()))
        } else {
            parsed.expires_datetime().map(|dt| dt.unix_timestamp())
        };

        let name = parsed.name().to_string();
        let mut cookies = match self.cookies.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if expires.is_some_and(|ts| ts <= now) {
            cookies.remove(&name);
            return;
        }

        let domain = match parsed.domain().map(|d| d.trim_start_matches('.')) {
            Some(d) if !d.is_empty() => Some(format!(".{}", d)),
            _ => url.host_str().map(str::to_string),
        };

        cookies.insert(
            name,
            StoredCookie {
                value: parsed.value().to_string(),
                domain,
                path: Some(parsed.path().unwrap_or("/").to_string()),
                secure: parsed.secure().unwrap_or(false),
                expires,
            },
        );
    }

    /// Value of the `Cookie` request header for `url`, if any cookie applies
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let cookies = self.snapshot();
        let pairs: Vec<String> = cookies
            .iter()
            .filter(|(_, c)| c.matches(url))
            .map(|(name, c)| format!("{}={}", name, c.value))
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}

impl CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        for header in cookie_headers {
            if let Ok(value) = header.to_str() {
                self.apply_set_cookie(value, url);
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.header_for(url)
            .and_then(|header| HeaderValue::from_str(&header).ok())
    }
}
