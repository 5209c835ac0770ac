//! Cookie store abstraction and an in-memory implementation.
//!
//! An executor owns at most one cookie store; every request it runs reads
//! `Cookie` headers from it and feeds `Set-Cookie` headers back into it, which
//! gives a session across calls. Stores are shared between threads and must be
//! internally synchronized.

use http::HeaderMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use url::Url;

use crate::config::CookiePolicy;

/// A single cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lower-cased domain without a leading dot
    pub domain: String,
    /// Sent only to exactly `domain` (no `Domain` attribute was given)
    pub host_only: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// `None` for session cookies
    pub expires: Option<SystemTime>,
}

impl Cookie {
    /// Whether the cookie has expired at `now`
    #[must_use]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires.is_some_and(|t| t <= now)
    }

    fn same_identity(&self, other: &Cookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }

    fn matches(&self, url: &Url, now: SystemTime) -> bool {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_matches(&host, &self.domain)
        };
        domain_ok
            && path_matches(url.path(), &self.path)
            && (!self.secure || url.scheme() == "https")
            && !self.is_expired(now)
    }
}

/// Storage for cookies shared by the requests of one executor
pub trait CookieStore: Send + Sync {
    /// Record every `Set-Cookie` header of a response received from `url`.
    fn store_response_cookies(&self, url: &Url, headers: &HeaderMap, policy: CookiePolicy);

    /// Value for the `Cookie` request header to send to `url`, if any cookie matches.
    fn request_cookie_header(&self, url: &Url, policy: CookiePolicy) -> Option<String>;

    /// Add or replace a cookie directly.
    fn add_cookie(&self, cookie: Cookie);

    /// Snapshot of all stored cookies.
    fn cookies(&self) -> Vec<Cookie>;

    /// Drop cookies that expired before `now`; returns how many were removed.
    fn clear_expired(&self, now: SystemTime) -> usize;

    /// Remove every cookie.
    fn clear(&self);
}

/// In-memory cookie store, bucketed by cookie domain
#[derive(Debug, Default)]
pub struct InMemoryCookieStore {
    entries: RwLock<HashMap<String, Vec<Cookie>>>,
}

impl InMemoryCookieStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(&self, cookie: Cookie, now: SystemTime) {
        let mut entries = self.entries.write();
        let bucket = entries.entry(cookie.domain.clone()).or_default();
        bucket.retain(|c| !c.same_identity(&cookie));
        if !cookie.is_expired(now) {
            bucket.push(cookie);
        }
    }
}

impl CookieStore for InMemoryCookieStore {
    fn store_response_cookies(&self, url: &Url, headers: &HeaderMap, policy: CookiePolicy) {
        if policy == CookiePolicy::IgnoreCookies {
            return;
        }
        let now = SystemTime::now();
        for value in headers.get_all(http::header::SET_COOKIE) {
            let Ok(raw) = value.to_str() else {
                continue;
            };
            match parse_set_cookie(raw, url, policy, now) {
                Some(cookie) => self.upsert(cookie, now),
                None => tracing::debug!(url = %url, cookie = raw, "rejected cookie"),
            }
        }
    }

    fn request_cookie_header(&self, url: &Url, policy: CookiePolicy) -> Option<String> {
        if policy == CookiePolicy::IgnoreCookies {
            return None;
        }
        let now = SystemTime::now();
        let entries = self.entries.read();
        let mut matching: Vec<&Cookie> = entries
            .values()
            .flatten()
            .filter(|c| c.matches(url, now))
            .collect();
        if matching.is_empty() {
            return None;
        }
        // More specific paths first
        matching.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Some(
            matching
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn add_cookie(&self, cookie: Cookie) {
        self.upsert(cookie, SystemTime::now());
    }

    fn cookies(&self) -> Vec<Cookie> {
        self.entries.read().values().flatten().cloned().collect()
    }

    fn clear_expired(&self, now: SystemTime) -> usize {
        let mut entries = self.entries.write();
        let mut removed = 0;
        for bucket in entries.values_mut() {
            let before = bucket.len();
            bucket.retain(|c| !c.is_expired(now));
            removed += before - bucket.len();
        }
        entries.retain(|_, bucket| !bucket.is_empty());
        removed
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}

/// `host` equals `domain` or is a subdomain of it
fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/'))
}

/// Directory of the request path, used when `Path` is absent
fn default_path(url: &Url) -> String {
    match url.path().rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => dir.to_owned(),
        _ => "/".to_owned(),
    }
}

fn parse_set_cookie(raw: &str, url: &Url, policy: CookiePolicy, now: SystemTime) -> Option<Cookie> {
    let host = url.host_str()?.to_ascii_lowercase();
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie {
        name: name.to_owned(),
        value: value.trim().trim_matches('"').to_owned(),
        domain: host.clone(),
        host_only: true,
        path: default_path(url),
        secure: false,
        http_only: false,
        expires: None,
    };
    let mut max_age: Option<i64> = None;

    for attr in parts {
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attr.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => {
                let domain = val.trim_start_matches('.').to_ascii_lowercase();
                if !domain_matches(&host, &domain) {
                    return None;
                }
                cookie.domain = domain;
                cookie.host_only = false;
            }
            "path" if val.starts_with('/') => {
                if policy == CookiePolicy::Standard && !path_matches(url.path(), val) {
                    return None;
                }
                val.clone_into(&mut cookie.path);
            }
            "expires" => {
                if let Ok(t) = httpdate::parse_http_date(val) {
                    cookie.expires = Some(t);
                }
            }
            "max-age" => max_age = val.parse().ok(),
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            _ => {}
        }
    }

    // Max-Age wins over Expires
    if let Some(secs) = max_age {
        cookie.expires = Some(match u64::try_from(secs) {
            Ok(secs) if secs > 0 => now + Duration::from_secs(secs),
            _ => SystemTime::UNIX_EPOCH,
        });
    }

    Some(cookie)
}
