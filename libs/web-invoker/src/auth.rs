//! Credentials, authentication scopes and the per-executor auth cache.
//!
//! Only HTTP Basic authentication is implemented. When a server answers 401
//! with a `Basic` challenge and the credentials provider has credentials for
//! the scope, the transport retries once with an `Authorization` header. A
//! successful retry is remembered in the [`AuthCache`], after which requests
//! to the same host authenticate preemptively.

use base64::{Engine as _, engine::general_purpose};
use http::HeaderValue;
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::InvokeError;

/// Port used when a host is given without one
pub const DEFAULT_AUTH_PORT: u16 = 80;

/// Where a set of credentials applies
///
/// `None` fields match anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AuthScope {
    host: Option<String>,
    port: Option<u16>,
    realm: Option<String>,
}

impl AuthScope {
    /// Scope matching every host, port and realm
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Scope for one host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into().to_ascii_lowercase()),
            port: Some(port),
            realm: None,
        }
    }

    /// Scope for any port of `host`
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into().to_ascii_lowercase()),
            port: None,
            realm: None,
        }
    }

    /// Restrict the scope to one realm
    #[must_use]
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// How specifically this scope matches; `None` when it does not match.
    fn match_score(&self, host: &str, port: u16, realm: Option<&str>) -> Option<u8> {
        let mut score = 0;
        if let Some(h) = &self.host {
            if !h.eq_ignore_ascii_case(host) {
                return None;
            }
            score += 4;
        }
        if let Some(p) = self.port {
            if p != port {
                return None;
            }
            score += 2;
        }
        if let Some(r) = &self.realm {
            if realm != Some(r.as_str()) {
                return None;
            }
            score += 1;
        }
        Some(score)
    }
}

impl fmt::Display for AuthScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.host.as_deref().unwrap_or("<any host>"),
            self.port.map_or_else(|| "<any port>".to_owned(), |p| p.to_string())
        )
    }
}

/// Username and password
pub struct Credentials {
    username: String,
    password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// `Authorization` header value for Basic authentication
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::InvalidHeaderValue`] if the encoded value is not
    /// a valid header (cannot happen for base64 output).
    pub fn basic_authorization(&self) -> Result<HeaderValue, InvokeError> {
        let raw = format!("{}:{}", self.username, self.password.expose_secret());
        let encoded = general_purpose::STANDARD.encode(raw);
        let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Credentials registered per scope
#[derive(Debug, Default)]
pub struct CredentialsProvider {
    entries: RwLock<HashMap<AuthScope, Arc<Credentials>>>,
}

impl CredentialsProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register credentials for a scope, replacing earlier ones.
    pub fn set_credentials(&self, scope: AuthScope, credentials: Credentials) {
        self.entries.write().insert(scope, Arc::new(credentials));
    }

    /// Remove the credentials of exactly this scope.
    pub fn remove(&self, scope: &AuthScope) -> bool {
        self.entries.write().remove(scope).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Best matching credentials for a target and optional challenge realm
    #[must_use]
    pub fn credentials_for(&self, host: &str, port: u16, realm: Option<&str>) -> Option<Arc<Credentials>> {
        self.entries
            .read()
            .iter()
            .filter_map(|(scope, creds)| {
                scope
                    .match_score(host, port, realm)
                    .map(|score| (score, creds))
            })
            .max_by_key(|(score, _)| *score)
            .map(|(_, creds)| Arc::clone(creds))
    }
}

/// Authentication scheme remembered for a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    Basic { realm: Option<String> },
}

/// Hosts that completed an authentication challenge
#[derive(Debug, Default)]
pub struct AuthCache {
    entries: RwLock<HashMap<(String, u16), AuthScheme>>,
}

impl AuthCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, host: &str, port: u16, scheme: AuthScheme) {
        self.entries
            .write()
            .insert((host.to_ascii_lowercase(), port), scheme);
    }

    #[must_use]
    pub fn get(&self, host: &str, port: u16) -> Option<AuthScheme> {
        self.entries
            .read()
            .get(&(host.to_ascii_lowercase(), port))
            .cloned()
    }

    pub fn remove(&self, host: &str, port: u16) {
        self.entries.write().remove(&(host.to_ascii_lowercase(), port));
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Parse a `WWW-Authenticate` value.
///
/// Returns `None` when the challenge is not `Basic`.
#[must_use]
pub fn parse_basic_challenge(value: &str) -> Option<AuthScheme> {
    let (scheme, params) = value
        .trim()
        .split_once(char::is_whitespace)
        .unwrap_or((value.trim(), ""));
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let realm = params.split(',').find_map(|param| {
        let (k, v) = param.split_once('=')?;
        k.trim()
            .eq_ignore_ascii_case("realm")
            .then(|| v.trim().trim_matches('"').to_owned())
    });
    Some(AuthScheme::Basic { realm })
}
