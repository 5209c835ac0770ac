use std::sync::Arc;
use url::Url;

use crate::auth::{AuthCache, CredentialsProvider};
use crate::cookie::CookieStore;

/// State shared between the executor and the transport for one request
///
/// A fresh context is built for every call: redirect locations recorded by
/// one request must never leak into the next, or a second request to the
/// same URL would look like a circular redirect.
#[derive(Default)]
pub struct ExecutionContext {
    credentials: Option<Arc<CredentialsProvider>>,
    auth_cache: Option<Arc<AuthCache>>,
    cookie_store: Option<Arc<dyn CookieStore>>,
    redirect_locations: Vec<Url>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Arc<CredentialsProvider>>) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn with_auth_cache(mut self, cache: Arc<AuthCache>) -> Self {
        self.auth_cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_cookie_store(mut self, store: Option<Arc<dyn CookieStore>>) -> Self {
        self.cookie_store = store;
        self
    }

    #[must_use]
    pub fn credentials(&self) -> Option<&Arc<CredentialsProvider>> {
        self.credentials.as_ref()
    }

    #[must_use]
    pub fn auth_cache(&self) -> Option<&Arc<AuthCache>> {
        self.auth_cache.as_ref()
    }

    #[must_use]
    pub fn cookie_store(&self) -> Option<&Arc<dyn CookieStore>> {
        self.cookie_store.as_ref()
    }

    /// Record a redirect target, in the order redirects were followed.
    pub fn push_redirect(&mut self, location: Url) {
        self.redirect_locations.push(location);
    }

    /// Redirect targets followed so far; the last one produced the response
    #[must_use]
    pub fn redirect_locations(&self) -> &[Url] {
        &self.redirect_locations
    }

    /// Whether `location` was already visited during this request
    #[must_use]
    pub fn has_visited(&self, location: &Url) -> bool {
        self.redirect_locations.contains(location)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("credentials", &self.credentials.is_some())
            .field("auth_cache", &self.auth_cache.is_some())
            .field("cookie_store", &self.cookie_store.is_some())
            .field("redirect_locations", &self.redirect_locations)
            .finish()
    }
}
