//! Runs requests through interceptors, the rate-limit gate and the transport.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::auth::{AuthCache, AuthScope, Credentials, CredentialsProvider, DEFAULT_AUTH_PORT};
use crate::context::ExecutionContext;
use crate::cookie::CookieStore;
use crate::error::InvokeError;
use crate::interceptor::{Interceptor, InterceptorChain};
use crate::pool::{ConnectionPool, DEFAULT_ROUTE_PORT, Route};
use crate::rate_limit::{RateLimitGate, TimeUnit};
use crate::raw_response::RawResponse;
use crate::request::RequestBuilder;
use crate::transport::{HyperTransport, Transport};

static GLOBAL: OnceLock<Arc<Executor>> = OnceLock::new();

/// Executors alive on the process-wide transport
static SHARED_TRANSPORT_USERS: AtomicUsize = AtomicUsize::new(0);

/// Executes requests and holds per-executor authentication, cookie and
/// interceptor state
///
/// Executors created with [`Executor::new`] share the process-wide transport
/// (and so its connection pool) and the process-wide [`RateLimitGate`]. Pool
/// tuning through any executor therefore affects all of them.
///
/// # Example
///
/// ```ignore
/// use web_invoker::{Executor, RequestBuilder};
///
/// let executor = Executor::new();
/// executor.add_host_authentication("api.example.com", None, "user", "secret");
/// let response = executor
///     .execute(RequestBuilder::get("http://api.example.com/items"))?
///     .web_response()?;
/// ```
pub struct Executor {
    transport: Arc<dyn Transport>,
    shared_transport: bool,
    gate: Arc<RateLimitGate>,
    auth_cache: Arc<AuthCache>,
    credentials: RwLock<Option<Arc<CredentialsProvider>>>,
    cookie_store: RwLock<Option<Arc<dyn CookieStore>>>,
    interceptors: InterceptorChain,
}

impl Executor {
    /// Executor on the process-wide transport and rate-limit gate
    #[must_use]
    pub fn new() -> Self {
        SHARED_TRANSPORT_USERS.fetch_add(1, Ordering::SeqCst);
        Self::build(HyperTransport::shared(), true)
    }

    /// Executor on a dedicated transport
    ///
    /// The transport is shut down when the last executor using it is dropped.
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self::build(transport, false)
    }

    /// Use an isolated rate-limit gate instead of the process-wide one
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<RateLimitGate>) -> Self {
        self.gate = gate;
        self
    }

    /// The process-wide default executor
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    fn build(transport: Arc<dyn Transport>, shared_transport: bool) -> Self {
        Self {
            transport,
            shared_transport,
            gate: RateLimitGate::global(),
            auth_cache: Arc::new(AuthCache::new()),
            credentials: RwLock::new(None),
            cookie_store: RwLock::new(None),
            interceptors: InterceptorChain::new(),
        }
    }

    /// Execute a request.
    ///
    /// Without interceptors the returned handle streams the body from the
    /// connection. With interceptors the response is read into memory so the
    /// after phase can inspect it, and the handle is already materialized.
    ///
    /// # Errors
    ///
    /// - [`InvokeError::Usage`] and its URI/header variants for an invalid request
    /// - [`InvokeError::RateLimited`] when the host's rate limit is exhausted
    /// - transport errors, unless an interceptor turns them into a response
    pub fn execute(&self, builder: RequestBuilder) -> Result<RawResponse, InvokeError> {
        let mut context = self.new_context();
        let request = builder.finalize()?;
        let interceptors = self.interceptors.snapshot();

        if let Some(response) = InterceptorChain::run_before(&interceptors, &request) {
            tracing::debug!(url = %request.url(), "request answered by interceptor");
            return Ok(RawResponse::handled(response));
        }

        self.gate.admit(request.host())?;

        let original_uri = request.url().clone();
        tracing::debug!(verb = %request.verb(), url = %original_uri, "executing request");
        let result = self.transport.execute(request, &mut context);

        if interceptors.is_empty() {
            return result.map(|response| RawResponse::live(original_uri, response, context));
        }

        let (response, error) = match result {
            Ok(response) => match RawResponse::live(original_uri, response, context).web_response() {
                Ok(web) => (Some(web), None),
                Err(e) => (None, Some(e)),
            },
            Err(e) => (None, Some(e)),
        };
        match InterceptorChain::run_after(&interceptors, response, error.as_ref()) {
            Some(response) => Ok(RawResponse::handled(response)),
            None => Err(error.unwrap_or_else(|| InvokeError::transport("response discarded by interceptors"))),
        }
    }

    fn new_context(&self) -> ExecutionContext {
        ExecutionContext::new()
            .with_credentials(self.credentials.read().clone())
            .with_auth_cache(Arc::clone(&self.auth_cache))
            .with_cookie_store(self.cookie_store.read().clone())
    }

    // --- authentication ---

    /// Register credentials for a scope.
    pub fn add_authentication(&self, scope: AuthScope, credentials: Credentials) {
        let provider = {
            let mut slot = self.credentials.write();
            Arc::clone(slot.get_or_insert_with(|| Arc::new(CredentialsProvider::new())))
        };
        provider.set_credentials(scope, credentials);
    }

    /// Register credentials for `host` on `port`, 80 when not given.
    pub fn add_host_authentication(&self, host: &str, port: Option<u16>, username: &str, password: &str) {
        self.add_authentication(
            AuthScope::new(host, port.unwrap_or(DEFAULT_AUTH_PORT)),
            Credentials::new(username, password),
        );
    }

    /// Remove the credentials registered for exactly this scope.
    pub fn remove_authentication(&self, scope: &AuthScope) -> bool {
        self.credentials
            .read()
            .as_ref()
            .is_some_and(|provider| provider.remove(scope))
    }

    /// Forget all credentials and cached authentication.
    pub fn clear_all_authentication(&self) {
        if let Some(provider) = self.credentials.read().as_ref() {
            provider.clear();
        }
        self.auth_cache.clear();
    }

    #[must_use]
    pub fn credentials(&self) -> Option<Arc<CredentialsProvider>> {
        self.credentials.read().clone()
    }

    #[must_use]
    pub fn auth_cache(&self) -> &Arc<AuthCache> {
        &self.auth_cache
    }

    // --- cookies ---

    /// Replace the cookie store; `None` disables cookie handling.
    pub fn set_cookie_store(&self, store: Option<Arc<dyn CookieStore>>) {
        *self.cookie_store.write() = store;
    }

    #[must_use]
    pub fn cookie_store(&self) -> Option<Arc<dyn CookieStore>> {
        self.cookie_store.read().clone()
    }

    pub fn clear_cookies(&self) {
        if let Some(store) = self.cookie_store.read().as_ref() {
            store.clear();
        }
    }

    // --- rate limiting ---

    /// See [`RateLimitGate::add_rate_limiting`].
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] for an invalid or duplicate limit.
    pub fn add_rate_limiting(&self, host: &str, limit: i32, unit: TimeUnit) -> Result<(), InvokeError> {
        self.gate.add_rate_limiting(host, limit, unit)
    }

    pub fn remove_rate_limiting(&self, host: &str) {
        self.gate.remove_rate_limiting(host);
    }

    pub fn remove_all_rate_limiting(&self) {
        self.gate.remove_all_rate_limiting();
    }

    #[must_use]
    pub fn rate_limit_gate(&self) -> &Arc<RateLimitGate> {
        &self.gate
    }

    // --- interceptors ---

    pub fn add_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.add(interceptor);
    }

    /// Remove this exact interceptor instance; returns whether it was registered.
    pub fn remove_interceptor(&self, interceptor: &Arc<dyn Interceptor>) -> bool {
        self.interceptors.remove(interceptor)
    }

    pub fn remove_all_interceptors(&self) {
        self.interceptors.clear();
    }

    #[must_use]
    pub fn interceptors(&self) -> &InterceptorChain {
        &self.interceptors
    }

    // --- connection pool ---

    /// Pool of the underlying transport.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] when the transport does not pool connections.
    pub fn pool(&self) -> Result<&ConnectionPool, InvokeError> {
        self.transport
            .pool()
            .ok_or_else(|| InvokeError::usage("Transport has no connection pool"))
    }

    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] for zero or a transport without a pool.
    pub fn set_max_total_connections(&self, max: usize) -> Result<(), InvokeError> {
        self.pool()?.set_max_total_connections(max)
    }

    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] for zero or a transport without a pool.
    pub fn set_default_max_per_route(&self, max: usize) -> Result<(), InvokeError> {
        self.pool()?.set_default_max_per_route(max)
    }

    /// Limit one route; zero blocks connections to it.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] for a transport without a pool.
    pub fn set_max_per_route(&self, route: Route, max: usize) -> Result<(), InvokeError> {
        self.pool()?.set_max_per_route(route, max);
        Ok(())
    }

    /// Limit plain HTTP connections to `host` on `port`, 80 when not given.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] for an empty host or a transport without a pool.
    pub fn set_max_on_host(&self, host: &str, port: Option<u16>, max: usize) -> Result<(), InvokeError> {
        if host.trim().is_empty() {
            return Err(InvokeError::usage("Host name cannot be empty"));
        }
        self.set_max_per_route(Route::new("http", host, port.unwrap_or(DEFAULT_ROUTE_PORT)), max)
    }

    /// Close connections idle for at least `idle_for`.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] for a transport without a pool.
    pub fn close_idle(&self, idle_for: Duration) -> Result<(), InvokeError> {
        self.pool()?.close_idle(idle_for);
        Ok(())
    }

    /// Close connections past their keep-alive expiry.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] for a transport without a pool.
    pub fn close_expired(&self) -> Result<(), InvokeError> {
        self.pool()?.close_expired();
        Ok(())
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        let last = if self.shared_transport {
            SHARED_TRANSPORT_USERS.fetch_sub(1, Ordering::SeqCst) == 1
        } else {
            Arc::strong_count(&self.transport) == 1
        };
        if last && let Err(e) = self.transport.shutdown() {
            tracing::debug!(error = %e, "transport shutdown failed");
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("shared_transport", &self.shared_transport)
            .field("interceptors", &self.interceptors)
            .field("has_credentials", &self.credentials.read().is_some())
            .field("has_cookie_store", &self.cookie_store.read().is_some())
            .finish_non_exhaustive()
    }
}
