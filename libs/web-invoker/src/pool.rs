//! Connection pool shared by every request of a transport.
//!
//! Connections are keyed by route (scheme, host, port) and proxy. Limits
//! apply per route and in total. A connection goes back to the pool only
//! once its response body was read to the end; a lease dropped early closes
//! its connection.

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::client::conn::http1::SendRequest;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use url::Url;

use crate::config::PoolConfig;
use crate::error::InvokeError;
use crate::request::ProxyHost;

/// Request body type sent over pooled connections
pub type TransportBody = UnsyncBoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Sender half of an HTTP/1 connection
pub type Connection = SendRequest<TransportBody>;

/// Port assumed for a route given by host name only
pub const DEFAULT_ROUTE_PORT: u16 = 80;

/// Target of a connection: scheme, host and port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    scheme: String,
    host: String,
    port: u16,
}

impl Route {
    pub fn new(scheme: &str, host: &str, port: u16) -> Self {
        Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
        }
    }

    /// Plain HTTP route to `host`, port 80
    pub fn for_host(host: &str) -> Self {
        Self::new("http", host, DEFAULT_ROUTE_PORT)
    }

    /// Route of an absolute URL.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] when the URL has no host or no known port.
    pub fn from_url(url: &Url) -> Result<Self, InvokeError> {
        let host = url
            .host_str()
            .ok_or_else(|| InvokeError::usage(format!("URL has no host: {url}")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| InvokeError::usage(format!("URL has no port: {url}")))?;
        Ok(Self::new(url.scheme(), host, port))
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Connections handed out (including ones still connecting)
    pub leased: usize,
    /// Idle connections ready for reuse
    pub available: usize,
    /// Callers waiting for a free slot
    pub pending: usize,
    /// Applicable connection limit
    pub max: usize,
}

struct IdleConnection {
    proxy: Option<ProxyHost>,
    sender: Connection,
    idle_since: Instant,
    expires_at: Option<Instant>,
}

impl IdleConnection {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Closed or expired connections are never reused. A connection idle for
    /// at least `validate_after` must also be ready to accept a request.
    fn is_reusable(&self, now: Instant, validate_after: Duration, force_check: bool) -> bool {
        if self.is_expired(now) || self.sender.is_closed() {
            return false;
        }
        if force_check || now.duration_since(self.idle_since) >= validate_after {
            return self.sender.is_ready();
        }
        true
    }
}

#[derive(Default)]
struct RouteState {
    leased: usize,
    idle: Vec<IdleConnection>,
}

struct PoolState {
    max_total: usize,
    default_max_per_route: usize,
    per_route: HashMap<Route, usize>,
    validate_after_inactivity: Duration,
    routes: HashMap<Route, RouteState>,
    pending: usize,
}

impl PoolState {
    fn max_for(&self, route: &Route) -> usize {
        self.per_route
            .get(route)
            .copied()
            .unwrap_or(self.default_max_per_route)
    }

    fn total(&self) -> usize {
        self.routes
            .values()
            .map(|r| r.leased + r.idle.len())
            .sum()
    }

    /// Close the oldest idle connection of a route other than `route`.
    fn evict_other_route(&mut self, route: &Route) -> bool {
        let victim = self
            .routes
            .iter()
            .filter(|(r, _)| *r != route)
            .flat_map(|(r, state)| {
                state
                    .idle
                    .iter()
                    .enumerate()
                    .map(move |(i, c)| (r.clone(), i, c.idle_since))
            })
            .min_by_key(|(_, _, since)| *since);
        let Some((victim_route, index, _)) = victim else {
            return false;
        };
        if let Some(state) = self.routes.get_mut(&victim_route) {
            state.idle.swap_remove(index);
            tracing::debug!(route = %victim_route, "evicted idle connection to make room");
        }
        true
    }

    /// Drop the entry of `route` if it holds no connection.
    fn forget_if_empty(&mut self, route: &Route) {
        if self
            .routes
            .get(route)
            .is_some_and(|state| state.leased == 0 && state.idle.is_empty())
        {
            self.routes.remove(route);
        }
    }

    fn prune_empty(&mut self) {
        self.routes
            .retain(|_, state| state.leased > 0 || !state.idle.is_empty());
    }
}

struct PoolInner {
    state: Mutex<PoolState>,
    released: Notify,
}

/// Outcome of acquiring a slot
pub enum Slot {
    /// A pooled connection ready for the next request
    Reused(PoolLease),
    /// Capacity reserved; the caller opens the connection
    Fresh(PoolPermit),
}

/// Bounded, route-aware pool of HTTP/1 connections
///
/// Cloning is cheap and yields a handle to the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    max_total: config.max_total.max(1),
                    default_max_per_route: config.default_max_per_route.max(1),
                    per_route: HashMap::new(),
                    validate_after_inactivity: config.validate_after_inactivity,
                    routes: HashMap::new(),
                    pending: 0,
                }),
                released: Notify::new(),
            }),
        }
    }

    /// Set the limit across all routes.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] when `max` is zero.
    pub fn set_max_total_connections(&self, max: usize) -> Result<(), InvokeError> {
        if max == 0 {
            return Err(InvokeError::usage("Max total connections must be positive"));
        }
        self.inner.state.lock().max_total = max;
        self.inner.released.notify_waiters();
        Ok(())
    }

    /// Set the per-route limit for routes without an explicit one.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] when `max` is zero.
    pub fn set_default_max_per_route(&self, max: usize) -> Result<(), InvokeError> {
        if max == 0 {
            return Err(InvokeError::usage("Default max per route must be positive"));
        }
        self.inner.state.lock().default_max_per_route = max;
        self.inner.released.notify_waiters();
        Ok(())
    }

    /// Set the limit for one route; zero blocks the route entirely.
    pub fn set_max_per_route(&self, route: Route, max: usize) {
        self.inner.state.lock().per_route.insert(route, max);
        self.inner.released.notify_waiters();
    }

    #[must_use]
    pub fn max_total_connections(&self) -> usize {
        self.inner.state.lock().max_total
    }

    #[must_use]
    pub fn default_max_per_route(&self) -> usize {
        self.inner.state.lock().default_max_per_route
    }

    #[must_use]
    pub fn max_per_route(&self, route: &Route) -> usize {
        self.inner.state.lock().max_for(route)
    }

    /// Close idle connections unused for at least `idle_for`.
    pub fn close_idle(&self, idle_for: Duration) {
        let now = Instant::now();
        let mut state = self.inner.state.lock();
        for route in state.routes.values_mut() {
            route
                .idle
                .retain(|c| now.duration_since(c.idle_since) < idle_for);
        }
        state.prune_empty();
    }

    /// Close idle connections whose keep-alive period elapsed.
    pub fn close_expired(&self) {
        let now = Instant::now();
        let mut state = self.inner.state.lock();
        for route in state.routes.values_mut() {
            route.idle.retain(|c| !c.is_expired(now));
        }
        state.prune_empty();
    }

    /// Close every idle connection; leased ones are unaffected.
    pub fn close_all_idle(&self) {
        let mut state = self.inner.state.lock();
        for route in state.routes.values_mut() {
            route.idle.clear();
        }
        state.prune_empty();
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            leased: state.routes.values().map(|r| r.leased).sum(),
            available: state.routes.values().map(|r| r.idle.len()).sum(),
            pending: state.pending,
            max: state.max_total,
        }
    }

    #[must_use]
    pub fn route_stats(&self, route: &Route) -> PoolStats {
        let state = self.inner.state.lock();
        let (leased, available) = state
            .routes
            .get(route)
            .map_or((0, 0), |r| (r.leased, r.idle.len()));
        PoolStats {
            leased,
            available,
            pending: 0,
            max: state.max_for(route),
        }
    }

    /// Try to obtain a slot without waiting.
    fn try_acquire(
        &self,
        route: &Route,
        proxy: Option<&ProxyHost>,
        force_check: bool,
    ) -> Result<Option<Slot>, InvokeError> {
        let now = Instant::now();
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let max_for_route = state.max_for(route);
        if max_for_route == 0 {
            return Err(InvokeError::transport(format!(
                "Connections to {route} are inhibited"
            )));
        }
        let validate_after = state.validate_after_inactivity;

        let route_state = state.routes.entry(route.clone()).or_default();
        while let Some(pos) = route_state
            .idle
            .iter()
            .rposition(|c| c.proxy.as_ref() == proxy)
        {
            let conn = route_state.idle.swap_remove(pos);
            if conn.is_reusable(now, validate_after, force_check) {
                route_state.leased += 1;
                return Ok(Some(Slot::Reused(PoolLease {
                    pool: self.clone(),
                    route: route.clone(),
                    proxy: proxy.cloned(),
                    sender: Some(conn.sender),
                    reusable: false,
                    keep_alive: None,
                })));
            }
            tracing::trace!(route = %route, "discarding stale pooled connection");
        }

        if route_state.leased + route_state.idle.len() >= max_for_route {
            // Same-route idle connections through another proxy give way.
            if route_state.idle.is_empty() {
                state.forget_if_empty(route);
                return Ok(None);
            }
            route_state.idle.remove(0);
        }

        if state.total() >= state.max_total && !state.evict_other_route(route) {
            state.forget_if_empty(route);
            return Ok(None);
        }

        state.routes.entry(route.clone()).or_default().leased += 1;
        Ok(Some(Slot::Fresh(PoolPermit {
            pool: self.clone(),
            route: route.clone(),
            proxy: proxy.cloned(),
            armed: true,
        })))
    }

    /// Obtain a pooled connection or the right to open one.
    ///
    /// Waits up to `wait` for a slot when the pool is at capacity.
    pub(crate) async fn acquire(
        &self,
        route: &Route,
        proxy: Option<&ProxyHost>,
        force_check: bool,
        wait: Duration,
    ) -> Result<Slot, InvokeError> {
        let deadline = tokio::time::Instant::now() + wait;
        let mut waiting = false;
        let result = loop {
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_acquire(route, proxy, force_check) {
                Ok(Some(slot)) => break Ok(slot),
                Ok(None) => {}
                Err(e) => break Err(e),
            }

            if !waiting {
                waiting = true;
                self.inner.state.lock().pending += 1;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break Err(InvokeError::transport(format!(
                    "Timeout waiting for connection from pool ({route})"
                )));
            }
        };
        if waiting {
            let mut state = self.inner.state.lock();
            state.pending = state.pending.saturating_sub(1);
        }
        result
    }

    fn release(&self, route: &Route, proxy: Option<ProxyHost>, sender: Option<Connection>, keep_alive: Option<Duration>) {
        {
            let mut state = self.inner.state.lock();
            if let Some(route_state) = state.routes.get_mut(route) {
                route_state.leased = route_state.leased.saturating_sub(1);
                if let Some(sender) = sender.filter(|s| !s.is_closed()) {
                    let now = Instant::now();
                    route_state.idle.push(IdleConnection {
                        proxy,
                        sender,
                        idle_since: now,
                        expires_at: keep_alive.map(|d| now + d),
                    });
                }
            }
            state.prune_empty();
        }
        self.inner.released.notify_waiters();
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Reserved capacity for a connection that is being opened
///
/// Dropping the permit without converting it frees the slot.
pub struct PoolPermit {
    pool: ConnectionPool,
    route: Route,
    proxy: Option<ProxyHost>,
    armed: bool,
}

impl PoolPermit {
    /// Attach the freshly opened connection.
    pub(crate) fn into_lease(mut self, sender: Connection) -> PoolLease {
        self.armed = false;
        PoolLease {
            pool: self.pool.clone(),
            route: self.route.clone(),
            proxy: self.proxy.take(),
            sender: Some(sender),
            reusable: false,
            keep_alive: None,
        }
    }
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release(&self.route, None, None, None);
        }
    }
}

/// A connection checked out of the pool
///
/// The connection is returned on drop only after [`PoolLease::mark_reusable`];
/// otherwise it is closed.
pub struct PoolLease {
    pool: ConnectionPool,
    route: Route,
    proxy: Option<ProxyHost>,
    sender: Option<Connection>,
    reusable: bool,
    keep_alive: Option<Duration>,
}

impl PoolLease {
    pub(crate) fn sender_mut(&mut self) -> Option<&mut Connection> {
        self.sender.as_mut()
    }

    /// Allow the connection back into the pool, optionally expiring after `keep_alive`.
    pub(crate) fn mark_reusable(&mut self, keep_alive: Option<Duration>) {
        self.reusable = true;
        self.keep_alive = keep_alive;
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        let sender = if self.reusable { self.sender.take() } else { None };
        self.pool
            .release(&self.route, self.proxy.take(), sender, self.keep_alive);
    }
}
