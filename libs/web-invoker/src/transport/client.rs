//! Default transport: hyper HTTP/1 connections over the shared pool.
//!
//! All network I/O runs on one process-wide multi-thread tokio runtime.
//! Blocking callers spawn their work there and wait on the `JoinHandle`, so
//! the API is usable from plain threads and from inside other runtimes alike.

use bytes::{Buf, Bytes};
use futures::TryStreamExt;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode, Uri};
use http_body::Frame;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use std::future::Future;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use url::Url;

use super::connector::RouteConnector;
use super::redirect::{RedirectAction, RedirectPolicy, SENSITIVE_HEADERS};
use super::{Entity, Transport, TransportResponse};
use crate::auth::{AuthScheme, Credentials, DEFAULT_AUTH_PORT, parse_basic_challenge};
use crate::body::RequestBody;
use crate::config::{CookiePolicy, InvokerConfig, RedirectConfig, ServiceDefaults};
use crate::context::ExecutionContext;
use crate::error::{InvalidUriKind, InvokeError};
use crate::pool::{Connection, ConnectionPool, PoolLease, Route, Slot, TransportBody};
use crate::request::{ProxyHost, Request, RequestConfig, Verb};
use crate::tls;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Chunk size used when pumping a blocking reader into a request body
const STREAM_CHUNK_SIZE: usize = 8 * 1024;

static RUNTIME: OnceLock<Result<tokio::runtime::Runtime, String>> = OnceLock::new();
static SHARED: OnceLock<Arc<HyperTransport>> = OnceLock::new();

fn runtime() -> Result<&'static tokio::runtime::Runtime, InvokeError> {
    RUNTIME
        .get_or_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .thread_name("web-invoker-io")
                .enable_all()
                .build()
                .map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| InvokeError::transport(format!("failed to start I/O runtime: {e}")))
}

/// Run `future` on the I/O runtime and block until it completes.
fn block_on<F, T>(future: F) -> Result<T, InvokeError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handle = runtime()?.spawn(future);
    futures::executor::block_on(handle).map_err(InvokeError::transport)
}

/// HTTP/1.1 transport built on hyper and rustls
///
/// # Example
///
/// ```ignore
/// use web_invoker::{Executor, HyperTransport, InvokerConfig};
/// use std::sync::Arc;
///
/// let transport = Arc::new(HyperTransport::with_config(&InvokerConfig::for_testing()));
/// let executor = Executor::with_transport(transport);
/// ```
pub struct HyperTransport {
    inner: Arc<Inner>,
}

struct Inner {
    pool: ConnectionPool,
    tls: Result<Arc<rustls::ClientConfig>, String>,
    redirect: RedirectConfig,
    defaults: ServiceDefaults,
}

impl HyperTransport {
    /// Transport with its own pool and TLS configuration
    #[must_use]
    pub fn with_config(config: &InvokerConfig) -> Self {
        let tls = tls::client_config(&config.tls).map(Arc::new);
        if let Err(e) = &tls {
            tracing::warn!(error = %e, "TLS is unavailable; https requests will fail");
        }
        Self {
            inner: Arc::new(Inner {
                pool: ConnectionPool::new(&config.pool),
                tls,
                redirect: config.redirect.clone(),
                defaults: config.service.clone(),
            }),
        }
    }

    /// Process-wide transport with the default configuration
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::with_config(&InvokerConfig::default()))))
    }

    #[must_use]
    pub fn connection_pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }
}

impl Transport for HyperTransport {
    fn execute(
        &self,
        request: Request,
        context: &mut ExecutionContext,
    ) -> Result<TransportResponse, InvokeError> {
        let inner = Arc::clone(&self.inner);
        let mut owned = std::mem::take(context);
        let (result, owned) = block_on(async move {
            let result = inner.run(request, &mut owned).await;
            (result, owned)
        })?;
        *context = owned;
        result
    }

    fn pool(&self) -> Option<&ConnectionPool> {
        Some(&self.inner.pool)
    }

    fn shutdown(&self) -> Result<(), InvokeError> {
        self.inner.pool.close_all_idle();
        Ok(())
    }
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("pool", &self.inner.pool)
            .field("tls", &self.inner.tls.is_ok())
            .finish_non_exhaustive()
    }
}

/// Request body that can be sent again when possible
enum ReplayableBody {
    Empty,
    Buffered(Bytes),
    File(PathBuf),
    Stream(Option<Box<dyn Read + Send>>),
}

impl ReplayableBody {
    fn from_request(body: Option<RequestBody>) -> Self {
        match body {
            None => Self::Empty,
            Some(RequestBody::File { path, .. }) => Self::File(path),
            Some(RequestBody::Stream { reader, .. }) => Self::Stream(Some(reader)),
            Some(other) => other.to_bytes().map_or(Self::Empty, Self::Buffered),
        }
    }

    fn is_repeatable(&self) -> bool {
        !matches!(self, Self::Stream(_))
    }

    /// Body for the next send, with its length when known up front.
    async fn to_http_body(&mut self) -> Result<(TransportBody, Option<u64>), InvokeError> {
        match self {
            Self::Empty => Ok((
                Empty::<Bytes>::new()
                    .map_err(|never| -> BoxError { match never {} })
                    .boxed_unsync(),
                None,
            )),
            Self::Buffered(bytes) => Ok((
                Full::new(bytes.clone())
                    .map_err(|never| -> BoxError { match never {} })
                    .boxed_unsync(),
                None,
            )),
            Self::File(path) => {
                let file = tokio::fs::File::open(&path).await?;
                let length = file.metadata().await?.len();
                let stream = ReaderStream::new(file)
                    .map_ok(Frame::data)
                    .map_err(|e| -> BoxError { Box::new(e) });
                Ok((StreamBody::new(stream).boxed_unsync(), Some(length)))
            }
            Self::Stream(reader) => {
                let reader = reader
                    .take()
                    .ok_or_else(|| InvokeError::usage("Streamed request body was already sent"))?;
                Ok((pump_reader(reader), None))
            }
        }
    }
}

/// Feed a blocking reader into a request body from the blocking pool.
fn pump_reader(mut reader: Box<dyn Read + Send>) -> TransportBody {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Frame<Bytes>, BoxError>>(4);
    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let frame = Frame::data(Bytes::copy_from_slice(&buf[..n]));
                    if tx.blocking_send(Ok(frame)).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let _ = tx.blocking_send(Err(Box::new(e)));
                    break;
                }
            }
        }
    });
    StreamBody::new(ReceiverStream::new(rx)).boxed_unsync()
}

/// One hop of a request: changes as redirects are followed
struct Attempt {
    verb: Verb,
    url: Url,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: ReplayableBody,
}

impl Attempt {
    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.retain(|(n, _)| *n != name);
        self.headers.push((name, value));
    }

    fn has_header(&self, name: &HeaderName) -> bool {
        self.headers.iter().any(|(n, _)| n == name)
    }

    fn redirect(&mut self, location: Url, verb: Verb, keep_body: bool, strip_sensitive: bool) {
        if strip_sensitive {
            self.headers
                .retain(|(n, _)| !SENSITIVE_HEADERS.contains(n));
        }
        if !keep_body {
            self.body = ReplayableBody::Empty;
            self.headers.retain(|(n, _)| {
                *n != header::CONTENT_TYPE && *n != header::CONTENT_LENGTH && *n != header::EXPECT
            });
        }
        self.headers.retain(|(n, _)| *n != header::HOST);
        self.verb = verb;
        self.url = location;
    }
}

impl Inner {
    async fn run(&self, mut request: Request, ctx: &mut ExecutionContext) -> Result<TransportResponse, InvokeError> {
        let abort = request.abort_handle().token().clone();
        if abort.is_cancelled() {
            return Err(InvokeError::Aborted);
        }
        tokio::select! {
            biased;
            () = abort.cancelled() => Err(InvokeError::Aborted),
            result = self.exchange(&mut request, ctx, &abort) => result,
        }
    }

    async fn exchange(
        &self,
        request: &mut Request,
        ctx: &mut ExecutionContext,
        abort: &CancellationToken,
    ) -> Result<TransportResponse, InvokeError> {
        let config = request.config().clone();
        let policy = config.cookie_policy.unwrap_or(self.defaults.cookie_policy);
        let follow = config
            .follow_redirects
            .unwrap_or(self.defaults.follow_redirects);
        let socket_timeout = config
            .socket_timeout
            .unwrap_or(self.defaults.socket_timeout);

        let mut redirects = RedirectPolicy::new(self.redirect.clone());
        let mut attempt = Attempt {
            verb: request.verb(),
            url: request.url().clone(),
            headers: request.headers().to_vec(),
            body: ReplayableBody::from_request(request.take_body()),
        };
        // Challenge answered by the previous hop
        let mut answered: Option<AuthScheme> = None;

        loop {
            let (response, lease) = self.send(&mut attempt, &config, ctx, policy).await?;
            let status = response.status();

            if policy != CookiePolicy::IgnoreCookies
                && let Some(store) = ctx.cookie_store()
            {
                store.store_response_cookies(&attempt.url, response.headers(), policy);
            }

            if answer_challenge(&mut attempt, status, response.headers(), ctx, &mut answered)? {
                drop((response, lease));
                continue;
            }

            if follow {
                let action = redirects.next(
                    status,
                    attempt.verb,
                    &attempt.url,
                    response.headers().get(header::LOCATION),
                    attempt.body.is_repeatable(),
                    ctx,
                )?;
                if let RedirectAction::Follow {
                    location,
                    verb,
                    keep_body,
                    strip_sensitive,
                } = action
                {
                    ctx.push_redirect(location.clone());
                    attempt.redirect(location, verb, keep_body, strip_sensitive);
                    drop((response, lease));
                    continue;
                }
            }

            return Ok(into_transport_response(
                response,
                lease,
                attempt.verb,
                socket_timeout,
                abort.clone(),
            ));
        }
    }

    /// Send one hop, retrying once on a fresh connection when a pooled
    /// connection turns out to be dead.
    async fn send(
        &self,
        attempt: &mut Attempt,
        config: &RequestConfig,
        ctx: &ExecutionContext,
        policy: CookiePolicy,
    ) -> Result<(hyper::Response<Incoming>, PoolLease), InvokeError> {
        let route = Route::from_url(&attempt.url)?;
        let proxy = config.proxy.as_ref();
        let connect_timeout = config
            .connect_timeout
            .unwrap_or(self.defaults.connect_timeout);
        let socket_timeout = config
            .socket_timeout
            .unwrap_or(self.defaults.socket_timeout);

        let mut force_check = config.stale_connection_check;
        loop {
            let (mut lease, reused) = match self
                .pool
                .acquire(&route, proxy, force_check, connect_timeout)
                .await?
            {
                Slot::Reused(lease) => (lease, true),
                Slot::Fresh(permit) => {
                    let sender = self.connect(&attempt.url, proxy, connect_timeout).await?;
                    (permit.into_lease(sender), false)
                }
            };

            let request = self.build_request(attempt, config, ctx, policy).await?;
            let sender = lease
                .sender_mut()
                .ok_or_else(|| InvokeError::transport("connection lease has no sender"))?;
            let sent = tokio::time::timeout(socket_timeout, async {
                sender.ready().await?;
                sender.send_request(request).await
            })
            .await
            .map_err(|_| InvokeError::Timeout(socket_timeout))?;

            match sent {
                Ok(response) => return Ok((response, lease)),
                Err(e)
                    if reused
                        && attempt.body.is_repeatable()
                        && (e.is_closed() || e.is_canceled() || e.is_incomplete_message()) =>
                {
                    tracing::debug!(route = %route, error = %e, "pooled connection was stale; retrying");
                    force_check = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn connect(&self, url: &Url, proxy: Option<&ProxyHost>, timeout: Duration) -> Result<Connection, InvokeError> {
        let uri: Uri = url.as_str().parse().map_err(|e: http::uri::InvalidUri| InvokeError::InvalidUri {
            url: url.to_string(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;
        let connector = RouteConnector::new(proxy.cloned(), timeout);
        if url.scheme() == "https" {
            let tls = self
                .tls
                .as_ref()
                .map_err(|e| InvokeError::Tls(e.clone().into()))?;
            let https = HttpsConnector::from((connector, Arc::clone(tls)));
            let io = https
                .oneshot(uri)
                .await
                .map_err(|e| classify_connect_error(e, timeout))?;
            handshake(io).await
        } else {
            let io = connector
                .oneshot(uri)
                .await
                .map_err(|e| classify_connect_error(e, timeout))?;
            handshake(io).await
        }
    }

    async fn build_request(
        &self,
        attempt: &mut Attempt,
        config: &RequestConfig,
        ctx: &ExecutionContext,
        policy: CookiePolicy,
    ) -> Result<http::Request<TransportBody>, InvokeError> {
        let (body, length) = attempt.body.to_http_body().await?;
        let url = &attempt.url;

        // Proxies take plain http requests in absolute form
        let target = if config.proxy.is_some() && url.scheme() == "http" {
            url.as_str().to_owned()
        } else {
            origin_form(url)
        };
        let uri: Uri = target.parse().map_err(|e: http::uri::InvalidUri| InvokeError::InvalidUri {
            url: url.to_string(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;

        let mut request = http::Request::new(body);
        *request.method_mut() = attempt.verb.method();
        *request.uri_mut() = uri;
        *request.version_mut() = config.version.unwrap_or(http::Version::HTTP_11);

        let headers = request.headers_mut();
        if !attempt.has_header(&header::HOST) {
            headers.insert(header::HOST, HeaderValue::try_from(host_header(url))?);
        }
        for (name, value) in &attempt.headers {
            headers.append(name.clone(), value.clone());
        }
        if let Some(length) = length
            && !headers.contains_key(header::CONTENT_LENGTH)
        {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        }
        if policy != CookiePolicy::IgnoreCookies
            && let Some(cookies) = ctx
                .cookie_store()
                .and_then(|store| store.request_cookie_header(url, policy))
        {
            headers.append(header::COOKIE, HeaderValue::try_from(cookies)?);
        }
        if !headers.contains_key(header::AUTHORIZATION) {
            let (host, port) = auth_target(url);
            if let Some(value) = preemptive_authorization(ctx, &host, port) {
                headers.insert(header::AUTHORIZATION, value);
            }
        }
        Ok(request)
    }
}

async fn handshake<T>(io: T) -> Result<Connection, InvokeError>
where
    T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (sender, connection) = hyper::client::conn::http1::handshake(io).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(error = %e, "connection closed with error");
        }
    });
    Ok(sender)
}

/// Map connector failures onto timeout, TLS or generic transport errors.
fn classify_connect_error(err: BoxError, timeout: Duration) -> InvokeError {
    enum Class {
        Timeout,
        Tls,
        Other,
    }
    let mut class = Class::Other;
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err.as_ref());
    while let Some(e) = source {
        if e.is::<rustls::Error>() {
            class = Class::Tls;
            break;
        }
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::TimedOut {
                class = Class::Timeout;
                break;
            }
            if io_err.get_ref().is_some_and(|inner| inner.is::<rustls::Error>()) {
                class = Class::Tls;
                break;
            }
        }
        source = e.source();
    }
    match class {
        Class::Timeout => InvokeError::Timeout(timeout),
        Class::Tls => InvokeError::Tls(err),
        Class::Other => InvokeError::Transport(err),
    }
}

fn origin_form(url: &Url) -> String {
    let mut target = url.path().to_owned();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    target
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    }
}

fn auth_target(url: &Url) -> (String, u16) {
    (
        url.host_str().unwrap_or_default().to_ascii_lowercase(),
        url.port_or_known_default().unwrap_or(DEFAULT_AUTH_PORT),
    )
}

/// Basic authentication around one response.
///
/// Returns `true` when the hop must be sent again with credentials. A
/// challenge is answered at most once; the outcome of the answer updates
/// the auth cache.
fn answer_challenge(
    attempt: &mut Attempt,
    status: StatusCode,
    headers: &HeaderMap,
    ctx: &ExecutionContext,
    answered: &mut Option<AuthScheme>,
) -> Result<bool, InvokeError> {
    let (host, port) = auth_target(&attempt.url);
    let previous = answered.take();
    if status != StatusCode::UNAUTHORIZED {
        if let (Some(scheme), Some(cache)) = (previous, ctx.auth_cache()) {
            cache.put(&host, port, scheme);
        }
        return Ok(false);
    }
    if previous.is_some() {
        // Rejected credentials
        if let Some(cache) = ctx.auth_cache() {
            cache.remove(&host, port);
        }
        return Ok(false);
    }
    if !attempt.body.is_repeatable() {
        return Ok(false);
    }
    let Some((scheme, credentials)) = challenge_credentials(headers, ctx, &host, port) else {
        return Ok(false);
    };
    tracing::debug!(host = %host, scheme = ?scheme, "answering authentication challenge");
    attempt.set_header(header::AUTHORIZATION, credentials.basic_authorization()?);
    *answered = Some(scheme);
    Ok(true)
}

/// Credentials answering a `Basic` challenge in `headers`
fn challenge_credentials(
    headers: &HeaderMap,
    ctx: &ExecutionContext,
    host: &str,
    port: u16,
) -> Option<(AuthScheme, Arc<Credentials>)> {
    let provider = ctx.credentials()?;
    headers
        .get_all(header::WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(parse_basic_challenge)
        .find_map(|scheme| {
            let AuthScheme::Basic { realm } = &scheme;
            let credentials = provider.credentials_for(host, port, realm.as_deref())?;
            Some((scheme, credentials))
        })
}

fn preemptive_authorization(ctx: &ExecutionContext, host: &str, port: u16) -> Option<HeaderValue> {
    let AuthScheme::Basic { realm } = ctx.auth_cache()?.get(host, port)?;
    ctx.credentials()?
        .credentials_for(host, port, realm.as_deref())?
        .basic_authorization()
        .ok()
}

/// What happens to a connection once its response body is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reuse {
    Close,
    /// Back to the pool, expiring after the server's keep-alive timeout if given
    Keep(Option<Duration>),
}

fn keep_alive_policy(version: http::Version, headers: &HeaderMap) -> Reuse {
    let tokens: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .collect();
    if tokens.iter().any(|t| t == "close") {
        return Reuse::Close;
    }
    if version == http::Version::HTTP_10 && !tokens.iter().any(|t| t == "keep-alive") {
        return Reuse::Close;
    }
    let timeout = headers
        .get("keep-alive")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.split(',').find_map(|param| {
                let (key, value) = param.split_once('=')?;
                key.trim()
                    .eq_ignore_ascii_case("timeout")
                    .then(|| value.trim().parse::<u64>().ok())
                    .flatten()
            })
        })
        .map(Duration::from_secs);
    Reuse::Keep(timeout)
}

fn into_transport_response(
    response: hyper::Response<Incoming>,
    mut lease: PoolLease,
    verb: Verb,
    socket_timeout: Duration,
    abort: CancellationToken,
) -> TransportResponse {
    use http_body::Body as _;

    let (parts, body) = response.into_parts();
    let reason = parts
        .extensions
        .get::<hyper::ext::ReasonPhrase>()
        .and_then(|r| std::str::from_utf8(r.as_bytes()).ok())
        .map_or_else(
            || parts.status.canonical_reason().unwrap_or_default().to_owned(),
            str::to_owned,
        );
    let reuse = keep_alive_policy(parts.version, &parts.headers);
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let content_length = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let no_entity = verb == Verb::Head
        || parts.status.is_informational()
        || parts.status == StatusCode::NO_CONTENT
        || parts.status == StatusCode::NOT_MODIFIED;

    let response = TransportResponse::new(parts.status)
        .with_reason(reason)
        .with_version(parts.version)
        .with_headers(parts.headers);

    if no_entity || body.is_end_stream() {
        if let Reuse::Keep(keep_alive) = reuse {
            lease.mark_reusable(keep_alive);
        }
        drop(lease);
        if no_entity {
            return response;
        }
        return response.with_entity(Entity::new(io::empty(), Some(0), content_type));
    }

    let reader = IncomingReader {
        body: Some(body),
        lease: Some(lease),
        reuse,
        pending: Bytes::new(),
        socket_timeout,
        abort,
    };
    response.with_entity(Entity::new(reader, content_length, content_type))
}

/// Blocking reader over a hyper response body
///
/// Each frame is awaited on the I/O runtime under the socket timeout. The
/// connection returns to the pool when the body ends; dropping the reader
/// earlier closes it.
struct IncomingReader {
    body: Option<Incoming>,
    lease: Option<PoolLease>,
    reuse: Reuse,
    pending: Bytes,
    socket_timeout: Duration,
    abort: CancellationToken,
}

impl IncomingReader {
    fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let Some(mut body) = self.body.take() else {
            return Ok(None);
        };
        let timeout = self.socket_timeout;
        let abort = self.abort.clone();
        let (body, frame) = block_on(async move {
            let frame = tokio::select! {
                biased;
                () = abort.cancelled() => Some(Err(InvokeError::Aborted)),
                next = tokio::time::timeout(timeout, body.frame()) => match next {
                    Err(_) => Some(Err(InvokeError::Timeout(timeout))),
                    Ok(None) => None,
                    Ok(Some(Err(e))) => Some(Err(InvokeError::from(e))),
                    Ok(Some(Ok(frame))) => Some(Ok(frame.into_data().unwrap_or_default())),
                },
            };
            (body, frame)
        })
        .map_err(io::Error::other)?;

        match frame {
            None => {
                self.finish();
                Ok(None)
            }
            Some(Ok(data)) => {
                self.body = Some(body);
                Ok(Some(data))
            }
            Some(Err(e)) => {
                self.lease = None;
                Err(io::Error::other(e))
            }
        }
    }

    fn finish(&mut self) {
        if let Some(mut lease) = self.lease.take()
            && let Reuse::Keep(keep_alive) = self.reuse
        {
            lease.mark_reusable(keep_alive);
        }
    }
}

impl Read for IncomingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            match self.next_chunk()? {
                Some(chunk) => self.pending = chunk,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::auth::{AuthCache, AuthScope, CredentialsProvider};
    use crate::body::ContentType;
    use crate::cookie::{CookieStore, InMemoryCookieStore};
    use crate::request::RequestBuilder;
    use httpmock::prelude::*;

    fn transport() -> HyperTransport {
        HyperTransport::with_config(&InvokerConfig::for_testing())
    }

    fn send(transport: &HyperTransport, builder: RequestBuilder, ctx: &mut ExecutionContext) -> TransportResponse {
        transport.execute(builder.finalize().unwrap(), ctx).unwrap()
    }

    fn body_text(response: &mut TransportResponse) -> String {
        let bytes = response.entity_mut().unwrap().read_all().unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_get_streams_body_and_pools_connection() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET).path("/hello");
            then.status(200)
                .header("content-type", "text/plain; charset=UTF-8")
                .body("hello world");
        });

        let transport = transport();
        let url = format!("{}/hello", server.base_url());
        let mut ctx = ExecutionContext::new();

        let mut response = send(&transport, RequestBuilder::get(&url), &mut ctx);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.reason(), "OK");
        let entity = response.entity().unwrap();
        assert_eq!(entity.content_type(), Some("text/plain; charset=UTF-8"));
        assert_eq!(entity.content_length(), Some(11));
        assert_eq!(body_text(&mut response), "hello world");
        assert_eq!(transport.connection_pool().stats().available, 1);

        let mut second = send(&transport, RequestBuilder::get(&url), &mut ctx);
        assert_eq!(body_text(&mut second), "hello world");
        assert_eq!(transport.connection_pool().stats().available, 1);
        mock.assert_calls(2);
    }

    #[test]
    fn test_unread_body_closes_connection() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/big");
            then.status(200).body("x".repeat(64 * 1024));
        });

        let transport = transport();
        let mut ctx = ExecutionContext::new();
        let response = send(&transport, RequestBuilder::get(&format!("{}/big", server.base_url())), &mut ctx);
        drop(response);
        let stats = transport.connection_pool().stats();
        assert_eq!(stats.leased, 0);
        assert_eq!(stats.available, 0);
    }

    #[test]
    fn test_head_has_no_entity() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::HEAD).path("/h");
            then.status(200).header("x-probe", "1");
        });

        let transport = transport();
        let response = send(
            &transport,
            RequestBuilder::head(&format!("{}/h", server.base_url())),
            &mut ExecutionContext::new(),
        );
        assert!(response.entity().is_none());
        assert_eq!(response.headers().get("x-probe").unwrap(), "1");
    }

    #[test]
    fn test_redirect_chain_recorded() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/a");
            then.status(302).header("location", "/b");
        });
        server.mock(|when, then| {
            when.path("/b");
            then.status(301).header("location", "/c");
        });
        server.mock(|when, then| {
            when.path("/c");
            then.status(200).body("done");
        });

        let transport = transport();
        let mut ctx = ExecutionContext::new();
        let mut response = send(&transport, RequestBuilder::get(&server.url("/a")), &mut ctx);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(&mut response), "done");

        let chain: Vec<&str> = ctx.redirect_locations().iter().map(Url::path).collect();
        assert_eq!(chain, vec!["/b", "/c"]);
    }

    #[test]
    fn test_no_redirects_returns_3xx() {
        let server = MockServer::start();
        let target = server.mock(|when, then| {
            when.path("/target");
            then.status(200);
        });
        server.mock(|when, then| {
            when.path("/moved");
            then.status(302).header("location", "/target");
        });

        let transport = transport();
        let mut ctx = ExecutionContext::new();
        let response = send(
            &transport,
            RequestBuilder::get(&server.url("/moved")).no_redirects(),
            &mut ctx,
        );
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(ctx.redirect_locations().is_empty());
        target.assert_calls(0);
    }

    #[test]
    fn test_circular_redirect_fails() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/ping");
            then.status(302).header("location", "/pong");
        });
        server.mock(|when, then| {
            when.path("/pong");
            then.status(302).header("location", "/ping");
        });

        let transport = transport();
        let err = transport
            .execute(
                RequestBuilder::get(&server.url("/ping")).finalize().unwrap(),
                &mut ExecutionContext::new(),
            )
            .unwrap_err();
        assert!(matches!(err, InvokeError::Redirect(ref m) if m.contains("Circular")));
    }

    #[test]
    fn test_post_303_becomes_get() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::POST).path("/submit");
            then.status(303).header("location", "/result");
        });
        let result = server.mock(|when, then| {
            when.method(Method::GET).path("/result");
            then.status(200).body("ok");
        });

        let transport = transport();
        let builder = RequestBuilder::post(&server.url("/submit"))
            .body_string("payload", ContentType::new("text/plain"))
            .unwrap();
        let response = send(&transport, builder, &mut ExecutionContext::new());
        assert_eq!(response.status(), StatusCode::OK);
        result.assert_calls(1);
    }

    #[test]
    fn test_stream_body_sent_chunked() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::POST)
                .path("/upload")
                .body("streamed bytes");
            then.status(201);
        });

        let transport = transport();
        let reader = io::Cursor::new(b"streamed bytes".to_vec());
        let builder = RequestBuilder::post(&server.url("/upload"))
            .body_stream(reader, None)
            .unwrap();
        let response = send(&transport, builder, &mut ExecutionContext::new());
        assert_eq!(response.status(), StatusCode::CREATED);
        mock.assert_calls(1);
    }

    #[test]
    fn test_basic_auth_challenge_then_preemptive() {
        let server = MockServer::start();
        let authorized = server.mock(|when, then| {
            when.path("/secure")
                .header("authorization", "Basic dXNlcjpwYXNz");
            then.status(200).body("welcome");
        });
        let challenge = server.mock(|when, then| {
            when.path("/secure");
            then.status(401)
                .header("www-authenticate", r#"Basic realm="test""#);
        });

        let provider = Arc::new(CredentialsProvider::new());
        provider.set_credentials(AuthScope::for_host("127.0.0.1"), Credentials::new("user", "pass"));
        let cache = Arc::new(AuthCache::new());

        let transport = transport();
        let url = server.url("/secure");
        let new_ctx = || {
            ExecutionContext::new()
                .with_credentials(Some(Arc::clone(&provider)))
                .with_auth_cache(Arc::clone(&cache))
        };

        let response = send(&transport, RequestBuilder::get(&url), &mut new_ctx());
        assert_eq!(response.status(), StatusCode::OK);
        challenge.assert_calls(1);
        authorized.assert_calls(1);

        // Cached scheme makes the next request authenticate up front
        let response = send(&transport, RequestBuilder::get(&url), &mut new_ctx());
        assert_eq!(response.status(), StatusCode::OK);
        challenge.assert_calls(1);
        authorized.assert_calls(2);
    }

    #[test]
    fn test_unanswered_challenge_returns_401() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/secure");
            then.status(401).header("www-authenticate", "Basic");
        });

        let transport = transport();
        let response = send(&transport, RequestBuilder::get(&server.url("/secure")), &mut ExecutionContext::new());
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_cookies_round_trip() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/login");
            then.status(200).header("set-cookie", "session=abc123; Path=/");
        });
        let with_cookie = server.mock(|when, then| {
            when.path("/profile").header("cookie", "session=abc123");
            then.status(200);
        });

        let store: Arc<dyn CookieStore> = Arc::new(InMemoryCookieStore::new());
        let transport = transport();
        let new_ctx = || ExecutionContext::new().with_cookie_store(Some(Arc::clone(&store)));

        send(&transport, RequestBuilder::get(&server.url("/login")), &mut new_ctx());
        assert_eq!(store.cookies().len(), 1);

        let response = send(&transport, RequestBuilder::get(&server.url("/profile")), &mut new_ctx());
        assert_eq!(response.status(), StatusCode::OK);
        with_cookie.assert_calls(1);
    }

    #[test]
    fn test_ignore_cookies_policy() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/login");
            then.status(200).header("set-cookie", "session=abc123");
        });

        let store: Arc<dyn CookieStore> = Arc::new(InMemoryCookieStore::new());
        let transport = transport();
        let mut ctx = ExecutionContext::new().with_cookie_store(Some(Arc::clone(&store)));
        send(
            &transport,
            RequestBuilder::get(&server.url("/login")).cookie_policy(CookiePolicy::IgnoreCookies),
            &mut ctx,
        );
        assert!(store.cookies().is_empty());
    }

    #[test]
    fn test_socket_timeout() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/slow");
            then.status(200).delay(Duration::from_millis(500));
        });

        let transport = transport();
        let err = transport
            .execute(
                RequestBuilder::get(&server.url("/slow"))
                    .socket_timeout(Duration::from_millis(50))
                    .finalize()
                    .unwrap(),
                &mut ExecutionContext::new(),
            )
            .unwrap_err();
        assert!(matches!(err, InvokeError::Timeout(_)), "got {err:?}");
    }

    #[test]
    fn test_aborted_before_send() {
        let transport = transport();
        let builder = RequestBuilder::get("http://127.0.0.1:9/never");
        builder.abort();
        let err = transport
            .execute(builder.finalize().unwrap(), &mut ExecutionContext::new())
            .unwrap_err();
        assert!(matches!(err, InvokeError::Aborted));
    }

    #[test]
    fn test_connection_refused_is_transport_error() {
        let transport = transport();
        let err = transport
            .execute(
                RequestBuilder::get("http://127.0.0.1:9/").finalize().unwrap(),
                &mut ExecutionContext::new(),
            )
            .unwrap_err();
        assert!(err.is_absorbable());
        assert_eq!(transport.connection_pool().stats().leased, 0);
    }

    #[test]
    fn test_keep_alive_policy() {
        let mut headers = HeaderMap::new();
        assert_eq!(keep_alive_policy(http::Version::HTTP_11, &headers), Reuse::Keep(None));
        assert_eq!(keep_alive_policy(http::Version::HTTP_10, &headers), Reuse::Close);

        headers.insert("keep-alive", HeaderValue::from_static("timeout=5, max=100"));
        assert_eq!(
            keep_alive_policy(http::Version::HTTP_11, &headers),
            Reuse::Keep(Some(Duration::from_secs(5)))
        );

        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        assert_eq!(keep_alive_policy(http::Version::HTTP_11, &headers), Reuse::Close);
    }

    #[test]
    fn test_request_targets() {
        let url = Url::parse("http://example.com:8080/a/b?x=1#frag").unwrap();
        assert_eq!(origin_form(&url), "/a/b?x=1");
        assert_eq!(host_header(&url), "example.com:8080");
        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(host_header(&url), "example.com");
        assert_eq!(auth_target(&url), ("example.com".to_owned(), 443));
    }
}
