use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use std::fmt::{self, Write as _};
use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::body::{ContentType, RequestBody};
use crate::charset::Charset;
use crate::config::CookiePolicy;
use crate::error::{InvalidUriKind, InvokeError};
use crate::executor::Executor;
use crate::raw_response::RawResponse;

/// Charset of URL-encoded form bodies unless another one is requested
pub const DEFAULT_FORM_CHARSET: Charset = Charset::Iso8859_1;

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Trace,
}

impl Verb {
    /// Upper-case method name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
        }
    }

    #[must_use]
    pub fn method(self) -> http::Method {
        match self {
            Self::Get => http::Method::GET,
            Self::Head => http::Method::HEAD,
            Self::Post => http::Method::POST,
            Self::Put => http::Method::PUT,
            Self::Patch => http::Method::PATCH,
            Self::Delete => http::Method::DELETE,
            Self::Options => http::Method::OPTIONS,
            Self::Trace => http::Method::TRACE,
        }
    }

    /// Whether a request with this verb may carry a body
    #[must_use]
    pub fn permits_body(self) -> bool {
        matches!(
            self,
            Self::Post | Self::Put | Self::Patch | Self::Delete | Self::Options
        )
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = InvokeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "OPTIONS" => Ok(Self::Options),
            "TRACE" => Ok(Self::Trace),
            _ => Err(InvokeError::usage(format!("Unsupported HTTP method: {s}"))),
        }
    }
}

/// HTTP proxy to route a request through
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyHost {
    pub host: String,
    pub port: u16,
}

impl ProxyHost {
    /// Port assumed when the proxy is given without one
    pub const DEFAULT_PORT: u16 = 80;
}

impl FromStr for ProxyHost {
    type Err = InvokeError;

    /// Parse `host` or `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("http://").unwrap_or(s).trim_end_matches('/');
        if s.is_empty() {
            return Err(InvokeError::usage("Proxy host cannot be empty"));
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse()
                    .map_err(|_| InvokeError::usage(format!("Invalid proxy port in '{s}'")))?;
                Ok(Self {
                    host: host.to_owned(),
                    port,
                })
            }
            Some(_) => Err(InvokeError::usage(format!("Invalid proxy host '{s}'"))),
            None => Ok(Self {
                host: s.to_owned(),
                port: Self::DEFAULT_PORT,
            }),
        }
    }
}

impl fmt::Display for ProxyHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Per-request settings; `None` falls back to the transport defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestConfig {
    pub connect_timeout: Option<Duration>,
    pub socket_timeout: Option<Duration>,
    pub follow_redirects: Option<bool>,
    pub expect_continue: bool,
    pub cookie_policy: Option<CookiePolicy>,
    pub proxy: Option<ProxyHost>,
    pub version: Option<http::Version>,
    /// Charset for form bodies built without an explicit one
    pub element_charset: Option<Charset>,
    /// Validate a pooled connection before reuse regardless of its idle time
    pub stale_connection_check: bool,
}

/// Cancels an in-flight request from another thread
///
/// The blocked call fails with [`InvokeError::Aborted`].
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Fluent builder for one HTTP request
///
/// Header and configuration setters never fail; an invalid value is kept as
/// a deferred error that surfaces when the request is executed. Body setters
/// return `Result` because setting a body on GET, HEAD or TRACE is rejected
/// immediately.
///
/// # Example
///
/// ```ignore
/// use web_invoker::{ContentType, RequestBuilder};
/// use std::time::Duration;
///
/// let response = RequestBuilder::post("https://api.example.com/items")
///     .add_header("x-request-id", "42")
///     .connect_timeout(Duration::from_secs(5))
///     .body_string("hello", ContentType::new("text/plain"))?
///     .execute()?
///     .web_response()?;
/// ```
#[must_use = "RequestBuilder does nothing until it is executed"]
pub struct RequestBuilder {
    verb: Verb,
    url: Option<Url>,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Option<RequestBody>,
    config: RequestConfig,
    user_agent: Option<String>,
    abort: AbortHandle,
    /// Error captured during building (deferred to execution)
    error: Option<InvokeError>,
}

impl RequestBuilder {
    /// Builder for an already parsed URL
    pub fn new(verb: Verb, url: Url) -> Self {
        Self::blank(verb, Some(url))
    }

    fn blank(verb: Verb, url: Option<Url>) -> Self {
        Self {
            verb,
            url,
            headers: Vec::new(),
            body: None,
            config: RequestConfig::default(),
            user_agent: None,
            abort: AbortHandle::default(),
            error: None,
        }
    }

    /// Builder for a URL string; a parse failure is deferred to execution
    pub fn for_verb(verb: Verb, url: &str) -> Self {
        match parse_url(url) {
            Ok(parsed) => Self::new(verb, parsed),
            Err(e) => Self {
                error: Some(e),
                ..Self::blank(verb, None)
            },
        }
    }

    pub fn get(url: &str) -> Self {
        Self::for_verb(Verb::Get, url)
    }

    pub fn head(url: &str) -> Self {
        Self::for_verb(Verb::Head, url)
    }

    pub fn post(url: &str) -> Self {
        Self::for_verb(Verb::Post, url)
    }

    pub fn put(url: &str) -> Self {
        Self::for_verb(Verb::Put, url)
    }

    pub fn patch(url: &str) -> Self {
        Self::for_verb(Verb::Patch, url)
    }

    pub fn delete(url: &str) -> Self {
        Self::for_verb(Verb::Delete, url)
    }

    pub fn options(url: &str) -> Self {
        Self::for_verb(Verb::Options, url)
    }

    pub fn trace(url: &str) -> Self {
        Self::for_verb(Verb::Trace, url)
    }

    // ---- headers -------------------------------------------------------

    fn parse_header(&mut self, name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
        if self.error.is_some() {
            return None;
        }
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => Some((name, value)),
            (Err(e), _) => {
                self.error = Some(InvokeError::InvalidHeaderName(e));
                None
            }
            (_, Err(e)) => {
                self.error = Some(InvokeError::InvalidHeaderValue(e));
                None
            }
        }
    }

    /// Append a header; existing headers with the same name are kept.
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        if let Some(pair) = self.parse_header(name, value) {
            self.headers.push(pair);
        }
        self
    }

    /// Replace every header named `name` with a single value.
    pub fn set_header(mut self, name: &str, value: &str) -> Self {
        if let Some((name, value)) = self.parse_header(name, value) {
            self.headers.retain(|(n, _)| *n != name);
            self.headers.push((name, value));
        }
        self
    }

    /// Remove the first header named `name`.
    pub fn remove_header(mut self, name: &str) -> Self {
        if let Some(pos) = self
            .headers
            .iter()
            .position(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
        {
            self.headers.remove(pos);
        }
        self
    }

    /// Remove every header named `name`.
    pub fn remove_all_headers(mut self, name: &str) -> Self {
        self.headers
            .retain(|(n, _)| !n.as_str().eq_ignore_ascii_case(name));
        self
    }

    /// Replace all headers.
    pub fn set_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.headers.clear();
        for (name, value) in headers {
            self = self.add_header(name.as_ref(), value.as_ref());
        }
        self
    }

    pub fn set_cache_control(self, value: &str) -> Self {
        self.set_header(header::CACHE_CONTROL.as_str(), value)
    }

    pub fn set_date(self, date: SystemTime) -> Self {
        self.set_header(header::DATE.as_str(), &httpdate::fmt_http_date(date))
    }

    pub fn set_if_modified_since(self, date: SystemTime) -> Self {
        self.set_header(
            header::IF_MODIFIED_SINCE.as_str(),
            &httpdate::fmt_http_date(date),
        )
    }

    pub fn set_if_unmodified_since(self, date: SystemTime) -> Self {
        self.set_header(
            header::IF_UNMODIFIED_SINCE.as_str(),
            &httpdate::fmt_http_date(date),
        )
    }

    // ---- body ----------------------------------------------------------

    /// Set the request body.
    ///
    /// # Errors
    ///
    /// Returns a deferred builder error, or [`InvokeError::Usage`] when the
    /// verb cannot carry a body.
    pub fn body(mut self, body: RequestBody) -> Result<Self, InvokeError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        if !self.verb.permits_body() {
            return Err(InvokeError::usage(format!(
                "{} request cannot enclose an entity",
                self.verb
            )));
        }
        self.body = Some(body);
        Ok(self)
    }

    /// Text body encoded with the content type's charset (ISO-8859-1 if none).
    ///
    /// # Errors
    ///
    /// See [`RequestBuilder::body`].
    pub fn body_string(self, content: impl Into<String>, content_type: ContentType) -> Result<Self, InvokeError> {
        self.body(RequestBody::Text {
            content: content.into(),
            content_type,
        })
    }

    /// `text/plain` body in the given charset.
    ///
    /// # Errors
    ///
    /// See [`RequestBuilder::body`].
    pub fn body_string_with_charset(self, content: impl Into<String>, charset: Charset) -> Result<Self, InvokeError> {
        self.body_string(content, ContentType::text_plain(charset))
    }

    /// Text body with a MIME type and charset.
    ///
    /// # Errors
    ///
    /// See [`RequestBuilder::body`].
    pub fn body_string_with_mime(
        self,
        content: impl Into<String>,
        mime_type: &str,
        charset: Charset,
    ) -> Result<Self, InvokeError> {
        self.body_string(content, ContentType::with_charset(mime_type, charset))
    }

    /// Body streamed from a file.
    ///
    /// # Errors
    ///
    /// See [`RequestBuilder::body`].
    pub fn body_file(self, path: impl Into<PathBuf>, content_type: ContentType) -> Result<Self, InvokeError> {
        self.body(RequestBody::File {
            path: path.into(),
            content_type,
        })
    }

    /// `application/octet-stream` body.
    ///
    /// # Errors
    ///
    /// See [`RequestBuilder::body`].
    pub fn body_bytes(self, content: impl Into<Bytes>) -> Result<Self, InvokeError> {
        self.body(RequestBody::Bytes {
            content: content.into(),
            content_type: Some(ContentType::octet_stream()),
        })
    }

    /// `application/octet-stream` body from `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] when the range is out of bounds, see also
    /// [`RequestBuilder::body`].
    pub fn body_byte_range(self, content: impl Into<Bytes>, offset: usize, len: usize) -> Result<Self, InvokeError> {
        let content = content.into();
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= content.len())
            .ok_or_else(|| {
                InvokeError::usage(format!(
                    "Byte range {offset}+{len} exceeds body of {} bytes",
                    content.len()
                ))
            })?;
        self.body_bytes(content.slice(offset..end))
    }

    /// One-shot body read from `reader` and sent chunked.
    ///
    /// # Errors
    ///
    /// See [`RequestBuilder::body`].
    pub fn body_stream(
        self,
        reader: impl Read + Send + 'static,
        content_type: Option<ContentType>,
    ) -> Result<Self, InvokeError> {
        self.body(RequestBody::Stream {
            reader: Box::new(reader),
            content_type,
        })
    }

    /// URL-encoded form body.
    ///
    /// Uses the element charset if one was configured, ISO-8859-1 otherwise.
    ///
    /// # Errors
    ///
    /// See [`RequestBuilder::body`].
    pub fn body_form<I, K, V>(self, pairs: I) -> Result<Self, InvokeError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let charset = self.config.element_charset.unwrap_or(DEFAULT_FORM_CHARSET);
        self.body_form_with_charset(pairs, charset)
    }

    /// URL-encoded form body in `charset`.
    ///
    /// # Errors
    ///
    /// See [`RequestBuilder::body`].
    pub fn body_form_with_charset<I, K, V>(self, pairs: I, charset: Charset) -> Result<Self, InvokeError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let pairs = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.body(RequestBody::Form { pairs, charset })
    }

    // ---- per-request configuration --------------------------------------

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.config.socket_timeout = Some(timeout);
        self
    }

    pub fn follow_redirects(mut self) -> Self {
        self.config.follow_redirects = Some(true);
        self
    }

    pub fn no_redirects(mut self) -> Self {
        self.config.follow_redirects = Some(false);
        self
    }

    /// Send `Expect: 100-continue` with the body.
    pub fn use_expect_continue(mut self) -> Self {
        self.config.expect_continue = true;
        self
    }

    /// `User-Agent` sent unless a `User-Agent` header was added explicitly.
    pub fn user_agent(mut self, agent: &str) -> Self {
        self.user_agent = Some(agent.to_owned());
        self
    }

    pub fn cookie_policy(mut self, policy: CookiePolicy) -> Self {
        self.config.cookie_policy = Some(policy);
        self
    }

    /// Select a cookie policy by name (`default`, `standard`, `netscape`,
    /// `ignoreCookies`).
    pub fn cookie_policy_named(mut self, name: &str) -> Self {
        match name.parse() {
            Ok(policy) => self.config.cookie_policy = Some(policy),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
        self
    }

    /// Route through an HTTP proxy given as `host` or `host:port`.
    pub fn via_proxy(mut self, proxy: &str) -> Self {
        match proxy.parse() {
            Ok(proxy) => self.config.proxy = Some(proxy),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
        self
    }

    /// Protocol version; only HTTP/1.0 and HTTP/1.1 are supported.
    pub fn version(mut self, version: http::Version) -> Self {
        if version == http::Version::HTTP_10 || version == http::Version::HTTP_11 {
            self.config.version = Some(version);
        } else if self.error.is_none() {
            self.error = Some(InvokeError::usage("Only HTTP/1.0 and HTTP/1.1 are supported"));
        }
        self
    }

    pub fn element_charset(mut self, charset: Charset) -> Self {
        self.config.element_charset = Some(charset);
        self
    }

    pub fn stale_connection_check(mut self, enabled: bool) -> Self {
        self.config.stale_connection_check = enabled;
        self
    }

    /// Replace the whole per-request configuration.
    pub fn config(mut self, config: RequestConfig) -> Self {
        self.config = config;
        self
    }

    /// Reset every per-request setting to the transport defaults.
    pub fn remove_config(mut self) -> Self {
        self.config = RequestConfig::default();
        self.user_agent = None;
        self
    }

    // ---- introspection -------------------------------------------------

    #[must_use]
    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// Target URL, `None` if the URL given to the factory did not parse
    #[must_use]
    pub fn uri(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    #[must_use]
    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    #[must_use]
    pub fn request_config(&self) -> &RequestConfig {
        &self.config
    }

    #[must_use]
    pub fn body_ref(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    /// Multi-line description: request line, headers and body metadata
    #[must_use]
    pub fn trace(&self) -> String {
        render_trace(
            &self.to_string(),
            &self.headers,
            self.body.as_ref(),
        )
    }

    /// Handle that can cancel this request while it runs
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Cancel the request; a running execution fails with [`InvokeError::Aborted`].
    pub fn abort(&self) {
        self.abort.abort();
    }

    // ---- execution -----------------------------------------------------

    /// Run the request on the process-wide [`Executor`].
    ///
    /// # Errors
    ///
    /// Any error of [`Executor::execute`].
    pub fn execute(self) -> Result<RawResponse, InvokeError> {
        Executor::global().execute(self)
    }

    /// Freeze the builder into the request the transport sends.
    ///
    /// # Errors
    ///
    /// Returns the first deferred builder error, or a usage error when the
    /// URL is not an absolute http(s) URL with a host.
    pub(crate) fn finalize(mut self) -> Result<Request, InvokeError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let url = self
            .url
            .take()
            .ok_or_else(|| InvokeError::usage("Request has no URL"))?;
        validate_target(&url)?;

        if let Some(content_type) = self.body.as_ref().and_then(RequestBody::content_type)
            && !self.headers.iter().any(|(n, _)| n == header::CONTENT_TYPE)
        {
            self.headers.push((
                header::CONTENT_TYPE,
                HeaderValue::try_from(content_type.to_string())?,
            ));
        }

        if let Some(agent) = self.user_agent.take()
            && !self.headers.iter().any(|(n, _)| n == header::USER_AGENT)
        {
            self.headers
                .push((header::USER_AGENT, HeaderValue::try_from(agent)?));
        }

        if self.config.expect_continue && self.body.is_some() {
            self.headers
                .push((header::EXPECT, HeaderValue::from_static("100-continue")));
        }

        Ok(Request {
            verb: self.verb,
            url,
            headers: self.headers,
            body: self.body,
            config: self.config,
            abort: self.abort,
        })
    }
}

impl fmt::Display for RequestBuilder {
    /// Request line, e.g. `GET http://example.com/ HTTP/1.1`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let url = self.url.as_ref().map_or("<invalid url>", Url::as_str);
        write!(
            f,
            "{} {} {}",
            self.verb,
            url,
            version_str(self.config.version)
        )
    }
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("verb", &self.verb)
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("headers", &self.headers.len())
            .field("body", &self.body)
            .field("config", &self.config)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// A finalized request, as seen by interceptors and the transport
#[derive(Debug)]
pub struct Request {
    verb: Verb,
    url: Url,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Option<RequestBody>,
    config: RequestConfig,
    abort: AbortHandle,
}

impl Request {
    #[must_use]
    pub fn verb(&self) -> Verb {
        self.verb
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Host name of the target URL (empty only for malformed URLs, which
    /// finalization rejects)
    #[must_use]
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    #[must_use]
    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    /// First value of header `name`
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    #[must_use]
    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    /// Take the body out, leaving the request without one.
    pub fn take_body(&mut self) -> Option<RequestBody> {
        self.body.take()
    }

    #[must_use]
    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    #[must_use]
    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }

    /// Multi-line description: request line, headers and body metadata
    #[must_use]
    pub fn trace(&self) -> String {
        render_trace(&self.to_string(), &self.headers, self.body.as_ref())
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.verb,
            self.url,
            version_str(self.config.version)
        )
    }
}

fn version_str(version: Option<http::Version>) -> &'static str {
    match version {
        Some(http::Version::HTTP_10) => "HTTP/1.0",
        _ => "HTTP/1.1",
    }
}

fn render_trace(line: &str, headers: &[(HeaderName, HeaderValue)], body: Option<&RequestBody>) -> String {
    let mut out = String::from(line);
    for (name, value) in headers {
        let value = if value.is_sensitive() {
            "[REDACTED]"
        } else {
            value.to_str().unwrap_or("<binary>")
        };
        let _ = write!(out, "\n{name}: {value}");
    }
    if let Some(body) = body {
        if let Some(ct) = body.content_type() {
            let _ = write!(out, "\nEntity-Type: {ct}");
        }
        match body.content_length() {
            Some(len) => {
                let _ = write!(out, "\nContent-Length: {len}");
            }
            None => out.push_str("\nContent-Length: chunked"),
        }
    }
    out
}

pub fn parse_url(url: &str) -> Result<Url, InvokeError> {
    if url.trim().is_empty() {
        return Err(InvokeError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::Empty,
            reason: "URL cannot be empty".to_owned(),
        });
    }
    Url::parse(url.trim()).map_err(|e| InvokeError::InvalidUri {
        url: url.to_owned(),
        kind: InvalidUriKind::ParseError,
        reason: e.to_string(),
    })
}

fn validate_target(url: &Url) -> Result<(), InvokeError> {
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(InvokeError::InvalidScheme {
                scheme: other.to_owned(),
            });
        }
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(InvokeError::InvalidUri {
            url: url.to_string(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host".to_owned(),
        });
    }
    Ok(())
}
