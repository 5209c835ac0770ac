//! Process-wide convenience entry points with an optional invocation hook.
//!
//! [`WebInvoker`] wraps a [`DefaultHttpService`] and adds the call shapes
//! that need more than a URL: header and parameter maps, raw bodies with a
//! content type, and HEAD requests with an explicit redirect switch. Every
//! call passes through the installed [`InvocationHook`], which may answer it
//! without touching the network.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::body::ContentType;
use crate::config::CookiePolicy;
use crate::error::InvokeError;
use crate::request::{RequestBuilder, Verb, parse_url};
use crate::response::WebResponse;
use crate::service::{DefaultHttpService, HttpService, ToXml};

/// Outcome of [`InvocationHook::before_invocation`]
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// Make the call
    Proceed,
    /// Skip the call and return this response to the caller as is
    Respond(Option<WebResponse>),
}

/// Hook run around every call made through a [`WebInvoker`]
///
/// `before_invocation` sees the final URL, query parameters included, and
/// may veto the call by answering it. `after_invocation` sees what the call
/// produced (`None` when the failure was absorbed) and may replace it. A
/// vetoed call does not reach `after_invocation`.
pub trait InvocationHook: Send + Sync {
    fn before_invocation(&self, url: &str, verb: Verb) -> Invocation;

    fn after_invocation(&self, response: Option<WebResponse>) -> Option<WebResponse> {
        response
    }
}

/// Facade over a [`DefaultHttpService`] with a single replaceable hook
///
/// ```ignore
/// use std::collections::HashMap;
/// use web_invoker::{Verb, WebInvoker};
///
/// let headers = HashMap::from([("x-api-key".to_owned(), key)]);
/// let params = HashMap::from([("q".to_owned(), "rust".to_owned())]);
/// let response = WebInvoker::global().invoke_url_with(
///     "https://api.example.com/search",
///     Verb::Get,
///     &headers,
///     &params,
/// )?;
/// ```
pub struct WebInvoker {
    service: DefaultHttpService,
    hook: RwLock<Option<Arc<dyn InvocationHook>>>,
}

static GLOBAL: OnceLock<WebInvoker> = OnceLock::new();

impl WebInvoker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_service(DefaultHttpService::new())
    }

    #[must_use]
    pub fn with_service(service: DefaultHttpService) -> Self {
        Self {
            service,
            hook: RwLock::new(None),
        }
    }

    /// Process-wide invoker on the global executor
    #[must_use]
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::new)
    }

    #[must_use]
    pub fn service(&self) -> &DefaultHttpService {
        &self.service
    }

    /// Install `hook`, replacing the previous one.
    pub fn set_hook(&self, hook: Arc<dyn InvocationHook>) {
        *self.hook.write() = Some(hook);
    }

    pub fn clear_hook(&self) {
        *self.hook.write() = None;
    }

    #[must_use]
    pub fn has_hook(&self) -> bool {
        self.hook.read().is_some()
    }

    pub fn set_connection_timeout(&self, timeout: Duration) {
        self.service.set_connection_timeout(timeout);
    }

    pub fn set_socket_timeout(&self, timeout: Duration) {
        self.service.set_socket_timeout(timeout);
    }

    /// Builder for `verb` and `url` carrying the service defaults.
    #[must_use]
    pub fn get_web_request(&self, url: &str, verb: Verb) -> RequestBuilder {
        self.service.get_web_request(verb, url)
    }

    /// Body of a GET as text.
    ///
    /// # Errors
    ///
    /// Usage and rate-limit errors only; other failures give `Ok(None)`.
    pub fn fetch_response(&self, url: &str) -> Result<Option<String>, InvokeError> {
        Ok(self.get_response(url)?.and_then(|response| response.content()))
    }

    /// [`WebInvoker::fetch_response`] with an explicit cookie policy.
    ///
    /// # Errors
    ///
    /// Usage and rate-limit errors only; other failures give `Ok(None)`.
    pub fn fetch_response_with_policy(&self, url: &str, policy: CookiePolicy) -> Result<Option<String>, InvokeError> {
        Ok(self
            .get_response_with_policy(url, policy)?
            .and_then(|response| response.content()))
    }

    /// # Errors
    ///
    /// Usage and rate-limit errors only; other failures give `Ok(None)`.
    pub fn get_response(&self, url: &str) -> Result<Option<WebResponse>, InvokeError> {
        self.invoke(url, self.get_web_request(url, Verb::Get))
    }

    /// # Errors
    ///
    /// Usage and rate-limit errors only; other failures give `Ok(None)`.
    pub fn get_response_with_policy(&self, url: &str, policy: CookiePolicy) -> Result<Option<WebResponse>, InvokeError> {
        self.invoke(url, self.get_web_request(url, Verb::Get).cookie_policy(policy))
    }

    /// HEAD `url`, following redirects only when asked to.
    ///
    /// # Errors
    ///
    /// Usage and rate-limit errors only; other failures give `Ok(None)`.
    pub fn head_request(&self, url: &str, follow_redirects: bool) -> Result<Option<WebResponse>, InvokeError> {
        let builder = self.get_web_request(url, Verb::Head);
        let builder = if follow_redirects {
            builder.follow_redirects()
        } else {
            builder.no_redirects()
        };
        self.invoke(url, builder)
    }

    /// Headers of [`WebInvoker::head_request`]; repeated headers keep their
    /// last value.
    ///
    /// # Errors
    ///
    /// Usage and rate-limit errors only; other failures give `Ok(None)`.
    pub fn get_headers(&self, url: &str, follow_redirects: bool) -> Result<Option<HashMap<String, String>>, InvokeError> {
        Ok(self
            .head_request(url, follow_redirects)?
            .map(|response| response.headers_map()))
    }

    /// # Errors
    ///
    /// Usage and rate-limit errors only; other failures give `Ok(None)`.
    pub fn invoke_url(&self, url: &str, verb: Verb) -> Result<Option<WebResponse>, InvokeError> {
        self.invoke(url, self.get_web_request(url, verb))
    }

    /// Call `url` with extra headers and parameters.
    ///
    /// Parameters become a URL-encoded form body for verbs that carry one
    /// and are appended to the query string otherwise.
    ///
    /// # Errors
    ///
    /// Usage and rate-limit errors only; other failures give `Ok(None)`.
    pub fn invoke_url_with<H, P, K1, V1, K2, V2>(
        &self,
        url: &str,
        verb: Verb,
        headers: H,
        params: P,
    ) -> Result<Option<WebResponse>, InvokeError>
    where
        H: IntoIterator<Item = (K1, V1)>,
        P: IntoIterator<Item = (K2, V2)>,
        K1: AsRef<str>,
        V1: AsRef<str>,
        K2: AsRef<str>,
        V2: AsRef<str>,
    {
        let params: Vec<(String, String)> = params
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_owned(), v.as_ref().to_owned()))
            .collect();

        let mut builder = if params.is_empty() || verb.permits_body() {
            self.get_web_request(url, verb)
        } else {
            let mut target = parse_url(url)?;
            target.query_pairs_mut().extend_pairs(&params);
            self.get_web_request(target.as_str(), verb)
        };

        for (name, value) in headers {
            builder = builder.add_header(name.as_ref(), value.as_ref());
        }
        if !params.is_empty() && verb.permits_body() {
            builder = builder.body_form(params)?;
        }
        self.invoke(url, builder)
    }

    /// Call `url` with `body` sent as `content_type`.
    ///
    /// # Errors
    ///
    /// Usage errors for a malformed content type or a verb without a body,
    /// and rate-limit errors; other failures give `Ok(None)`.
    pub fn invoke_url_with_body(
        &self,
        url: &str,
        verb: Verb,
        content_type: &str,
        body: &str,
    ) -> Result<Option<WebResponse>, InvokeError> {
        let builder = self
            .get_web_request(url, verb)
            .body_string(body, ContentType::parse(content_type)?)?;
        self.invoke(url, builder)
    }

    /// POST `value` as UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Usage errors when `value` cannot be serialized, and rate-limit errors.
    pub fn post_json<T: Serialize + ?Sized>(&self, url: &str, value: &T) -> Result<Option<WebResponse>, InvokeError> {
        let body = serde_json::to_string(value)
            .map_err(|e| InvokeError::usage(format!("Failed to serialize JSON body: {e}")))?;
        self.invoke_url_with_body(url, Verb::Post, &ContentType::json().to_string(), &body)
    }

    /// POST `value` as a UTF-8 `text/xml` document.
    ///
    /// # Errors
    ///
    /// Usage errors when `value` cannot be serialized, and rate-limit errors.
    pub fn post_xml<T: ToXml + ?Sized>(&self, url: &str, value: &T) -> Result<Option<WebResponse>, InvokeError> {
        let body = value.to_xml()?;
        self.invoke_url_with_body(url, Verb::Post, &ContentType::xml().to_string(), &body)
    }

    /// Execute `builder` as is.
    ///
    /// # Errors
    ///
    /// Usage and rate-limit errors only; other failures give `Ok(None)`.
    pub fn execute_silently(&self, builder: RequestBuilder) -> Result<Option<WebResponse>, InvokeError> {
        let url = builder.uri().map(ToString::to_string).unwrap_or_default();
        self.invoke(&url, builder)
    }

    fn invoke(&self, url: &str, builder: RequestBuilder) -> Result<Option<WebResponse>, InvokeError> {
        let hook = self.hook.read().clone();
        if let Some(hook) = &hook {
            let target = builder.uri().map_or_else(|| url.to_owned(), ToString::to_string);
            if let Invocation::Respond(response) = hook.before_invocation(&target, builder.verb()) {
                tracing::debug!(url = %target, "Invocation answered by hook");
                return Ok(response);
            }
        }

        let response = self.service.plain_execute_silently(builder)?;
        Ok(match hook {
            Some(hook) => hook.after_invocation(response),
            None => response,
        })
    }
}

impl Default for WebInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WebInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebInvoker")
            .field("service", &self.service)
            .field("hook", &self.has_hook())
            .finish()
    }
}
