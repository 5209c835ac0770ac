use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempPath;

use super::{HttpService, absorb};
use crate::config::{CookiePolicy, InvokerConfig, ServiceDefaults};
use crate::download;
use crate::error::InvokeError;
use crate::executor::Executor;
use crate::request::{RequestBuilder, Verb};
use crate::response::WebResponse;
use crate::transport::HyperTransport;

/// [`HttpService`] running requests through an [`Executor`]
///
/// Requests built by the service carry its defaults: connect and socket
/// timeouts, cookie policy and redirect following. The defaults can be
/// changed at any time; requests already built keep the values they got.
///
/// # Example
///
/// ```ignore
/// use web_invoker::{DefaultHttpService, HttpService};
///
/// let service = DefaultHttpService::new();
/// if let Some(body) = service.get_text_response("https://example.com/status")? {
///     println!("{body}");
/// }
/// ```
#[derive(Debug)]
pub struct DefaultHttpService {
    executor: Arc<Executor>,
    defaults: RwLock<ServiceDefaults>,
}

impl DefaultHttpService {
    /// Service on the process-wide executor with the standard defaults
    #[must_use]
    pub fn new() -> Self {
        Self::with_executor(Executor::global())
    }

    #[must_use]
    pub fn with_executor(executor: Arc<Executor>) -> Self {
        Self {
            executor,
            defaults: RwLock::new(ServiceDefaults::default()),
        }
    }

    /// Service on a dedicated transport built from `config`
    #[must_use]
    pub fn from_config(config: &InvokerConfig) -> Self {
        let transport = Arc::new(HyperTransport::with_config(config));
        Self {
            executor: Arc::new(Executor::with_transport(transport)),
            defaults: RwLock::new(config.service.clone()),
        }
    }

    /// Executor used for every request, for authentication, cookie,
    /// interceptor and rate-limit setup
    #[must_use]
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Current defaults
    #[must_use]
    pub fn defaults(&self) -> ServiceDefaults {
        self.defaults.read().clone()
    }

    fn apply_defaults(&self, builder: RequestBuilder) -> RequestBuilder {
        let defaults = self.defaults.read().clone();
        let builder = builder
            .connect_timeout(defaults.connect_timeout)
            .socket_timeout(defaults.socket_timeout)
            .cookie_policy(defaults.cookie_policy);
        if defaults.follow_redirects {
            builder.follow_redirects()
        } else {
            builder.no_redirects()
        }
    }

    fn run(&self, builder: RequestBuilder) -> Result<Option<WebResponse>, InvokeError> {
        let url = builder.uri().map(ToString::to_string).unwrap_or_default();
        let result = self
            .executor
            .execute(builder)
            .and_then(|mut raw| raw.web_response());
        absorb(&url, result)
    }
}

impl Default for DefaultHttpService {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpService for DefaultHttpService {
    fn get_web_request(&self, verb: Verb, url: &str) -> RequestBuilder {
        self.apply_defaults(RequestBuilder::for_verb(verb, url))
    }

    fn execute_silently(&self, builder: RequestBuilder) -> Result<Option<WebResponse>, InvokeError> {
        self.run(self.apply_defaults(builder))
    }

    fn plain_execute_silently(&self, builder: RequestBuilder) -> Result<Option<WebResponse>, InvokeError> {
        self.run(builder)
    }

    fn download_to_temp_file(&self, url: &str) -> Result<Option<TempPath>, InvokeError> {
        absorb(url, download::download_to_temp_file(&self.executor, url))
    }

    fn download_to_file(&self, url: &str, path: &Path) -> Result<bool, InvokeError> {
        absorb(url, download::download_to_file(&self.executor, url, path)).map(|done| done.is_some())
    }

    fn set_connection_timeout(&self, timeout: Duration) {
        self.defaults.write().connect_timeout = timeout;
    }

    fn set_socket_timeout(&self, timeout: Duration) {
        self.defaults.write().socket_timeout = timeout;
    }

    fn set_follow_redirects(&self, follow: bool) {
        self.defaults.write().follow_redirects = follow;
    }

    fn set_cookie_policy(&self, policy: CookiePolicy) {
        self.defaults.write().cookie_policy = policy;
    }
}
