use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::Path;
use std::thread::{self, ThreadId};
use std::time::Duration;
use tempfile::TempPath;

use super::{HttpService, absorb};
use crate::config::CookiePolicy;
use crate::download;
use crate::error::InvokeError;
use crate::request::{RequestBuilder, Verb, parse_url};
use crate::response::WebResponse;

/// A response queued for the next call; `Nothing` makes that call return `None`
#[derive(Debug, Clone)]
enum Injected {
    Response(WebResponse),
    Nothing,
}

impl Injected {
    fn from_option(response: Option<WebResponse>) -> Self {
        response.map_or(Self::Nothing, Self::Response)
    }

    fn into_option(self) -> Option<WebResponse> {
        match self {
            Self::Response(response) => Some(response),
            Self::Nothing => None,
        }
    }
}

/// [`HttpService`] that answers every call with an injected response
///
/// Two one-shot slots feed the calls. The per-thread slot is only seen by
/// calls from the thread that filled it and takes precedence; the
/// cross-thread slot is taken by the first call from any thread. With both
/// slots empty a call returns `None`. Nothing goes over the network, and
/// body verbs answer without validating the body or its MIME type.
///
/// A per-thread slot lives until its thread consumes it; slots filled for
/// threads that may exit first are dropped with [`MockHttpService::reset`].
///
/// ```ignore
/// let service = MockHttpService::new();
/// service.set_next_response(Some(WebResponse::from_text("pong")));
/// assert_eq!(service.get_text_response("http://any/ping")?.as_deref(), Some("pong"));
/// assert!(service.get_text_response("http://any/ping")?.is_none());
/// ```
#[derive(Debug, Default)]
pub struct MockHttpService {
    per_thread: DashMap<ThreadId, Injected>,
    any_thread: Mutex<Option<Injected>>,
}

impl MockHttpService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next call made from the current thread.
    pub fn set_next_response(&self, response: Option<WebResponse>) {
        self.per_thread
            .insert(thread::current().id(), Injected::from_option(response));
    }

    /// Answer the next call made from any thread.
    pub fn set_next_response_any_thread(&self, response: Option<WebResponse>) {
        *self.any_thread.lock() = Some(Injected::from_option(response));
    }

    /// Drop the response queued for the current thread, if any.
    pub fn clear_next_response(&self) {
        self.per_thread.remove(&thread::current().id());
    }

    /// Drop every queued response, for all threads.
    pub fn reset(&self) {
        self.per_thread.clear();
        *self.any_thread.lock() = None;
    }

    fn next_response(&self) -> Option<WebResponse> {
        if let Some((_, injected)) = self.per_thread.remove(&thread::current().id()) {
            return injected.into_option();
        }
        self.any_thread.lock().take().and_then(Injected::into_option)
    }
}

impl HttpService for MockHttpService {
    fn get_web_request(&self, verb: Verb, url: &str) -> RequestBuilder {
        RequestBuilder::for_verb(verb, url)
    }

    fn execute_silently(&self, _builder: RequestBuilder) -> Result<Option<WebResponse>, InvokeError> {
        Ok(self.next_response())
    }

    fn plain_execute_silently(&self, _builder: RequestBuilder) -> Result<Option<WebResponse>, InvokeError> {
        Ok(self.next_response())
    }

    fn do_post(&self, _url: &str, _body: &str, _mime_type: &str) -> Result<Option<WebResponse>, InvokeError> {
        Ok(self.next_response())
    }

    fn do_put(&self, _url: &str, _body: &str, _mime_type: &str) -> Result<Option<WebResponse>, InvokeError> {
        Ok(self.next_response())
    }

    fn do_patch(&self, _url: &str, _body: &str, _mime_type: &str) -> Result<Option<WebResponse>, InvokeError> {
        Ok(self.next_response())
    }

    fn download_to_temp_file(&self, url: &str) -> Result<Option<TempPath>, InvokeError> {
        let target = parse_url(url)?;
        let Some(response) = self.do_get(url)? else {
            return Ok(None);
        };
        let written = download::temp_file_for(&target)
            .and_then(|path| response.write_to_file(&path).map(|()| path));
        absorb(url, written)
    }

    fn download_to_file(&self, url: &str, path: &Path) -> Result<bool, InvokeError> {
        let Some(response) = self.do_get(url)? else {
            return Ok(false);
        };
        absorb(url, response.write_to_file(path)).map(|done| done.is_some())
    }

    // Defaults only shape real requests

    fn set_connection_timeout(&self, _timeout: Duration) {}

    fn set_socket_timeout(&self, _timeout: Duration) {}

    fn set_follow_redirects(&self, _follow: bool) {}

    fn set_cookie_policy(&self, _policy: CookiePolicy) {}
}
