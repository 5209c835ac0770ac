//! Single-use handle over a response whose body has not been read yet.

use http::HeaderMap;
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use url::Url;

use crate::context::ExecutionContext;
use crate::download;
use crate::error::InvokeError;
use crate::response::{ResponseHandler, ResponseMaterializer, WebResponse};
use crate::transport::TransportResponse;

const CONSUMED: &str = "Response content has been already consumed";
const HANDLED: &str = "RawResponse has already been handled.";

/// Transport response still attached to its connection, plus what a
/// [`ResponseHandler`] needs to describe it
pub struct LiveResponse {
    original_uri: Url,
    response: TransportResponse,
    context: ExecutionContext,
}

impl LiveResponse {
    pub(crate) fn new(original_uri: Url, response: TransportResponse, context: ExecutionContext) -> Self {
        Self {
            original_uri,
            response,
            context,
        }
    }

    /// URL of the request as issued, before any redirect
    #[must_use]
    pub fn original_uri(&self) -> &Url {
        &self.original_uri
    }

    #[must_use]
    pub fn response(&self) -> &TransportResponse {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut TransportResponse {
        &mut self.response
    }

    /// Redirect targets followed while executing the request
    #[must_use]
    pub fn redirect_locations(&self) -> &[Url] {
        self.context.redirect_locations()
    }
}

enum State {
    Live(Box<LiveResponse>),
    /// Materialized before reaching the caller (interceptors)
    Handled(WebResponse),
    Consumed,
}

/// Result of [`Executor::execute`](crate::Executor::execute)
///
/// Exactly one terminal operation can read the body:
/// [`web_response`](Self::web_response),
/// [`web_response_with`](Self::web_response_with),
/// [`write_to_file`](Self::write_to_file) or [`into_reader`](Self::into_reader).
/// Later calls fail with [`InvokeError::Usage`]. [`discard_content`](Self::discard_content)
/// may be called any number of times. Dropping an unread handle closes the
/// underlying connection instead of returning it to the pool.
///
/// A handle produced by interceptors already holds a [`WebResponse`]; it
/// serves `web_response` and `write_to_file` repeatedly and rejects custom
/// handlers.
pub struct RawResponse {
    state: State,
}

impl RawResponse {
    pub(crate) fn live(original_uri: Url, response: TransportResponse, context: ExecutionContext) -> Self {
        Self {
            state: State::Live(Box::new(LiveResponse::new(original_uri, response, context))),
        }
    }

    /// Handle over an already materialized response
    #[must_use]
    pub fn handled(response: WebResponse) -> Self {
        Self {
            state: State::Handled(response),
        }
    }

    /// Read the whole response.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] if the content was already consumed, or
    /// the transport error that interrupted reading the body.
    pub fn web_response(&mut self) -> Result<WebResponse, InvokeError> {
        if let State::Handled(response) = &self.state {
            return Ok(response.clone());
        }
        self.web_response_with(&ResponseMaterializer)
    }

    /// Build the result with a custom handler.
    ///
    /// The remaining body is drained after the handler returns.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] for a handled or consumed handle, or
    /// whatever the handler returns.
    pub fn web_response_with<H>(&mut self, handler: &H) -> Result<WebResponse, InvokeError>
    where
        H: ResponseHandler + ?Sized,
    {
        if matches!(self.state, State::Handled(_)) {
            return Err(InvokeError::usage(HANDLED));
        }
        let mut live = self.take_live()?;
        let result = handler.handle(&mut live);
        drain(&mut live.response);
        result
    }

    /// Stream the body to `path`, replacing any existing file.
    ///
    /// A response without an entity produces an empty file.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::HttpStatus`] when the status is 300 or more (the
    /// body is discarded and the handle consumed), [`InvokeError::Usage`] if
    /// the content was already consumed, or the I/O error that stopped the copy.
    pub fn write_to_file(&mut self, path: impl AsRef<Path>) -> Result<(), InvokeError> {
        if let State::Handled(response) = &self.state {
            return response.write_to_file(path);
        }
        let mut live = self.take_live()?;
        let response = &mut live.response;
        let status = response.status();
        if status.as_u16() >= 300 {
            drain(response);
            return Err(InvokeError::HttpStatus {
                status: status.as_u16(),
                reason: response.reason().to_owned(),
            });
        }
        match response.take_entity() {
            Some(mut entity) => download::stream_to_file(path.as_ref(), &mut entity).map(|_| ()),
            None => download::write_to_file(path.as_ref(), &[]),
        }
    }

    /// Body as a blocking reader.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] if the content was already consumed.
    pub fn into_reader(mut self) -> Result<Box<dyn Read + Send>, InvokeError> {
        if let State::Handled(response) = &self.state {
            let content = response.as_bytes().cloned().unwrap_or_default();
            return Ok(Box::new(io::Cursor::new(content)));
        }
        let mut live = self.take_live()?;
        Ok(match live.response.take_entity() {
            Some(entity) => entity.into_reader(),
            None => Box::new(io::empty()),
        })
    }

    /// Read and drop whatever is left of the body.
    ///
    /// Safe to call any number of times; read failures are logged and ignored.
    pub fn discard_content(&mut self) {
        if let State::Live(live) = &mut self.state {
            drain(&mut live.response);
            self.state = State::Consumed;
        }
    }

    /// Whether the body can no longer be read through this handle
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        !matches!(self.state, State::Live(_))
    }

    /// Status code, while the handle still holds a response
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match &self.state {
            State::Live(live) => Some(live.response.status().as_u16()),
            State::Handled(response) => Some(response.status()),
            State::Consumed => None,
        }
    }

    /// Response headers, while the handle still holds a response
    #[must_use]
    pub fn headers(&self) -> Option<&HeaderMap> {
        match &self.state {
            State::Live(live) => Some(live.response.headers()),
            State::Handled(response) => Some(response.headers()),
            State::Consumed => None,
        }
    }

    fn take_live(&mut self) -> Result<Box<LiveResponse>, InvokeError> {
        match std::mem::replace(&mut self.state, State::Consumed) {
            State::Live(live) => Ok(live),
            other => {
                self.state = other;
                Err(InvokeError::usage(CONSUMED))
            }
        }
    }
}

fn drain(response: &mut TransportResponse) {
    if let Err(e) = response.discard() {
        tracing::debug!(error = %e, "failed to drain response content");
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Live(_) => "live",
            State::Handled(_) => "handled",
            State::Consumed => "consumed",
        };
        f.debug_struct("RawResponse")
            .field("state", &state)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::transport::Entity;
    use http::StatusCode;

    fn raw(status: StatusCode, body: Option<&'static str>) -> RawResponse {
        let mut response = TransportResponse::new(status);
        if let Some(body) = body {
            response = response.with_entity(Entity::from_bytes(body, Some("text/plain")));
        }
        RawResponse::live(
            Url::parse("http://example.com/").unwrap(),
            response,
            ExecutionContext::new(),
        )
    }

    #[test]
    fn test_web_response_then_write_is_rejected() {
        let mut handle = raw(StatusCode::OK, Some("body"));
        assert!(!handle.is_consumed());
        let web = handle.web_response().unwrap();
        assert_eq!(web.content().as_deref(), Some("body"));
        assert!(handle.is_consumed());

        let dir = tempfile::tempdir().unwrap();
        let err = handle.write_to_file(dir.path().join("x")).unwrap_err();
        assert!(matches!(err, InvokeError::Usage(ref m) if m.contains("already consumed")));
        assert!(handle.web_response().is_err());
    }

    #[test]
    fn test_write_to_file_streams_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "previous content that is longer").unwrap();

        let mut handle = raw(StatusCode::OK, Some("fresh"));
        handle.write_to_file(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh");
        assert!(handle.is_consumed());
    }

    #[test]
    fn test_write_to_file_without_entity_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        raw(StatusCode::NO_CONTENT, None).write_to_file(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_write_to_file_on_error_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing");
        let mut handle = raw(StatusCode::NOT_FOUND, Some("nope"));
        let err = handle.write_to_file(&path).unwrap_err();
        assert!(matches!(
            err,
            InvokeError::HttpStatus { status: 404, ref reason } if reason == "Not Found"
        ));
        assert!(handle.is_consumed());
        assert!(!path.exists());
    }

    #[test]
    fn test_discard_is_idempotent() {
        let mut handle = raw(StatusCode::OK, Some("data"));
        handle.discard_content();
        handle.discard_content();
        assert!(handle.is_consumed());
        assert!(handle.status().is_none());
        assert!(handle.web_response().is_err());
    }

    #[test]
    fn test_custom_handler() {
        let mut handle = raw(StatusCode::ACCEPTED, Some("ignored"));
        assert_eq!(handle.status(), Some(202));
        let web = handle
            .web_response_with(&|live: &mut LiveResponse| {
                Ok(WebResponse::from_text(live.original_uri().as_str())
                    .with_status(live.response().status().as_u16()))
            })
            .unwrap();
        assert_eq!(web.status(), 202);
        assert_eq!(web.content().as_deref(), Some("http://example.com/"));
        assert!(handle.is_consumed());
    }

    #[test]
    fn test_handled_handle() {
        let mut handle = RawResponse::handled(WebResponse::from_text("cached"));
        assert!(handle.is_consumed());
        assert_eq!(handle.status(), Some(200));

        let err = handle.web_response_with(&ResponseMaterializer).unwrap_err();
        assert!(matches!(err, InvokeError::Usage(ref m) if m == "RawResponse has already been handled."));

        // Served repeatedly
        assert_eq!(handle.web_response().unwrap().content().as_deref(), Some("cached"));
        assert_eq!(handle.web_response().unwrap().content().as_deref(), Some("cached"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handled");
        handle.write_to_file(&path).unwrap();
        handle.write_to_file(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "cached");
        handle.discard_content();
        assert!(handle.web_response().is_ok());
    }

    #[test]
    fn test_into_reader() {
        let mut text = String::new();
        raw(StatusCode::OK, Some("streamed"))
            .into_reader()
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "streamed");

        let mut consumed = raw(StatusCode::OK, Some("x"));
        consumed.discard_content();
        assert!(consumed.into_reader().is_err());
    }
}
