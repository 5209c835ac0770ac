//! Materialized responses.
//!
//! A [`WebResponse`] is the fully buffered, immutable result of a request.
//! [`ResponseMaterializer`] builds one from a live transport response; other
//! [`ResponseHandler`]s can be supplied to
//! [`RawResponse::web_response_with`](crate::RawResponse::web_response_with).

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::SystemTime;
use url::Url;

use crate::body::ContentType;
use crate::charset::Charset;
use crate::download;
use crate::error::InvokeError;
use crate::raw_response::LiveResponse;

/// Fully read response
///
/// Built by [`ResponseMaterializer`] or, in tests and interceptors, with
/// [`WebResponse::new`] and the `with_*` setters.
#[derive(Debug, Clone, Default)]
pub struct WebResponse {
    status: u16,
    reason: String,
    content: Option<Bytes>,
    charset: Option<Charset>,
    content_type: Option<String>,
    headers: HeaderMap,
    size: i64,
    redirect_chain: Vec<Url>,
    original_uri: Option<Url>,
    last_modified: Option<SystemTime>,
}

impl WebResponse {
    /// Response with the given status, its canonical reason and no content
    #[must_use]
    pub fn new(status: u16) -> Self {
        let reason = http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_owned();
        Self {
            status,
            reason,
            ..Self::default()
        }
    }

    /// `200 OK` with a UTF-8 text body
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        let content = Bytes::from(text.into());
        Self::new(200)
            .with_size(i64::try_from(content.len()).unwrap_or(i64::MAX))
            .with_content(content)
            .with_charset(Some(Charset::Utf8))
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<Bytes>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn with_charset(mut self, charset: Option<Charset>) -> Self {
        self.charset = charset;
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Append a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or value is not valid in HTTP.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, InvokeError> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        self.headers.append(name, value);
        Ok(self)
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: i64) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub fn with_redirect_chain(mut self, chain: Vec<Url>) -> Self {
        self.redirect_chain = chain;
        self
    }

    #[must_use]
    pub fn with_original_uri(mut self, uri: Option<Url>) -> Self {
        self.original_uri = uri;
        self
    }

    /// Fixed value for [`WebResponse::last_modified`], overriding the header
    #[must_use]
    pub fn with_last_modified(mut self, time: SystemTime) -> Self {
        self.last_modified = Some(time);
        self
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Content decoded with the detected charset, UTF-8 otherwise
    #[must_use]
    pub fn content(&self) -> Option<String> {
        self.as_string(Charset::Utf8)
    }

    /// Content decoded with the detected charset, `fallback` if none was detected.
    ///
    /// `None` when the response had no entity.
    #[must_use]
    pub fn as_string(&self, fallback: Charset) -> Option<String> {
        let content = self.content.as_ref()?;
        Some(self.charset.unwrap_or(fallback).decode(content))
    }

    /// Raw content; `None` when the response had no entity
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    /// Charset from the response content type, if recognized
    #[must_use]
    pub fn charset(&self) -> Option<Charset> {
        self.charset
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Parsed content type, ignoring values that do not parse
    #[must_use]
    pub fn parsed_content_type(&self) -> Option<ContentType> {
        self.content_type
            .as_deref()
            .and_then(|ct| ContentType::parse(ct).ok())
    }

    /// Declared length of the entity; 0 when unknown
    #[must_use]
    pub fn size(&self) -> i64 {
        self.size
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Last value of a header, if present and valid text
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(name)
            .iter()
            .next_back()
            .and_then(|v| v.to_str().ok())
    }

    /// Headers as a flat map; for repeated headers the last value wins.
    #[must_use]
    pub fn headers_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::with_capacity(self.headers.keys_len());
        for (name, value) in &self.headers {
            if let Ok(value) = value.to_str() {
                map.insert(name.as_str().to_owned(), value.to_owned());
            }
        }
        map
    }

    /// Value of `Last-Modified`, or `None` when absent or unparseable
    #[must_use]
    pub fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified.or_else(|| {
            self.header(header::LAST_MODIFIED.as_str())
                .and_then(|v| httpdate::parse_http_date(v).ok())
        })
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    #[must_use]
    pub fn is_redirect(&self) -> bool {
        (300..=399).contains(&self.status)
    }

    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..=499).contains(&self.status)
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        (500..=599).contains(&self.status)
    }

    /// Redirect targets in the order they were followed; empty without redirects
    #[must_use]
    pub fn redirect_chain(&self) -> &[Url] {
        &self.redirect_chain
    }

    #[must_use]
    pub fn has_redirects(&self) -> bool {
        !self.redirect_chain.is_empty()
    }

    /// URL that produced this response when redirects were followed
    #[must_use]
    pub fn final_uri(&self) -> Option<&Url> {
        self.redirect_chain.last()
    }

    /// URL of the request as issued
    #[must_use]
    pub fn original_uri(&self) -> Option<&Url> {
        self.original_uri.as_ref()
    }

    /// One-line summary for logs
    #[must_use]
    pub fn trace(&self) -> String {
        format!(
            "[Response: code={}, message={}, contentType={}, size={}]",
            self.status,
            self.reason,
            self.content_type.as_deref().unwrap_or("null"),
            self.size
        )
    }

    /// Write the content to `path`, replacing the file.
    ///
    /// A response without content produces an empty file.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::HttpStatus`] for a status of 300 or more, or the
    /// I/O error that stopped the write.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), InvokeError> {
        if self.status >= 300 {
            return Err(InvokeError::HttpStatus {
                status: self.status,
                reason: self.reason.clone(),
            });
        }
        let content = self.content.as_deref().unwrap_or_default();
        download::write_to_file(path.as_ref(), content)
    }
}

impl fmt::Display for WebResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.reason)
    }
}

/// Equal when the contents are equal, matching how mocked responses are compared
impl PartialEq for WebResponse {
    fn eq(&self, other: &Self) -> bool {
        self.content == other.content
    }
}

/// Turns a live response into a [`WebResponse`]
///
/// Closures taking `&mut LiveResponse` implement this trait too.
pub trait ResponseHandler {
    /// Read `response` and build the result.
    ///
    /// # Errors
    ///
    /// Returns the error that interrupted reading the body, or any error the
    /// handler chooses to raise.
    fn handle(&self, response: &mut LiveResponse) -> Result<WebResponse, InvokeError>;
}

impl<F> ResponseHandler for F
where
    F: Fn(&mut LiveResponse) -> Result<WebResponse, InvokeError>,
{
    fn handle(&self, response: &mut LiveResponse) -> Result<WebResponse, InvokeError> {
        self(response)
    }
}

/// Default handler: buffers the body and copies status, headers and redirects
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseMaterializer;

impl ResponseHandler for ResponseMaterializer {
    fn handle(&self, live: &mut LiveResponse) -> Result<WebResponse, InvokeError> {
        let redirect_chain = live.redirect_locations().to_vec();
        let original_uri = live.original_uri().clone();
        let response = live.response_mut();

        let header_length = response.content_length_header().unwrap_or(0);
        let (content, size, content_type) = match response.entity_mut() {
            Some(entity) => {
                let declared = entity
                    .content_length()
                    .map_or(header_length, |len| i64::try_from(len).unwrap_or(i64::MAX));
                let content_type = entity.content_type().map(str::to_owned);
                (Some(entity.read_all()?), declared, content_type)
            }
            None => (None, header_length, None),
        };
        response.discard()?;

        let charset = content_type
            .as_deref()
            .and_then(|ct| ContentType::parse(ct).ok())
            .and_then(|ct| ct.charset());

        let mut web = WebResponse::new(response.status().as_u16())
            .with_reason(response.reason())
            .with_headers(response.headers().clone())
            .with_size(size)
            .with_charset(charset)
            .with_redirect_chain(redirect_chain)
            .with_original_uri(Some(original_uri));
        web.content = content;
        web.content_type = content_type;
        Ok(web)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::transport::{Entity, TransportResponse};
    use http::StatusCode;
    use std::time::Duration;

    fn live(response: TransportResponse, ctx: ExecutionContext) -> LiveResponse {
        LiveResponse::new(Url::parse("http://example.com/start").unwrap(), response, ctx)
    }

    #[test]
    fn test_materialize_with_entity() {
        let response = TransportResponse::new(StatusCode::OK)
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=ISO-8859-1"))
            .with_header(HeaderName::from_static("x-multi"), HeaderValue::from_static("one"))
            .with_header(HeaderName::from_static("x-multi"), HeaderValue::from_static("two"))
            .with_entity(Entity::from_bytes(vec![0x63, 0x61, 0x66, 0xE9], Some("text/html; charset=ISO-8859-1")));

        let web = ResponseMaterializer
            .handle(&mut live(response, ExecutionContext::new()))
            .unwrap();
        assert_eq!(web.status(), 200);
        assert_eq!(web.reason(), "OK");
        assert_eq!(web.size(), 4);
        assert_eq!(web.charset(), Some(Charset::Iso8859_1));
        assert_eq!(web.content().as_deref(), Some("caf\u{e9}"));
        assert_eq!(web.content_type(), Some("text/html; charset=ISO-8859-1"));
        assert_eq!(web.header("x-multi"), Some("two"));
        assert_eq!(web.headers().get_all("x-multi").iter().count(), 2);
        assert_eq!(web.headers_map().get("x-multi").map(String::as_str), Some("two"));
        assert!(!web.has_redirects());
        assert!(web.final_uri().is_none());
        assert_eq!(web.original_uri().unwrap().path(), "/start");
    }

    #[test]
    fn test_materialize_without_entity_uses_header_length() {
        let response = TransportResponse::new(StatusCode::NO_CONTENT)
            .with_header(header::CONTENT_LENGTH, HeaderValue::from_static("42"));
        let web = ResponseMaterializer
            .handle(&mut live(response, ExecutionContext::new()))
            .unwrap();
        assert_eq!(web.size(), 42);
        assert!(web.as_bytes().is_none());
        assert!(web.content().is_none());

        let response = TransportResponse::new(StatusCode::NO_CONTENT)
            .with_header(header::CONTENT_LENGTH, HeaderValue::from_static("lots"));
        let web = ResponseMaterializer
            .handle(&mut live(response, ExecutionContext::new()))
            .unwrap();
        assert_eq!(web.size(), 0);
    }

    #[test]
    fn test_unknown_charset_leaves_binary() {
        let response = TransportResponse::new(StatusCode::OK)
            .with_entity(Entity::from_bytes("abc", Some("text/plain; charset=x-unknown")));
        let web = ResponseMaterializer
            .handle(&mut live(response, ExecutionContext::new()))
            .unwrap();
        assert_eq!(web.charset(), None);
        assert_eq!(web.as_bytes().unwrap().as_ref(), b"abc");
    }

    #[test]
    fn test_redirect_chain_copied() {
        let mut ctx = ExecutionContext::new();
        ctx.push_redirect(Url::parse("http://example.com/a").unwrap());
        ctx.push_redirect(Url::parse("http://example.com/b").unwrap());
        let response = TransportResponse::new(StatusCode::OK).with_entity(Entity::from_bytes("", None));

        let web = ResponseMaterializer.handle(&mut live(response, ctx)).unwrap();
        assert!(web.has_redirects());
        assert_eq!(web.redirect_chain().len(), 2);
        assert_eq!(web.final_uri().unwrap().path(), "/b");
        // Empty but present entity
        assert_eq!(web.as_bytes().map(Bytes::len), Some(0));
    }

    #[test]
    fn test_status_classes() {
        assert!(WebResponse::new(204).is_success());
        assert!(WebResponse::new(302).is_redirect());
        assert!(WebResponse::new(404).is_client_error());
        assert!(WebResponse::new(503).is_server_error());
        assert!(!WebResponse::new(199).is_success());
    }

    #[test]
    fn test_trace_and_display() {
        let web = WebResponse::from_text("hello").with_content_type("text/plain");
        assert_eq!(web.to_string(), "200 OK");
        assert_eq!(
            web.trace(),
            "[Response: code=200, message=OK, contentType=text/plain, size=5]"
        );
        assert_eq!(
            WebResponse::new(404).trace(),
            "[Response: code=404, message=Not Found, contentType=null, size=0]"
        );
    }

    #[test]
    fn test_last_modified() {
        let web = WebResponse::new(200)
            .with_header("Last-Modified", "Sun, 06 Nov 1994 08:49:37 GMT")
            .unwrap();
        let expected = SystemTime::UNIX_EPOCH + Duration::from_secs(784_111_777);
        assert_eq!(web.last_modified(), Some(expected));

        let broken = WebResponse::new(200)
            .with_header("Last-Modified", "yesterday")
            .unwrap();
        assert_eq!(broken.last_modified(), None);

        let pinned = broken.with_last_modified(SystemTime::UNIX_EPOCH);
        assert_eq!(pinned.last_modified(), Some(SystemTime::UNIX_EPOCH));
    }

    #[test]
    fn test_as_string_fallback() {
        let web = WebResponse::new(200).with_content(vec![0xE9]);
        assert_eq!(web.as_string(Charset::Iso8859_1).as_deref(), Some("\u{e9}"));
        assert_eq!(web.content().as_deref(), Some("\u{fffd}"));
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        WebResponse::from_text("saved").write_to_file(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "saved");

        WebResponse::new(200).write_to_file(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), 0);

        let err = WebResponse::new(404).write_to_file(&path).unwrap_err();
        assert!(matches!(err, InvokeError::HttpStatus { status: 404, .. }));
    }

    #[test]
    fn test_equality_by_content() {
        assert_eq!(WebResponse::from_text("a"), WebResponse::from_text("a").with_status(500));
        assert_ne!(WebResponse::from_text("a"), WebResponse::new(200));
        assert_eq!(WebResponse::new(200), WebResponse::new(404));
    }
}
