//! The layer that puts requests on the wire.
//!
//! [`Transport`] is the seam between the executor and the network. The
//! default implementation is [`HyperTransport`]; tests substitute their own.

mod client;
mod connector;
mod redirect;

pub use client::HyperTransport;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use std::fmt;
use std::io::{self, Read};

use crate::context::ExecutionContext;
use crate::error::InvokeError;
use crate::pool::ConnectionPool;
use crate::request::Request;

/// Sends a finalized request and returns the response with its body unread
pub trait Transport: Send + Sync {
    /// Execute one request, following redirects and authentication
    /// challenges as configured.
    ///
    /// # Errors
    ///
    /// Any transport-class [`InvokeError`]: connection, TLS, timeout, abort or
    /// redirect failures.
    fn execute(
        &self,
        request: Request,
        context: &mut ExecutionContext,
    ) -> Result<TransportResponse, InvokeError>;

    /// Connection pool backing this transport, if it has one
    fn pool(&self) -> Option<&ConnectionPool> {
        None
    }

    /// Release pooled resources.
    ///
    /// # Errors
    ///
    /// Implementation specific; callers log and ignore failures.
    fn shutdown(&self) -> Result<(), InvokeError> {
        Ok(())
    }
}

/// Response body as a blocking byte stream
pub struct Entity {
    content_type: Option<String>,
    content_length: Option<u64>,
    reader: Box<dyn Read + Send>,
}

impl Entity {
    pub fn new(
        reader: impl Read + Send + 'static,
        content_length: Option<u64>,
        content_type: Option<String>,
    ) -> Self {
        Self {
            content_type,
            content_length,
            reader: Box::new(reader),
        }
    }

    /// In-memory entity with an exact length
    pub fn from_bytes(content: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        let content = content.into();
        let length = u64::try_from(content.len()).ok();
        Self::new(
            io::Cursor::new(content),
            length,
            content_type.map(str::to_owned),
        )
    }

    /// Declared `Content-Type`
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Declared length; `None` for chunked or close-delimited bodies
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Read the remaining body into memory.
    ///
    /// # Errors
    ///
    /// Returns the error that interrupted reading.
    pub fn read_all(&mut self) -> Result<Bytes, InvokeError> {
        let capacity = self
            .content_length
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(0)
            .min(1 << 20);
        let mut buf = Vec::with_capacity(capacity);
        self.reader
            .read_to_end(&mut buf)
            .map_err(InvokeError::from_io)?;
        Ok(Bytes::from(buf))
    }

    /// Read and drop the remaining body.
    ///
    /// # Errors
    ///
    /// Returns the error that interrupted reading.
    pub fn discard(&mut self) -> Result<(), InvokeError> {
        io::copy(&mut self.reader, &mut io::sink()).map_err(InvokeError::from_io)?;
        Ok(())
    }

    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.reader
    }
}

impl Read for Entity {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Status line, headers and the unread entity of a response
#[derive(Debug)]
pub struct TransportResponse {
    status: StatusCode,
    reason: String,
    version: http::Version,
    headers: HeaderMap,
    entity: Option<Entity>,
}

impl TransportResponse {
    /// Response with the canonical reason phrase and no entity
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: status.canonical_reason().unwrap_or_default().to_owned(),
            version: http::Version::HTTP_11,
            headers: HeaderMap::new(),
            entity: None,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: http::Version) -> Self {
        self.version = version;
        self
    }

    /// Append a header value
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entity = Some(entity);
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    #[must_use]
    pub fn version(&self) -> http::Version {
        self.version
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn entity(&self) -> Option<&Entity> {
        self.entity.as_ref()
    }

    pub fn entity_mut(&mut self) -> Option<&mut Entity> {
        self.entity.as_mut()
    }

    pub fn take_entity(&mut self) -> Option<Entity> {
        self.entity.take()
    }

    /// Parsed `Content-Length` header, if present and numeric
    #[must_use]
    pub fn content_length_header(&self) -> Option<i64> {
        self.headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }

    /// Drain and drop the entity, if any.
    ///
    /// # Errors
    ///
    /// Returns the error that interrupted reading.
    pub fn discard(&mut self) -> Result<(), InvokeError> {
        match self.entity.take() {
            Some(mut entity) => entity.discard(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_entity_from_bytes() {
        let mut entity = Entity::from_bytes("hello", Some("text/plain"));
        assert_eq!(entity.content_length(), Some(5));
        assert_eq!(entity.content_type(), Some("text/plain"));
        assert_eq!(entity.read_all().unwrap(), Bytes::from_static(b"hello"));
        // Exhausted
        assert!(entity.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_response_builders() {
        let mut response = TransportResponse::new(StatusCode::NOT_FOUND)
            .with_header(header::CONTENT_LENGTH, HeaderValue::from_static("3"))
            .with_entity(Entity::from_bytes("abc", None));
        assert_eq!(response.reason(), "Not Found");
        assert_eq!(response.content_length_header(), Some(3));
        assert!(response.entity().is_some());
        response.discard().unwrap();
        assert!(response.entity().is_none());
    }
}
