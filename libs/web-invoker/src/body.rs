//! Request entities.

use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;

use crate::charset::Charset;
use crate::error::InvokeError;

/// Charset used to encode string bodies whose content type names none
pub const DEFAULT_CONTENT_CHARSET: Charset = Charset::Iso8859_1;

/// A MIME type with an optional charset, as sent in `Content-Type`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    mime_type: String,
    charset: Option<Charset>,
}

impl ContentType {
    /// `application/json; charset=UTF-8`
    pub const APPLICATION_JSON: &'static str = "application/json";
    /// `application/octet-stream`
    pub const APPLICATION_OCTET_STREAM: &'static str = "application/octet-stream";
    /// `application/x-www-form-urlencoded`
    pub const APPLICATION_FORM_URLENCODED: &'static str = "application/x-www-form-urlencoded";
    /// `text/plain`
    pub const TEXT_PLAIN: &'static str = "text/plain";
    /// `text/xml`
    pub const TEXT_XML: &'static str = "text/xml";

    /// Content type without a charset
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            charset: None,
        }
    }

    /// Content type with an explicit charset
    pub fn with_charset(mime_type: impl Into<String>, charset: Charset) -> Self {
        Self {
            mime_type: mime_type.into(),
            charset: Some(charset),
        }
    }

    /// `text/plain` with the given charset
    #[must_use]
    pub fn text_plain(charset: Charset) -> Self {
        Self::with_charset(Self::TEXT_PLAIN, charset)
    }

    /// `application/json; charset=UTF-8`
    #[must_use]
    pub fn json() -> Self {
        Self::with_charset(Self::APPLICATION_JSON, Charset::Utf8)
    }

    /// `text/xml; charset=UTF-8`
    #[must_use]
    pub fn xml() -> Self {
        Self::with_charset(Self::TEXT_XML, Charset::Utf8)
    }

    /// `application/octet-stream`
    #[must_use]
    pub fn octet_stream() -> Self {
        Self::new(Self::APPLICATION_OCTET_STREAM)
    }

    /// MIME type without parameters
    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Declared charset, if any
    #[must_use]
    pub fn charset(&self) -> Option<Charset> {
        self.charset
    }

    /// Parse a `Content-Type` header value.
    ///
    /// An unknown `charset` parameter is dropped rather than rejected, so the
    /// body is treated as binary.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] if the value is not a valid media type.
    pub fn parse(value: &str) -> Result<Self, InvokeError> {
        let parsed: mime::Mime = value
            .parse()
            .map_err(|e| InvokeError::usage(format!("Invalid content type '{value}': {e}")))?;
        let charset = parsed
            .get_param(mime::CHARSET)
            .and_then(|c| Charset::for_name(c.as_str()));
        Ok(Self {
            mime_type: parsed.essence_str().to_owned(),
            charset,
        })
    }
}

impl FromStr for ContentType {
    type Err = InvokeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.charset {
            Some(charset) => write!(f, "{}; charset={}", self.mime_type, charset),
            None => f.write_str(&self.mime_type),
        }
    }
}

/// Body of a request
///
/// Every variant except [`RequestBody::Stream`] can be replayed, which is
/// needed when a redirect or an authentication challenge makes the
/// transport send the request again.
pub enum RequestBody {
    /// Text encoded with the content type's charset (ISO-8859-1 if none)
    Text {
        content: String,
        content_type: ContentType,
    },
    /// Raw bytes
    Bytes {
        content: Bytes,
        content_type: Option<ContentType>,
    },
    /// Contents of a file, streamed from disk
    File {
        path: PathBuf,
        content_type: ContentType,
    },
    /// One-shot blocking stream of unknown length, sent chunked
    Stream {
        reader: Box<dyn Read + Send>,
        content_type: Option<ContentType>,
    },
    /// URL-encoded form pairs
    Form {
        pairs: Vec<(String, String)>,
        charset: Charset,
    },
}

impl RequestBody {
    /// Content type announced for this body
    #[must_use]
    pub fn content_type(&self) -> Option<ContentType> {
        match self {
            Self::Text { content_type, .. } | Self::File { content_type, .. } => {
                Some(content_type.clone())
            }
            Self::Bytes { content_type, .. } | Self::Stream { content_type, .. } => {
                content_type.clone()
            }
            Self::Form { charset, .. } => Some(ContentType::with_charset(
                ContentType::APPLICATION_FORM_URLENCODED,
                *charset,
            )),
        }
    }

    /// Length in bytes when known without consuming the body
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Self::Text {
                content,
                content_type,
            } => {
                let charset = content_type.charset().unwrap_or(DEFAULT_CONTENT_CHARSET);
                u64::try_from(charset.encode(content).len()).ok()
            }
            Self::Bytes { content, .. } => u64::try_from(content.len()).ok(),
            Self::File { path, .. } => std::fs::metadata(path).ok().map(|m| m.len()),
            Self::Stream { .. } => None,
            Self::Form { pairs, charset } => u64::try_from(encode_form(pairs, *charset).len()).ok(),
        }
    }

    /// Whether the transport may send this body more than once
    #[must_use]
    pub fn is_repeatable(&self) -> bool {
        !matches!(self, Self::Stream { .. })
    }

    /// Encode the body into memory.
    ///
    /// Returns `None` for bodies that must be streamed (files and readers).
    #[must_use]
    pub fn to_bytes(&self) -> Option<Bytes> {
        match self {
            Self::Text {
                content,
                content_type,
            } => {
                let charset = content_type.charset().unwrap_or(DEFAULT_CONTENT_CHARSET);
                Some(Bytes::from(charset.encode(content).into_owned()))
            }
            Self::Bytes { content, .. } => Some(content.clone()),
            Self::Form { pairs, charset } => Some(Bytes::from(encode_form(pairs, *charset))),
            Self::File { .. } | Self::Stream { .. } => None,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Text { .. } => "Text",
            Self::Bytes { .. } => "Bytes",
            Self::File { .. } => "File",
            Self::Stream { .. } => "Stream",
            Self::Form { .. } => "Form",
        };
        f.debug_struct("RequestBody")
            .field("kind", &kind)
            .field("content_type", &self.content_type())
            .finish_non_exhaustive()
    }
}

/// Encode pairs as `application/x-www-form-urlencoded` in `charset`.
///
/// Spaces become `+`; every byte outside the unreserved set is
/// percent-encoded after conversion to `charset`.
#[must_use]
pub fn encode_form(pairs: &[(String, String)], charset: Charset) -> Vec<u8> {
    let encode: &dyn Fn(&str) -> Cow<'_, [u8]> = &|s: &str| charset.encode(s);
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    serializer.encoding_override(Some(encode));
    for (name, value) in pairs {
        serializer.append_pair(name, value);
    }
    serializer.finish().into_bytes()
}
