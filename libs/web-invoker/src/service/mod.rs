//! Verb-per-method facade that absorbs transport failures.
//!
//! Every method returns `Ok(None)` (or `Ok(false)`) when the request failed
//! in the transport or came back with an error status, after logging the
//! failure at debug level. Usage errors and rate-limit rejections are
//! returned as `Err`: they point at a bug or a policy violation in the
//! caller, not at the remote side.

mod default;
mod mock;

pub use default::DefaultHttpService;
pub use mock::MockHttpService;

use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tempfile::TempPath;

use crate::body::ContentType;
use crate::config::CookiePolicy;
use crate::error::InvokeError;
use crate::request::{RequestBuilder, Verb};
use crate::response::WebResponse;

/// Values that can be posted as an XML document
///
/// Implemented for strings holding an already serialized document; domain
/// types implement it with the serializer of their choice.
pub trait ToXml {
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] if the value cannot be serialized.
    fn to_xml(&self) -> Result<String, InvokeError>;
}

impl ToXml for str {
    fn to_xml(&self) -> Result<String, InvokeError> {
        Ok(self.to_owned())
    }
}

impl ToXml for String {
    fn to_xml(&self) -> Result<String, InvokeError> {
        Ok(self.clone())
    }
}

/// High-level HTTP API
///
/// Implementations provide request construction, the two silent execution
/// paths and the download helpers; the verb methods are built on top of them.
///
/// # Errors
///
/// Methods returning `Result` fail only with [`InvokeError::Usage`] (and its
/// URI/header variants) or [`InvokeError::RateLimited`]. Everything else is
/// logged and reported as `None`/`false`.
pub trait HttpService: Send + Sync {
    /// Builder for `verb` and `url` with this service's defaults applied.
    fn get_web_request(&self, verb: Verb, url: &str) -> RequestBuilder;

    /// Apply this service's defaults to `builder` and execute it.
    fn execute_silently(&self, builder: RequestBuilder) -> Result<Option<WebResponse>, InvokeError>;

    /// Execute `builder` as is.
    fn plain_execute_silently(&self, builder: RequestBuilder) -> Result<Option<WebResponse>, InvokeError>;

    /// GET `url` into a temporary file named after the URL's extension.
    ///
    /// The file is removed when the returned path is dropped.
    fn download_to_temp_file(&self, url: &str) -> Result<Option<TempPath>, InvokeError>;

    /// GET `url` into `path`; returns whether the file was written.
    fn download_to_file(&self, url: &str, path: &Path) -> Result<bool, InvokeError>;

    fn set_connection_timeout(&self, timeout: Duration);

    fn set_socket_timeout(&self, timeout: Duration);

    fn set_follow_redirects(&self, follow: bool);

    fn set_cookie_policy(&self, policy: CookiePolicy);

    /// Body of a GET as text.
    fn get_text_response(&self, url: &str) -> Result<Option<String>, InvokeError> {
        Ok(self.do_get(url)?.and_then(|response| response.content()))
    }

    /// Alias of [`HttpService::do_get`].
    fn get_response(&self, url: &str) -> Result<Option<WebResponse>, InvokeError> {
        self.do_get(url)
    }

    /// Headers of a HEAD response; repeated headers keep their last value.
    fn get_response_headers(&self, url: &str) -> Result<Option<HashMap<String, String>>, InvokeError> {
        Ok(self.do_head(url)?.map(|response| response.headers_map()))
    }

    fn do_get(&self, url: &str) -> Result<Option<WebResponse>, InvokeError> {
        self.plain_execute_silently(self.get_web_request(Verb::Get, url))
    }

    fn do_head(&self, url: &str) -> Result<Option<WebResponse>, InvokeError> {
        self.plain_execute_silently(self.get_web_request(Verb::Head, url))
    }

    fn do_delete(&self, url: &str) -> Result<Option<WebResponse>, InvokeError> {
        self.plain_execute_silently(self.get_web_request(Verb::Delete, url))
    }

    fn do_options(&self, url: &str) -> Result<Option<WebResponse>, InvokeError> {
        self.plain_execute_silently(self.get_web_request(Verb::Options, url))
    }

    fn do_trace(&self, url: &str) -> Result<Option<WebResponse>, InvokeError> {
        self.plain_execute_silently(self.get_web_request(Verb::Trace, url))
    }

    /// POST `body` with the given MIME type (a `charset` parameter is honored).
    fn do_post(&self, url: &str, body: &str, mime_type: &str) -> Result<Option<WebResponse>, InvokeError> {
        let builder = text_body(self.get_web_request(Verb::Post, url), body, mime_type)?;
        self.plain_execute_silently(builder)
    }

    fn do_put(&self, url: &str, body: &str, mime_type: &str) -> Result<Option<WebResponse>, InvokeError> {
        let builder = text_body(self.get_web_request(Verb::Put, url), body, mime_type)?;
        self.plain_execute_silently(builder)
    }

    fn do_patch(&self, url: &str, body: &str, mime_type: &str) -> Result<Option<WebResponse>, InvokeError> {
        let builder = text_body(self.get_web_request(Verb::Patch, url), body, mime_type)?;
        self.plain_execute_silently(builder)
    }

    /// POST `value` as UTF-8 JSON.
    fn post_json<T>(&self, url: &str, value: &T) -> Result<Option<WebResponse>, InvokeError>
    where
        Self: Sized,
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_string(value)
            .map_err(|e| InvokeError::usage(format!("Failed to serialize JSON body: {e}")))?;
        self.do_post(url, &body, &ContentType::json().to_string())
    }

    /// POST `value` as a UTF-8 `text/xml` document.
    fn post_xml<T>(&self, url: &str, value: &T) -> Result<Option<WebResponse>, InvokeError>
    where
        Self: Sized,
        T: ToXml + ?Sized,
    {
        let body = value.to_xml()?;
        self.do_post(url, &body, &ContentType::xml().to_string())
    }
}

fn text_body(builder: RequestBuilder, body: &str, mime_type: &str) -> Result<RequestBuilder, InvokeError> {
    builder.body_string(body, ContentType::parse(mime_type)?)
}

/// Turn an absorbable failure into `None`, logging it.
pub fn absorb<T>(url: &str, result: Result<T, InvokeError>) -> Result<Option<T>, InvokeError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_absorbable() => {
            tracing::debug!(url, error = %e, "Unable to fetch response from url");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_policy() {
        assert_eq!(absorb("u", Ok(1)).unwrap(), Some(1));
        assert_eq!(
            absorb::<()>("u", Err(InvokeError::transport("connection reset"))).unwrap(),
            None
        );
        assert_eq!(
            absorb::<()>(
                "u",
                Err(InvokeError::HttpStatus {
                    status: 500,
                    reason: "Internal Server Error".to_owned(),
                })
            )
            .unwrap(),
            None
        );
        assert!(matches!(
            absorb::<()>("u", Err(InvokeError::usage("bad"))),
            Err(InvokeError::Usage(_))
        ));
        assert!(matches!(
            absorb::<()>(
                "u",
                Err(InvokeError::RateLimited {
                    host: "h".to_owned()
                })
            ),
            Err(InvokeError::RateLimited { .. })
        ));
    }

    /// Absorbed failures are logged at debug level with the URL
    #[test]
    fn test_absorbed_failure_is_logged() {
        use parking_lot::Mutex;
        use std::sync::Arc;
        use tracing_subscriber::layer::SubscriberExt;

        #[derive(Clone, Default)]
        struct DebugCapture {
            events: Arc<Mutex<Vec<String>>>,
        }

        impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for DebugCapture {
            fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
                if *event.metadata().level() == tracing::Level::DEBUG {
                    let mut visitor = FieldVisitor(Vec::new());
                    event.record(&mut visitor);
                    self.events.lock().push(visitor.0.join(" "));
                }
            }
        }

        struct FieldVisitor(Vec<String>);
        impl tracing::field::Visit for FieldVisitor {
            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                self.0.push(format!("{}={value:?}", field.name()));
            }
        }

        let capture = DebugCapture::default();
        let events = Arc::clone(&capture.events);
        let subscriber = tracing_subscriber::registry().with(capture);

        tracing::subscriber::with_default(subscriber, || {
            let result = absorb::<()>("http://down.example/", Err(InvokeError::transport("reset")));
            assert!(result.unwrap().is_none());
        });

        let captured = events.lock();
        assert_eq!(captured.len(), 1);
        assert!(captured[0].contains("Unable to fetch response from url"));
        assert!(captured[0].contains("http://down.example/"));
        assert!(captured[0].contains("reset"));
    }

    #[test]
    fn test_to_xml_for_strings() {
        assert_eq!("<a/>".to_xml().unwrap(), "<a/>");
        assert_eq!(String::from("<b/>").to_xml().unwrap(), "<b/>");
    }

    #[test]
    fn test_text_body_rejects_bad_mime() {
        let err = text_body(RequestBuilder::post("http://localhost/"), "x", "not a mime").unwrap_err();
        assert!(matches!(err, InvokeError::Usage(_)));
        assert!(text_body(RequestBuilder::get("http://localhost/"), "x", "text/plain").is_err());
    }
}
