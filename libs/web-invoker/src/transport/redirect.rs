//! Redirect policy for the transport.
//!
//! Decides, per 3xx response, whether and how to follow the `Location`:
//! - Limits the number of redirects per request
//! - Rejects circular redirects (a location visited before)
//! - Blocks HTTPS → HTTP downgrades unless allowed
//! - Strips caller-supplied credentials once the chain leaves the original origin

use http::{HeaderValue, StatusCode, header};
use url::Url;

use crate::config::RedirectConfig;
use crate::context::ExecutionContext;
use crate::error::InvokeError;
use crate::request::Verb;

/// Headers that are stripped on cross-origin redirects to prevent credential leakage
pub const SENSITIVE_HEADERS: &[header::HeaderName] = &[
    header::AUTHORIZATION,
    header::COOKIE,
    header::PROXY_AUTHORIZATION,
];

/// Decision for one redirect response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectAction {
    /// Return the 3xx response to the caller
    Stop,
    /// Send the next request to `location`
    Follow {
        location: Url,
        verb: Verb,
        /// Re-send the original body
        keep_body: bool,
        /// Remove [`SENSITIVE_HEADERS`] supplied by the caller
        strip_sensitive: bool,
    },
}

/// Per-request redirect state; create one for every request
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    config: RedirectConfig,
    redirect_count: usize,
    cross_origin_detected: bool,
}

impl RedirectPolicy {
    pub(crate) fn new(config: RedirectConfig) -> Self {
        Self {
            config,
            redirect_count: 0,
            cross_origin_detected: false,
        }
    }

    /// Check if the redirect is to the same origin (scheme, host, port)
    fn is_same_origin(original: &Url, target: &Url) -> bool {
        original.scheme() == target.scheme()
            && original.host_str() == target.host_str()
            && original.port_or_known_default() == target.port_or_known_default()
    }

    /// Check if the redirect is an HTTPS → HTTP downgrade
    fn is_https_downgrade(original: &Url, target: &Url) -> bool {
        original.scheme() == "https" && target.scheme() == "http"
    }

    /// Decide how to handle a response to `verb current`.
    ///
    /// `body_repeatable` tells whether the request body (if any) can be sent
    /// again; a redirect that keeps the verb and body stops when the body is
    /// one-shot.
    pub(crate) fn next(
        &mut self,
        status: StatusCode,
        verb: Verb,
        current: &Url,
        location: Option<&HeaderValue>,
        body_repeatable: bool,
        context: &ExecutionContext,
    ) -> Result<RedirectAction, InvokeError> {
        if !matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308) {
            return Ok(RedirectAction::Stop);
        }

        let location = location
            .ok_or_else(|| {
                InvokeError::Redirect(format!(
                    "Received redirect response {status} but no location header"
                ))
            })?
            .to_str()
            .map_err(|_| InvokeError::Redirect("Redirect location is not valid text".to_owned()))?;
        let target = current.join(location).map_err(|e| {
            InvokeError::Redirect(format!("Invalid redirect location '{location}': {e}"))
        })?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(InvokeError::Redirect(format!(
                "Redirect to unsupported scheme: {target}"
            )));
        }

        self.redirect_count += 1;
        if self.redirect_count > self.config.max_redirects {
            return Err(InvokeError::Redirect(format!(
                "Maximum redirects ({}) exceeded",
                self.config.max_redirects
            )));
        }

        if context.has_visited(&target) {
            return Err(InvokeError::Redirect(format!(
                "Circular redirect to '{target}'"
            )));
        }

        if !self.config.allow_https_downgrade && Self::is_https_downgrade(current, &target) {
            tracing::warn!(
                original = %current,
                target = %target,
                "Blocking HTTPS to HTTP downgrade redirect"
            );
            return Ok(RedirectAction::Stop);
        }

        let (next_verb, keep_body) = match status.as_u16() {
            303 if verb != Verb::Head => (Verb::Get, false),
            303 => (verb, false),
            301 | 302 if verb == Verb::Post => (Verb::Get, false),
            _ => (verb, true),
        };
        if keep_body && !body_repeatable {
            tracing::debug!(target = %target, "cannot replay one-shot body; not following redirect");
            return Ok(RedirectAction::Stop);
        }

        if !Self::is_same_origin(current, &target) {
            self.cross_origin_detected = true;
            tracing::debug!(
                original = %current,
                target = %target,
                "Cross-origin redirect detected"
            );
        }

        tracing::debug!(status = status.as_u16(), target = %target, "following redirect");
        Ok(RedirectAction::Follow {
            location: target,
            verb: next_verb,
            keep_body,
            strip_sensitive: self.cross_origin_detected && self.config.strip_sensitive_headers,
        })
    }
}
