//! Hooks around request execution.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use crate::error::InvokeError;
use crate::request::Request;
use crate::response::WebResponse;

/// A pair of hooks run by the [`Executor`](crate::Executor) around every request
///
/// Interceptors run in descending [`priority`](Interceptor::priority) order;
/// interceptors with equal priority run in the order they were added.
pub trait Interceptor: Send + Sync {
    /// Higher runs first
    fn priority(&self) -> i32 {
        0
    }

    /// Called before the request is sent.
    ///
    /// Returning a response skips the transport and the after phase; the
    /// caller receives that response.
    fn before(&self, _request: &Request) -> Option<WebResponse> {
        None
    }

    /// Called with the materialized response or the transport error.
    ///
    /// The returned response is handed to the next interceptor.
    fn after(&self, response: Option<WebResponse>, _error: Option<&InvokeError>) -> Option<WebResponse> {
        response
    }
}

/// Interceptors of one executor, kept sorted by priority
#[derive(Default)]
pub struct InterceptorChain {
    interceptors: RwLock<Vec<Arc<dyn Interceptor>>>,
}

impl InterceptorChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert after every interceptor of equal or higher priority.
    pub fn add(&self, interceptor: Arc<dyn Interceptor>) {
        let priority = interceptor.priority();
        let mut interceptors = self.interceptors.write();
        let index = interceptors.partition_point(|existing| existing.priority() >= priority);
        interceptors.insert(index, interceptor);
    }

    /// Remove this exact interceptor instance; returns whether it was registered.
    pub fn remove(&self, interceptor: &Arc<dyn Interceptor>) -> bool {
        let mut interceptors = self.interceptors.write();
        let before = interceptors.len();
        interceptors.retain(|existing| !std::ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(interceptor)));
        interceptors.len() != before
    }

    pub fn clear(&self) {
        self.interceptors.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.read().is_empty()
    }

    /// Interceptors in execution order
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn Interceptor>> {
        self.interceptors.read().clone()
    }

    /// Run the before phase; the first response returned wins.
    pub(crate) fn run_before(interceptors: &[Arc<dyn Interceptor>], request: &Request) -> Option<WebResponse> {
        interceptors.iter().find_map(|interceptor| interceptor.before(request))
    }

    /// Run the after phase, threading the response through every interceptor.
    pub(crate) fn run_after(
        interceptors: &[Arc<dyn Interceptor>],
        response: Option<WebResponse>,
        error: Option<&InvokeError>,
    ) -> Option<WebResponse> {
        interceptors
            .iter()
            .fold(response, |current, interceptor| interceptor.after(current, error))
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let priorities: Vec<i32> = self.interceptors.read().iter().map(|i| i.priority()).collect();
        f.debug_struct("InterceptorChain")
            .field("priorities", &priorities)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::request::RequestBuilder;
    use parking_lot::Mutex;

    struct Recording {
        name: &'static str,
        priority: i32,
        log: Arc<Mutex<Vec<String>>>,
        respond: bool,
    }

    impl Interceptor for Recording {
        fn priority(&self) -> i32 {
            self.priority
        }

        fn before(&self, _request: &Request) -> Option<WebResponse> {
            self.log.lock().push(format!("before:{}", self.name));
            self.respond.then(|| WebResponse::from_text(self.name))
        }

        fn after(&self, response: Option<WebResponse>, _error: Option<&InvokeError>) -> Option<WebResponse> {
            self.log.lock().push(format!("after:{}", self.name));
            response
        }
    }

    fn recording(name: &'static str, priority: i32, log: &Arc<Mutex<Vec<String>>>, respond: bool) -> Arc<dyn Interceptor> {
        Arc::new(Recording {
            name,
            priority,
            log: Arc::clone(log),
            respond,
        })
    }

    fn request() -> Request {
        RequestBuilder::get("http://localhost/anywhere").finalize().unwrap()
    }

    #[test]
    fn test_priority_order_with_stable_ties() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new();
        chain.add(recording("low", 0, &log, false));
        chain.add(recording("high", 10, &log, false));
        chain.add(recording("low2", 0, &log, false));
        chain.add(recording("mid", 5, &log, false));

        let interceptors = chain.snapshot();
        assert!(InterceptorChain::run_before(&interceptors, &request()).is_none());
        assert!(InterceptorChain::run_after(&interceptors, None, None).is_none());
        assert_eq!(
            *log.lock(),
            vec![
                "before:high", "before:mid", "before:low", "before:low2",
                "after:high", "after:mid", "after:low", "after:low2",
            ]
        );
    }

    #[test]
    fn test_first_before_response_wins() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new();
        chain.add(recording("zero", 0, &log, true));
        chain.add(recording("ten", 10, &log, true));

        let response = InterceptorChain::run_before(&chain.snapshot(), &request()).unwrap();
        assert_eq!(response.content().as_deref(), Some("ten"));
        // Later interceptors are not consulted
        assert_eq!(*log.lock(), vec!["before:ten"]);
    }

    #[test]
    fn test_after_threads_response() {
        struct Replace;
        impl Interceptor for Replace {
            fn priority(&self) -> i32 {
                1
            }
            fn after(&self, _response: Option<WebResponse>, error: Option<&InvokeError>) -> Option<WebResponse> {
                error.map(|e| WebResponse::new(503).with_content(e.to_string()))
            }
        }
        struct Upper;
        impl Interceptor for Upper {
            fn after(&self, response: Option<WebResponse>, _error: Option<&InvokeError>) -> Option<WebResponse> {
                response.map(|r| {
                    let text = r.content().unwrap_or_default().to_uppercase();
                    r.with_content(text)
                })
            }
        }

        let chain = InterceptorChain::new();
        chain.add(Arc::new(Upper));
        chain.add(Arc::new(Replace));
        let error = InvokeError::transport("boom");
        let result = InterceptorChain::run_after(&chain.snapshot(), None, Some(&error)).unwrap();
        assert_eq!(result.status(), 503);
        assert_eq!(result.content().as_deref(), Some("BOOM"));
    }

    #[test]
    fn test_remove_by_identity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new();
        let first = recording("a", 0, &log, false);
        let twin = recording("a", 0, &log, false);
        chain.add(Arc::clone(&first));

        assert!(!chain.remove(&twin));
        assert_eq!(chain.len(), 1);
        assert!(chain.remove(&first));
        assert!(chain.is_empty());
        assert!(!chain.remove(&first));

        chain.add(first);
        chain.add(twin);
        chain.clear();
        assert_eq!(chain.len(), 0);
    }
}
