#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Blocking HTTP invocation facade
//!
//! This crate wraps a pooled hyper/rustls client behind a synchronous API:
//! - A fluent [`RequestBuilder`] with one factory per verb
//! - An [`Executor`] holding credentials, cookies and [`Interceptor`]s
//! - Per-host rate limiting through the process-wide [`RateLimitGate`]
//! - Single-use [`RawResponse`] handles that stream or materialize the body
//! - The [`HttpService`] facade, which absorbs transport failures, and its
//!   [`MockHttpService`] stand-in for tests
//! - [`WebInvoker`] for header/parameter maps and raw bodies, with an
//!   [`InvocationHook`] that can answer calls before they are made
//!
//! Calls block the invoking thread. Network I/O runs on an internal runtime,
//! so the crate works from plain threads as well as from blocking sections
//! of async code.
//!
//! # Error policy
//!
//! [`Executor::execute`] never swallows errors. The [`HttpService`] methods
//! log transport failures and error statuses at debug level and return
//! `None`/`false`; usage errors and [`InvokeError::RateLimited`] always
//! reach the caller.
//!
//! # Example
//!
//! ```ignore
//! use web_invoker::{Executor, RequestBuilder, TimeUnit, WebForm};
//!
//! let executor = Executor::global();
//! executor.add_rate_limiting("api.example.com", 10, TimeUnit::Seconds)?;
//!
//! let mut form = WebForm::new();
//! form.add_param("q", "rust")?.add_param("page", "2")?;
//! let response = RequestBuilder::post("https://api.example.com/search")
//!     .body_form(form.build())?
//!     .execute()?
//!     .web_response()?;
//! println!("{} {}", response.status(), response.content().unwrap_or_default());
//! ```

mod auth;
mod body;
mod charset;
mod config;
mod context;
mod cookie;
pub mod download;
mod error;
mod executor;
mod form;
mod interceptor;
mod invoker;
mod pool;
mod rate_limit;
mod raw_response;
mod request;
mod response;
mod service;
mod tls;
mod transport;

pub use auth::{AuthCache, AuthScheme, AuthScope, Credentials, CredentialsProvider, DEFAULT_AUTH_PORT};
pub use body::{ContentType, DEFAULT_CONTENT_CHARSET, RequestBody, encode_form};
pub use charset::Charset;
pub use config::{
    CookiePolicy, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_PER_ROUTE, DEFAULT_MAX_REDIRECTS,
    DEFAULT_MAX_TOTAL, DEFAULT_SOCKET_TIMEOUT, DEFAULT_VALIDATE_AFTER_INACTIVITY, InvokerConfig,
    PoolConfig, RedirectConfig, ServiceDefaults, TlsConfig, TlsRootConfig,
};
pub use context::ExecutionContext;
pub use cookie::{Cookie, CookieStore, InMemoryCookieStore};
pub use error::{ErrorKind, InvalidUriKind, InvokeError};
pub use executor::Executor;
pub use form::WebForm;
pub use interceptor::{Interceptor, InterceptorChain};
pub use invoker::{Invocation, InvocationHook, WebInvoker};
pub use pool::{ConnectionPool, DEFAULT_ROUTE_PORT, PoolStats, Route};
pub use rate_limit::{RateLimitGate, TimeUnit};
pub use raw_response::{LiveResponse, RawResponse};
pub use request::{
    AbortHandle, DEFAULT_FORM_CHARSET, ProxyHost, Request, RequestBuilder, RequestConfig, Verb,
};
pub use response::{ResponseHandler, ResponseMaterializer, WebResponse};
pub use service::{DefaultHttpService, HttpService, MockHttpService, ToXml};
pub use transport::{Entity, HyperTransport, Transport, TransportResponse};
