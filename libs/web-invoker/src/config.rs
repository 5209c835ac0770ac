use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::InvokeError;

/// Default connect timeout applied by the service facade
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default socket (read) timeout applied by the service facade
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(60);

/// Default maximum number of pooled connections per route
pub const DEFAULT_MAX_PER_ROUTE: usize = 5;

/// Default maximum number of pooled connections across all routes
pub const DEFAULT_MAX_TOTAL: usize = 500;

/// Idle time after which a pooled connection is re-validated before reuse
pub const DEFAULT_VALIDATE_AFTER_INACTIVITY: Duration = Duration::from_millis(1000);

/// Default maximum number of redirects followed for one request
pub const DEFAULT_MAX_REDIRECTS: usize = 50;

/// Rules governing how cookies are accepted and echoed.
///
/// Selected per request by name (see [`RequestBuilder::cookie_policy`]).
///
/// [`RequestBuilder::cookie_policy`]: crate::RequestBuilder::cookie_policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CookiePolicy {
    /// Accept cookies scoped to the request host and path
    #[default]
    Default,
    /// Like `Default`, additionally rejects cookies whose path does not
    /// prefix the request path
    Standard,
    /// Lenient legacy rules: cookie paths are not validated
    Netscape,
    /// Never store or send cookies
    IgnoreCookies,
}

impl CookiePolicy {
    /// Canonical policy name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Standard => "standard",
            Self::Netscape => "netscape",
            Self::IgnoreCookies => "ignoreCookies",
        }
    }
}

impl fmt::Display for CookiePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CookiePolicy {
    type Err = InvokeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" | "best-match" | "compatibility" => Ok(Self::Default),
            "standard" | "standard-strict" | "rfc2965" | "rfc6265" => Ok(Self::Standard),
            "netscape" => Ok(Self::Netscape),
            "ignorecookies" | "ignore" => Ok(Self::IgnoreCookies),
            _ => Err(InvokeError::usage(format!("Unknown cookie policy: {s}"))),
        }
    }
}

impl TryFrom<String> for CookiePolicy {
    type Error = InvokeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CookiePolicy> for String {
    fn from(value: CookiePolicy) -> Self {
        value.name().to_owned()
    }
}

/// Connection pool sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum connections across all routes (default: 500)
    pub max_total: usize,

    /// Maximum connections per route unless overridden (default: 5)
    pub default_max_per_route: usize,

    /// Idle connections older than this are validated before reuse (default: 1s)
    #[serde(with = "duration_serde")]
    pub validate_after_inactivity: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: DEFAULT_MAX_TOTAL,
            default_max_per_route: DEFAULT_MAX_PER_ROUTE,
            validate_after_inactivity: DEFAULT_VALIDATE_AFTER_INACTIVITY,
        }
    }
}

/// Redirect following policy
///
/// Whether redirects are followed at all is a per-request setting; this
/// configures how the transport follows them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Maximum number of redirects to follow (default: 50)
    pub max_redirects: usize,

    /// Strip `Authorization`, `Cookie` and `Proxy-Authorization` headers supplied
    /// by the caller when a redirect leaves the original origin (default: true)
    pub strip_sensitive_headers: bool,

    /// Allow HTTPS to HTTP downgrades (default: false)
    pub allow_https_downgrade: bool,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            strip_sensitive_headers: true,
            allow_https_downgrade: false,
        }
    }
}

impl RedirectConfig {
    /// Follow any redirect, including HTTPS to HTTP downgrades
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            allow_https_downgrade: true,
            ..Self::default()
        }
    }
}

/// TLS root certificate strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsRootConfig {
    /// Use the operating system's certificate store
    #[default]
    Native,
}

/// TLS configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Root certificate source (default: system trust store)
    pub roots: TlsRootConfig,

    /// Accept any server certificate.
    ///
    /// Never enabled implicitly; a missing trust store is reported as a TLS
    /// error instead. Only for talking to hosts with self-signed certificates
    /// in controlled environments.
    pub insecure_trust_all: bool,
}

/// Defaults that the service facade applies to every request it builds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceDefaults {
    /// Connect timeout (default: 60s)
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Socket timeout (default: 60s)
    #[serde(with = "duration_serde")]
    pub socket_timeout: Duration,

    /// Cookie policy (default: `default`)
    pub cookie_policy: CookiePolicy,

    /// Follow redirects (default: true)
    pub follow_redirects: bool,
}

impl Default for ServiceDefaults {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            cookie_policy: CookiePolicy::Default,
            follow_redirects: true,
        }
    }
}

/// Complete configuration of the invocation stack
///
/// Deserializable with every field optional, so it can be loaded from a
/// configuration file section:
///
/// ```ignore
/// let config: InvokerConfig = serde_json::from_str(r#"{
///     "pool": { "max_total": 100 },
///     "service": { "connect_timeout": "5s" }
/// }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokerConfig {
    /// Connection pool sizing
    pub pool: PoolConfig,

    /// Redirect following policy
    pub redirect: RedirectConfig,

    /// TLS settings
    pub tls: TlsConfig,

    /// Service facade defaults
    pub service: ServiceDefaults,
}

impl InvokerConfig {
    /// Configuration for tests against local mock servers
    ///
    /// Short timeouts, small pool and permissive redirects.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            pool: PoolConfig {
                max_total: 20,
                default_max_per_route: 5,
                validate_after_inactivity: DEFAULT_VALIDATE_AFTER_INACTIVITY,
            },
            redirect: RedirectConfig::permissive(),
            tls: TlsConfig::default(),
            service: ServiceDefaults {
                connect_timeout: Duration::from_secs(5),
                socket_timeout: Duration::from_secs(5),
                ..ServiceDefaults::default()
            },
        }
    }
}

/// Human-readable durations (`"60s"`, `"1500ms"`) for config files
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_process_defaults() {
        let config = InvokerConfig::default();
        assert_eq!(config.pool.max_total, 500);
        assert_eq!(config.pool.default_max_per_route, 5);
        assert_eq!(
            config.pool.validate_after_inactivity,
            Duration::from_millis(1000)
        );
        assert_eq!(config.service.connect_timeout, Duration::from_secs(60));
        assert_eq!(config.service.socket_timeout, Duration::from_secs(60));
        assert_eq!(config.service.cookie_policy, CookiePolicy::Default);
        assert!(config.service.follow_redirects);
        assert!(!config.tls.insecure_trust_all);
    }

    #[test]
    fn test_cookie_policy_names() {
        assert_eq!("default".parse::<CookiePolicy>().unwrap(), CookiePolicy::Default);
        assert_eq!(
            "ignoreCookies".parse::<CookiePolicy>().unwrap(),
            CookiePolicy::IgnoreCookies
        );
        assert_eq!(
            "NETSCAPE".parse::<CookiePolicy>().unwrap(),
            CookiePolicy::Netscape
        );
        assert_eq!(
            "best-match".parse::<CookiePolicy>().unwrap(),
            CookiePolicy::Default
        );
        let err = "chocolate-chip".parse::<CookiePolicy>().unwrap_err();
        assert!(matches!(err, InvokeError::Usage(_)));
    }

    #[test]
    fn test_config_deserializes_partial_document() {
        let config: InvokerConfig = serde_json::from_str(
            r#"{
                "pool": { "max_total": 42 },
                "service": { "connect_timeout": "5s", "cookie_policy": "standard" },
                "tls": { "insecure_trust_all": true }
            }"#,
        )
        .unwrap();

        assert_eq!(config.pool.max_total, 42);
        assert_eq!(config.pool.default_max_per_route, DEFAULT_MAX_PER_ROUTE);
        assert_eq!(config.service.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.service.socket_timeout, DEFAULT_SOCKET_TIMEOUT);
        assert_eq!(config.service.cookie_policy, CookiePolicy::Standard);
        assert!(config.tls.insecure_trust_all);
        assert_eq!(config.redirect, RedirectConfig::default());
    }

    #[test]
    fn test_config_rejects_unknown_cookie_policy() {
        let result: Result<ServiceDefaults, _> =
            serde_json::from_str(r#"{ "cookie_policy": "whatever" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = InvokerConfig::for_testing();
        let json = serde_json::to_string(&config).unwrap();
        let back: InvokerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
