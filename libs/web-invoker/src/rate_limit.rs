//! Per-host client-side rate limiting.
//!
//! Each limited host gets a fixed window (one second, minute, hour or day) and
//! a maximum number of admissions per window. The window id and the admission
//! count are packed into a single `AtomicU64` and updated with compare-and-swap,
//! so concurrent callers can never exceed the cap.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::InvokeError;

const COUNT_MASK: u64 = 0xFFFF_FFFF;

static GLOBAL_GATE: OnceLock<Arc<RateLimitGate>> = OnceLock::new();

/// Time unit of a rate-limit window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Window length in milliseconds, or `None` for units finer than a second
    #[must_use]
    pub fn window_millis(self) -> Option<u64> {
        match self {
            Self::Nanoseconds | Self::Microseconds | Self::Milliseconds => None,
            Self::Seconds => Some(1_000),
            Self::Minutes => Some(60_000),
            Self::Hours => Some(3_600_000),
            Self::Days => Some(86_400_000),
        }
    }
}

/// Limit registered for one host
#[derive(Debug)]
struct RateLimitEntry {
    window_ms: u64,
    max_per_window: u64,
    /// `(window id & 0xFFFF_FFFF) << 32 | count`
    state: AtomicU64,
}

impl RateLimitEntry {
    fn new(window_ms: u64, max_per_window: u64) -> Self {
        Self {
            window_ms,
            max_per_window,
            state: AtomicU64::new(0),
        }
    }

    fn pack(block: u64, count: u64) -> u64 {
        ((block & COUNT_MASK) << 32) | (count & COUNT_MASK)
    }

    /// Try to take one slot in the window containing `now_ms`.
    fn try_admit(&self, now_ms: u64) -> bool {
        let block = now_ms.div_euclid(self.window_ms) & COUNT_MASK;
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let current_block = current >> 32;
            let count = current & COUNT_MASK;

            let next = if current_block == block {
                if count >= self.max_per_window {
                    return false;
                }
                Self::pack(block, count + 1)
            } else {
                Self::pack(block, 1)
            };

            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Process-wide table of per-host rate limits
///
/// Host names are compared case-insensitively. A host without an entry is
/// always admitted.
///
/// # Example
///
/// ```ignore
/// use web_invoker::{RateLimitGate, TimeUnit};
///
/// let gate = RateLimitGate::global();
/// gate.add_rate_limiting("api.example.com", 10, TimeUnit::Seconds)?;
/// gate.admit("API.example.com")?;
/// ```
#[derive(Debug, Default)]
pub struct RateLimitGate {
    entries: DashMap<String, Arc<RateLimitEntry>>,
}

impl RateLimitGate {
    /// Create an empty, isolated gate
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The gate shared by every executor in the process
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL_GATE.get_or_init(|| Arc::new(Self::new())))
    }

    /// Register a limit of `limit` admissions per `unit` for `host`.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Usage`] if the host is empty, the limit is not
    /// positive, the unit is finer than seconds, or the host already has a
    /// limit (remove it first to change it).
    pub fn add_rate_limiting(&self, host: &str, limit: i32, unit: TimeUnit) -> Result<(), InvokeError> {
        if host.trim().is_empty() {
            return Err(InvokeError::usage("Host name cannot be empty"));
        }
        let max_per_window = u64::try_from(limit)
            .ok()
            .filter(|l| *l > 0)
            .ok_or_else(|| InvokeError::usage("Rate limit cannot be zero/negative"))?;
        let window_ms = unit
            .window_millis()
            .ok_or_else(|| InvokeError::usage("Rate limiting not supported at this level."))?;

        match self.entries.entry(host.to_ascii_lowercase()) {
            Entry::Occupied(_) => Err(InvokeError::usage(
                "To change the rate limit, remove any current limit and then reset",
            )),
            Entry::Vacant(slot) => {
                tracing::debug!(host = %slot.key(), limit, window_ms, "rate limit registered");
                slot.insert(Arc::new(RateLimitEntry::new(window_ms, max_per_window)));
                Ok(())
            }
        }
    }

    /// Remove the limit for `host`, if any.
    pub fn remove_rate_limiting(&self, host: &str) {
        self.entries.remove(&host.to_ascii_lowercase());
    }

    /// Remove every registered limit.
    pub fn remove_all_rate_limiting(&self) {
        self.entries.clear();
    }

    /// Whether `host` currently has a limit
    #[must_use]
    pub fn is_limited(&self, host: &str) -> bool {
        self.entries.contains_key(&host.to_ascii_lowercase())
    }

    /// The `(max per window, window length in ms)` registered for `host`
    #[must_use]
    pub fn limit_for(&self, host: &str) -> Option<(u64, u64)> {
        self.entries
            .get(&host.to_ascii_lowercase())
            .map(|e| (e.max_per_window, e.window_ms))
    }

    /// Admit one request to `host` at the current wall-clock time.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::RateLimited`] when the host has used up its
    /// current window.
    pub fn admit(&self, host: &str) -> Result<(), InvokeError> {
        if self.entries.is_empty() {
            return Ok(());
        }
        self.admit_at(host, now_millis())
    }

    /// Admit one request to `host` as if the clock read `now_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::RateLimited`] when the host has used up the
    /// window containing `now_ms`.
    pub fn admit_at(&self, host: &str, now_ms: u64) -> Result<(), InvokeError> {
        let key = host.to_ascii_lowercase();
        // Clone out of the map so no shard lock is held during the CAS loop.
        let Some(entry) = self.entries.get(&key).map(|e| Arc::clone(e.value())) else {
            return Ok(());
        };

        if entry.try_admit(now_ms) {
            Ok(())
        } else {
            tracing::debug!(host = %key, "rate limit reached");
            Err(InvokeError::RateLimited { host: key })
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    const MINUTE: u64 = 60_000;

    #[test]
    fn test_unknown_host_is_admitted() {
        let gate = RateLimitGate::new();
        gate.add_rate_limiting("known.example", 1, TimeUnit::Minutes)
            .unwrap();
        for _ in 0..10 {
            gate.admit_at("unknown.example", 0).unwrap();
        }
    }

    #[test]
    fn test_cap_within_window_then_reset() {
        let gate = RateLimitGate::new();
        gate.add_rate_limiting("localhost", 2, TimeUnit::Minutes)
            .unwrap();

        let start = 10 * MINUTE;
        gate.admit_at("localhost", start).unwrap();
        gate.admit_at("localhost", start + 1).unwrap();
        let err = gate.admit_at("localhost", start + 2).unwrap_err();
        assert!(matches!(err, InvokeError::RateLimited { ref host } if host == "localhost"));

        // First admission in the next window always succeeds
        gate.admit_at("localhost", start + MINUTE).unwrap();
        gate.admit_at("localhost", start + MINUTE + 5).unwrap();
        assert!(gate.admit_at("localhost", start + MINUTE + 6).is_err());
    }

    #[test]
    fn test_host_is_case_insensitive() {
        let gate = RateLimitGate::new();
        gate.add_rate_limiting("Example.COM", 1, TimeUnit::Seconds)
            .unwrap();
        assert!(gate.is_limited("example.com"));
        gate.admit_at("EXAMPLE.com", 0).unwrap();
        assert!(gate.admit_at("example.com", 1).is_err());

        gate.remove_rate_limiting("EXAMPLE.COM");
        assert!(!gate.is_limited("example.com"));
        gate.admit_at("example.com", 2).unwrap();
    }

    #[test]
    fn test_registration_errors() {
        let gate = RateLimitGate::new();
        assert!(matches!(
            gate.add_rate_limiting("h", 0, TimeUnit::Seconds),
            Err(InvokeError::Usage(_))
        ));
        assert!(matches!(
            gate.add_rate_limiting("h", -3, TimeUnit::Seconds),
            Err(InvokeError::Usage(_))
        ));
        assert!(matches!(
            gate.add_rate_limiting("h", 5, TimeUnit::Milliseconds),
            Err(InvokeError::Usage(_))
        ));
        assert!(matches!(
            gate.add_rate_limiting("", 5, TimeUnit::Seconds),
            Err(InvokeError::Usage(_))
        ));

        gate.add_rate_limiting("h", 5, TimeUnit::Hours).unwrap();
        let dup = gate.add_rate_limiting("H", 10, TimeUnit::Days).unwrap_err();
        assert!(dup.to_string().contains("remove any current limit"));
        assert_eq!(gate.limit_for("h"), Some((5, 3_600_000)));
    }

    #[test]
    fn test_remove_all() {
        let gate = RateLimitGate::new();
        gate.add_rate_limiting("a", 1, TimeUnit::Days).unwrap();
        gate.add_rate_limiting("b", 1, TimeUnit::Days).unwrap();
        gate.remove_all_rate_limiting();
        assert!(!gate.is_limited("a"));
        assert!(!gate.is_limited("b"));
        gate.admit("a").unwrap();
        gate.admit("a").unwrap();
    }

    #[test]
    fn test_window_units() {
        assert_eq!(TimeUnit::Seconds.window_millis(), Some(1_000));
        assert_eq!(TimeUnit::Minutes.window_millis(), Some(60_000));
        assert_eq!(TimeUnit::Hours.window_millis(), Some(3_600_000));
        assert_eq!(TimeUnit::Days.window_millis(), Some(86_400_000));
        assert_eq!(TimeUnit::Microseconds.window_millis(), None);
    }

    #[test]
    fn test_concurrent_admissions_never_exceed_cap() {
        let gate = Arc::new(RateLimitGate::new());
        gate.add_rate_limiting("busy.example", 25, TimeUnit::Minutes)
            .unwrap();
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let admitted = Arc::clone(&admitted);
                thread::spawn(move || {
                    for _ in 0..20 {
                        if gate.admit_at("busy.example", 5 * MINUTE).is_ok() {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 25);
    }
}
