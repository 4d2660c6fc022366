//! Per-client exponential backoff.
//!
//! Every failed attempt from a client address is charged the client's
//! current delay, and the delay for the *next* failure doubles up to a
//! ceiling. A success forgets the client. Entries expire 60 seconds after
//! their last write, so an idle client decays back to the base delay.
//!
//! ```text
//! base = 2, max = 16
//! failures:  1  2  3   4   5   (success)  6
//! wait:      2  4  8  16  16              2
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tracing::debug;

use crate::error::TopologyError;
use crate::handler::AuthHandler;
use crate::request::{Request, Response};

/// Lifetime of a delay entry after its last write.
pub const DELAY_TTL: Duration = Duration::from_secs(60);

/// Writes between sweeps of expired entries.
const PURGE_INTERVAL: u64 = 1024;

/// Validated throttle bounds, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    base_delay: u32,
    max_delay: u32,
}

impl ThrottlePolicy {
    /// Creates a policy.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::InvalidDelay`] unless `0 < base <= max`.
    pub const fn new(base_delay: u32, max_delay: u32) -> Result<Self, TopologyError> {
        if base_delay == 0 || base_delay > max_delay {
            return Err(TopologyError::InvalidDelay {
                base: base_delay,
                max: max_delay,
            });
        }
        Ok(Self {
            base_delay,
            max_delay,
        })
    }

    /// Delay charged to a client with no recent failures.
    #[must_use]
    pub const fn base_delay(&self) -> u32 {
        self.base_delay
    }

    /// Ceiling for any delay.
    #[must_use]
    pub const fn max_delay(&self) -> u32 {
        self.max_delay
    }

    /// Delay stored for the failure after one charged `current`.
    #[must_use]
    pub fn escalate(&self, current: u32) -> u32 {
        current.saturating_mul(2).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy)]
struct DelayEntry {
    next_delay: u32,
    expires_at: Instant,
}

/// Delay store owned by exactly one [`Throttle`].
///
/// Per-key read-modify-write goes through the map's entry lock, so updates
/// for one client are serialized while other clients proceed on other
/// shards.
#[derive(Debug)]
pub struct DelayCache {
    name: String,
    ttl: Duration,
    entries: DashMap<String, DelayEntry>,
    writes: AtomicU64,
}

impl DelayCache {
    /// Creates an empty cache. Prefer [`DelayCacheFactory::create`] to get a
    /// unique name for log output.
    #[must_use]
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
            entries: DashMap::new(),
            writes: AtomicU64::new(0),
        }
    }

    /// Name of this cache, as shown in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Charges a failure to `key`.
    ///
    /// Returns the delay to report now (the stored delay, or the policy's
    /// base if none is live) and stores the escalated delay with a fresh
    /// expiry.
    pub fn charge(&self, key: &str, policy: &ThrottlePolicy) -> u32 {
        let now = Instant::now();
        let expires_at = now + self.ttl;

        let current = match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let current = if entry.expires_at > now {
                    entry.next_delay
                } else {
                    policy.base_delay()
                };
                *entry = DelayEntry {
                    next_delay: policy.escalate(current),
                    expires_at,
                };
                current
            }
            Entry::Vacant(vacant) => {
                vacant.insert(DelayEntry {
                    next_delay: policy.escalate(policy.base_delay()),
                    expires_at,
                });
                policy.base_delay()
            }
        };

        // The entry guard is released above; sweeping takes shard locks.
        if self.writes.fetch_add(1, Ordering::Relaxed) % PURGE_INTERVAL == PURGE_INTERVAL - 1 {
            self.purge_expired();
        }

        current
    }

    /// Forgets `key`.
    pub fn reset(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Delay the next failure of `key` would be charged, if an entry is live.
    #[must_use]
    pub fn pending(&self, key: &str) -> Option<u32> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.next_delay)
    }

    /// Drops every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        debug!(
            cache = %self.name,
            purged = before.saturating_sub(self.entries.len()),
            "purged expired delay entries"
        );
    }

    /// Number of stored entries, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Hands out delay caches with unique names.
///
/// The counter lives in the factory, so uniqueness is scoped to whoever owns
/// the factory (normally one [`crate::Assembler`]). Isolation itself does not
/// depend on the name: every created cache is a distinct store moved into
/// its throttle.
#[derive(Debug, Default)]
pub struct DelayCacheFactory {
    created: AtomicU64,
}

impl DelayCacheFactory {
    /// Creates a factory.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            created: AtomicU64::new(0),
        }
    }

    /// Creates a fresh, empty cache named `delay-cache-<n>`.
    pub fn create(&self) -> DelayCache {
        let id = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        DelayCache::new(format!("delay-cache-{id}"), DELAY_TTL)
    }
}

/// Decorator imposing exponential backoff on failed attempts.
pub struct Throttle<H> {
    policy: ThrottlePolicy,
    cache: DelayCache,
    next: H,
}

impl<H: AuthHandler> Throttle<H> {
    /// Wraps `next` with a fresh cache from `caches`.
    pub fn new(policy: ThrottlePolicy, caches: &DelayCacheFactory, next: H) -> Self {
        Self::with_cache(policy, caches.create(), next)
    }

    /// Wraps `next` using `cache`, which this throttle then owns.
    pub const fn with_cache(policy: ThrottlePolicy, cache: DelayCache, next: H) -> Self {
        Self {
            policy,
            cache,
            next,
        }
    }

    /// The backing cache.
    pub const fn cache(&self) -> &DelayCache {
        &self.cache
    }
}

#[async_trait]
impl<H: AuthHandler> AuthHandler for Throttle<H> {
    async fn authenticate(&self, request: &Request) -> Response {
        let mut response = self.next.authenticate(request).await;

        if response.is_ok() {
            self.cache.reset(&request.client_ip);
        } else {
            response.wait = self.cache.charge(&request.client_ip, &self.policy);
            debug!(
                cache = %self.cache.name(),
                client_ip = %request.client_ip,
                wait = response.wait,
                "failed attempt throttled"
            );
        }

        response
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::request::{Method, Protocol};
    use crate::stage::testing::PasswordCheck;
    use proptest::prelude::*;

    fn req(pass: &str, client_ip: &str) -> Request {
        Request::new(Method::Plain, "user", pass, Protocol::Imap, client_ip)
    }

    fn throttle(base: u32, max: u32) -> Throttle<PasswordCheck> {
        Throttle::new(
            ThrottlePolicy::new(base, max).unwrap(),
            &DelayCacheFactory::new(),
            PasswordCheck::new("valid-pass"),
        )
    }

    #[test]
    fn test_policy_validation() {
        assert!(ThrottlePolicy::new(2, 16).is_ok());
        assert!(ThrottlePolicy::new(4, 4).is_ok());
        assert!(matches!(
            ThrottlePolicy::new(0, 16),
            Err(TopologyError::InvalidDelay { base: 0, max: 16 })
        ));
        assert!(ThrottlePolicy::new(17, 16).is_err());
    }

    #[test]
    fn test_escalate_saturates() {
        let policy = ThrottlePolicy::new(1, u32::MAX).unwrap();
        assert_eq!(policy.escalate(u32::MAX), u32::MAX);
    }

    #[tokio::test]
    async fn test_backoff_sequence() {
        let throttle = throttle(2, 16);

        let mut waits = Vec::new();
        for _ in 0..5 {
            waits.push(throttle.authenticate(&req("bad", "1.2.3.4")).await.wait);
        }

        assert_eq!(waits, vec![2, 4, 8, 16, 16]);
    }

    #[tokio::test]
    async fn test_success_is_not_penalized_and_resets() {
        let throttle = throttle(2, 16);

        assert_eq!(throttle.authenticate(&req("bad", "1.2.3.4")).await.wait, 2);
        assert_eq!(throttle.authenticate(&req("bad", "1.2.3.4")).await.wait, 4);

        let ok = throttle.authenticate(&req("valid-pass", "1.2.3.4")).await;
        assert!(ok.is_ok());
        assert_eq!(ok.wait, 0);

        assert_eq!(throttle.authenticate(&req("bad", "1.2.3.4")).await.wait, 2);
    }

    #[tokio::test]
    async fn test_delay_only_affects_one_client() {
        let throttle = throttle(2, 16);

        throttle.authenticate(&req("bad", "192.168.0.1")).await;
        throttle.authenticate(&req("bad", "192.168.0.1")).await;

        assert_eq!(throttle.authenticate(&req("bad", "192.168.0.2")).await.wait, 2);

        // A success for one client leaves the other's backoff intact.
        throttle.authenticate(&req("valid-pass", "192.168.0.2")).await;
        assert_eq!(throttle.authenticate(&req("bad", "192.168.0.1")).await.wait, 8);
    }

    #[tokio::test]
    async fn test_instances_are_isolated() {
        let a = throttle(2, 16);
        let b = throttle(2, 16);

        for _ in 0..3 {
            a.authenticate(&req("bad", "192.168.0.1")).await;
        }

        assert_ne!(a.cache().name(), b.cache().name());
        assert_eq!(b.authenticate(&req("bad", "192.168.0.1")).await.wait, 2);
        assert_eq!(a.cache().pending("192.168.0.1"), Some(16));
        assert_eq!(b.cache().pending("192.168.0.1"), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let throttle = throttle(2, 16);

        throttle.authenticate(&req("bad", "1.2.3.4")).await;
        throttle.authenticate(&req("bad", "1.2.3.4")).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(throttle.authenticate(&req("bad", "1.2.3.4")).await.wait, 8);

        // The write above refreshed the expiry; 60s of silence clears it.
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(throttle.cache().pending("1.2.3.4"), None);
        assert_eq!(throttle.authenticate(&req("bad", "1.2.3.4")).await.wait, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = DelayCacheFactory::new().create();
        let policy = ThrottlePolicy::new(2, 16).unwrap();

        cache.charge("a", &policy);
        cache.charge("b", &policy);
        tokio::time::advance(DELAY_TTL).await;
        cache.charge("c", &policy);

        cache.purge_expired();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.pending("c"), Some(4));
    }

    #[test]
    fn test_factory_names_are_unique() {
        let factory = DelayCacheFactory::new();
        let first = factory.create();
        let second = factory.create();

        assert_eq!(first.name(), "delay-cache-1");
        assert_eq!(second.name(), "delay-cache-2");
    }

    #[tokio::test]
    async fn test_throttles_from_one_factory_are_isolated() {
        let factory = DelayCacheFactory::new();
        let policy = ThrottlePolicy::new(2, 16).unwrap();
        let first = Throttle::new(policy, &factory, PasswordCheck::new("valid-pass"));
        let second = Throttle::new(policy, &factory, PasswordCheck::new("valid-pass"));

        assert_eq!(first.cache().name(), "delay-cache-1");
        assert_eq!(second.cache().name(), "delay-cache-2");

        first.authenticate(&req("bad", "1.2.3.4")).await;
        first.authenticate(&req("bad", "1.2.3.4")).await;

        assert_eq!(first.cache().pending("1.2.3.4"), Some(8));
        assert_eq!(second.cache().pending("1.2.3.4"), None);
        assert_eq!(second.authenticate(&req("bad", "1.2.3.4")).await.wait, 2);
    }

    #[test]
    fn test_factory_unique_under_concurrent_construction() {
        let factory = std::sync::Arc::new(DelayCacheFactory::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let factory = factory.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| factory.create().name().to_string())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut names = std::collections::HashSet::new();
        for handle in handles {
            for name in handle.join().unwrap() {
                assert!(names.insert(name), "duplicate cache name");
            }
        }
        assert_eq!(names.len(), 800);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_serialized_per_key() {
        let throttle = std::sync::Arc::new(throttle(1, 1 << 20));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let throttle = throttle.clone();
                tokio::spawn(async move {
                    throttle.authenticate(&req("bad", "10.0.0.1")).await.wait
                })
            })
            .collect();

        let mut waits = Vec::new();
        for handle in handles {
            waits.push(handle.await.unwrap());
        }
        waits.sort_unstable();

        // Every failure observed a distinct step of the sequence.
        let expected: Vec<u32> = (0..16).map(|i| 1 << i).collect();
        assert_eq!(waits, expected);
    }

    proptest! {
        #[test]
        fn prop_wait_never_exceeds_max(base in 1u32..64, extra in 0u32..1024, failures in 1usize..40) {
            let policy = ThrottlePolicy::new(base, base + extra).unwrap();
            let cache = DelayCache::new("prop", DELAY_TTL);

            let mut previous = 0;
            for i in 0..failures {
                let wait = cache.charge("k", &policy);
                prop_assert!(wait <= policy.max_delay());
                if i == 0 {
                    prop_assert_eq!(wait, base);
                } else {
                    prop_assert_eq!(wait, policy.escalate(previous));
                }
                previous = wait;
            }
        }
    }
}
