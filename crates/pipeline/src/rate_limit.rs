//! Per-client sliding-window rate limiter.
//!
//! Each accepted request leaves one immutable record indexed by client address
//! and acceptance time. A check counts the records inside the trailing window;
//! there are no long-lived per-client counters to keep consistent.
//!
//! Storage failures never block a request: a failed check allows it and a
//! failed record write is logged and dropped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::store::{IndexKey, KeyValueStore, StoredItem};
use crate::{ClientAddress, Clock, RequestId, Timestamp};

/// Requests admitted per client per window.
pub const MAX_REQUESTS_PER_WINDOW: u32 = 5;

/// Length of the sliding window in seconds.
pub const WINDOW_SECONDS: i64 = 3_600;

/// Extra lifetime given to records beyond the window before the store drops them.
pub const RECORD_GRACE_SECONDS: i64 = 300;

const KEY_PREFIX: &str = "rl#";

/// Stored body of one rate-limit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRecord {
    /// Composite store key (`rl#{address}#{timestamp}#{request}`).
    pub record_key: String,
    /// The request this record accounts for.
    pub request_id: RequestId,
    /// Client address.
    pub ip_address: String,
    /// Acceptance time, Unix seconds.
    pub timestamp: i64,
    /// Expiry, Unix seconds.
    pub expires_at: i64,
}

/// Outcome of [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether a new request may be accepted now.
    pub allowed: bool,
    /// Requests counted inside the window.
    pub used: u32,
    /// Window capacity.
    pub limit: u32,
    /// Earliest moment the window admits another request; set when refused.
    pub next_available_at: Option<Timestamp>,
}

/// Sliding-window limiter over a [`KeyValueStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    limit: u32,
    window_seconds: i64,
}

impl RateLimiter {
    /// Creates a limiter with the standard limit of five requests per hour.
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            limit: MAX_REQUESTS_PER_WINDOW,
            window_seconds: WINDOW_SECONDS,
        }
    }

    /// Window capacity.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Counts `client`'s requests inside the trailing window.
    ///
    /// The window covers `(now - 3600, now]`, so a request accepted at `t`
    /// stops counting at exactly `t + 3600`, which is what
    /// `next_available_at` reports.
    pub async fn check(&self, client: &ClientAddress) -> RateLimitDecision {
        let now = self.clock.now().unix_seconds();
        let since = now - self.window_seconds + 1;
        let items = match self.store.query_index(client.as_str(), since).await {
            Ok(items) => items,
            Err(e) => {
                warn!(client = %client, error = %e, "rate limit check failed; allowing request");
                return RateLimitDecision {
                    allowed: true,
                    used: 0,
                    limit: self.limit,
                    next_available_at: None,
                };
            }
        };

        let in_window: Vec<i64> = items
            .iter()
            .filter_map(|item| item.index.as_ref().map(|index| index.sort))
            .filter(|ts| *ts >= since)
            .collect();
        let used = u32::try_from(in_window.len()).unwrap_or(u32::MAX);
        let allowed = used < self.limit;
        let next_available_at = if allowed {
            None
        } else {
            in_window
                .iter()
                .min()
                .map(|oldest| Timestamp::from_unix_seconds(oldest + self.window_seconds))
        };
        debug!(client = %client, used, limit = self.limit, allowed, "rate limit checked");
        RateLimitDecision {
            allowed,
            used,
            limit: self.limit,
            next_available_at,
        }
    }

    /// Records an accepted request for `client`.
    pub async fn record(&self, client: &ClientAddress, request_id: RequestId) {
        let now = self.clock.now();
        let expires_at = now.plus_seconds(self.window_seconds + RECORD_GRACE_SECONDS);
        let record_key = format!(
            "{KEY_PREFIX}{}#{}#{}",
            client,
            now.unix_seconds(),
            request_id.short()
        );
        let record = RateLimitRecord {
            record_key: record_key.clone(),
            request_id,
            ip_address: client.to_string(),
            timestamp: now.unix_seconds(),
            expires_at: expires_at.unix_seconds(),
        };
        let body = match serde_json::to_value(&record) {
            Ok(body) => body,
            Err(e) => {
                warn!(client = %client, error = %e, "failed to encode rate limit record");
                return;
            }
        };
        let item = StoredItem {
            key: record_key.clone(),
            index: Some(IndexKey {
                partition: client.to_string(),
                sort: now.unix_seconds(),
            }),
            body,
            expires_at,
        };
        match self.store.put(item).await {
            Ok(()) => info!(
                client = %client,
                key = %record_key,
                request_id = %request_id,
                "rate limit recorded"
            ),
            Err(e) => warn!(client = %client, error = %e, "failed to record rate limit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::store::StoreError;
    use crate::ManualClock;

    #[derive(Default)]
    struct TestStore {
        items: Mutex<HashMap<String, StoredItem>>,
        fail: bool,
    }

    #[async_trait]
    impl KeyValueStore for TestStore {
        async fn put(&self, item: StoredItem) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Backend("down".into()));
            }
            self.items.lock().await.insert(item.key.clone(), item);
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<StoredItem>, StoreError> {
            Ok(self.items.lock().await.get(key).cloned())
        }

        async fn query_index(
            &self,
            partition: &str,
            since: i64,
        ) -> Result<Vec<StoredItem>, StoreError> {
            if self.fail {
                return Err(StoreError::Backend("down".into()));
            }
            Ok(self
                .items
                .lock()
                .await
                .values()
                .filter(|i| {
                    i.index
                        .as_ref()
                        .is_some_and(|ix| ix.partition == partition && ix.sort >= since)
                })
                .cloned()
                .collect())
        }
    }

    fn limiter(store: Arc<TestStore>) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Timestamp::from_unix_seconds(1_700_000_000)));
        (RateLimiter::new(store, clock.clone()), clock)
    }

    #[tokio::test]
    async fn sixth_request_in_window_is_refused_until_oldest_ages_out() {
        let (limiter, clock) = limiter(Arc::new(TestStore::default()));
        let client = ClientAddress::new("203.0.113.9").unwrap();
        let first_at = clock.now();

        for n in 0..5 {
            let decision = limiter.check(&client).await;
            assert!(decision.allowed, "request {n} should be allowed");
            assert_eq!(decision.used, n);
            limiter.record(&client, RequestId::new_random()).await;
            clock.advance(60);
        }

        let refused = limiter.check(&client).await;
        assert!(!refused.allowed);
        assert_eq!(refused.used, 5);
        assert_eq!(refused.limit, 5);
        let next = refused.next_available_at.expect("next available");
        assert_eq!(next, first_at.plus_seconds(WINDOW_SECONDS));

        clock.advance(next.unix_seconds() - clock.now().unix_seconds());
        let after = limiter.check(&client).await;
        assert!(after.allowed);
        assert_eq!(after.used, 4);
    }

    #[tokio::test]
    async fn clients_are_counted_separately() {
        let (limiter, _clock) = limiter(Arc::new(TestStore::default()));
        let noisy = ClientAddress::new("198.51.100.1").unwrap();
        let quiet = ClientAddress::new("198.51.100.2").unwrap();
        for _ in 0..5 {
            limiter.record(&noisy, RequestId::new_random()).await;
        }
        assert!(!limiter.check(&noisy).await.allowed);
        assert!(limiter.check(&quiet).await.allowed);
    }

    #[tokio::test]
    async fn same_second_requests_do_not_collide() {
        let store = Arc::new(TestStore::default());
        let (limiter, _clock) = limiter(store.clone());
        let client = ClientAddress::new("192.0.2.7").unwrap();
        limiter.record(&client, RequestId::new_random()).await;
        limiter.record(&client, RequestId::new_random()).await;
        assert_eq!(limiter.check(&client).await.used, 2);
        assert!(store.items.lock().await.keys().all(|k| k.starts_with("rl#192.0.2.7#")));
    }

    #[tokio::test]
    async fn store_failures_fail_open() {
        let store = Arc::new(TestStore {
            fail: true,
            ..TestStore::default()
        });
        let (limiter, _clock) = limiter(store);
        let client = ClientAddress::new("unknown").unwrap();
        limiter.record(&client, RequestId::new_random()).await;
        let decision = limiter.check(&client).await;
        assert!(decision.allowed);
        assert_eq!(decision.used, 0);
    }
}
