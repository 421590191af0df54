//! Key-scoped, TTL'd cache for group/member/stranger display-name lookups.
//!
//! Modeled as a single-owner cache behind a request interface (per the
//! distilled spec's design notes on shared mutable maps): concurrent misses
//! on the same key may issue duplicate upstream lookups, which is
//! acceptable since lookups are idempotent and bounded by the rate limiter.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const DEFAULT_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoKind {
    GroupMember(i64),
    Stranger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: InfoKind,
    id: i64,
}

pub struct InfoCache {
    entries: Mutex<HashMap<CacheKey, (String, Instant)>>,
    ttl: Duration,
}

impl Default for InfoCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl InfoCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn get_or_fetch<F, Fut>(&self, kind: InfoKind, id: i64, fetch: F) -> String
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = String>,
    {
        let key = CacheKey { kind, id };
        {
            let guard = self.entries.lock().await;
            if let Some((name, fetched_at)) = guard.get(&key) {
                if fetched_at.elapsed() < self.ttl {
                    return name.clone();
                }
            }
        }
        let name = fetch().await;
        let mut guard = self.entries.lock().await;
        guard.insert(key, (name.clone(), Instant::now()));
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_cache_hit_avoids_refetch() {
        let cache = InfoCache::new(Duration::from_secs(600));
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let name = cache
                .get_or_fetch(InfoKind::Stranger, 7, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    "A".to_string()
                })
                .await;
            assert_eq!(name, "A");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_entry_expires_after_ttl() {
        let cache = InfoCache::new(Duration::from_millis(10));
        let calls = AtomicU32::new(0);
        cache
            .get_or_fetch(InfoKind::Stranger, 7, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                "A".to_string()
            })
            .await;
        tokio::time::advance(Duration::from_millis(20)).await;
        cache
            .get_or_fetch(InfoKind::Stranger, 7, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                "A".to_string()
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_keys_are_scoped_by_kind() {
        let cache = InfoCache::new(Duration::from_secs(600));
        cache
            .get_or_fetch(InfoKind::Stranger, 7, || async { "stranger".to_string() })
            .await;
        let member = cache
            .get_or_fetch(InfoKind::GroupMember(100), 7, || async { "member".to_string() })
            .await;
        assert_eq!(member, "member");
    }
}
