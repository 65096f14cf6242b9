use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Optional metadata side-cache, used only to shortcut lookups that stay
/// valid for the remainder of the business day. A miss or a failed put
/// degrades silently to the primary lookup; cache trouble never fails a job.
#[async_trait]
pub trait MetaCache: Send + Sync {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Option<String>;
    async fn put(&self, key: &str, value: &str, ttl: std::time::Duration, now: DateTime<Utc>);
}

/// Selected at startup when no cache is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl MetaCache for NoopCache {
    async fn get(&self, key: &str, _now: DateTime<Utc>) -> Option<String> {
        debug!("meta cache disabled, miss for {key}");
        None
    }

    async fn put(&self, _key: &str, _value: &str, _ttl: std::time::Duration, _now: DateTime<Utc>) {}
}

/// In-process get/set-with-expiry cache.
#[derive(Default)]
pub struct MemoryMetaCache {
    entries: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl MemoryMetaCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetaCache for MemoryMetaCache {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: std::time::Duration, now: DateTime<Utc>) {
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::zero());
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), now + ttl));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(seconds: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, 1, 10, 0, seconds).unwrap()
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = MemoryMetaCache::new();
        cache
            .put("expiry", "2021-03-25", std::time::Duration::from_secs(30), t(0))
            .await;
        assert_eq!(cache.get("expiry", t(29)).await.as_deref(), Some("2021-03-25"));
        assert_eq!(cache.get("expiry", t(30)).await, None);
    }

    #[tokio::test]
    async fn noop_cache_always_misses() {
        let cache = NoopCache;
        cache
            .put("k", "v", std::time::Duration::from_secs(60), t(0))
            .await;
        assert_eq!(cache.get("k", t(1)).await, None);
    }
}
