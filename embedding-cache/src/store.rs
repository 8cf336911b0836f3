//! Shared key-value store backends for the distributed tier.
//!
//! The tier talks to a [`RemoteStore`]: get/set with per-entry TTL,
//! delete, pattern scan, and a publish/subscribe channel used only for
//! invalidation notices. [`RedisStore`] is the production backend;
//! [`MemoryStore`] is an in-process stand-in that several tiers can share
//! through an `Arc`, which is how tests exercise multi-instance behavior
//! without a live server.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tracing::{debug, warn};

use crate::entry::now_secs;
use crate::error::Result;

/// Capacity of the channels carrying raw pub/sub payloads.
const CHANNEL_CAPACITY: usize = 256;

/// A shared key-value store with TTLs and a pub/sub channel.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch a value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value, expiring after `ttl_secs` when given.
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()>;

    /// Remove a value. Returns whether one was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove a batch of keys. Returns how many were removed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64>;

    /// List keys matching a glob pattern.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;

    /// Publish a payload on a channel.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribe to a channel. The returned receiver yields raw payloads
    /// until the subscription is dropped or the connection ends.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>>;
}

/// Match a key against a glob pattern (`*` wildcards only, anchored).
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == key;
    }

    let segments: Vec<&str> = pattern.split('*').collect();
    let mut remainder = key;

    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match remainder.strip_prefix(segment) {
                Some(rest) => remainder = rest,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return remainder.ends_with(segment);
        } else {
            match remainder.find(segment) {
                Some(pos) => remainder = &remainder[pos + segment.len()..],
                None => return false,
            }
        }
    }

    // Pattern ended with '*' (or was all wildcards).
    segments.last().is_some_and(|s| s.is_empty()) || segments.iter().all(|s| s.is_empty())
}

// =========================================================================
// Redis backend
// =========================================================================

/// Redis-backed [`RemoteStore`].
pub struct RedisStore {
    client: redis::Client,
    conn: redis::aio::MultiplexedConnection,
}

impl RedisStore {
    /// Connect to the store at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        debug!("connected to shared store at {url}");
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl_secs {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        Ok(conn.del(keys).await?)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut found = Vec::new();
        let mut iter = conn.scan_match::<_, String>(pattern).await?;
        while let Some(key) = iter.next_item().await {
            found.push(key);
        }
        Ok(found)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.publish(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    message = stream.next() => match message {
                        Some(message) => {
                            let payload: String = match message.get_payload() {
                                Ok(payload) => payload,
                                Err(e) => {
                                    warn!("discarding unreadable pub/sub payload: {e}");
                                    continue;
                                }
                            };
                            if tx.send(payload).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        });

        Ok(rx)
    }
}

// =========================================================================
// In-memory backend
// =========================================================================

struct StoredValue {
    value: String,
    expires_at: Option<u64>,
}

impl StoredValue {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process [`RemoteStore`].
///
/// Values expire lazily at read time, like the real store. Share one
/// instance through an `Arc` to emulate several cache instances talking to
/// the same server.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredValue>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store behind an `Arc`, ready to share.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    async fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = now_secs();

        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(stored) if !stored.is_expired(now) => {
                    return Ok(Some(stored.value.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: drop it on the way out.
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        let stored = StoredValue {
            value: value.to_string(),
            expires_at: ttl_secs.map(|ttl| now_secs().saturating_add(ttl)),
        };
        self.entries.write().await.insert(key.to_string(), stored);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for key in keys {
            if entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let now = now_secs();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, stored)| !stored.is_expired(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        // A send error only means nobody is subscribed.
        let _ = self.sender(channel).await.send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let mut source = self.sender(channel).await.subscribe();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    message = source.recv() => match message {
                        Ok(payload) => {
                            if tx.send(payload).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("pub/sub subscriber lagged, skipped {skipped} notices");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("abc", "abc"));
        assert!(!glob_match("abc", "abd"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("pre*", "prefix"));
        assert!(!glob_match("pre*", "xprefix"));
        assert!(glob_match("*fix", "prefix"));
        assert!(glob_match("p*x", "prefix"));
        assert!(!glob_match("p*z", "prefix"));
        assert!(glob_match("a*b*c", "a123b456c"));
        assert!(!glob_match("a*b*c", "a123c456b"));
    }

    #[tokio::test]
    async fn test_memory_store_set_get() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_memory_store_ttl_expires_lazily() {
        let store = MemoryStore::new();
        store.set("k", "v", Some(0)).await.unwrap();

        // TTL of zero is already in the past.
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.entries.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_delete() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_delete_many() {
        let store = MemoryStore::new();
        store.set("a", "1", None).await.unwrap();
        store.set("b", "2", None).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(store.delete_many(&keys).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_scan() {
        let store = MemoryStore::new();
        store.set("cache:a", "1", None).await.unwrap();
        store.set("cache:b", "2", None).await.unwrap();
        store.set("other:c", "3", None).await.unwrap();

        let mut keys = store.scan("cache:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["cache:a".to_string(), "cache:b".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_store_scan_skips_expired() {
        let store = MemoryStore::new();
        store.set("cache:live", "1", None).await.unwrap();
        store.set("cache:dead", "2", Some(0)).await.unwrap();

        let keys = store.scan("cache:*").await.unwrap();
        assert_eq!(keys, vec!["cache:live".to_string()]);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe("chan").await.unwrap();

        store.publish("chan", "hello").await.unwrap();
        assert_eq!(rx.recv().await, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let store = MemoryStore::new();
        assert!(store.publish("chan", "into the void").await.is_ok());
    }

    #[tokio::test]
    async fn test_shared_store_fans_out_to_all_subscribers() {
        let store = MemoryStore::shared();
        let mut rx_a = store.subscribe("chan").await.unwrap();
        let mut rx_b = store.subscribe("chan").await.unwrap();

        store.publish("chan", "notice").await.unwrap();
        assert_eq!(rx_a.recv().await, Some("notice".to_string()));
        assert_eq!(rx_b.recv().await, Some("notice".to_string()));
    }
}
