//! Shared network tier.
//!
//! Entries live in a shared key-value store under a configured prefix;
//! every mutation additionally publishes an invalidation notice on the
//! `<prefix>pubsub` channel so peers can drop their private memory-tier
//! copies. A background subscriber receives peer notices for the life of
//! the tier and is torn down by [`DistributedTier::close`].

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::entry::StoredRecord;
use crate::error::Result;
use crate::events::InvalidationEvent;
use crate::key::CacheKey;
use crate::stats::{TierStats, TierStatsSnapshot};
use crate::store::RemoteStore;

/// Keys removed per batch by the scoped delete operations, so one oversized
/// request never stalls the store.
const DELETE_BATCH: usize = 100;

/// Shared key-value tier with pub/sub invalidation.
pub struct DistributedTier {
    store: Arc<dyn RemoteStore>,
    prefix: String,
    channel: String,
    instance_id: String,
    stats: TierStats,
    shutdown_tx: watch::Sender<bool>,
    subscriber: Mutex<Option<JoinHandle<()>>>,
}

impl DistributedTier {
    /// Connect the tier and start its subscriber.
    ///
    /// Returns the tier together with the receiver on which peer
    /// invalidation events arrive; the tier's own echoes are already
    /// filtered out.
    pub async fn connect(
        store: Arc<dyn RemoteStore>,
        key_prefix: &str,
        instance_id: &str,
    ) -> Result<(Self, mpsc::Receiver<InvalidationEvent>)> {
        let channel = format!("{key_prefix}pubsub");
        let raw_rx = store.subscribe(&channel).await?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(subscriber_loop(
            raw_rx,
            event_tx,
            instance_id.to_string(),
            shutdown_rx,
        ));

        info!("distributed tier subscribed to {channel}");

        let tier = Self {
            store,
            prefix: key_prefix.to_string(),
            channel,
            instance_id: instance_id.to_string(),
            stats: TierStats::new(),
            shutdown_tx,
            subscriber: Mutex::new(Some(handle)),
        };

        Ok((tier, event_rx))
    }

    fn full_key(&self, key: &CacheKey) -> String {
        format!("{}{key}", self.prefix)
    }

    /// Publish an invalidation notice; delivery is best-effort and never
    /// fails the mutation that triggered it.
    async fn announce(&self, event: InvalidationEvent) {
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("failed to encode invalidation event: {e}");
                return;
            }
        };

        if let Err(e) = self.store.publish(&self.channel, &payload).await {
            warn!("failed to publish invalidation event: {e}");
        }
    }

    /// Fetch the record for `key`. Corrupt values are deleted and reported
    /// as a miss.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<StoredRecord>> {
        let Some(value) = self.store.get(&self.full_key(key)).await? else {
            self.stats.record_miss();
            return Ok(None);
        };

        match StoredRecord::decode(key.as_str(), &value) {
            Ok(record) => {
                self.stats.record_hit();
                Ok(Some(record))
            }
            Err(e) => {
                warn!("deleting unreadable distributed entry: {e}");
                let _ = self.store.delete(&self.full_key(key)).await;
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    /// Store the record for `key` with the given TTL.
    pub async fn set(&self, key: &CacheKey, record: &StoredRecord, ttl_secs: u64) -> Result<()> {
        let value = serde_json::to_string(record)?;
        self.store
            .set(&self.full_key(key), &value, Some(ttl_secs))
            .await?;
        self.stats.record_set();

        self.announce(InvalidationEvent::set(key.as_str(), &self.instance_id))
            .await;
        Ok(())
    }

    /// Remove the record for `key`. Returns whether one was present.
    pub async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let removed = self.store.delete(&self.full_key(key)).await?;

        self.announce(InvalidationEvent::delete(key.as_str(), &self.instance_id))
            .await;
        Ok(removed)
    }

    /// Remove every record under the prefix. Returns how many were removed.
    pub async fn clear(&self) -> Result<u64> {
        let keys = self.store.scan(&format!("{}*", self.prefix)).await?;
        let removed = self.delete_in_batches(keys).await?;

        info!("distributed tier cleared {removed} entries");
        self.announce(InvalidationEvent::clear(&self.instance_id))
            .await;
        Ok(removed)
    }

    /// Remove every record belonging to `model_name`.
    ///
    /// Keys are opaque hashes, so the scope can only be established by
    /// inspecting each stored value; this is the one operation that costs
    /// more than O(1) round trips.
    pub async fn clear_model(&self, model_name: &str) -> Result<u64> {
        let keys = self.store.scan(&format!("{}*", self.prefix)).await?;

        let mut doomed = Vec::new();
        for key in keys {
            let Some(value) = self.store.get(&key).await? else {
                continue;
            };
            match StoredRecord::decode(&key, &value) {
                Ok(record) if record.model_name == model_name => doomed.push(key),
                Ok(_) => {}
                Err(e) => {
                    warn!("deleting unreadable distributed entry: {e}");
                    let _ = self.store.delete(&key).await;
                }
            }
        }

        let removed = self.delete_in_batches(doomed).await?;

        debug!("distributed tier cleared {removed} entries for model {model_name}");
        self.announce(InvalidationEvent::clear_model(
            model_name,
            &self.instance_id,
        ))
        .await;
        Ok(removed)
    }

    /// Remove every record whose logical key matches a glob pattern.
    pub async fn bulk_delete(&self, pattern: &str) -> Result<u64> {
        let keys = self
            .store
            .scan(&format!("{}{pattern}", self.prefix))
            .await?;
        let removed = self.delete_in_batches(keys).await?;

        debug!("distributed tier bulk-deleted {removed} entries matching {pattern}");
        self.announce(InvalidationEvent::bulk_delete(pattern, &self.instance_id))
            .await;
        Ok(removed)
    }

    /// List logical keys matching a glob pattern.
    pub async fn find_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let keys = self
            .store
            .scan(&format!("{}{pattern}", self.prefix))
            .await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(&self.prefix))
            .map(str::to_string)
            .collect())
    }

    async fn delete_in_batches(&self, keys: Vec<String>) -> Result<u64> {
        let mut removed = 0;
        for batch in keys.chunks(DELETE_BATCH) {
            removed += self.store.delete_many(batch).await?;
        }
        Ok(removed)
    }

    /// Snapshot the tier's counters.
    pub fn stats(&self) -> TierStatsSnapshot {
        self.stats.snapshot(0)
    }

    /// Stop the subscriber and release the subscription.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.subscriber.lock().await.take() {
            let _ = handle.await;
        }
        info!("distributed tier subscriber stopped");
    }
}

/// Receive raw pub/sub payloads, drop this instance's own echoes, and
/// forward peer events until shutdown or the subscription ends.
async fn subscriber_loop(
    mut raw_rx: mpsc::Receiver<String>,
    event_tx: mpsc::Sender<InvalidationEvent>,
    instance_id: String,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            payload = raw_rx.recv() => {
                let Some(payload) = payload else { break };

                let event = match InvalidationEvent::from_json(&payload) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("discarding malformed invalidation event: {e}");
                        continue;
                    }
                };

                if event.instance_id == instance_id {
                    continue;
                }

                debug!("received {:?} invalidation from {}", event.kind, event.instance_id);
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{CacheEntry, VectorPayload};
    use crate::events::InvalidationKind;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn record(model: &str, text: &str) -> (CacheKey, StoredRecord) {
        let entry = CacheEntry::new(VectorPayload::Plain(vec![1.0, 2.0]), model, 60);
        (
            CacheKey::derive(model, text),
            StoredRecord::from_entry(text, &entry),
        )
    }

    async fn pair(
        store: &Arc<MemoryStore>,
        instance: &str,
    ) -> (DistributedTier, mpsc::Receiver<InvalidationEvent>) {
        let store: Arc<dyn RemoteStore> = Arc::clone(store) as Arc<dyn RemoteStore>;
        DistributedTier::connect(store, "cache:", instance)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let store = MemoryStore::shared();
        let (tier, _rx) = pair(&store, "a").await;

        let (key, stored) = record("m", "hello");
        tier.set(&key, &stored, 60).await.unwrap();

        let got = tier.get(&key).await.unwrap().unwrap();
        assert_eq!(got, stored);
        tier.close().await;
    }

    #[tokio::test]
    async fn test_get_miss() {
        let store = MemoryStore::shared();
        let (tier, _rx) = pair(&store, "a").await;

        assert!(tier.get(&CacheKey::derive("m", "nope")).await.unwrap().is_none());
        assert_eq!(tier.stats().misses, 1);
        tier.close().await;
    }

    #[tokio::test]
    async fn test_corrupt_value_deleted_and_reported_as_miss() {
        let store = MemoryStore::shared();
        let (tier, _rx) = pair(&store, "a").await;

        let key = CacheKey::derive("m", "bad");
        store
            .set(&format!("cache:{key}"), "{garbage", None)
            .await
            .unwrap();

        assert!(tier.get(&key).await.unwrap().is_none());
        assert!(store.get(&format!("cache:{key}")).await.unwrap().is_none());
        tier.close().await;
    }

    #[tokio::test]
    async fn test_peer_sees_writes_through_shared_store() {
        let store = MemoryStore::shared();
        let (a, _rx_a) = pair(&store, "a").await;
        let (b, _rx_b) = pair(&store, "b").await;

        let (key, stored) = record("m", "shared");
        a.set(&key, &stored, 60).await.unwrap();

        assert_eq!(b.get(&key).await.unwrap(), Some(stored));
        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_own_echo_is_filtered_peer_event_is_forwarded() {
        let store = MemoryStore::shared();
        let (a, mut rx_a) = pair(&store, "a").await;
        let (b, mut rx_b) = pair(&store, "b").await;

        let (key, stored) = record("m", "observed");
        a.set(&key, &stored, 60).await.unwrap();

        // The peer receives the notice...
        let event = tokio::time::timeout(Duration::from_secs(1), rx_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, InvalidationKind::Set);
        assert_eq!(event.key.as_deref(), Some(key.as_str()));
        assert_eq!(event.instance_id, "a");

        // ...while the publisher's own channel stays quiet.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx_a.recv())
                .await
                .is_err()
        );

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_clear_model_inspects_values() {
        let store = MemoryStore::shared();
        let (tier, _rx) = pair(&store, "a").await;

        for text in ["one", "two"] {
            let (key, stored) = record("m1", text);
            tier.set(&key, &stored, 60).await.unwrap();
        }
        let (other_key, other) = record("m2", "one");
        tier.set(&other_key, &other, 60).await.unwrap();

        assert_eq!(tier.clear_model("m1").await.unwrap(), 2);
        assert!(tier.get(&other_key).await.unwrap().is_some());
        tier.close().await;
    }

    #[tokio::test]
    async fn test_bulk_delete_and_find_keys() {
        let store = MemoryStore::shared();
        let (tier, _rx) = pair(&store, "a").await;

        let (key_a, rec_a) = record("m", "a");
        let (key_b, rec_b) = record("m", "b");
        tier.set(&key_a, &rec_a, 60).await.unwrap();
        tier.set(&key_b, &rec_b, 60).await.unwrap();

        let found = tier.find_keys("*").await.unwrap();
        assert_eq!(found.len(), 2);

        let removed = tier
            .bulk_delete(&format!("{}*", &key_a.as_str()[..8]))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(tier.get(&key_a).await.unwrap().is_none());
        tier.close().await;
    }

    #[tokio::test]
    async fn test_clear_removes_everything_under_prefix() {
        let store = MemoryStore::shared();
        let (tier, _rx) = pair(&store, "a").await;

        for text in ["x", "y", "z"] {
            let (key, stored) = record("m", text);
            tier.set(&key, &stored, 60).await.unwrap();
        }
        // A foreign key outside the prefix must survive.
        store.set("other:key", "v", None).await.unwrap();

        assert_eq!(tier.clear().await.unwrap(), 3);
        assert_eq!(store.get("other:key").await.unwrap(), Some("v".to_string()));
        tier.close().await;
    }

    #[tokio::test]
    async fn test_close_stops_subscriber() {
        let store = MemoryStore::shared();
        let (tier, mut rx) = pair(&store, "a").await;

        tier.close().await;

        // The forwarding channel ends once the subscriber is gone.
        assert!(rx.recv().await.is_none());
    }
}
