//! Cache controller.
//!
//! The only component the rest of the gateway talks to. Coordinates the
//! three tiers behind one get/set/delete/clear surface:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        CacheController                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  MemoryTier (LRU)  →  DistributedTier (shared)  →  FileTier      │
//! │        ▲                      │                        │         │
//! │        └──────── promotion ───┴──────── promotion ─────┘         │
//! │                                                                  │
//! │  compression · adaptive TTL · similarity prefetch · timers       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lookups walk the tiers fastest-first and promote hits upward; writes
//! fan out to every enabled tier. The controller never calls the
//! embedding provider: a miss is returned to the caller, which computes
//! the vector and writes it back with [`CacheController::set`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use toolgate_embeddings::Embedding;
use toolgate_embeddings::similarity::find_top_k;

use crate::compression::{decode_payload, encode_payload};
use crate::config::CacheConfig;
use crate::distributed::DistributedTier;
use crate::entry::{CacheEntry, StoredRecord, now_secs};
use crate::error::Result;
use crate::events::{InvalidationEvent, InvalidationKind};
use crate::file::FileTier;
use crate::key::CacheKey;
use crate::memory::MemoryTier;
use crate::stats::{CacheStatsSnapshot, HourBuckets, TierStats, hour_of_day};
use crate::store::{RedisStore, RemoteStore};
use crate::ttl::{TtlPolicy, adaptive_ttl};

/// Tiered embedding cache.
pub struct CacheController {
    config: CacheConfig,
    memory: Option<Arc<MemoryTier>>,
    file: Option<Arc<FileTier>>,
    distributed: Option<Arc<DistributedTier>>,
    hours: Arc<HourBuckets>,
    totals: TierStats,
    instance_id: String,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheController {
    /// Build a controller, connecting to the configured shared store when
    /// the distributed tier is enabled.
    pub async fn new(config: CacheConfig) -> Result<Self> {
        let store: Option<Arc<dyn RemoteStore>> = if config.enable_distributed_cache {
            let store = RedisStore::connect(&config.distributed_store_url)
                .await
                .map_err(|e| crate::error::CacheError::TierUnavailable(e.to_string()))?;
            Some(Arc::new(store))
        } else {
            None
        };
        Self::build(config, store).await
    }

    /// Build a controller against an explicit shared-store backend.
    pub async fn with_remote_store(
        config: CacheConfig,
        store: Arc<dyn RemoteStore>,
    ) -> Result<Self> {
        Self::build(config, Some(store)).await
    }

    async fn build(config: CacheConfig, store: Option<Arc<dyn RemoteStore>>) -> Result<Self> {
        config.validate()?;

        let instance_id = Uuid::new_v4().to_string();
        let (shutdown_tx, _) = watch::channel(false);
        let mut tasks = Vec::new();

        let memory = config
            .enable_memory_cache
            .then(|| Arc::new(MemoryTier::new(config.memory_capacity)));

        let file = if config.enable_file_cache {
            Some(Arc::new(FileTier::new(&config.file_cache_directory).await?))
        } else {
            None
        };

        let distributed = match store.filter(|_| config.enable_distributed_cache) {
            Some(store) => {
                let (tier, events) =
                    DistributedTier::connect(store, &config.key_prefix, &instance_id).await?;

                tasks.push(tokio::spawn(invalidation_loop(
                    events,
                    memory.clone(),
                    shutdown_tx.subscribe(),
                )));

                Some(Arc::new(tier))
            }
            None => None,
        };

        if let (Some(file), Some(memory)) = (file.clone(), memory.clone()) {
            tasks.push(tokio::spawn(optimizer_loop(
                file,
                memory,
                config.promotion_strategy,
                config.optimize_interval_secs,
                shutdown_tx.subscribe(),
            )));
        }

        if let Some(file) = file.clone() {
            tasks.push(tokio::spawn(stats_loop(
                file,
                config.stats_interval_secs,
                shutdown_tx.subscribe(),
            )));
        }

        info!(
            "cache controller {instance_id} ready (memory: {}, file: {}, distributed: {})",
            memory.is_some(),
            file.is_some(),
            distributed.is_some()
        );

        Ok(Self {
            config,
            memory,
            file,
            distributed,
            hours: Arc::new(HourBuckets::new()),
            totals: TierStats::new(),
            instance_id,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }

    /// Identity stamped into this instance's invalidation events.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            default_ttl_secs: self.config.default_ttl_secs,
            min_ttl_secs: self.config.min_ttl_secs,
            max_ttl_secs: self.config.max_ttl_secs,
        }
    }

    fn record_lookup(&self, hit: bool) {
        let hour = hour_of_day(now_secs());
        self.hours.record(hour, hit);
        if hit {
            self.totals.record_hit();
        } else {
            self.totals.record_miss();
        }
    }

    fn ttl_for(&self, access_count: u64, last_accessed: Option<u64>) -> u64 {
        let now = now_secs();
        adaptive_ttl(
            &self.ttl_policy(),
            access_count,
            last_accessed.map(|at| now.saturating_sub(at)),
            self.hours.hit_ratio(hour_of_day(now)),
        )
    }

    /// Look up the vector for `(text, model)`.
    ///
    /// Walks memory → distributed → file, promoting hits upward. Returns
    /// `None` on a miss; computing the vector is the caller's job.
    pub async fn get(&self, text: &str, model_name: &str) -> Option<Embedding> {
        let key = CacheKey::derive(model_name, text);

        if let Some(memory) = &self.memory {
            if let Some(entry) = memory.get(&key) {
                match decode_payload(&entry.vector) {
                    Ok(vector) => {
                        self.record_lookup(true);
                        return Some(vector);
                    }
                    Err(e) => {
                        warn!("dropping undecodable memory entry {key}: {e}");
                        memory.delete(&key);
                    }
                }
            }
        }

        if let Some(distributed) = &self.distributed {
            match distributed.get(&key).await {
                Ok(Some(record)) => match decode_payload(&record.embedding) {
                    Ok(vector) => {
                        if let Some(memory) = &self.memory {
                            memory.set(key.clone(), record.to_entry());
                        }
                        self.record_lookup(true);
                        return Some(vector);
                    }
                    Err(e) => {
                        warn!("dropping undecodable distributed entry {key}: {e}");
                        let _ = distributed.delete(&key).await;
                    }
                },
                Ok(None) => {}
                Err(e) => warn!("distributed tier unavailable, falling through: {e}"),
            }
        }

        if let Some(file) = &self.file {
            if let Some(record) = file.get(&key).await {
                match decode_payload(&record.embedding) {
                    Ok(vector) => {
                        // Promote only entries that have earned it; a one-off
                        // read must not displace hot memory residents.
                        if record.access_count >= self.config.frequency_promotion_threshold {
                            if let Some(memory) = &self.memory {
                                memory.set(key.clone(), record.to_entry());
                            }
                        }

                        if let Some(distributed) = &self.distributed {
                            let ttl =
                                self.ttl_for(record.access_count, Some(record.last_accessed));
                            if let Err(e) = distributed.set(&key, &record, ttl).await {
                                warn!("failed to mirror file hit to distributed tier: {e}");
                            }
                        }

                        self.record_lookup(true);
                        return Some(vector);
                    }
                    Err(e) => {
                        warn!("dropping undecodable file entry {key}: {e}");
                        let _ = file.delete(&key).await;
                    }
                }
            }
        }

        self.record_lookup(false);
        None
    }

    /// Store the vector for `(text, model)` in every enabled tier.
    ///
    /// Returns `true` when at least one tier accepted the write.
    pub async fn set(&self, text: &str, model_name: &str, vector: Embedding) -> bool {
        let key = CacheKey::derive(model_name, text);
        let now = now_secs();

        // Carry forward popularity from an existing resident so the
        // adaptive TTL sees the entry's history, not a blank slate.
        let previous = self.memory.as_ref().and_then(|m| m.peek(&key));
        let (access_count, last_accessed) = previous
            .map(|e| (e.access_count, Some(e.last_accessed)))
            .unwrap_or((0, None));

        let ttl = self.ttl_for(access_count, last_accessed);

        let payload = encode_payload(
            vector.clone(),
            self.config.compression_enabled,
            self.config.compression_threshold_bytes,
            self.config.compression_level,
        );

        let entry = CacheEntry {
            vector: payload,
            model_name: model_name.to_string(),
            created_at: now,
            last_accessed: now,
            access_count,
            expires_at: now.saturating_add(ttl),
        };
        let record = StoredRecord::from_entry(text, &entry);

        let mut stored = false;

        if let Some(memory) = &self.memory {
            memory.set(key.clone(), entry);
            stored = true;
        }

        if let Some(file) = &self.file {
            match file.set(&key, &record).await {
                Ok(()) => stored = true,
                Err(e) => warn!("file tier rejected write for {key}: {e}"),
            }
        }

        if let Some(distributed) = &self.distributed {
            match distributed.set(&key, &record, ttl).await {
                Ok(()) => stored = true,
                Err(e) => warn!("distributed tier rejected write for {key}: {e}"),
            }
        }

        self.totals.record_set();

        if stored {
            self.spawn_prefetch(key, model_name.to_string(), vector);
        }
        stored
    }

    /// Remove the entry for `(text, model)` from every enabled tier.
    ///
    /// Returns `true` when any tier held it.
    pub async fn delete(&self, text: &str, model_name: &str) -> bool {
        let key = CacheKey::derive(model_name, text);
        let mut removed = false;

        if let Some(memory) = &self.memory {
            removed |= memory.delete(&key);
        }

        if let Some(file) = &self.file {
            match file.delete(&key).await {
                Ok(was_present) => removed |= was_present,
                Err(e) => warn!("file tier delete failed for {key}: {e}"),
            }
        }

        if let Some(distributed) = &self.distributed {
            match distributed.delete(&key).await {
                Ok(was_present) => removed |= was_present,
                Err(e) => warn!("distributed tier delete failed for {key}: {e}"),
            }
        }

        removed
    }

    /// Drop every entry from every enabled tier.
    pub async fn clear(&self) {
        if let Some(memory) = &self.memory {
            memory.clear();
        }

        if let Some(file) = &self.file {
            if let Err(e) = file.clear().await {
                warn!("file tier clear failed: {e}");
            }
        }

        if let Some(distributed) = &self.distributed {
            if let Err(e) = distributed.clear().await {
                warn!("distributed tier clear failed: {e}");
            }
        }

        info!("cache cleared");
    }

    /// Drop every entry belonging to `model_name` from every enabled
    /// tier. Returns how many entries were removed in total.
    pub async fn clear_model(&self, model_name: &str) -> u64 {
        let mut removed = 0;

        if let Some(memory) = &self.memory {
            removed += memory.remove_model(model_name) as u64;
        }

        if let Some(file) = &self.file {
            match file.clear_model(model_name).await {
                Ok(count) => removed += count,
                Err(e) => warn!("file tier clear_model failed: {e}"),
            }
        }

        if let Some(distributed) = &self.distributed {
            match distributed.clear_model(model_name).await {
                Ok(count) => removed += count,
                Err(e) => warn!("distributed tier clear_model failed: {e}"),
            }
        }

        info!("cleared {removed} entries for model {model_name}");
        removed
    }

    /// Snapshot counters across the whole cache.
    pub fn stats(&self) -> CacheStatsSnapshot {
        let totals = self.totals.snapshot(0);
        CacheStatsSnapshot {
            memory: self.memory.as_ref().map(|m| m.stats()),
            file: self.file.as_ref().map(|f| f.stats()),
            distributed: self.distributed.as_ref().map(|d| d.stats()),
            file_disk: self.file.as_ref().and_then(|f| f.last_disk_stats()),
            hits: totals.hits,
            misses: totals.misses,
            sets: totals.sets,
            hit_ratio: totals.hit_ratio,
        }
    }

    /// Stop background work and release the shared-store subscription.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);

        for handle in self.tasks.lock().await.drain(..) {
            let _ = handle.await;
        }

        if let Some(distributed) = &self.distributed {
            distributed.close().await;
        }

        info!("cache controller {} closed", self.instance_id);
    }

    /// Best-effort: pre-load the memory tier with same-model entries most
    /// similar to a just-written vector. Never affects the write outcome.
    fn spawn_prefetch(&self, key: CacheKey, model_name: String, query: Embedding) {
        if self.config.max_prefetch_items == 0 {
            return;
        }
        let (Some(file), Some(memory)) = (self.file.clone(), self.memory.clone()) else {
            return;
        };
        let threshold = self.config.prefetch_threshold;
        let limit = self.config.max_prefetch_items;

        tokio::spawn(async move {
            let candidates = file.same_model_records(&model_name, &key).await;
            if candidates.is_empty() {
                return;
            }

            let mut by_key: HashMap<String, StoredRecord> = HashMap::new();
            let mut vectors = Vec::with_capacity(candidates.len());
            for (candidate_key, record) in candidates {
                match decode_payload(&record.embedding) {
                    Ok(vector) => {
                        vectors.push((candidate_key.as_str().to_string(), vector));
                        by_key.insert(candidate_key.as_str().to_string(), record);
                    }
                    Err(e) => debug!("skipping prefetch candidate {candidate_key}: {e}"),
                }
            }

            let ranked = find_top_k(&query, &vectors, limit, threshold);
            let mut loaded = 0;
            for scored in &ranked {
                if let Some(record) = by_key.get(&scored.id) {
                    memory.set(CacheKey::from(scored.id.clone()), record.to_entry());
                    loaded += 1;
                }
            }

            if loaded > 0 {
                debug!("prefetched {loaded} similar entries for model {model_name}");
            }
        });
    }
}

/// Apply peer invalidation notices to the memory tier, the only tier that
/// can go silently stale without a read-time check.
async fn invalidation_loop(
    mut events: mpsc::Receiver<InvalidationEvent>,
    memory: Option<Arc<MemoryTier>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            event = events.recv() => match event {
                Some(event) => apply_invalidation(memory.as_deref(), event),
                None => break,
            }
        }
    }
}

fn apply_invalidation(memory: Option<&MemoryTier>, event: InvalidationEvent) {
    let Some(memory) = memory else { return };

    match event.kind {
        InvalidationKind::Set
        | InvalidationKind::Delete
        | InvalidationKind::Invalidate
        | InvalidationKind::UpdateExpiry => {
            if let Some(key) = event.key {
                if memory.delete(&CacheKey::from(key)) {
                    debug!("dropped memory entry after peer {:?}", event.kind);
                }
            }
        }
        InvalidationKind::Clear => {
            memory.clear();
            debug!("cleared memory tier after peer clear");
        }
        InvalidationKind::ClearModel => {
            if let Some(model_name) = event.metadata.model_name {
                let dropped = memory.remove_model(&model_name);
                debug!("dropped {dropped} memory entries after peer clearModel");
            }
        }
        InvalidationKind::BulkDelete => {
            if let Some(pattern) = event.metadata.pattern {
                let dropped = memory.remove_matching(&pattern);
                debug!("dropped {dropped} memory entries after peer bulkDelete");
            }
        }
    }
}

/// Periodically sweep expired file entries and refill the memory tier with
/// the top-ranked survivors.
async fn optimizer_loop(
    file: Arc<FileTier>,
    memory: Arc<MemoryTier>,
    strategy: crate::config::PromotionStrategy,
    interval_secs: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let period = Duration::from_secs(interval_secs.max(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                match file.purge_expired().await {
                    Ok(purged) if purged > 0 => debug!("optimizer purged {purged} expired entries"),
                    Ok(_) => {}
                    Err(e) => warn!("optimizer purge failed: {e}"),
                }
                if let Err(e) = file.optimize(&memory, strategy).await {
                    warn!("optimizer pass failed: {e}");
                }
            }
        }
    }
}

/// Periodically gather file-tier disk usage.
async fn stats_loop(
    file: Arc<FileTier>,
    interval_secs: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let period = Duration::from_secs(interval_secs.max(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                match file.collect_stats().await {
                    Ok(disk) => debug!(
                        "file tier holds {} entries ({} bytes, {} expired)",
                        disk.entries, disk.bytes, disk.expired
                    ),
                    Err(e) => warn!("stats collection failed: {e}"),
                }
            }
        }
    }
}
