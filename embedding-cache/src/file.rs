//! Durable local-disk tier.
//!
//! One self-describing JSON record per key, written atomically via a temp
//! file and rename. Expiry is lazy: a read that finds an expired record
//! deletes it and reports a miss, so no sweep is needed for correctness.
//! The periodic sweep only reclaims disk.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::PromotionStrategy;
use crate::entry::{StoredRecord, now_secs};
use crate::error::Result;
use crate::key::CacheKey;
use crate::memory::MemoryTier;
use crate::stats::{DiskStats, TierStats, TierStatsSnapshot};

/// Local-disk tier.
pub struct FileTier {
    /// Directory holding one `<key>.json` per entry.
    dir: PathBuf,

    stats: TierStats,

    /// Most recent disk usage collection.
    last_disk: Mutex<Option<DiskStats>>,
}

impl FileTier {
    /// Create a tier rooted at `dir`, creating the directory if needed.
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        Ok(Self {
            dir,
            stats: TierStats::new(),
            last_disk: Mutex::new(None),
        })
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Read the record for `key`, enforcing expiry and deleting corrupt
    /// files. A hit bumps the record's access bookkeeping on disk.
    pub async fn get(&self, key: &CacheKey) -> Option<StoredRecord> {
        let path = self.entry_path(key);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.stats.record_miss();
                return None;
            }
            Err(e) => {
                warn!("file tier read failed for {key}: {e}");
                self.stats.record_miss();
                return None;
            }
        };

        let mut record = match StoredRecord::decode(key.as_str(), &content) {
            Ok(record) => record,
            Err(e) => {
                warn!("deleting unreadable cache file: {e}");
                let _ = fs::remove_file(&path).await;
                self.stats.record_miss();
                return None;
            }
        };

        if record.is_expired(now_secs()) {
            debug!("file tier entry expired: {key}");
            let _ = fs::remove_file(&path).await;
            self.stats.record_miss();
            return None;
        }

        record.last_accessed = now_secs();
        record.access_count += 1;
        if let Err(e) = self.write_record(key, &record).await {
            warn!("failed to persist access bookkeeping for {key}: {e}");
        }

        self.stats.record_hit();
        Some(record)
    }

    /// Write the record for `key`.
    pub async fn set(&self, key: &CacheKey, record: &StoredRecord) -> Result<()> {
        self.write_record(key, record).await?;
        self.stats.record_set();
        Ok(())
    }

    async fn write_record(&self, key: &CacheKey, record: &StoredRecord) -> Result<()> {
        let path = self.entry_path(key);
        let content = serde_json::to_string(record)?;

        // Write atomically using a temp file
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        Ok(())
    }

    /// Remove the record for `key`. Returns whether one was present.
    pub async fn delete(&self, key: &CacheKey) -> Result<bool> {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every record. Returns how many were removed.
    pub async fn clear(&self) -> Result<u64> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(&path).await?;
                removed += 1;
            }
        }

        info!("file tier cleared {removed} entries");
        Ok(removed)
    }

    /// Remove every record for `model_name`. Returns how many were removed.
    pub async fn clear_model(&self, model_name: &str) -> Result<u64> {
        let mut removed = 0;
        for (key, record) in self.scan_records().await {
            if record.model_name == model_name {
                if self.delete(&key).await? {
                    removed += 1;
                }
            }
        }

        debug!("file tier cleared {removed} entries for model {model_name}");
        Ok(removed)
    }

    /// All live records, skipping (and deleting) corrupt files and
    /// skipping expired ones.
    pub async fn scan_records(&self) -> Vec<(CacheKey, StoredRecord)> {
        let now = now_secs();
        let mut records = Vec::new();

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("file tier scan failed: {e}");
                return records;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("file tier scan failed: {e}");
                    break;
                }
            };

            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let content = match fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("file tier read failed for {}: {e}", path.display());
                    continue;
                }
            };

            match StoredRecord::decode(stem, &content) {
                Ok(record) if !record.is_expired(now) => {
                    records.push((CacheKey::from(stem.to_string()), record));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("deleting unreadable cache file: {e}");
                    let _ = fs::remove_file(&path).await;
                }
            }
        }

        records
    }

    /// All live records for `model_name`, excluding `exclude`.
    pub async fn same_model_records(
        &self,
        model_name: &str,
        exclude: &CacheKey,
    ) -> Vec<(CacheKey, StoredRecord)> {
        self.scan_records()
            .await
            .into_iter()
            .filter(|(key, record)| record.model_name == model_name && key != exclude)
            .collect()
    }

    /// Refill the memory tier with the top-ranked live entries.
    ///
    /// The memory tier is cleared first so one ranking pass never mixes
    /// with leftovers of a previous one. Returns how many entries were
    /// promoted.
    pub async fn optimize(
        &self,
        memory: &MemoryTier,
        strategy: PromotionStrategy,
    ) -> Result<usize> {
        let mut records = self.scan_records().await;

        match strategy {
            PromotionStrategy::Frequency => {
                records.sort_by(|a, b| b.1.access_count.cmp(&a.1.access_count));
            }
            PromotionStrategy::Recency => {
                records.sort_by(|a, b| b.1.last_accessed.cmp(&a.1.last_accessed));
            }
        }

        memory.clear();
        let capacity = memory.capacity();
        let mut promoted = 0;
        for (key, record) in records.into_iter().take(capacity) {
            memory.set(key, record.to_entry());
            promoted += 1;
        }

        debug!("optimizer promoted {promoted} entries to the memory tier");
        Ok(promoted)
    }

    /// Delete expired records. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = now_secs();
        let mut removed = 0;

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }

            let Ok(content) = fs::read_to_string(&path).await else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<StoredRecord>(&content) else {
                continue;
            };

            if record.is_expired(now) {
                let _ = fs::remove_file(&path).await;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("purged {removed} expired file tier entries");
        }
        Ok(removed)
    }

    /// Gather disk usage, remembering the result for [`Self::stats`].
    pub async fn collect_stats(&self) -> Result<DiskStats> {
        let now = now_secs();
        let mut disk = DiskStats::default();

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }

            if let Ok(meta) = entry.metadata().await {
                disk.bytes += meta.len();
            }
            disk.entries += 1;

            if let Ok(content) = fs::read_to_string(&path).await {
                if let Ok(record) = serde_json::from_str::<StoredRecord>(&content) {
                    if record.is_expired(now) {
                        disk.expired += 1;
                    }
                }
            }
        }

        if let Ok(mut last) = self.last_disk.lock() {
            *last = Some(disk);
        }
        Ok(disk)
    }

    /// Disk usage from the most recent collection pass, if any.
    pub fn last_disk_stats(&self) -> Option<DiskStats> {
        self.last_disk.lock().ok().and_then(|d| *d)
    }

    /// Snapshot the tier's counters.
    pub fn stats(&self) -> TierStatsSnapshot {
        let size = self
            .last_disk_stats()
            .map(|d| d.entries)
            .unwrap_or_default();
        self.stats.snapshot(size)
    }
}
