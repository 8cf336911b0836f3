//! Cache entries and their persisted encoding.
//!
//! Each tier holds its own copy of a [`CacheEntry`]; no shared mutable
//! state crosses a tier boundary. The [`StoredRecord`] is the camelCase
//! JSON encoding written to disk by the file tier and to the shared store
//! by the distributed tier, so records written by one instance parse on
//! every other instance.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Current time as seconds since the epoch.
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// An embedding vector as stored by a tier: either the raw floats or an
/// lz4-compressed, base64-encoded payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VectorPayload {
    /// Raw float array.
    Plain(Vec<f32>),

    /// Compressed payload.
    Compressed(CompressedVector),
}

impl VectorPayload {
    /// Whether this payload is compressed.
    pub fn is_compressed(&self) -> bool {
        matches!(self, VectorPayload::Compressed(_))
    }
}

/// The `{ "compressed": true, "data": "<base64>" }` form of a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedVector {
    /// Always `true`; kept explicit so consumers can branch on the field.
    pub compressed: bool,

    /// Base64 of the lz4-compressed little-endian float bytes.
    pub data: String,
}

/// One cached embedding plus its bookkeeping metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The embedding vector (plain or compressed).
    pub vector: VectorPayload,

    /// Model that produced the vector.
    pub model_name: String,

    /// When the entry was created (epoch seconds).
    pub created_at: u64,

    /// When the entry was last read (epoch seconds).
    pub last_accessed: u64,

    /// How many times the entry has been read.
    pub access_count: u64,

    /// When the entry expires (epoch seconds). The memory tier ignores
    /// this; the file and distributed tiers enforce it at read time.
    pub expires_at: u64,
}

impl CacheEntry {
    /// Create a fresh entry expiring `ttl_secs` from now.
    pub fn new(vector: VectorPayload, model_name: impl Into<String>, ttl_secs: u64) -> Self {
        let now = now_secs();
        Self {
            vector,
            model_name: model_name.into(),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            expires_at: now.saturating_add(ttl_secs),
        }
    }

    /// Record a read.
    pub fn touch(&mut self) {
        self.last_accessed = now_secs();
        self.access_count += 1;
    }

    /// Whether the entry has expired as of `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// The self-describing record persisted per key by the file and
/// distributed tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    /// The text that was embedded.
    pub text: String,

    /// Model that produced the vector.
    pub model_name: String,

    /// The embedding payload.
    pub embedding: VectorPayload,

    /// When the entry was created (epoch seconds).
    pub created_at: u64,

    /// When the entry was last read (epoch seconds).
    pub last_accessed: u64,

    /// When the entry expires (epoch seconds).
    pub expires_at: u64,

    /// How many times the entry has been read.
    pub access_count: u64,
}

impl StoredRecord {
    /// Build the persisted form of an entry.
    pub fn from_entry(text: impl Into<String>, entry: &CacheEntry) -> Self {
        Self {
            text: text.into(),
            model_name: entry.model_name.clone(),
            embedding: entry.vector.clone(),
            created_at: entry.created_at,
            last_accessed: entry.last_accessed,
            expires_at: entry.expires_at,
            access_count: entry.access_count,
        }
    }

    /// The in-process form of this record.
    pub fn to_entry(&self) -> CacheEntry {
        CacheEntry {
            vector: self.embedding.clone(),
            model_name: self.model_name.clone(),
            created_at: self.created_at,
            last_accessed: self.last_accessed,
            access_count: self.access_count,
            expires_at: self.expires_at,
        }
    }

    /// Whether the record has expired as of `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Parse a persisted record, reporting corruption with the offending
    /// key attached.
    pub fn decode(key: &str, raw: &str) -> Result<Self, CacheError> {
        serde_json::from_str(raw).map_err(|e| CacheError::CorruptEntry {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}
