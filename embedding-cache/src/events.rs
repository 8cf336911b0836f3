//! Cross-instance invalidation events.
//!
//! Every mutating operation on the distributed tier publishes one of these
//! on the `<keyPrefix>pubsub` channel. Events exist only on the wire:
//! delivery is best-effort, and every tier re-validates freshness at read
//! time, so a lost event at worst leaves a peer's memory tier briefly
//! stale.

use serde::{Deserialize, Serialize};

use crate::entry::now_secs;
use crate::error::Result;

/// What kind of mutation the event announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InvalidationKind {
    Set,
    Delete,
    Clear,
    ClearModel,
    BulkDelete,
    Invalidate,
    UpdateExpiry,
}

/// Optional event details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventMetadata {
    /// Model scope, for `clearModel`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    /// Key pattern, for `bulkDelete`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// New expiry, for `updateExpiry`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

/// One invalidation notice as published between instances.
///
/// Consumers must ignore events whose `instance_id` equals their own: the
/// publisher sees its own echo on the shared channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationEvent {
    /// The mutation kind.
    #[serde(rename = "type")]
    pub kind: InvalidationKind,

    /// Affected key, when the mutation targets a single key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Extra details for scoped mutations.
    #[serde(default, skip_serializing_if = "EventMetadata::is_empty")]
    pub metadata: EventMetadata,

    /// Identity of the publishing instance.
    pub instance_id: String,

    /// When the event was published (epoch seconds).
    pub timestamp: u64,
}

impl EventMetadata {
    fn is_empty(&self) -> bool {
        self.model_name.is_none() && self.pattern.is_none() && self.expires_at.is_none()
    }
}

impl InvalidationEvent {
    fn new(kind: InvalidationKind, key: Option<String>, instance_id: &str) -> Self {
        Self {
            kind,
            key,
            metadata: EventMetadata::default(),
            instance_id: instance_id.to_string(),
            timestamp: now_secs(),
        }
    }

    /// A single-key write notice.
    pub fn set(key: &str, instance_id: &str) -> Self {
        Self::new(InvalidationKind::Set, Some(key.to_string()), instance_id)
    }

    /// A single-key removal notice.
    pub fn delete(key: &str, instance_id: &str) -> Self {
        Self::new(InvalidationKind::Delete, Some(key.to_string()), instance_id)
    }

    /// A full-cache clear notice.
    pub fn clear(instance_id: &str) -> Self {
        Self::new(InvalidationKind::Clear, None, instance_id)
    }

    /// A model-scoped clear notice.
    pub fn clear_model(model_name: &str, instance_id: &str) -> Self {
        let mut event = Self::new(InvalidationKind::ClearModel, None, instance_id);
        event.metadata.model_name = Some(model_name.to_string());
        event
    }

    /// A pattern-scoped removal notice.
    pub fn bulk_delete(pattern: &str, instance_id: &str) -> Self {
        let mut event = Self::new(InvalidationKind::BulkDelete, None, instance_id);
        event.metadata.pattern = Some(pattern.to_string());
        event
    }

    /// An explicit single-key invalidation notice.
    pub fn invalidate(key: &str, instance_id: &str) -> Self {
        Self::new(
            InvalidationKind::Invalidate,
            Some(key.to_string()),
            instance_id,
        )
    }

    /// An expiry-change notice.
    pub fn update_expiry(key: &str, expires_at: u64, instance_id: &str) -> Self {
        let mut event = Self::new(
            InvalidationKind::UpdateExpiry,
            Some(key.to_string()),
            instance_id,
        );
        event.metadata.expires_at = Some(expires_at);
        event
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a wire payload.
    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}
