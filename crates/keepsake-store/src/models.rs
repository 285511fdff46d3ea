//! Domain model for the capsule document.
//!
//! The struct derives `Serialize`/`Deserialize` with camelCase field names so
//! it can be handed straight to the HTTP layer; the wire shape matches the
//! persisted document shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A time capsule: a titled bundle of text and media gated by an open date,
/// owned by one user and optionally visible to participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Capsule {
    /// Unique capsule identifier, assigned at creation.
    pub id: Uuid,
    /// Identity-provider uid of the creator. Immutable after creation.
    pub owner_uid: String,
    /// Required, non-empty.
    pub title: String,
    /// Optional free text, empty by default.
    pub description: String,
    /// The scheduled unlock date. The capsule is "locked" while `now < open_at`.
    pub open_at: DateTime<Utc>,
    /// Durable media URLs, in upload order. Grows across updates; no
    /// operation removes entries.
    pub image_urls: Vec<String>,
    /// Uids or emails granted read-only visibility.
    pub participants: Vec<String>,
    /// Advisory flag; nothing in the server flips it when `open_at` elapses.
    pub is_opened: bool,
    /// Advisory flag for a future notifier; always false today.
    pub notify_sent: bool,
    /// Server-assigned once at creation.
    pub created_at: DateTime<Utc>,
    /// Refreshed on every mutation.
    pub updated_at: DateTime<Utc>,
}

impl Capsule {
    /// Derived lock state. Computed at read time, never persisted.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        now < self.open_at
    }

    /// Whether `uid` may read this capsule (owner or participant).
    pub fn is_visible_to(&self, uid: &str) -> bool {
        self.owner_uid == uid || self.participants.iter().any(|p| p == uid)
    }
}
