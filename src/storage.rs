//! Durable state shared across webhook deliveries.
//!
//! Four concerns live here: processed-event markers (the dedup gate), email
//! views, reply sessions, and the subscriber set, plus the mailbox
//! subscription metadata. All cross-request coordination goes through this
//! layer; per-document writes are atomic and TTL expiry belongs to the
//! backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod memory;
mod mongo;

pub use memory::MemoryStorage;
pub use mongo::MongoStorage;

/// Dedup markers expire after 30 days.
pub const PROCESSED_MARKER_TTL_SECS: u64 = 30 * 24 * 60 * 60;
/// Email views expire after 24 hours.
pub const EMAIL_VIEW_TTL_SECS: u64 = 24 * 60 * 60;
/// Reply sessions expire after 2 hours of inactivity.
pub const REPLY_SESSION_TTL_SECS: u64 = 2 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("mongodb error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("bson encoding error: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),
}

/// Stored snapshot of a rendered mail notification. Outlives the chat
/// message edit cycle, but not a day.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailView {
    pub id: String,
    pub summary_text: String,
    pub full_text: String,
    pub sender_name: String,
    pub source_message_id: String,
    pub created_at: DateTime<Utc>,
}

/// Where a chat currently is in the reply-composition flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    AwaitingReply,
    AwaitingEditFeedback,
    AwaitingSendEdit,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::AwaitingReply => write!(f, "awaiting_reply"),
            SessionMode::AwaitingEditFeedback => write!(f, "awaiting_edit_feedback"),
            SessionMode::AwaitingSendEdit => write!(f, "awaiting_send_edit"),
        }
    }
}

/// Per-chat reply-composition state. At most one per chat; re-starting a
/// reply overwrites it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplySession {
    pub chat_id: i64,
    pub view_id: String,
    pub mode: SessionMode,
    pub draft: String,
    pub anchor_message_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

/// Mailbox change-subscription metadata, renewed before expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRecord {
    pub subscription_id: String,
    pub resource: Option<String>,
    pub expiration: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a `/start` registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    AlreadyRegistered,
    CapacityReached,
}

/// Durable document store behind the bot. The sole synchronization
/// primitive: every implementation must make `mark_processed` an atomic
/// check-and-insert.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Record that a mail-change resource id has been handled. Returns
    /// `true` when this call created the marker (the event is new) and
    /// `false` when a marker already existed.
    async fn mark_processed(&self, resource_id: &str) -> Result<bool, StoreError>;

    async fn insert_view(&self, view: &EmailView) -> Result<(), StoreError>;

    /// Look up a view by id. Expired or malformed records read as `None`.
    async fn view(&self, view_id: &str) -> Result<Option<EmailView>, StoreError>;

    /// Create or replace the session for a chat (last writer wins).
    async fn upsert_session(&self, session: &ReplySession) -> Result<(), StoreError>;

    /// Look up a chat's session. Expired or malformed records read as
    /// `None`.
    async fn session(&self, chat_id: i64) -> Result<Option<ReplySession>, StoreError>;

    async fn delete_session(&self, chat_id: i64) -> Result<(), StoreError>;

    async fn subscriber_ids(&self) -> Result<Vec<i64>, StoreError>;

    async fn register_subscriber(
        &self,
        chat_id: i64,
        capacity: usize,
    ) -> Result<RegisterOutcome, StoreError>;

    async fn save_subscription(&self, record: &SubscriptionRecord) -> Result<(), StoreError>;

    async fn load_subscription(&self) -> Result<Option<SubscriptionRecord>, StoreError>;
}

/// Connect the configured backend: MongoDB when a URI is present, otherwise
/// the in-memory store (nothing survives a restart in that mode).
pub async fn connect(
    mongodb_uri: Option<&str>,
    database: &str,
) -> Result<std::sync::Arc<dyn Storage>, StoreError> {
    match mongodb_uri.filter(|uri| !uri.trim().is_empty()) {
        Some(uri) => {
            let storage = MongoStorage::connect(uri, database).await?;
            Ok(std::sync::Arc::new(storage))
        }
        None => {
            tracing::warn!(
                "MONGODB_URI not set; running on in-memory storage, state will not survive restart"
            );
            Ok(std::sync::Arc::new(MemoryStorage::new()))
        }
    }
}
