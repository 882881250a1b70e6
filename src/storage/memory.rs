//! In-memory storage.
//!
//! Used when no MongoDB URI is configured (nothing survives a restart) and
//! by tests. TTL windows are enforced lazily: expired records are dropped
//! the next time they are read.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use super::{
    EmailView, RegisterOutcome, ReplySession, Storage, StoreError, SubscriptionRecord,
    EMAIL_VIEW_TTL_SECS, PROCESSED_MARKER_TTL_SECS, REPLY_SESSION_TTL_SECS,
};

#[derive(Default)]
struct Inner {
    processed: HashMap<String, DateTime<Utc>>,
    views: HashMap<String, EmailView>,
    sessions: HashMap<i64, ReplySession>,
    subscribers: Vec<i64>,
    subscription: Option<SubscriptionRecord>,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn expired(stamp: DateTime<Utc>, ttl_secs: u64) -> bool {
    Utc::now() - stamp > Duration::seconds(ttl_secs as i64)
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn mark_processed(&self, resource_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("memory storage lock");
        match inner.processed.get(resource_id) {
            Some(stamp) if !expired(*stamp, PROCESSED_MARKER_TTL_SECS) => Ok(false),
            _ => {
                inner.processed.insert(resource_id.to_string(), Utc::now());
                Ok(true)
            }
        }
    }

    async fn insert_view(&self, view: &EmailView) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory storage lock");
        inner.views.insert(view.id.clone(), view.clone());
        Ok(())
    }

    async fn view(&self, view_id: &str) -> Result<Option<EmailView>, StoreError> {
        let mut inner = self.inner.lock().expect("memory storage lock");
        match inner.views.get(view_id) {
            Some(view) if !expired(view.created_at, EMAIL_VIEW_TTL_SECS) => Ok(Some(view.clone())),
            Some(_) => {
                inner.views.remove(view_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn upsert_session(&self, session: &ReplySession) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory storage lock");
        inner.sessions.insert(session.chat_id, session.clone());
        Ok(())
    }

    async fn session(&self, chat_id: i64) -> Result<Option<ReplySession>, StoreError> {
        let mut inner = self.inner.lock().expect("memory storage lock");
        match inner.sessions.get(&chat_id) {
            Some(session) if !expired(session.updated_at, REPLY_SESSION_TTL_SECS) => {
                Ok(Some(session.clone()))
            }
            Some(_) => {
                inner.sessions.remove(&chat_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete_session(&self, chat_id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory storage lock");
        inner.sessions.remove(&chat_id);
        Ok(())
    }

    async fn subscriber_ids(&self) -> Result<Vec<i64>, StoreError> {
        let inner = self.inner.lock().expect("memory storage lock");
        Ok(inner.subscribers.clone())
    }

    async fn register_subscriber(
        &self,
        chat_id: i64,
        capacity: usize,
    ) -> Result<RegisterOutcome, StoreError> {
        let mut inner = self.inner.lock().expect("memory storage lock");
        if inner.subscribers.contains(&chat_id) {
            return Ok(RegisterOutcome::AlreadyRegistered);
        }
        if inner.subscribers.len() >= capacity {
            return Ok(RegisterOutcome::CapacityReached);
        }
        inner.subscribers.push(chat_id);
        Ok(RegisterOutcome::Registered)
    }

    async fn save_subscription(&self, record: &SubscriptionRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory storage lock");
        inner.subscription = Some(record.clone());
        Ok(())
    }

    async fn load_subscription(&self) -> Result<Option<SubscriptionRecord>, StoreError> {
        let inner = self.inner.lock().expect("memory storage lock");
        Ok(inner.subscription.clone())
    }
}
