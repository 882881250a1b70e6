//! MongoDB-backed storage.
//!
//! Collection layout matches the logical model one-to-one; TTL indexes give
//! markers, views, and sessions their expiry windows. Reads deserialize
//! through typed document structs and fail closed: a malformed document is
//! treated as not found.

use std::time::Duration;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use mongodb::bson::{doc, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, ReplaceOptions, UpdateOptions};
use mongodb::{Client, Database, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{
    EmailView, RegisterOutcome, ReplySession, SessionMode, Storage, StoreError,
    SubscriptionRecord, EMAIL_VIEW_TTL_SECS, PROCESSED_MARKER_TTL_SECS, REPLY_SESSION_TTL_SECS,
};

const PROCESSED_COLLECTION: &str = "processed_mail_ids";
const VIEWS_COLLECTION: &str = "email_notification_views";
const SESSIONS_COLLECTION: &str = "reply_sessions";
const SUBSCRIBERS_COLLECTION: &str = "telegram_subscribers";
const SUBSCRIPTIONS_COLLECTION: &str = "subscriptions";

const SUBSCRIBERS_DOC_ID: &str = "subscribers";
const SUBSCRIPTION_DOC_ID: &str = "mail_inbox";

#[derive(Debug, Serialize, Deserialize)]
struct ProcessedDoc {
    #[serde(rename = "_id")]
    resource_id: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    processed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ViewDoc {
    #[serde(rename = "_id")]
    id: String,
    summary_text: String,
    full_text: String,
    sender_name: String,
    source_message_id: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    created_at: DateTime<Utc>,
}

impl From<ViewDoc> for EmailView {
    fn from(doc: ViewDoc) -> Self {
        EmailView {
            id: doc.id,
            summary_text: doc.summary_text,
            full_text: doc.full_text,
            sender_name: doc.sender_name,
            source_message_id: doc.source_message_id,
            created_at: doc.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionDoc {
    #[serde(rename = "_id")]
    chat_id: i64,
    view_id: String,
    mode: SessionMode,
    draft: String,
    anchor_message_id: Option<i64>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    updated_at: DateTime<Utc>,
}

impl From<SessionDoc> for ReplySession {
    fn from(doc: SessionDoc) -> Self {
        ReplySession {
            chat_id: doc.chat_id,
            view_id: doc.view_id,
            mode: doc.mode,
            draft: doc.draft,
            anchor_message_id: doc.anchor_message_id,
            updated_at: doc.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SubscribersDoc {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    chat_ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SubscriptionDoc {
    #[serde(rename = "_id")]
    id: String,
    subscription_id: String,
    resource: Option<String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    expiration: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    updated_at: DateTime<Utc>,
}

pub struct MongoStorage {
    db: Database,
}

impl MongoStorage {
    /// Connect and make sure the TTL indexes exist. Index creation failures
    /// are logged, not fatal: the store still works, documents just do not
    /// expire until the index shows up.
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        let storage = Self {
            db: client.database(database),
        };
        if let Err(err) = storage.ensure_ttl_indexes().await {
            warn!("failed to create TTL indexes: {}", err);
        }
        Ok(storage)
    }

    async fn ensure_ttl_indexes(&self) -> Result<(), StoreError> {
        self.ttl_index(PROCESSED_COLLECTION, "processed_at", PROCESSED_MARKER_TTL_SECS)
            .await?;
        self.ttl_index(VIEWS_COLLECTION, "created_at", EMAIL_VIEW_TTL_SECS)
            .await?;
        self.ttl_index(SESSIONS_COLLECTION, "updated_at", REPLY_SESSION_TTL_SECS)
            .await?;
        Ok(())
    }

    async fn ttl_index(
        &self,
        collection: &str,
        field: &str,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let index = IndexModel::builder()
            .keys(doc! { field: 1 })
            .options(
                IndexOptions::builder()
                    .expire_after(Duration::from_secs(ttl_secs))
                    .build(),
            )
            .build();
        self.db
            .collection::<Document>(collection)
            .create_index(index, None)
            .await?;
        Ok(())
    }

    /// Fetch one document by `_id` and decode it, failing closed on shape
    /// mismatches.
    async fn find_decoded<T, I>(
        &self,
        collection: &str,
        id: I,
    ) -> Result<Option<T>, StoreError>
    where
        T: serde::de::DeserializeOwned,
        I: Into<mongodb::bson::Bson>,
    {
        let raw = self
            .db
            .collection::<Document>(collection)
            .find_one(doc! { "_id": id.into() }, None)
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match mongodb::bson::from_document::<T>(raw) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(err) => {
                warn!("discarding malformed {} document: {}", collection, err);
                Ok(None)
            }
        }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_err)) => write_err.code == 11000,
        _ => false,
    }
}

#[async_trait::async_trait]
impl Storage for MongoStorage {
    async fn mark_processed(&self, resource_id: &str) -> Result<bool, StoreError> {
        let marker = ProcessedDoc {
            resource_id: resource_id.to_string(),
            processed_at: Utc::now(),
        };
        match self
            .db
            .collection::<ProcessedDoc>(PROCESSED_COLLECTION)
            .insert_one(&marker, None)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn insert_view(&self, view: &EmailView) -> Result<(), StoreError> {
        let doc = ViewDoc {
            id: view.id.clone(),
            summary_text: view.summary_text.clone(),
            full_text: view.full_text.clone(),
            sender_name: view.sender_name.clone(),
            source_message_id: view.source_message_id.clone(),
            created_at: view.created_at,
        };
        self.db
            .collection::<ViewDoc>(VIEWS_COLLECTION)
            .insert_one(&doc, None)
            .await?;
        Ok(())
    }

    async fn view(&self, view_id: &str) -> Result<Option<EmailView>, StoreError> {
        let doc: Option<ViewDoc> = self.find_decoded(VIEWS_COLLECTION, view_id).await?;
        Ok(doc.map(EmailView::from))
    }

    async fn upsert_session(&self, session: &ReplySession) -> Result<(), StoreError> {
        let doc = SessionDoc {
            chat_id: session.chat_id,
            view_id: session.view_id.clone(),
            mode: session.mode,
            draft: session.draft.clone(),
            anchor_message_id: session.anchor_message_id,
            updated_at: session.updated_at,
        };
        self.db
            .collection::<SessionDoc>(SESSIONS_COLLECTION)
            .replace_one(
                doc! { "_id": session.chat_id },
                &doc,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(())
    }

    async fn session(&self, chat_id: i64) -> Result<Option<ReplySession>, StoreError> {
        let doc: Option<SessionDoc> = self.find_decoded(SESSIONS_COLLECTION, chat_id).await?;
        Ok(doc.map(ReplySession::from))
    }

    async fn delete_session(&self, chat_id: i64) -> Result<(), StoreError> {
        self.db
            .collection::<SessionDoc>(SESSIONS_COLLECTION)
            .delete_one(doc! { "_id": chat_id }, None)
            .await?;
        Ok(())
    }

    async fn subscriber_ids(&self) -> Result<Vec<i64>, StoreError> {
        let doc: Option<SubscribersDoc> = self
            .find_decoded(SUBSCRIBERS_COLLECTION, SUBSCRIBERS_DOC_ID)
            .await?;
        Ok(doc.map(|d| d.chat_ids).unwrap_or_default())
    }

    async fn register_subscriber(
        &self,
        chat_id: i64,
        capacity: usize,
    ) -> Result<RegisterOutcome, StoreError> {
        let current = self.subscriber_ids().await?;
        if current.contains(&chat_id) {
            return Ok(RegisterOutcome::AlreadyRegistered);
        }
        if current.len() >= capacity {
            return Ok(RegisterOutcome::CapacityReached);
        }
        self.db
            .collection::<Document>(SUBSCRIBERS_COLLECTION)
            .update_one(
                doc! { "_id": SUBSCRIBERS_DOC_ID },
                doc! { "$addToSet": { "chat_ids": chat_id } },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(RegisterOutcome::Registered)
    }

    async fn save_subscription(&self, record: &SubscriptionRecord) -> Result<(), StoreError> {
        let doc = SubscriptionDoc {
            id: SUBSCRIPTION_DOC_ID.to_string(),
            subscription_id: record.subscription_id.clone(),
            resource: record.resource.clone(),
            expiration: record.expiration,
            updated_at: record.updated_at,
        };
        self.db
            .collection::<SubscriptionDoc>(SUBSCRIPTIONS_COLLECTION)
            .replace_one(
                doc! { "_id": SUBSCRIPTION_DOC_ID },
                &doc,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(())
    }

    async fn load_subscription(&self) -> Result<Option<SubscriptionRecord>, StoreError> {
        let doc: Option<SubscriptionDoc> = self
            .find_decoded(SUBSCRIPTIONS_COLLECTION, SUBSCRIPTION_DOC_ID)
            .await?;
        Ok(doc.map(|d| SubscriptionRecord {
            subscription_id: d.subscription_id,
            resource: d.resource,
            expiration: d.expiration,
            updated_at: d.updated_at,
        }))
    }
}
