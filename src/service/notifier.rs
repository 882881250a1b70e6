//! Notification dispatch: mail-change events in, chat notifications out.
//!
//! Each webhook delivery is deduplicated against the processed-marker
//! collection, then every new message is fetched, summarized, stored as an
//! [`EmailView`] and pushed to all subscribers. Failures are contained per
//! message; the provider's redelivery is the only retry mechanism.

use std::collections::HashSet;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::graph::BodyContentType;
use crate::normalize::{escape_html, format_full_body, normalize_body, strip_html_tags, truncate_with_marker};
use crate::storage::EmailView;
use crate::summary::summary_block;
use crate::telegram::MESSAGE_MAX_LENGTH;

use super::reply_flow::summary_keyboard;
use super::state::AppState;
use super::BoxError;

const TRUNCATION_MARKER: &str = "... (truncated)";

/// Graph change-notification payload: a batch of resource ids, possibly
/// with duplicates.
#[derive(Debug, Clone, Deserialize)]
pub struct MailChangeNotification {
    #[serde(default)]
    pub value: Vec<ChangeEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "resourceData")]
    pub resource_data: Option<ResourceData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceData {
    pub id: Option<String>,
}

impl MailChangeNotification {
    /// Distinct resource ids in delivery order.
    fn distinct_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.value
            .iter()
            .filter_map(|event| event.resource_data.as_ref())
            .filter_map(|data| data.id.as_deref())
            .filter(|id| !id.is_empty())
            .filter(|id| seen.insert(id.to_string()))
            .map(str::to_string)
            .collect()
    }
}

/// Process one webhook delivery. Events run sequentially in delivery order;
/// a failing event is logged and skipped so the rest of the batch still
/// goes out.
pub async fn process_mail_notification(state: &AppState, notification: MailChangeNotification) {
    let ids = notification.distinct_ids();
    if ids.is_empty() {
        return;
    }
    info!(
        "mail webhook: {} events, {} distinct ids",
        notification.value.len(),
        ids.len()
    );

    for message_id in ids {
        match state.storage.mark_processed(&message_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("message {} already processed, skipping", message_id);
                continue;
            }
            Err(err) => {
                error!("dedup marker write failed for {}: {}", message_id, err);
                continue;
            }
        }

        if let Err(err) = dispatch_message(state, &message_id).await {
            error!("notification dispatch failed for {}: {}", message_id, err);
        }
    }
}

async fn dispatch_message(state: &AppState, message_id: &str) -> Result<(), BoxError> {
    let message = state.graph.fetch_message(message_id).await?;

    let in_thread = match message.conversation_id.as_deref() {
        Some(conversation_id) if !conversation_id.is_empty() => {
            match state.graph.thread_size(conversation_id).await {
                Ok(count) => count >= 2,
                Err(err) => {
                    warn!("thread check failed for {}: {}", message_id, err);
                    false
                }
            }
        }
        _ => false,
    };

    let text = match message.content_type {
        BodyContentType::Html => strip_html_tags(&message.content),
        BodyContentType::Text => message.content.clone(),
    };
    let normalized = normalize_body(&text);

    let header = if in_thread {
        format!("A new email was sent from {} (thread).", message.sender_name)
    } else {
        format!("A new email was sent from {}.", message.sender_name)
    };

    let block = summary_block(&state.llm, &normalized).await;
    let summary_text = format!(
        "<b>{}</b>\n\n<b>\u{1F4E7} Email Summary:</b>\n\n{}",
        escape_html(&header),
        escape_html(&block)
    );
    let full_text = render_full_view(&header, &format_full_body(&text));

    let view = EmailView {
        id: Uuid::new_v4().to_string(),
        summary_text,
        full_text,
        sender_name: message.sender_name.clone(),
        source_message_id: message_id.to_string(),
        created_at: Utc::now(),
    };

    // The button is only attached when the view it targets was stored.
    let keyboard = match state.storage.insert_view(&view).await {
        Ok(()) => Some(summary_keyboard(&view.id)),
        Err(err) => {
            warn!("failed to store email view for {}: {}", message_id, err);
            None
        }
    };

    let chat_ids = match state.storage.subscriber_ids().await {
        Ok(ids) => ids,
        Err(err) => {
            warn!("failed to load subscribers: {}", err);
            Vec::new()
        }
    };
    if chat_ids.is_empty() {
        debug!("no subscribers registered, dropping notification for {}", message_id);
        return Ok(());
    }

    for chat_id in chat_ids {
        if let Err(err) = state
            .telegram
            .send_message(chat_id, &view.summary_text, keyboard.as_ref())
            .await
        {
            error!("failed to notify chat {}: {}", chat_id, err);
        }
    }
    Ok(())
}

/// Full-email display: bold header plus the paragraph-preserving body,
/// truncated to the chat platform's message limit.
fn render_full_view(header: &str, full_body: &str) -> String {
    let prefix = format!("<b>{}</b>\n\n<b>Full email:</b>\n\n", escape_html(header));
    let body = escape_html(full_body);
    let body_limit = MESSAGE_MAX_LENGTH.saturating_sub(prefix.len());
    format!("{}{}", prefix, truncate_with_marker(&body, body_limit, TRUNCATION_MARKER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_ids_preserve_delivery_order() {
        let notification: MailChangeNotification = serde_json::from_str(
            r#"{"value": [
                {"resourceData": {"id": "B"}},
                {"resourceData": {"id": "A"}},
                {"resourceData": {"id": "B"}},
                {"resourceData": {}},
                {}
            ]}"#,
        )
        .expect("parse");
        assert_eq!(notification.distinct_ids(), vec!["B", "A"]);
    }

    #[test]
    fn empty_payload_yields_no_ids() {
        let notification: MailChangeNotification =
            serde_json::from_str(r#"{}"#).expect("parse");
        assert!(notification.distinct_ids().is_empty());
    }

    #[test]
    fn full_view_is_truncated_to_message_limit() {
        let body = "x".repeat(MESSAGE_MAX_LENGTH * 2);
        let rendered = render_full_view("A new email was sent from Jane.", &body);
        assert!(rendered.len() <= MESSAGE_MAX_LENGTH);
        assert!(rendered.contains(TRUNCATION_MARKER));
        assert!(rendered.starts_with("<b>A new email was sent from Jane.</b>"));
    }

    #[test]
    fn short_full_view_is_untouched() {
        let rendered = render_full_view("A new email was sent from Jane.", "Hi there");
        assert!(rendered.ends_with("Hi there"));
        assert!(!rendered.contains(TRUNCATION_MARKER));
    }
}
