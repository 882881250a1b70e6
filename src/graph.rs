//! Microsoft Graph mail client.
//!
//! A thin request/response wrapper: message fetch, thread lookup, reply
//! send, and change-subscription management. Token acquisition lives behind
//! [`TokenProvider`] so the OAuth flow stays outside this crate's core.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::normalize::escape_html;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("no mailbox access token available: {0}")]
    MissingToken(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("graph API error {status}: {body}")]
    Api { status: u16, body: String },
}

/// Source of Graph access tokens. Acquisition/refresh is a collaborator
/// concern; the client only asks for a current token per request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, GraphError>;
}

/// Reads a pre-acquired token from an environment variable on every call,
/// so an external refresher can rotate it without restarting the service.
#[derive(Debug, Clone)]
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn access_token(&self) -> Result<String, GraphError> {
        std::env::var(&self.var)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| GraphError::MissingToken(format!("{} not set", self.var)))
    }
}

/// Fixed token, used by tests and one-off tooling.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider(pub String);

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, GraphError> {
        Ok(self.0.clone())
    }
}

/// A fetched mail message, reduced to what notification dispatch needs.
#[derive(Debug, Clone)]
pub struct MailMessage {
    pub sender_name: String,
    pub content_type: BodyContentType,
    pub content: String,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyContentType {
    Html,
    Text,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    from: Option<Recipient>,
    body: Option<ItemBody>,
    #[serde(rename = "conversationId")]
    conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Recipient {
    #[serde(rename = "emailAddress")]
    email_address: Option<EmailAddress>,
}

#[derive(Debug, Deserialize)]
struct EmailAddress {
    name: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemBody {
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    value: Vec<serde_json::Value>,
}

/// Metadata of a created or renewed change subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphSubscription {
    pub id: String,
    pub resource: Option<String>,
    #[serde(rename = "expirationDateTime")]
    pub expiration_date_time: Option<String>,
}

#[derive(Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    tokens: std::sync::Arc<dyn TokenProvider>,
}

impl GraphClient {
    pub fn new(base_url: impl Into<String>, tokens: std::sync::Arc<dyn TokenProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, GraphError> {
        let token = self.tokens.access_token().await?;
        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GraphError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Fetch sender, body, and conversation id for one message.
    pub async fn fetch_message(&self, message_id: &str) -> Result<MailMessage, GraphError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/me/messages/{}", message_id),
                &[("$select", "from,body,conversationId".to_string())],
                None,
            )
            .await?;
        let message: MessageResponse = response.json().await?;

        let sender_name = message
            .from
            .and_then(|from| from.email_address)
            .and_then(|address| {
                address
                    .name
                    .filter(|name| !name.trim().is_empty())
                    .or(address.address)
            })
            .unwrap_or_else(|| "Unknown".to_string());

        let body = message.body.unwrap_or(ItemBody {
            content_type: None,
            content: None,
        });
        let content_type = match body.content_type.as_deref() {
            Some(kind) if kind.eq_ignore_ascii_case("html") => BodyContentType::Html,
            _ => BodyContentType::Text,
        };

        Ok(MailMessage {
            sender_name,
            content_type,
            content: body.content.unwrap_or_default(),
            conversation_id: message.conversation_id,
        })
    }

    /// Number of inbox messages in a conversation, capped at 2, which is
    /// enough to decide thread membership.
    pub async fn thread_size(&self, conversation_id: &str) -> Result<usize, GraphError> {
        let escaped = conversation_id.replace('\'', "''");
        let response = self
            .request(
                reqwest::Method::GET,
                "/me/mailFolders/Inbox/messages",
                &[
                    ("$filter", format!("conversationId eq '{}'", escaped)),
                    ("$top", "2".to_string()),
                    ("$select", "id".to_string()),
                ],
                None,
            )
            .await?;
        let list: MessageList = response.json().await?;
        Ok(list.value.len())
    }

    /// Reply to a message with a plain-text draft, rendered as HTML
    /// paragraphs.
    pub async fn send_reply(&self, message_id: &str, draft: &str) -> Result<(), GraphError> {
        let body = json!({
            "message": {
                "body": {
                    "contentType": "html",
                    "content": plain_text_to_html(draft),
                }
            }
        });
        self.request(
            reqwest::Method::POST,
            &format!("/me/messages/{}/reply", message_id),
            &[],
            Some(body),
        )
        .await?;
        Ok(())
    }

    /// Create an inbox change subscription pointing at `notification_url`.
    pub async fn create_subscription(
        &self,
        notification_url: &str,
        client_state: &str,
        expiration: DateTime<Utc>,
    ) -> Result<GraphSubscription, GraphError> {
        let body = json!({
            "changeType": "created",
            "notificationUrl": notification_url,
            "resource": "me/mailFolders('Inbox')/messages",
            "expirationDateTime": expiration.to_rfc3339_opts(SecondsFormat::Millis, true),
            "clientState": client_state,
        });
        let response = self
            .request(reqwest::Method::POST, "/subscriptions", &[], Some(body))
            .await?;
        Ok(response.json().await?)
    }

    /// Push a subscription's expiration out.
    pub async fn renew_subscription(
        &self,
        subscription_id: &str,
        expiration: DateTime<Utc>,
    ) -> Result<(), GraphError> {
        let body = json!({
            "expirationDateTime": expiration.to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        self.request(
            reqwest::Method::PATCH,
            &format!("/subscriptions/{}", subscription_id),
            &[],
            Some(body),
        )
        .await?;
        Ok(())
    }
}

/// Render a plain-text draft as HTML paragraphs: blank-line-separated
/// paragraphs become `<p>`, inner newlines become `<br>`.
pub fn plain_text_to_html(plain: &str) -> String {
    let trimmed = plain.trim();
    if trimmed.is_empty() {
        return "<p></p>".to_string();
    }
    trimmed
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .map(|paragraph| format!("<p>{}</p>", escape_html(paragraph).replace('\n', "<br>")))
        .collect::<Vec<_>>()
        .join("\n")
}
