//! Telegram Bot API client and webhook payload types.
//!
//! Outbound calls go through [`TelegramClient`]; inbound webhook bodies
//! deserialize into [`TelegramUpdate`]. Only the fields this service reads
//! are modeled; unknown fields are ignored on deserialization.

use serde::{Deserialize, Serialize};

/// Telegram rejects messages longer than this many characters.
pub const MESSAGE_MAX_LENGTH: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("telegram bot token is not configured")]
    Disabled,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram API error: {0}")]
    Api(String),
}

/// Webhook update from Telegram: either a plain message or a button press.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: TelegramChat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

/// Inline-keyboard button press.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub data: Option<String>,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineKeyboardMarkup {
    /// One button per row, in order.
    pub fn rows(buttons: Vec<InlineKeyboardButton>) -> Self {
        Self {
            inline_keyboard: buttons.into_iter().map(|button| vec![button]).collect(),
        }
    }
}

impl InlineKeyboardButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct EditMessageTextRequest<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct AnswerCallbackQueryRequest<'a> {
    callback_query_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// Client for the Telegram Bot API.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    bot_token: Option<String>,
    base_url: String,
}

impl TelegramClient {
    pub fn new(bot_token: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token: bot_token.filter(|token| !token.trim().is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bot_token.is_some()
    }

    fn api_url(&self, method: &str) -> Result<String, TelegramError> {
        let token = self.bot_token.as_deref().ok_or(TelegramError::Disabled)?;
        Ok(format!("{}/bot{}/{}", self.base_url, token, method))
    }

    async fn call<T, B>(&self, method: &str, body: &B) -> Result<T, TelegramError>
    where
        T: serde::de::DeserializeOwned,
        B: Serialize,
    {
        let url = self.api_url(method)?;
        let response = self.http.post(&url).json(body).send().await?;
        let api_response: ApiResponse<T> = response.json().await?;
        if !api_response.ok {
            return Err(TelegramError::Api(
                api_response
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        api_response
            .result
            .ok_or_else(|| TelegramError::Api("missing result".to_string()))
    }

    /// Send an HTML-formatted message, returning the new message id.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<i64, TelegramError> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: Some("HTML"),
            reply_markup,
        };
        let sent: SentMessage = self.call("sendMessage", &request).await?;
        Ok(sent.message_id)
    }

    /// Rewrite an existing message in place.
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        let request = EditMessageTextRequest {
            chat_id,
            message_id,
            text,
            parse_mode: Some("HTML"),
            reply_markup,
        };
        let _: serde_json::Value = self.call("editMessageText", &request).await?;
        Ok(())
    }

    /// Acknowledge a button press so the client stops showing a spinner.
    pub async fn answer_callback_query(&self, callback_query_id: &str) -> Result<(), TelegramError> {
        let request = AnswerCallbackQueryRequest { callback_query_id };
        let _: serde_json::Value = self.call("answerCallbackQuery", &request).await?;
        Ok(())
    }
}
