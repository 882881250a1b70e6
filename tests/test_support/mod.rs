#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use mailbridge::graph::{GraphClient, StaticTokenProvider, TokenProvider};
use mailbridge::llm::LlmClient;
use mailbridge::service::{AppState, MailChangeNotification, ServiceConfig};
use mailbridge::storage::{EmailView, MemoryStorage};
use mailbridge::telegram::{TelegramClient, TelegramUpdate};

pub const BOT_TOKEN: &str = "TESTTOKEN";

/// Build an [`AppState`] whose collaborators all point at one mockito
/// server, backed by in-memory storage.
pub fn test_state(server_url: &str, llm_enabled: bool) -> (AppState, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let config = Arc::new(ServiceConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        base_url: None,
        client_state: "test-client-state".to_string(),
        graph_base_url: server_url.to_string(),
        graph_token_var: "UNUSED_IN_TESTS".to_string(),
        telegram_bot_token: Some(BOT_TOKEN.to_string()),
        telegram_api_base: server_url.to_string(),
        openai_api_key: llm_enabled.then(|| "sk-test".to_string()),
        openai_base_url: server_url.to_string(),
        openai_model: "test-model".to_string(),
        mongodb_uri: None,
        mongodb_database: "mailbridge_test".to_string(),
        max_subscribers: 2,
        sign_off_closing: "Best regards,".to_string(),
        sign_off_organization: "The Team".to_string(),
        subscription_renew_interval: Duration::from_secs(3600),
        subscription_lifetime_minutes: 4230,
    });

    let tokens: Arc<dyn TokenProvider> = Arc::new(StaticTokenProvider("test-token".to_string()));
    let state = AppState {
        config,
        storage: storage.clone(),
        graph: Arc::new(GraphClient::new(server_url, tokens)),
        telegram: Arc::new(TelegramClient::new(Some(BOT_TOKEN.to_string()), server_url)),
        llm: Arc::new(LlmClient::new(
            llm_enabled.then(|| "sk-test".to_string()),
            server_url,
            "test-model",
        )),
    };
    (state, storage)
}

pub fn mail_event(ids: &[&str]) -> MailChangeNotification {
    let value: Vec<_> = ids
        .iter()
        .map(|id| json!({"resourceData": {"id": id}}))
        .collect();
    serde_json::from_value(json!({ "value": value })).expect("notification payload")
}

pub fn text_update(chat_id: i64, text: &str) -> TelegramUpdate {
    serde_json::from_value(json!({
        "update_id": 1,
        "message": {
            "message_id": 10,
            "chat": {"id": chat_id, "type": "private"},
            "date": 1700000000,
            "text": text
        }
    }))
    .expect("text update payload")
}

pub fn callback_update(chat_id: i64, message_id: i64, data: &str) -> TelegramUpdate {
    serde_json::from_value(json!({
        "update_id": 2,
        "callback_query": {
            "id": "cb-test",
            "data": data,
            "message": {
                "message_id": message_id,
                "chat": {"id": chat_id, "type": "private"},
                "date": 1700000000
            }
        }
    }))
    .expect("callback update payload")
}

pub fn seed_view(id: &str, sender: &str, source_message_id: &str) -> EmailView {
    EmailView {
        id: id.to_string(),
        summary_text: format!("<b>A new email was sent from {}.</b>", sender),
        full_text: format!("<b>Full email from {}</b>", sender),
        sender_name: sender.to_string(),
        source_message_id: source_message_id.to_string(),
        created_at: Utc::now(),
    }
}

/// Loose Telegram API mocks shared by flows that edit messages and answer
/// callbacks without the test asserting on them.
pub struct TelegramMocks {
    pub answer_callback: mockito::Mock,
    pub edit_message: mockito::Mock,
}

pub async fn mock_telegram_plumbing(server: &mut mockito::ServerGuard) -> TelegramMocks {
    let answer_callback = server
        .mock("POST", format!("/bot{}/answerCallbackQuery", BOT_TOKEN).as_str())
        .with_status(200)
        .with_body(r#"{"ok": true, "result": true}"#)
        .expect_at_least(0)
        .create_async()
        .await;
    let edit_message = server
        .mock("POST", format!("/bot{}/editMessageText", BOT_TOKEN).as_str())
        .with_status(200)
        .with_body(r#"{"ok": true, "result": true}"#)
        .expect_at_least(0)
        .create_async()
        .await;
    TelegramMocks {
        answer_callback,
        edit_message,
    }
}
