//! End-to-end notification dispatch against mocked Graph and Telegram APIs.

mod test_support;

use mockito::Matcher;
use serde_json::json;

use mailbridge::service::process_mail_notification;
use mailbridge::storage::Storage;
use test_support::{mail_event, test_state, BOT_TOKEN};

fn graph_message_body() -> String {
    json!({
        "from": {"emailAddress": {"name": "Jane", "address": "jane@example.com"}},
        "body": {
            "contentType": "text",
            "content": "Hi,\n\nCan we meet Friday?\n\nBest,\nJane"
        },
        "conversationId": "C1"
    })
    .to_string()
}

#[tokio::test]
async fn notification_renders_header_and_summary_with_generation_disabled() {
    let mut server = mockito::Server::new_async().await;
    let (state, storage) = test_state(&server.url(), false);
    storage.register_subscriber(101, 2).await.expect("register");

    let _fetch = server
        .mock("GET", "/me/messages/M1")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(graph_message_body())
        .create_async()
        .await;
    let _thread = server
        .mock("GET", "/me/mailFolders/Inbox/messages")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"value": [{"id": "M1"}]}).to_string())
        .create_async()
        .await;

    let expected_text = "<b>A new email was sent from Jane.</b>\n\n\
                         <b>\u{1F4E7} Email Summary:</b>\n\n\
                         Hi,\n\nCan we meet Friday?";
    let send = server
        .mock("POST", format!("/bot{}/sendMessage", BOT_TOKEN).as_str())
        .match_body(Matcher::PartialJson(json!({
            "chat_id": 101,
            "text": expected_text,
        })))
        .with_status(200)
        .with_body(json!({"ok": true, "result": {"message_id": 42}}).to_string())
        .expect(1)
        .create_async()
        .await;

    process_mail_notification(&state, mail_event(&["M1"])).await;

    send.assert_async().await;
}

#[tokio::test]
async fn duplicate_resource_ids_dispatch_exactly_once() {
    let mut server = mockito::Server::new_async().await;
    let (state, storage) = test_state(&server.url(), false);
    storage.register_subscriber(101, 2).await.expect("register");

    let _fetch = server
        .mock("GET", "/me/messages/M1")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(graph_message_body())
        .create_async()
        .await;
    let _thread = server
        .mock("GET", "/me/mailFolders/Inbox/messages")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"value": [{"id": "M1"}]}).to_string())
        .create_async()
        .await;
    let send = server
        .mock("POST", format!("/bot{}/sendMessage", BOT_TOKEN).as_str())
        .with_status(200)
        .with_body(json!({"ok": true, "result": {"message_id": 42}}).to_string())
        .expect(1)
        .create_async()
        .await;

    // Duplicates inside one delivery and a full redelivery afterwards.
    process_mail_notification(&state, mail_event(&["M1", "M1"])).await;
    process_mail_notification(&state, mail_event(&["M1"])).await;

    send.assert_async().await;
}

#[tokio::test]
async fn fetch_failure_skips_item_and_continues_batch() {
    let mut server = mockito::Server::new_async().await;
    let (state, storage) = test_state(&server.url(), false);
    storage.register_subscriber(101, 2).await.expect("register");

    let _broken = server
        .mock("GET", "/me/messages/BROKEN")
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body("upstream exploded")
        .create_async()
        .await;
    let _fetch = server
        .mock("GET", "/me/messages/M2")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(graph_message_body())
        .create_async()
        .await;
    let _thread = server
        .mock("GET", "/me/mailFolders/Inbox/messages")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"value": [{"id": "M2"}]}).to_string())
        .create_async()
        .await;
    let send = server
        .mock("POST", format!("/bot{}/sendMessage", BOT_TOKEN).as_str())
        .with_status(200)
        .with_body(json!({"ok": true, "result": {"message_id": 42}}).to_string())
        .expect(1)
        .create_async()
        .await;

    process_mail_notification(&state, mail_event(&["BROKEN", "M2"])).await;

    send.assert_async().await;
}

#[tokio::test]
async fn thread_membership_is_reflected_in_the_header() {
    let mut server = mockito::Server::new_async().await;
    let (state, storage) = test_state(&server.url(), false);
    storage.register_subscriber(101, 2).await.expect("register");

    let _fetch = server
        .mock("GET", "/me/messages/M3")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(graph_message_body())
        .create_async()
        .await;
    let _thread = server
        .mock("GET", "/me/mailFolders/Inbox/messages")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"value": [{"id": "M3"}, {"id": "M0"}]}).to_string())
        .create_async()
        .await;
    let send = server
        .mock("POST", format!("/bot{}/sendMessage", BOT_TOKEN).as_str())
        .match_body(Matcher::Regex(
            "A new email was sent from Jane\\. \\(thread\\)".to_string(),
        ))
        .with_status(200)
        .with_body(json!({"ok": true, "result": {"message_id": 42}}).to_string())
        .expect(1)
        .create_async()
        .await;

    process_mail_notification(&state, mail_event(&["M3"])).await;

    send.assert_async().await;
}

#[tokio::test]
async fn no_subscribers_means_no_chat_calls() {
    let mut server = mockito::Server::new_async().await;
    let (state, _storage) = test_state(&server.url(), false);

    let _fetch = server
        .mock("GET", "/me/messages/M4")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(graph_message_body())
        .create_async()
        .await;
    let _thread = server
        .mock("GET", "/me/mailFolders/Inbox/messages")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"value": [{"id": "M4"}]}).to_string())
        .create_async()
        .await;
    let send = server
        .mock("POST", format!("/bot{}/sendMessage", BOT_TOKEN).as_str())
        .expect(0)
        .create_async()
        .await;

    process_mail_notification(&state, mail_event(&["M4"])).await;

    send.assert_async().await;
}
