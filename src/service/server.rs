use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::graph::{EnvTokenProvider, GraphClient, TokenProvider};
use crate::llm::LlmClient;
use crate::storage;
use crate::telegram::{TelegramClient, TelegramUpdate};

use super::config::ServiceConfig;
use super::notifier::{self, MailChangeNotification};
use super::reply_flow;
use super::state::AppState;
use super::subscription;
use super::BoxError;

pub async fn run_server(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let config = Arc::new(config);

    let storage = storage::connect(config.mongodb_uri.as_deref(), &config.mongodb_database).await?;
    let tokens: Arc<dyn TokenProvider> =
        Arc::new(EnvTokenProvider::new(config.graph_token_var.clone()));
    let graph = Arc::new(GraphClient::new(config.graph_base_url.clone(), tokens));
    let telegram = Arc::new(TelegramClient::new(
        config.telegram_bot_token.clone(),
        config.telegram_api_base.clone(),
    ));
    if !telegram.is_enabled() {
        warn!("TELEGRAM_BOT_TOKEN not set; chat delivery is disabled");
    }
    let llm = Arc::new(LlmClient::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
        config.openai_model.clone(),
    ));
    if !llm.is_enabled() {
        info!("OPENAI_API_KEY not set; summaries use the deterministic fallback");
    }

    let state = AppState {
        config: config.clone(),
        storage,
        graph,
        telegram,
        llm,
    };

    subscription::startup_check(&state).await;
    let renewal = config
        .base_url
        .is_some()
        .then(|| subscription::spawn_renewal_loop(state.clone()));

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    info!("mailbridge listening on {}", addr);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/webhook/mail", post(mail_webhook))
        .route("/api/webhook/telegram", post(telegram_webhook))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    if let Some(renewal) = renewal {
        renewal.abort();
    }
    serve_result?;
    Ok(())
}

async fn root() -> impl IntoResponse {
    (StatusCode::OK, "mailbridge is running")
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Mail change webhook. Graph expects the validation token echoed back as
/// plain text during the subscription handshake, and a fast acknowledgment
/// for real deliveries; slow responses are treated as failures and
/// redelivered, so processing happens in a detached task.
async fn mail_webhook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> axum::response::Response {
    if let Some(token) = params.get("validationToken") {
        return (StatusCode::OK, token.clone()).into_response();
    }

    let notification: MailChangeNotification = match serde_json::from_slice(&body) {
        Ok(notification) => notification,
        Err(err) => {
            debug!("ignoring malformed mail notification: {}", err);
            return (StatusCode::BAD_REQUEST, Json(json!({"status": "bad_json"}))).into_response();
        }
    };

    let task_state = state.clone();
    tokio::spawn(async move {
        notifier::process_mail_notification(&task_state, notification).await;
    });

    (StatusCode::ACCEPTED, Json(json!({"status": "accepted"}))).into_response()
}

/// Telegram update webhook. Always acknowledged immediately; unparseable
/// updates are ignored rather than erroring so Telegram does not redeliver
/// them forever.
async fn telegram_webhook(State(state): State<AppState>, body: Bytes) -> axum::response::Response {
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(err) => {
            debug!("ignoring malformed telegram update: {}", err);
            return (StatusCode::OK, Json(json!({"status": "ignored"}))).into_response();
        }
    };

    let task_state = state.clone();
    tokio::spawn(async move {
        reply_flow::process_chat_update(&task_state, update).await;
    });

    (StatusCode::OK, Json(json!({"status": "accepted"}))).into_response()
}
