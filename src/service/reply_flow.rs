//! Chat update routing and the reply session state machine.
//!
//! Inbound Telegram updates land here: `/start` and `/check` registration
//! commands, free-text messages feeding an active session, and inline
//! button presses. Button payloads are decoded into a closed command set up
//! front and dispatched by exhaustive match.
//!
//! Session modes and their transitions:
//! - (idle) --reply_start--> awaiting_reply
//! - awaiting_reply --text--> awaiting_send_edit, --reply_back--> (idle)
//! - awaiting_send_edit --reply_send--> (idle), --reply_edit--> awaiting_edit_feedback
//! - awaiting_edit_feedback --text--> awaiting_send_edit, --reply_cancel_edit--> awaiting_send_edit
//!
//! Every view-referencing transition re-checks that the view still exists;
//! a session pointing at an expired view is discarded on touch.

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::normalize::escape_html;
use crate::storage::{EmailView, RegisterOutcome, ReplySession, SessionMode};
use crate::summary;
use crate::telegram::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, TelegramUpdate};

use super::state::AppState;
use super::BoxError;

const EXPIRED_VIEW_NOTICE: &str =
    "This email notification has expired. Start again from a newer notification.";
const DRAFT_FAILED_NOTICE: &str =
    "I couldn't draft that reply. Please send your message again.";
const EDIT_FAILED_NOTICE: &str =
    "I couldn't apply that change. Please describe it again.";
const SEND_FAILED_NOTICE: &str =
    "Sending the reply failed. The draft is unchanged; press Send to retry.";
const NO_SESSION_NOTICE: &str =
    "No reply in progress. Press REPLY under an email notification to start one.";

/// Decoded inline-button payload: `<command>:<view id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    pub command: CallbackCommand,
    pub view_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackCommand {
    ViewFull,
    ViewSummary,
    ReplyStart,
    ReplyBack,
    ReplySend,
    ReplyEdit,
    ReplyCancelEdit,
}

impl Callback {
    pub fn parse(data: &str) -> Option<Self> {
        let (kind, view_id) = data.split_once(':')?;
        if view_id.is_empty() {
            return None;
        }
        let command = match kind {
            "view_full" => CallbackCommand::ViewFull,
            "view_summary" => CallbackCommand::ViewSummary,
            "reply_start" => CallbackCommand::ReplyStart,
            "reply_back" => CallbackCommand::ReplyBack,
            "reply_send" => CallbackCommand::ReplySend,
            "reply_edit" => CallbackCommand::ReplyEdit,
            "reply_cancel_edit" => CallbackCommand::ReplyCancelEdit,
            _ => return None,
        };
        Some(Self {
            command,
            view_id: view_id.to_string(),
        })
    }
}

pub fn summary_keyboard(view_id: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::rows(vec![InlineKeyboardButton::new(
        "See the full email",
        format!("view_full:{}", view_id),
    )])
}

fn full_view_keyboard(view_id: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::rows(vec![
        InlineKeyboardButton::new("Back to summary", format!("view_summary:{}", view_id)),
        InlineKeyboardButton::new("REPLY", format!("reply_start:{}", view_id)),
    ])
}

fn compose_keyboard(view_id: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::rows(vec![InlineKeyboardButton::new(
        "Back",
        format!("reply_back:{}", view_id),
    )])
}

fn draft_keyboard(view_id: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::rows(vec![
        InlineKeyboardButton::new("Send", format!("reply_send:{}", view_id)),
        InlineKeyboardButton::new("Edit", format!("reply_edit:{}", view_id)),
    ])
}

fn edit_feedback_keyboard(view_id: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::rows(vec![InlineKeyboardButton::new(
        "Back",
        format!("reply_cancel_edit:{}", view_id),
    )])
}

fn present_draft(draft: &str) -> String {
    escape_html(draft)
}

/// Entry point for one Telegram webhook update.
pub async fn process_chat_update(state: &AppState, update: TelegramUpdate) {
    if let Some(callback) = update.callback_query {
        if let Err(err) = handle_callback(state, callback).await {
            error!("callback handling failed: {}", err);
        }
        return;
    }
    if let Some(message) = update.message {
        let chat_id = message.chat.id;
        if let Some(text) = message.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            if let Err(err) = handle_text(state, chat_id, text).await {
                error!("chat message handling failed for {}: {}", chat_id, err);
            }
        }
    }
}

async fn handle_text(state: &AppState, chat_id: i64, text: &str) -> Result<(), BoxError> {
    if text.starts_with('/') {
        return handle_command(state, chat_id, text).await;
    }

    let Some(session) = state.storage.session(chat_id).await? else {
        // Idle chats only speak the registration commands.
        notify(state, chat_id, NO_SESSION_NOTICE).await;
        return Ok(());
    };

    let Some(view) = state.storage.view(&session.view_id).await? else {
        state.storage.delete_session(chat_id).await?;
        notify(state, chat_id, EXPIRED_VIEW_NOTICE).await;
        return Ok(());
    };

    match session.mode {
        SessionMode::AwaitingReply => compose_draft(state, session, &view, text).await,
        SessionMode::AwaitingEditFeedback => revise_draft(state, session, &view, text).await,
        SessionMode::AwaitingSendEdit => {
            notify(
                state,
                chat_id,
                "A draft is already waiting. Use its Send or Edit buttons.",
            )
            .await;
            Ok(())
        }
    }
}

/// awaiting_reply + free text: expand the intent into a draft and move to
/// awaiting_send_edit. Generation failure keeps the session where it is.
async fn compose_draft(
    state: &AppState,
    mut session: ReplySession,
    view: &EmailView,
    intent: &str,
) -> Result<(), BoxError> {
    let chat_id = session.chat_id;
    let draft = match summary::draft_reply(&state.llm, intent, &view.sender_name, &state.sign_off())
        .await
    {
        Ok(draft) => draft,
        Err(err) => {
            warn!("reply draft generation failed for chat {}: {}", chat_id, err);
            notify(state, chat_id, DRAFT_FAILED_NOTICE).await;
            return Ok(());
        }
    };

    let message_id = state
        .telegram
        .send_message(chat_id, &present_draft(&draft), Some(&draft_keyboard(&view.id)))
        .await?;

    session.mode = SessionMode::AwaitingSendEdit;
    session.draft = draft;
    session.anchor_message_id = Some(message_id);
    session.updated_at = Utc::now();
    state.storage.upsert_session(&session).await?;
    Ok(())
}

/// awaiting_edit_feedback + free text: apply the feedback to the stored
/// draft and rewrite the anchored draft message in place.
async fn revise_draft(
    state: &AppState,
    mut session: ReplySession,
    view: &EmailView,
    feedback: &str,
) -> Result<(), BoxError> {
    let chat_id = session.chat_id;
    let revised = match summary::apply_edit(&state.llm, &session.draft, feedback, &state.sign_off())
        .await
    {
        Ok(revised) => revised,
        Err(err) => {
            warn!("draft edit generation failed for chat {}: {}", chat_id, err);
            notify(state, chat_id, EDIT_FAILED_NOTICE).await;
            return Ok(());
        }
    };

    session.mode = SessionMode::AwaitingSendEdit;
    session.draft = revised;
    session.updated_at = Utc::now();
    state.storage.upsert_session(&session).await?;

    let text = present_draft(&session.draft);
    let keyboard = draft_keyboard(&view.id);
    match session.anchor_message_id {
        Some(anchor) => {
            state
                .telegram
                .edit_message_text(chat_id, anchor, &text, Some(&keyboard))
                .await?;
        }
        None => {
            let message_id = state
                .telegram
                .send_message(chat_id, &text, Some(&keyboard))
                .await?;
            session.anchor_message_id = Some(message_id);
            state.storage.upsert_session(&session).await?;
        }
    }
    Ok(())
}

async fn handle_command(state: &AppState, chat_id: i64, text: &str) -> Result<(), BoxError> {
    let command = text.split_whitespace().next().unwrap_or("");
    let command = command.split('@').next().unwrap_or(command);
    match command {
        "/start" => {
            let outcome = state
                .storage
                .register_subscriber(chat_id, state.config.max_subscribers)
                .await?;
            let reply = match outcome {
                RegisterOutcome::Registered => {
                    info!("registered chat {} for notifications", chat_id);
                    "\u{1F44B} Mailbridge connected. New inbox mail will be summarized here.\n\n\
                     Commands:\n/start - Register this chat\n/check - Show registration status"
                        .to_string()
                }
                RegisterOutcome::AlreadyRegistered => {
                    "This chat is already registered.".to_string()
                }
                RegisterOutcome::CapacityReached => format!(
                    "Subscriber limit reached ({}); this chat was not registered.",
                    state.config.max_subscribers
                ),
            };
            notify(state, chat_id, &reply).await;
        }
        "/check" => {
            let registered = state.storage.subscriber_ids().await?.contains(&chat_id);
            let reply = if registered {
                "This chat is registered for inbox notifications."
            } else {
                "This chat is not registered. Send /start to subscribe."
            };
            notify(state, chat_id, reply).await;
        }
        _ => {
            notify(state, chat_id, "Unknown command. Available: /start, /check.").await;
        }
    }
    Ok(())
}

async fn handle_callback(state: &AppState, callback: CallbackQuery) -> Result<(), BoxError> {
    if let Err(err) = state.telegram.answer_callback_query(&callback.id).await {
        debug!("callback ack failed: {}", err);
    }

    let Some(data) = callback.data.as_deref() else {
        return Ok(());
    };
    let Some(parsed) = Callback::parse(data) else {
        debug!("ignoring unknown callback payload: {}", data);
        return Ok(());
    };
    let Some(message) = callback.message else {
        debug!("callback without originating message, ignoring");
        return Ok(());
    };
    let chat_id = message.chat.id;
    let message_id = message.message_id;

    let Some(view) = state.storage.view(&parsed.view_id).await? else {
        return expired_view(state, chat_id, message_id, &parsed.view_id).await;
    };

    match parsed.command {
        CallbackCommand::ViewFull => {
            state
                .telegram
                .edit_message_text(chat_id, message_id, &view.full_text, Some(&full_view_keyboard(&view.id)))
                .await?;
        }
        CallbackCommand::ViewSummary => {
            state
                .telegram
                .edit_message_text(chat_id, message_id, &view.summary_text, Some(&summary_keyboard(&view.id)))
                .await?;
        }
        CallbackCommand::ReplyStart => start_reply(state, chat_id, message_id, &view).await?,
        CallbackCommand::ReplyBack => {
            state.storage.delete_session(chat_id).await?;
            state
                .telegram
                .edit_message_text(chat_id, message_id, &view.summary_text, Some(&summary_keyboard(&view.id)))
                .await?;
        }
        CallbackCommand::ReplySend => send_draft(state, chat_id, message_id, &view).await?,
        CallbackCommand::ReplyEdit => begin_edit(state, chat_id, message_id, &view).await?,
        CallbackCommand::ReplyCancelEdit => cancel_edit(state, chat_id, message_id, &view).await?,
    }
    Ok(())
}

/// The view a button points at no longer exists: drop any session that was
/// anchored to it and tell the user to restart from a fresh notification.
async fn expired_view(
    state: &AppState,
    chat_id: i64,
    message_id: i64,
    view_id: &str,
) -> Result<(), BoxError> {
    if let Some(session) = state.storage.session(chat_id).await? {
        if session.view_id == view_id {
            state.storage.delete_session(chat_id).await?;
        }
    }
    state
        .telegram
        .edit_message_text(chat_id, message_id, EXPIRED_VIEW_NOTICE, None)
        .await?;
    Ok(())
}

/// REPLY pressed: open a fresh session (replacing any existing one) and
/// turn the notification into a composition prompt.
async fn start_reply(
    state: &AppState,
    chat_id: i64,
    message_id: i64,
    view: &EmailView,
) -> Result<(), BoxError> {
    if !state.storage.subscriber_ids().await?.contains(&chat_id) {
        notify(state, chat_id, "This chat is not registered. Send /start first.").await;
        return Ok(());
    }

    let session = ReplySession {
        chat_id,
        view_id: view.id.clone(),
        mode: SessionMode::AwaitingReply,
        draft: String::new(),
        anchor_message_id: Some(message_id),
        updated_at: Utc::now(),
    };
    state.storage.upsert_session(&session).await?;

    let prompt = format!(
        "{}\n\n<b>What would you like to say to {}?</b>",
        view.summary_text,
        escape_html(&view.sender_name)
    );
    state
        .telegram
        .edit_message_text(chat_id, message_id, &prompt, Some(&compose_keyboard(&view.id)))
        .await?;
    Ok(())
}

/// Send pressed: deliver the stored draft as a mailbox reply. Success ends
/// the session; failure leaves the draft in place for a retry.
async fn send_draft(
    state: &AppState,
    chat_id: i64,
    message_id: i64,
    view: &EmailView,
) -> Result<(), BoxError> {
    let Some(session) = state.storage.session(chat_id).await? else {
        notify(state, chat_id, NO_SESSION_NOTICE).await;
        return Ok(());
    };
    if session.draft.trim().is_empty() {
        notify(state, chat_id, "There is no draft yet. Describe your reply first.").await;
        return Ok(());
    }

    match state.graph.send_reply(&view.source_message_id, &session.draft).await {
        Ok(()) => {
            state.storage.delete_session(chat_id).await?;
            info!(
                "reply sent for message {} from chat {}",
                view.source_message_id, chat_id
            );
            state
                .telegram
                .edit_message_text(
                    chat_id,
                    message_id,
                    &format!("\u{2705} Reply sent to {}.", escape_html(&view.sender_name)),
                    None,
                )
                .await?;
        }
        Err(err) => {
            error!(
                "reply send failed for message {}: {}",
                view.source_message_id, err
            );
            notify(state, chat_id, SEND_FAILED_NOTICE).await;
        }
    }
    Ok(())
}

/// Edit pressed: ask for feedback, anchoring the in-place edits to the
/// message the button lives on.
async fn begin_edit(
    state: &AppState,
    chat_id: i64,
    message_id: i64,
    view: &EmailView,
) -> Result<(), BoxError> {
    let Some(mut session) = state.storage.session(chat_id).await? else {
        notify(state, chat_id, NO_SESSION_NOTICE).await;
        return Ok(());
    };

    session.mode = SessionMode::AwaitingEditFeedback;
    session.anchor_message_id = Some(message_id);
    session.updated_at = Utc::now();
    state.storage.upsert_session(&session).await?;

    let prompt = format!(
        "{}\n\n<b>What would you like to change?</b>",
        present_draft(&session.draft)
    );
    state
        .telegram
        .edit_message_text(chat_id, message_id, &prompt, Some(&edit_feedback_keyboard(&view.id)))
        .await?;
    Ok(())
}

/// Back pressed during edit feedback: return to awaiting_send_edit without
/// regenerating anything.
async fn cancel_edit(
    state: &AppState,
    chat_id: i64,
    message_id: i64,
    view: &EmailView,
) -> Result<(), BoxError> {
    let Some(mut session) = state.storage.session(chat_id).await? else {
        notify(state, chat_id, NO_SESSION_NOTICE).await;
        return Ok(());
    };

    session.mode = SessionMode::AwaitingSendEdit;
    session.updated_at = Utc::now();
    state.storage.upsert_session(&session).await?;

    state
        .telegram
        .edit_message_text(
            chat_id,
            message_id,
            &present_draft(&session.draft),
            Some(&draft_keyboard(&view.id)),
        )
        .await?;
    Ok(())
}

/// Best-effort plain notice; chat delivery failures are logged, never
/// propagated.
async fn notify(state: &AppState, chat_id: i64, text: &str) {
    if let Err(err) = state.telegram.send_message(chat_id, text, None).await {
        error!("failed to send notice to chat {}: {}", chat_id, err);
    }
}
