mod config;
mod notifier;
mod reply_flow;
mod server;
mod state;
mod subscription;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{ServiceConfig, DEFAULT_MAX_SUBSCRIBERS};
pub use notifier::{process_mail_notification, MailChangeNotification};
pub use reply_flow::{process_chat_update, Callback, CallbackCommand};
pub use server::run_server;
pub use state::AppState;
pub use subscription::{ensure_subscription, renew_if_expiring};
