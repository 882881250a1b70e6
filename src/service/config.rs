use std::env;
use std::time::Duration;

use super::BoxError;

pub const DEFAULT_MAX_SUBSCRIBERS: usize = 2;
pub const DEFAULT_SUBSCRIPTION_LIFETIME_MINUTES: i64 = 4230;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// Public base URL of this service, used as the webhook target when
    /// creating the mailbox change subscription. Subscription management is
    /// skipped when unset.
    pub base_url: Option<String>,
    /// Opaque client-state token echoed back by the mail provider.
    pub client_state: String,
    pub graph_base_url: String,
    /// Environment variable holding the current Graph access token.
    pub graph_token_var: String,
    pub telegram_bot_token: Option<String>,
    pub telegram_api_base: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub mongodb_uri: Option<String>,
    pub mongodb_database: String,
    /// Upper bound on registered chats.
    pub max_subscribers: usize,
    pub sign_off_closing: String,
    pub sign_off_organization: String,
    pub subscription_renew_interval: Duration,
    pub subscription_lifetime_minutes: i64,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, BoxError> {
        dotenvy::dotenv().ok();

        let host = env::var("MAILBRIDGE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("MAILBRIDGE_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(5000);

        let base_url = env_var_non_empty("BASE_URL").map(|url| url.trim_end_matches('/').to_string());
        let client_state = env::var("GRAPH_CLIENT_STATE")
            .unwrap_or_else(|_| "mailbridge-mail-subscription".to_string());

        let graph_base_url = env::var("GRAPH_BASE_URL")
            .unwrap_or_else(|_| "https://graph.microsoft.com/v1.0".to_string());
        let graph_token_var =
            env::var("GRAPH_TOKEN_VAR").unwrap_or_else(|_| "GRAPH_ACCESS_TOKEN".to_string());

        let telegram_bot_token = env_var_non_empty("TELEGRAM_BOT_TOKEN");
        let telegram_api_base = env::var("TELEGRAM_API_BASE")
            .unwrap_or_else(|_| "https://api.telegram.org".to_string());

        let openai_api_key = env_var_non_empty("OPENAI_API_KEY");
        let openai_base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let openai_model =
            env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());

        let mongodb_uri = env_var_non_empty("MONGODB_URI");
        let mongodb_database =
            env::var("MONGODB_DATABASE").unwrap_or_else(|_| "mailbridge".to_string());

        let max_subscribers = env::var("MAX_SUBSCRIBERS")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_SUBSCRIBERS);

        let sign_off_closing =
            env::var("SIGN_OFF_CLOSING").unwrap_or_else(|_| "Best regards,".to_string());
        let sign_off_organization =
            env::var("SIGN_OFF_ORGANIZATION").unwrap_or_else(|_| "The Team".to_string());

        let subscription_renew_interval = env::var("SUBSCRIPTION_RENEW_INTERVAL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(3600));
        let subscription_lifetime_minutes = env::var("SUBSCRIPTION_LIFETIME_MINUTES")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_SUBSCRIPTION_LIFETIME_MINUTES);

        Ok(Self {
            host,
            port,
            base_url,
            client_state,
            graph_base_url,
            graph_token_var,
            telegram_bot_token,
            telegram_api_base,
            openai_api_key,
            openai_base_url,
            openai_model,
            mongodb_uri,
            mongodb_database,
            max_subscribers,
            sign_off_closing,
            sign_off_organization,
            subscription_renew_interval,
            subscription_lifetime_minutes,
        })
    }

    /// Webhook endpoint the mail provider should deliver notifications to.
    pub fn mail_notification_url(&self) -> Option<String> {
        self.base_url
            .as_ref()
            .map(|base| format!("{}/api/webhook/mail", base))
    }
}

fn env_var_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
