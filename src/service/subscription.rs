//! Mailbox change-subscription lifecycle.
//!
//! The mail provider only delivers webhooks while a subscription is alive,
//! and subscriptions are short-lived. A background loop renews the stored
//! subscription whenever less than 24 hours remain, creating a fresh one
//! when none exists.

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{error, info, warn};

use crate::storage::SubscriptionRecord;

use super::state::AppState;
use super::BoxError;

const RENEW_THRESHOLD_HOURS: i64 = 24;

/// Create an inbox subscription and persist its metadata. Requires a public
/// `BASE_URL`.
pub async fn ensure_subscription(state: &AppState) -> Result<(), BoxError> {
    let Some(notification_url) = state.config.mail_notification_url() else {
        return Err("BASE_URL not configured; cannot create a mail subscription".into());
    };
    let expiration =
        Utc::now() + ChronoDuration::minutes(state.config.subscription_lifetime_minutes);
    let created = state
        .graph
        .create_subscription(&notification_url, &state.config.client_state, expiration)
        .await?;

    let record = SubscriptionRecord {
        subscription_id: created.id.clone(),
        resource: created.resource.clone(),
        expiration,
        updated_at: Utc::now(),
    };
    state.storage.save_subscription(&record).await?;
    info!(
        "created mail subscription {} expiring {}",
        record.subscription_id, record.expiration
    );
    Ok(())
}

/// Renew the stored subscription when it is close to expiring; create one
/// when nothing is stored yet.
pub async fn renew_if_expiring(state: &AppState) -> Result<(), BoxError> {
    let Some(stored) = state.storage.load_subscription().await? else {
        return ensure_subscription(state).await;
    };

    let hours_left = (stored.expiration - Utc::now()).num_hours();
    if hours_left >= RENEW_THRESHOLD_HOURS {
        return Ok(());
    }

    let expiration =
        Utc::now() + ChronoDuration::minutes(state.config.subscription_lifetime_minutes);
    state
        .graph
        .renew_subscription(&stored.subscription_id, expiration)
        .await?;
    let record = SubscriptionRecord {
        expiration,
        updated_at: Utc::now(),
        ..stored
    };
    state.storage.save_subscription(&record).await?;
    info!(
        "renewed mail subscription {} until {}",
        record.subscription_id, record.expiration
    );
    Ok(())
}

/// Periodic renewal check. Failures are logged and retried on the next
/// tick; a missing access token just means the external refresher has not
/// provided one yet.
pub(super) fn spawn_renewal_loop(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.subscription_renew_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match renew_if_expiring(&state).await {
                Ok(()) => {}
                Err(err) => warn!("subscription renewal check failed: {}", err),
            }
        }
    })
}

/// One-shot variant used at startup so a fresh deployment subscribes
/// immediately instead of waiting a full tick.
pub(super) async fn startup_check(state: &AppState) {
    if state.config.base_url.is_none() {
        info!("BASE_URL not set; skipping mail subscription management");
        return;
    }
    if let Err(err) = renew_if_expiring(state).await {
        error!("initial subscription check failed: {}", err);
    }
}
