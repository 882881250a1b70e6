use std::sync::Arc;

use crate::graph::GraphClient;
use crate::llm::LlmClient;
use crate::storage::Storage;
use crate::summary::SignOff;
use crate::telegram::TelegramClient;

use super::config::ServiceConfig;

/// Shared handles for webhook handlers and background tasks. Every
/// collaborator is injected here; nothing in the core constructs its own
/// clients.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub storage: Arc<dyn Storage>,
    pub graph: Arc<GraphClient>,
    pub telegram: Arc<TelegramClient>,
    pub llm: Arc<LlmClient>,
}

impl AppState {
    pub fn sign_off(&self) -> SignOff {
        SignOff::new(
            self.config.sign_off_closing.clone(),
            self.config.sign_off_organization.clone(),
        )
    }
}
