//! Application state management.

use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::mpsc;

use crate::domain::{ChainClient, TipIntent, TipStore};
use crate::infra::BlocklistManager;

use super::admission::{AdmissionConfig, AdmissionController};
use super::service::TipService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TipService>,
    pub store: Arc<dyn TipStore>,
    pub chain: Arc<dyn ChainClient>,
    pub blocklist: Arc<BlocklistManager>,
    /// Shared secret for webhook HMAC verification. A request cannot
    /// authenticate while this is unset.
    pub webhook_secret: Option<SecretString>,
}

impl AppState {
    /// Assemble the application state and its pipeline service.
    /// `intent_tx` feeds the settlement executor's submission lane.
    #[must_use]
    pub fn new(
        store: Arc<dyn TipStore>,
        chain: Arc<dyn ChainClient>,
        blocklist: Arc<BlocklistManager>,
        admission_config: AdmissionConfig,
        intent_tx: mpsc::Sender<TipIntent>,
        webhook_secret: Option<SecretString>,
    ) -> Self {
        let admission = Arc::new(AdmissionController::new(
            Arc::clone(&chain),
            Arc::clone(&blocklist),
            admission_config,
        ));
        let service = Arc::new(TipService::new(
            Arc::clone(&store),
            Arc::clone(&chain),
            admission,
            intent_tx,
        ));
        Self {
            service,
            store,
            chain,
            blocklist,
            webhook_secret,
        }
    }
}
