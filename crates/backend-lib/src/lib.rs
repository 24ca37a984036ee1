// ============================
// relay-backend/src/lib.rs
// ============================
//! Signaling relay for peer-to-peer meetings.
//!
//! The relay tracks who is present in a meeting and forwards the handshake
//! messages peers need to set up direct media connections. Media never passes
//! through it.

pub mod config;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod presence;
pub mod registry;
pub mod router;
pub mod storage;
pub mod validation;
pub mod websocket;
pub mod ws_router;

use std::sync::Arc;

use crate::config::Settings;
use crate::directory::SessionDirectory;
use crate::presence::PresenceManager;
use crate::registry::ConnectionRegistry;
use crate::router::MessageRouter;
use crate::storage::SessionStore;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Settings the process was started with
    pub settings: Arc<Settings>,
    /// Owner of participant records
    pub directory: SessionDirectory,
    /// Open connections of this process
    pub registry: ConnectionRegistry,
    /// Join/leave/teardown lifecycle
    pub presence: PresenceManager,
    /// Signaling relay
    pub router: MessageRouter,
}

impl AppState {
    /// Create a new application state on top of a store
    pub fn new(store: Arc<dyn SessionStore>, settings: Settings) -> Self {
        let directory = SessionDirectory::new(store);
        let registry = ConnectionRegistry::new();
        let presence = PresenceManager::new(directory.clone(), registry.clone());
        let router = MessageRouter::new(directory.clone(), registry.clone());

        Self {
            settings: Arc::new(settings),
            directory,
            registry,
            presence,
            router,
        }
    }

    /// Create the application state with the store selected in `settings`
    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let store = storage::build_store(&settings.storage)?;
        Ok(Self::new(store, settings))
    }
}
