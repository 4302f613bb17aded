//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! handed to every service function. It holds the room registry, the
//! directory of connected clients (one outbound channel per socket), and the
//! clock every timestamp is read from. There is no ambient or static state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::frame::Frame;
use crate::services::registry::RoomRegistry;

/// Outbound channel of one connected client.
pub type ClientSender = mpsc::Sender<Frame>;

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Copy.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub registry: RoomRegistry,
    /// Every connected client, whether or not it has joined a room.
    pub clients: Arc<RwLock<HashMap<Uuid, ClientSender>>>,
    /// Serializes directory fan-out so the last delivery is the newest view.
    pub directory_lock: Arc<Mutex<()>>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            registry: RoomRegistry::new(Arc::clone(&clock)),
            clock,
            clients: Arc::new(RwLock::new(HashMap::new())),
            directory_lock: Arc::new(Mutex::new(())),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
#[path = "state_helpers_test.rs"]
pub mod test_helpers;

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
