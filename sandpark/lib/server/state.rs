//! Server state.

use std::sync::Arc;

use crate::core::Core;

use super::ws::WsHub;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Shared state handed to every request handler: the core and the WebSocket
/// hub fanning broker events out to browsers.
#[derive(Clone)]
pub struct ServerState {
    core: Arc<Core>,
    hub: Arc<WsHub>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ServerState {
    /// Builds the state and wires the hub into the core's broker.
    pub fn new(core: Arc<Core>) -> Self {
        let hub = WsHub::attached(core.broker());
        Self { core, hub }
    }

    /// The core.
    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    /// The WebSocket hub.
    pub fn hub(&self) -> &Arc<WsHub> {
        &self.hub
    }
}
