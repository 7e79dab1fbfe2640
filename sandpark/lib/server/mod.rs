//! Thin HTTP/WebSocket adapter over the core.
//!
//! The adapter translates requests into core calls and streams broker events
//! to connected browsers. It holds no state of its own beyond the WebSocket
//! hub; OAuth token exchange, TLS termination and static assets live outside
//! this crate.

mod handlers;
mod routes;
mod state;
mod types;
mod ws;

use tokio::net::TcpListener;

use crate::{SandparkError, SandparkResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use routes::*;
pub use state::*;
pub use types::*;
pub use ws::*;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Serves the adapter until `SIGINT`, then returns for the caller to drain
/// the rest of the process.
pub async fn serve(state: ServerState) -> SandparkResult<()> {
    let port = *state.core().config().get_port();
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| SandparkError::Fatal(format!("cannot bind port {}: {}", port, e)))?;

    tracing::info!(port = port, "listening");

    let router = create_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .map_err(|e| SandparkError::Fatal(format!("server error: {}", e)))?;

    Ok(())
}
