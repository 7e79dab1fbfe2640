//! Route definitions of the HTTP adapter.

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use super::{handlers, state::ServerState, ws};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates the adapter router.
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/", post(handlers::new_session))
        .route("/ping", get(handlers::ping))
        .route("/ooc", get(handlers::ooc))
        .route("/users/{user_id}", get(handlers::get_user))
        .route("/my/playground", get(handlers::get_current_playground))
        .route(
            "/playgrounds",
            put(handlers::new_playground).get(handlers::list_playgrounds),
        )
        .route(
            "/sessions/{session_id}",
            get(handlers::get_session).delete(handlers::close_session),
        )
        .route("/sessions/{session_id}/close", post(handlers::close_session))
        .route("/sessions/{session_id}/ws", get(ws::session_ws))
        .route(
            "/sessions/{session_id}/instances",
            post(handlers::new_instance),
        )
        .route(
            "/sessions/{session_id}/instances/{instance_name}",
            delete(handlers::delete_instance),
        )
        .route(
            "/sessions/{session_id}/instances/{instance_name}/exec",
            post(handlers::exec),
        )
        .route(
            "/sessions/{session_id}/instances/{instance_name}/file",
            get(handlers::file),
        )
        .route(
            "/sessions/{session_id}/instances/{instance_name}/uploads",
            post(handlers::upload),
        )
        .with_state(state)
}
