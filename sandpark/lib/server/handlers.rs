//! HTTP request handlers.
//!
//! Handlers translate requests into core calls and map the core's error
//! kinds onto the HTTP surface: `NotFound` answers 404, conflicts and
//! validation failures answer 400, capacity refusals redirect to `/ooc`,
//! everything else answers 500.

use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use bytes::Bytes;

use crate::{
    types::{InstanceConfig, Playground, SessionConfig, SessionStack},
    utils::parse_duration,
    SandparkError,
};

use super::{
    state::ServerState,
    types::{
        ErrorResponse, ExecRequest, ExecResponse, FileQuery, NewInstanceRequest, NewSessionForm,
        NewSessionResponse, PlaygroundInfo, SessionInfo, UploadQuery,
    },
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Default size hint for the DinD volume of instances created with a
/// session.
const DEFAULT_SESSION_INSTANCE_VOLUME: &str = "5G";

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// Handler for `POST /`.
///
/// Creates a session for the playground the request host resolves to and,
/// when no stack was requested, its default instance.
pub async fn new_session(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Form(form): Form<NewSessionForm>,
) -> Response {
    let host = request_host(&headers);
    let playground = match state.core().playground_find_by_domain(strip_port(&host)) {
        Ok(playground) => playground,
        Err(_) => {
            tracing::warn!(host = %host, "no playground for request host");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let duration = match &form.session_duration {
        Some(raw) if !raw.is_empty() => match parse_duration(raw) {
            Ok(duration) => Some(duration),
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        },
        _ => None,
    };

    let stack = form.stack.as_deref().filter(|s| !s.is_empty()).map(|url| SessionStack {
        name: form.stack_name.clone().unwrap_or_default(),
        url: url.to_string(),
    });
    let wants_stack = stack.is_some();

    let config = SessionConfig::builder()
        .playground_id(playground.id.clone())
        .duration(duration)
        .stack(stack)
        .image_name(form.image_name.clone())
        .host(host.clone())
        .build();

    let session = match state.core().session_new(config).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    let instance_config = InstanceConfig::builder()
        .image_name(form.image_name.clone().unwrap_or_default())
        .playground_fqdn(host.clone())
        .dind_volume_size(DEFAULT_SESSION_INSTANCE_VOLUME.to_string())
        .build();

    if wants_stack {
        // Deployment runs in the background; the browser follows progress
        // through the `session builder out` stream on the session's
        // WebSocket and the session flips to ready when the stack is up.
        let core = state.core().clone();
        let deploying = session.clone();
        tokio::spawn(async move {
            if let Err(e) = core.session_deploy_stack(&deploying, instance_config).await {
                tracing::warn!(session = %deploying.id, error = %e, "stack deployment failed");
            }
        });
    } else if let Err(e) = state.core().instance_new(&session, instance_config).await {
        if e.is_out_of_capacity() {
            // No capacity for even one host: take the empty session back
            // down so nothing lingers in storage.
            if let Err(close) = state.core().session_close(&session.id).await {
                tracing::warn!(session = %session.id, error = %close, "rollback close failed");
            }
            return error_response(e);
        }

        tracing::warn!(session = %session.id, error = %e, "default instance creation failed");
    }

    if headers
        .get("x-requested-with")
        .is_some_and(|v| v.as_bytes() == b"XMLHttpRequest")
    {
        return Json(NewSessionResponse {
            session_id: session.id,
            hostname: host,
        })
        .into_response();
    }

    found(&format!("/p/{}", session.id))
}

/// Handler for `GET /sessions/{session_id}`.
pub async fn get_session(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
) -> Response {
    let session = match state.core().session_get(&session_id) {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    let instances = match state.core().instance_find_by_session(&session) {
        Ok(instances) => instances,
        Err(e) => return error_response(e),
    };

    Json(SessionInfo {
        session,
        instances: instances
            .into_iter()
            .map(|i| (i.name.clone(), i))
            .collect::<HashMap<_, _>>(),
    })
    .into_response()
}

/// Handler for `POST /sessions/{session_id}/close` and
/// `DELETE /sessions/{session_id}`.
pub async fn close_session(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
) -> Response {
    if let Err(e) = state.core().session_get(&session_id) {
        return error_response(e);
    }

    match state.core().session_close(&session_id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

/// Handler for `POST /sessions/{session_id}/instances`.
pub async fn new_instance(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<NewInstanceRequest>,
) -> Response {
    let session = match state.core().session_get(&session_id) {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    let config = InstanceConfig::builder()
        .image_name(request.image)
        .hostname(request.hostname)
        .kind(request.kind)
        .playground_fqdn(request_host(&headers))
        .dind_volume_size(DEFAULT_SESSION_INSTANCE_VOLUME.to_string())
        .build();

    match state.core().instance_new(&session, config).await {
        Ok(instance) => Json(instance).into_response(),
        Err(e) => error_response(e),
    }
}

/// Handler for `DELETE /sessions/{session_id}/instances/{instance_name}`.
pub async fn delete_instance(
    State(state): State<ServerState>,
    Path((session_id, instance_name)): Path<(String, String)>,
) -> Response {
    let session = match state.core().session_get(&session_id) {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    match state.core().instance_delete(&session, &instance_name).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

/// Handler for `POST /sessions/{session_id}/instances/{instance_name}/exec`.
pub async fn exec(
    State(state): State<ServerState>,
    Path((session_id, instance_name)): Path<(String, String)>,
    Json(request): Json<ExecRequest>,
) -> Response {
    let instance = match lookup_instance(&state, &session_id, &instance_name) {
        Ok(instance) => instance,
        Err(e) => return error_response(e),
    };

    match state.core().instance_exec(&instance, request.command).await {
        Ok(exit_code) => Json(ExecResponse { exit_code }).into_response(),
        Err(e) => error_response(e),
    }
}

/// Handler for `GET /sessions/{session_id}/instances/{instance_name}/file`.
pub async fn file(
    State(state): State<ServerState>,
    Path((session_id, instance_name)): Path<(String, String)>,
    Query(query): Query<FileQuery>,
) -> Response {
    let instance = match lookup_instance(&state, &session_id, &instance_name) {
        Ok(instance) => instance,
        Err(e) => return error_response(e),
    };

    match state.core().instance_file(&instance, &query.path).await {
        Ok(stream) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            Body::from_stream(stream),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Handler for `POST /sessions/{session_id}/instances/{instance_name}/uploads`.
///
/// Uploads either the body (named by `file_name`) or, when `url` is given,
/// the fetched source.
pub async fn upload(
    State(state): State<ServerState>,
    Path((session_id, instance_name)): Path<(String, String)>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Response {
    let instance = match lookup_instance(&state, &session_id, &instance_name) {
        Ok(instance) => instance,
        Err(e) => return error_response(e),
    };

    let result = match &query.url {
        Some(url) => state.core().instance_upload_from_url(&instance, url).await,
        None => {
            let file_name = query.file_name.clone().unwrap_or_else(|| "upload".to_string());
            state
                .core()
                .instance_upload_from_reader(&instance, &file_name, body)
                .await
        }
    };

    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

/// Handler for `GET /users/{user_id}`.
pub async fn get_user(State(state): State<ServerState>, Path(user_id): Path<String>) -> Response {
    match state.core().user_get(&user_id) {
        Ok(user) => Json(user).into_response(),
        Err(e) => error_response(e),
    }
}

/// Handler for `PUT /playgrounds`. Admin only.
pub async fn new_playground(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(playground): Json<Playground>,
) -> Response {
    if !admin_authorized(&state, &headers) {
        return StatusCode::FORBIDDEN.into_response();
    }

    match state.core().playground_new(playground) {
        Ok(playground) => Json(playground).into_response(),
        Err(e) => error_response(e),
    }
}

/// Handler for `GET /playgrounds`. Admin only.
pub async fn list_playgrounds(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    if !admin_authorized(&state, &headers) {
        return StatusCode::FORBIDDEN.into_response();
    }

    match state.core().playground_list() {
        Ok(playgrounds) => Json(playgrounds).into_response(),
        Err(e) => error_response(e),
    }
}

/// Handler for `GET /my/playground`.
pub async fn get_current_playground(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Response {
    let host = request_host(&headers);
    let playground = match state.core().playground_find_by_domain(strip_port(&host)) {
        Ok(playground) => playground,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let config = state.core().config();
    Json(PlaygroundInfo {
        id: playground.id,
        domain: playground.domain,
        default_dind_instance_image: playground.default_dind_instance_image,
        available_dind_instance_images: playground.available_dind_instance_images,
        allow_windows_instances: playground.allow_windows_instances,
        default_session_duration: playground.default_session_duration.as_secs(),
        default_limit_cpu: *config.get_default_limit_cpu(),
        default_limit_memory: *config.get_default_limit_memory(),
        max_limit_cpu: *config.get_default_max_cpu(),
        max_limit_memory: *config.get_default_max_memory(),
    })
    .into_response()
}

/// Handler for `GET /ping`. Answers 503 once the host load average exceeds
/// the configured ceiling, taking the node out of upstream rotation.
pub async fn ping(State(state): State<ServerState>) -> Response {
    let load = sysinfo::System::load_average();
    let max = *state.core().config().get_max_load_avg();

    if load.one > max {
        tracing::warn!(load = load.one, max = max, "refusing ping, load too high");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    "pong".into_response()
}

/// Handler for `GET /ooc`: the out-of-capacity landing page.
pub async fn ooc() -> Response {
    (
        StatusCode::OK,
        "The playground is out of capacity, please try again later.",
    )
        .into_response()
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn lookup_instance(
    state: &ServerState,
    session_id: &str,
    instance_name: &str,
) -> crate::SandparkResult<crate::types::Instance> {
    let session = state.core().session_get(session_id)?;
    state.core().instance_get(&session, instance_name)
}

/// Maps a core error onto the HTTP surface.
fn error_response(error: SandparkError) -> Response {
    match &error {
        SandparkError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: error.to_string(),
            }),
        )
            .into_response(),
        SandparkError::Conflict(_) | SandparkError::Validation(_) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: error.to_string(),
            }),
        )
            .into_response(),
        SandparkError::OutOfCapacity(_) => found("/ooc"),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: error.to_string(),
            }),
        )
            .into_response(),
    }
}

/// A plain `302 Found` redirect.
fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, location.to_string())],
    )
        .into_response()
}

fn request_host(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Drops the port of a `Host` header so it matches playground domains.
fn strip_port(host: &str) -> &str {
    host.rsplit_once(':')
        .map(|(name, port)| {
            if port.chars().all(|c| c.is_ascii_digit()) {
                name
            } else {
                host
            }
        })
        .unwrap_or(host)
}

fn admin_authorized(state: &ServerState, headers: &HeaderMap) -> bool {
    let token = state.core().config().get_admin_token();
    if token.is_empty() {
        return false;
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|presented| presented == token)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("localhost:3000"), "localhost");
        assert_eq!(strip_port("play.example.com"), "play.example.com");
        assert_eq!(strip_port("play.example.com:80"), "play.example.com");
    }
}
