//! Request and response types of the HTTP adapter.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Instance, Session};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Form fields of the session-create endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct NewSessionForm {
    /// Requested duration (e.g. "2h"); the playground default when absent.
    #[serde(default, rename = "session-duration")]
    pub session_duration: Option<String>,

    /// Stack manifest to deploy.
    #[serde(default)]
    pub stack: Option<String>,

    /// Display name of the stack.
    #[serde(default)]
    pub stack_name: Option<String>,

    /// Image for the session's instances.
    #[serde(default)]
    pub image_name: Option<String>,
}

/// Response of the session-create endpoint for XHR callers.
#[derive(Debug, Serialize)]
pub struct NewSessionResponse {
    /// The created session id.
    pub session_id: String,

    /// The host the session was created on.
    pub hostname: String,
}

/// A session together with its instances, keyed by name.
#[derive(Debug, Serialize)]
pub struct SessionInfo {
    /// The session.
    #[serde(flatten)]
    pub session: Session,

    /// The session's instances.
    pub instances: HashMap<String, Instance>,
}

/// Body of the instance-create endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct NewInstanceRequest {
    /// Image to run; the playground default when absent.
    #[serde(default)]
    pub image: String,

    /// Hostname inside the session; assigned when absent.
    #[serde(default)]
    pub hostname: String,

    /// Instance class ("linux", "windows").
    #[serde(default, rename = "type")]
    pub kind: String,
}

/// Body of the exec endpoint.
#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    /// The command to run.
    pub command: Vec<String>,
}

/// Response of the exec endpoint.
#[derive(Debug, Serialize)]
pub struct ExecResponse {
    /// The command's exit code.
    pub exit_code: i64,
}

/// Query parameters of the upload endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    /// Source URL to fetch; the request body is used when absent.
    #[serde(default)]
    pub url: Option<String>,

    /// File name for body uploads.
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Query parameters of the file-download endpoint.
#[derive(Debug, Deserialize)]
pub struct FileQuery {
    /// Path of the file inside the instance.
    pub path: String,
}

/// Error body returned by the adapter.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
}

/// The publicly visible configuration of a playground. Provider credentials
/// and other tenant secrets stay out of this view.
#[derive(Debug, Serialize)]
pub struct PlaygroundInfo {
    /// The playground id.
    pub id: String,

    /// The playground domain.
    pub domain: String,

    /// Default image for new instances.
    pub default_dind_instance_image: String,

    /// Images a caller may request.
    pub available_dind_instance_images: Vec<String>,

    /// Whether Windows instances may be requested.
    pub allow_windows_instances: bool,

    /// Maximum session duration, in seconds.
    pub default_session_duration: u64,

    /// Default per-instance CPU limit, in cores.
    pub default_limit_cpu: f64,

    /// Default per-instance memory limit, in MB.
    pub default_limit_memory: i64,

    /// Maximum per-instance CPU limit, in cores.
    pub max_limit_cpu: f64,

    /// Maximum per-instance memory limit, in MB.
    pub max_limit_memory: i64,
}
