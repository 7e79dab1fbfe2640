use std::{error::Error, fmt::Display};
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a sandpark-related operation.
pub type SandparkResult<T> = Result<T, SandparkError>;

/// An error that occurred during a sandpark operation.
#[derive(Debug, Error)]
pub enum SandparkError {
    /// An entity (playground, session, instance, user, ...) does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A duplicate name or domain was rejected.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The provisioner refused to place more work.
    #[error("out of capacity: {0}")]
    OutOfCapacity(String),

    /// A container daemon or cluster manager call failed. Retryable.
    #[error("backend error: {0}")]
    Backend(String),

    /// A request failed validation against the entity graph.
    #[error("validation error: {0}")]
    Validation(String),

    /// An unrecoverable boot-time failure. Aborts the process.
    #[error("fatal: {0}")]
    Fatal(String),

    /// An error that occurred when performing an IO operation.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Custom error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandparkError {
    /// Creates a new `Custom` error from any error type.
    pub fn custom(error: impl Into<anyhow::Error>) -> SandparkError {
        SandparkError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Whether this error is the distinguished `NotFound` kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SandparkError::NotFound(_))
    }

    /// Whether this error signals the provisioner refused resources.
    pub fn is_out_of_capacity(&self) -> bool {
        matches!(self, SandparkError::OutOfCapacity(_))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `SandparkResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> SandparkResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for AnyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

impl From<reqwest::Error> for SandparkError {
    fn from(error: reqwest::Error) -> Self {
        SandparkError::Backend(error.to_string())
    }
}

impl From<reqwest_middleware::Error> for SandparkError {
    fn from(error: reqwest_middleware::Error) -> Self {
        SandparkError::Backend(error.to_string())
    }
}

impl From<serde_json::Error> for SandparkError {
    fn from(error: serde_json::Error) -> Self {
        SandparkError::custom(error)
    }
}
