//! User and login-request entities.

use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An identity tied to a playground and an external OAuth provider.
///
/// The `(provider, provider_user_id)` pair is unique per playground.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable opaque identifier.
    pub id: String,

    /// Display name reported by the provider.
    #[serde(default)]
    pub name: String,

    /// Avatar URL reported by the provider.
    #[serde(default)]
    pub avatar: String,

    /// The provider name ("github", "google", ...).
    pub provider: String,

    /// The subject identifier at the provider.
    pub provider_user_id: String,

    /// The playground this identity belongs to.
    pub playground_id: String,

    /// Contact email, when the provider shares one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
}

/// A pending login handed to the OAuth adapter; storage only, the exchange
/// itself happens outside the core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Opaque request id, doubling as the OAuth state parameter.
    pub id: String,

    /// Where to send the browser once the flow completes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub redirect: String,
}
