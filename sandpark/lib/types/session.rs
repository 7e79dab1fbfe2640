//! Session entity.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A time-bounded execution arena owning an overlay network and zero or more
/// instances.
///
/// The id is 8 characters from `[0-9a-z]` and doubles as the overlay network
/// name and the suffix of every owned instance name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// The 8-character session id.
    pub id: String,

    /// The owning playground id.
    pub playground_id: String,

    /// The owning user id, when the playground requires login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// When the session was created.
    pub created_at: DateTime<Utc>,

    /// The absolute deadline after which the scheduler reaps the session.
    pub expires_at: DateTime<Utc>,

    /// Whether session setup (stack deployment) has completed.
    #[serde(default)]
    pub ready: bool,

    /// The stack deployed into the session, when one was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<SessionStack>,
}

/// A stack descriptor: a named remote compose manifest deployed into the
/// session's first instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStack {
    /// Display name of the stack.
    pub name: String,

    /// URL of the stack manifest.
    pub url: String,
}

/// Parameters for creating a session.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct SessionConfig {
    /// The playground the session belongs to.
    pub playground_id: String,

    /// The logged-in user, when any.
    #[builder(default)]
    pub user_id: Option<String>,

    /// Requested duration. Must not exceed the playground default; when
    /// absent the playground default applies.
    #[builder(default)]
    pub duration: Option<Duration>,

    /// Stack to deploy, when any.
    #[builder(default)]
    pub stack: Option<SessionStack>,

    /// Image for instances created during session setup.
    #[builder(default)]
    pub image_name: Option<String>,

    /// The `Host` the request arrived on, forwarded to instances as their
    /// externally reachable FQDN.
    #[builder(default)]
    pub host: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Session {
    /// Whether the expiry deadline has passed.
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_expired() {
        let now = Utc::now();
        let session = Session {
            id: "abcd1234".to_string(),
            playground_id: "p1".to_string(),
            user_id: None,
            created_at: now,
            expires_at: now + TimeDelta::seconds(2),
            ready: true,
            stack: None,
        };

        assert!(!session.expired(now));
        assert!(session.expired(now + TimeDelta::seconds(2)));
        assert!(session.expired(now + TimeDelta::seconds(30)));
    }
}
