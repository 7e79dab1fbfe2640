//! Cancellation registry.
//!
//! Each live session carries a cancellation token; each live instance
//! carries a child token. The registry is owned by the core and keyed by id,
//! so entities stay serializable and free of live handles.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Session- and instance-scoped cancellation tokens.
#[derive(Default)]
pub struct Cancellations {
    sessions: DashMap<String, CancellationToken>,
    instances: DashMap<String, CancellationToken>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Cancellations {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The session's token, created on first use.
    pub fn session_token(&self, session_id: &str) -> CancellationToken {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// The instance's token, created on first use as a child of its
    /// session's token: closing the session cancels every instance.
    pub fn instance_token(&self, instance_name: &str, session_id: &str) -> CancellationToken {
        self.instances
            .entry(instance_name.to_string())
            .or_insert_with(|| self.session_token(session_id).child_token())
            .clone()
    }

    /// Cancels and removes one instance's token.
    pub fn cancel_instance(&self, instance_name: &str) {
        if let Some((_, token)) = self.instances.remove(instance_name) {
            token.cancel();
        }
    }

    /// Cancels the session's token (and with it every child) and drops the
    /// session's entries.
    pub fn cancel_session(&self, session_id: &str) {
        if let Some((_, token)) = self.sessions.remove(session_id) {
            token.cancel();
        }

        let suffix = format!("_{}", session_id);
        self.instances.retain(|name, _| !name.ends_with(&suffix));
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cancel_reaches_instance_children() {
        let cancellations = Cancellations::new();

        let instance_token = cancellations.instance_token("node1_abcd1234", "abcd1234");
        assert!(!instance_token.is_cancelled());

        cancellations.cancel_session("abcd1234");
        assert!(instance_token.is_cancelled());
    }

    #[test]
    fn test_instance_cancel_is_scoped() {
        let cancellations = Cancellations::new();

        let first = cancellations.instance_token("node1_abcd1234", "abcd1234");
        let second = cancellations.instance_token("node2_abcd1234", "abcd1234");

        cancellations.cancel_instance("node1_abcd1234");
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_tokens_are_stable_across_lookups() {
        let cancellations = Cancellations::new();

        let a = cancellations.instance_token("node1_abcd1234", "abcd1234");
        let b = cancellations.instance_token("node1_abcd1234", "abcd1234");

        a.cancel();
        assert!(b.is_cancelled());
    }
}
