//! Snapshot-backed entity storage.
//!
//! Storage maps entity ids to entities and persists the whole graph as a
//! single snapshot blob, loaded at boot and rewritten on every mutation.
//! Mutation throughput is human-paced, so snapshot-on-write is acceptable;
//! there is no write-ahead log.

mod file;

use crate::{
    types::{Instance, LoginRequest, Playground, Session, User},
    SandparkResult,
};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use file::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The storage capability surface.
///
/// All writes are serialized; readers observe either pre- or post-write
/// state, never a partial mutation. Missing entities surface as the
/// distinguished [`SandparkError::NotFound`](crate::SandparkError::NotFound)
/// kind; duplicate creates surface as
/// [`SandparkError::Conflict`](crate::SandparkError::Conflict).
pub trait Storage: Send + Sync {
    /// Stores a new playground. The domain must be unique.
    fn playground_create(&self, playground: &Playground) -> SandparkResult<()>;

    /// Fetches a playground by id.
    fn playground_get(&self, id: &str) -> SandparkResult<Playground>;

    /// Replaces an existing playground.
    fn playground_put(&self, playground: &Playground) -> SandparkResult<()>;

    /// Lists all playgrounds.
    fn playground_list(&self) -> SandparkResult<Vec<Playground>>;

    /// Looks up a playground by external domain. O(1) via an auxiliary index
    /// refreshed on every playground write.
    fn playground_find_by_domain(&self, domain: &str) -> SandparkResult<Playground>;

    /// Stores a new session.
    fn session_create(&self, session: &Session) -> SandparkResult<()>;

    /// Fetches a session by id.
    fn session_get(&self, id: &str) -> SandparkResult<Session>;

    /// Replaces an existing session.
    fn session_put(&self, session: &Session) -> SandparkResult<()>;

    /// Removes a session record.
    fn session_delete(&self, id: &str) -> SandparkResult<()>;

    /// Lists every stored session.
    fn session_list(&self) -> SandparkResult<Vec<Session>>;

    /// Lists the sessions of one playground.
    fn session_find_by_playground(&self, playground_id: &str) -> SandparkResult<Vec<Session>>;

    /// Counts stored sessions, for capacity decisions.
    fn session_count(&self) -> SandparkResult<usize>;

    /// Stores a new instance. Names are collision-checked here.
    fn instance_create(&self, instance: &Instance) -> SandparkResult<()>;

    /// Fetches an instance by name.
    fn instance_get(&self, name: &str) -> SandparkResult<Instance>;

    /// Replaces an existing instance.
    fn instance_put(&self, instance: &Instance) -> SandparkResult<()>;

    /// Removes an instance record.
    fn instance_delete(&self, name: &str) -> SandparkResult<()>;

    /// Lists the instances of one session.
    fn instance_find_by_session(&self, session_id: &str) -> SandparkResult<Vec<Instance>>;

    /// Counts stored instances, for capacity decisions.
    fn instance_count(&self) -> SandparkResult<usize>;

    /// Stores a new user.
    fn user_create(&self, user: &User) -> SandparkResult<()>;

    /// Fetches a user by id.
    fn user_get(&self, id: &str) -> SandparkResult<User>;

    /// Replaces an existing user.
    fn user_put(&self, user: &User) -> SandparkResult<()>;

    /// Finds a user by `(provider, provider_user_id)` within a playground.
    fn user_find_by_provider(
        &self,
        playground_id: &str,
        provider: &str,
        provider_user_id: &str,
    ) -> SandparkResult<User>;

    /// Stores a pending login request.
    fn login_request_create(&self, request: &LoginRequest) -> SandparkResult<()>;

    /// Fetches a pending login request.
    fn login_request_get(&self, id: &str) -> SandparkResult<LoginRequest>;

    /// Removes a pending login request.
    fn login_request_delete(&self, id: &str) -> SandparkResult<()>;
}
