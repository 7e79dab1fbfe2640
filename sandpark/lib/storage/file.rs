//! File-backed storage.

use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::RwLock,
};

use serde::{Deserialize, Serialize};

use crate::{
    types::{Instance, LoginRequest, Playground, Session, User},
    SandparkError, SandparkResult,
};

use super::Storage;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The snapshot schema version this build reads and writes. Bumped on every
/// incompatible change to the envelope so stale snapshots fail loudly instead
/// of deserializing into garbage.
pub const SNAPSHOT_VERSION: u32 = 1;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// [`Storage`] implementation persisting the entity graph as one JSON
/// snapshot file.
///
/// Every mutation rewrites the snapshot via write-new-then-rename, so a crash
/// mid-write leaves the previous snapshot intact. A corrupt snapshot at boot
/// is fatal; the operator must intervene.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    db: RwLock<Db>,
}

/// The versioned snapshot envelope.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Db {
    version: u32,
    playgrounds: HashMap<String, Playground>,
    sessions: HashMap<String, Session>,
    instances: HashMap<String, Instance>,
    users: HashMap<String, User>,
    login_requests: HashMap<String, LoginRequest>,

    /// domain -> playground id. Rebuilt on load and on playground writes,
    /// never serialized.
    #[serde(skip)]
    domains: HashMap<String, String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FileStorage {
    /// Opens the snapshot at `path`, starting empty when the file does not
    /// exist yet.
    pub fn open(path: impl AsRef<Path>) -> SandparkResult<Self> {
        let path = path.as_ref().to_path_buf();

        let db = match fs::read(&path) {
            Result::Ok(bytes) => {
                let mut db: Db = serde_json::from_slice(&bytes).map_err(|e| {
                    SandparkError::Fatal(format!(
                        "corrupt snapshot at {}: {}",
                        path.display(),
                        e
                    ))
                })?;

                if db.version != SNAPSHOT_VERSION {
                    return Err(SandparkError::Fatal(format!(
                        "snapshot at {} has schema version {}, expected {}",
                        path.display(),
                        db.version,
                        SNAPSHOT_VERSION
                    )));
                }

                db.domains = db
                    .playgrounds
                    .values()
                    .map(|p| (p.domain.clone(), p.id.clone()))
                    .collect();
                db
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Db {
                version: SNAPSHOT_VERSION,
                ..Db::default()
            },
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            db: RwLock::new(db),
        })
    }

    /// Atomic snapshot replacement: serialize to a sibling temp file, then
    /// rename over the live snapshot. Called with the write lock held.
    fn save(&self, db: &Db) -> SandparkResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(db)?)?;
        fs::rename(&tmp, &self.path)?;

        Ok(())
    }

    fn write<T>(&self, mutate: impl FnOnce(&mut Db) -> SandparkResult<T>) -> SandparkResult<T> {
        let mut db = self.db.write().expect("storage lock poisoned");
        let out = mutate(&mut db)?;
        self.save(&db)?;
        Ok(out)
    }

    fn read<T>(&self, view: impl FnOnce(&Db) -> SandparkResult<T>) -> SandparkResult<T> {
        let db = self.db.read().expect("storage lock poisoned");
        view(&db)
    }
}

fn not_found(what: &str, id: &str) -> SandparkError {
    SandparkError::NotFound(format!("{} {}", what, id))
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Storage for FileStorage {
    fn playground_create(&self, playground: &Playground) -> SandparkResult<()> {
        self.write(|db| {
            if db.domains.contains_key(&playground.domain) {
                return Err(SandparkError::Conflict(format!(
                    "playground domain {} already exists",
                    playground.domain
                )));
            }

            db.domains
                .insert(playground.domain.clone(), playground.id.clone());
            db.playgrounds
                .insert(playground.id.clone(), playground.clone());
            Ok(())
        })
    }

    fn playground_get(&self, id: &str) -> SandparkResult<Playground> {
        self.read(|db| {
            db.playgrounds
                .get(id)
                .cloned()
                .ok_or_else(|| not_found("playground", id))
        })
    }

    fn playground_put(&self, playground: &Playground) -> SandparkResult<()> {
        self.write(|db| {
            let previous = db
                .playgrounds
                .get(&playground.id)
                .ok_or_else(|| not_found("playground", &playground.id))?;

            // Refresh the domain index on every playground write.
            let old_domain = previous.domain.clone();
            if old_domain != playground.domain {
                if db.domains.contains_key(&playground.domain) {
                    return Err(SandparkError::Conflict(format!(
                        "playground domain {} already exists",
                        playground.domain
                    )));
                }
                db.domains.remove(&old_domain);
            }

            db.domains
                .insert(playground.domain.clone(), playground.id.clone());
            db.playgrounds
                .insert(playground.id.clone(), playground.clone());
            Ok(())
        })
    }

    fn playground_list(&self) -> SandparkResult<Vec<Playground>> {
        self.read(|db| Ok(db.playgrounds.values().cloned().collect()))
    }

    fn playground_find_by_domain(&self, domain: &str) -> SandparkResult<Playground> {
        self.read(|db| {
            db.domains
                .get(domain)
                .and_then(|id| db.playgrounds.get(id))
                .cloned()
                .ok_or_else(|| not_found("playground for domain", domain))
        })
    }

    fn session_create(&self, session: &Session) -> SandparkResult<()> {
        self.write(|db| {
            if db.sessions.contains_key(&session.id) {
                return Err(SandparkError::Conflict(format!(
                    "session {} already exists",
                    session.id
                )));
            }

            db.sessions.insert(session.id.clone(), session.clone());
            Ok(())
        })
    }

    fn session_get(&self, id: &str) -> SandparkResult<Session> {
        self.read(|db| {
            db.sessions
                .get(id)
                .cloned()
                .ok_or_else(|| not_found("session", id))
        })
    }

    fn session_put(&self, session: &Session) -> SandparkResult<()> {
        self.write(|db| {
            if !db.sessions.contains_key(&session.id) {
                return Err(not_found("session", &session.id));
            }

            db.sessions.insert(session.id.clone(), session.clone());
            Ok(())
        })
    }

    fn session_delete(&self, id: &str) -> SandparkResult<()> {
        self.write(|db| {
            db.sessions
                .remove(id)
                .ok_or_else(|| not_found("session", id))?;
            Ok(())
        })
    }

    fn session_list(&self) -> SandparkResult<Vec<Session>> {
        self.read(|db| Ok(db.sessions.values().cloned().collect()))
    }

    fn session_find_by_playground(&self, playground_id: &str) -> SandparkResult<Vec<Session>> {
        self.read(|db| {
            Ok(db
                .sessions
                .values()
                .filter(|s| s.playground_id == playground_id)
                .cloned()
                .collect())
        })
    }

    fn session_count(&self) -> SandparkResult<usize> {
        self.read(|db| Ok(db.sessions.len()))
    }

    fn instance_create(&self, instance: &Instance) -> SandparkResult<()> {
        self.write(|db| {
            if db.instances.contains_key(&instance.name) {
                return Err(SandparkError::Conflict(format!(
                    "instance {} already exists",
                    instance.name
                )));
            }

            db.instances.insert(instance.name.clone(), instance.clone());
            Ok(())
        })
    }

    fn instance_get(&self, name: &str) -> SandparkResult<Instance> {
        self.read(|db| {
            db.instances
                .get(name)
                .cloned()
                .ok_or_else(|| not_found("instance", name))
        })
    }

    fn instance_put(&self, instance: &Instance) -> SandparkResult<()> {
        self.write(|db| {
            if !db.instances.contains_key(&instance.name) {
                return Err(not_found("instance", &instance.name));
            }

            db.instances.insert(instance.name.clone(), instance.clone());
            Ok(())
        })
    }

    fn instance_delete(&self, name: &str) -> SandparkResult<()> {
        self.write(|db| {
            db.instances
                .remove(name)
                .ok_or_else(|| not_found("instance", name))?;
            Ok(())
        })
    }

    fn instance_find_by_session(&self, session_id: &str) -> SandparkResult<Vec<Instance>> {
        self.read(|db| {
            Ok(db
                .instances
                .values()
                .filter(|i| i.session_id == session_id)
                .cloned()
                .collect())
        })
    }

    fn instance_count(&self) -> SandparkResult<usize> {
        self.read(|db| Ok(db.instances.len()))
    }

    fn user_create(&self, user: &User) -> SandparkResult<()> {
        self.write(|db| {
            if db.users.contains_key(&user.id) {
                return Err(SandparkError::Conflict(format!(
                    "user {} already exists",
                    user.id
                )));
            }

            db.users.insert(user.id.clone(), user.clone());
            Ok(())
        })
    }

    fn user_get(&self, id: &str) -> SandparkResult<User> {
        self.read(|db| {
            db.users
                .get(id)
                .cloned()
                .ok_or_else(|| not_found("user", id))
        })
    }

    fn user_put(&self, user: &User) -> SandparkResult<()> {
        self.write(|db| {
            if !db.users.contains_key(&user.id) {
                return Err(not_found("user", &user.id));
            }

            db.users.insert(user.id.clone(), user.clone());
            Ok(())
        })
    }

    fn user_find_by_provider(
        &self,
        playground_id: &str,
        provider: &str,
        provider_user_id: &str,
    ) -> SandparkResult<User> {
        self.read(|db| {
            db.users
                .values()
                .find(|u| {
                    u.playground_id == playground_id
                        && u.provider == provider
                        && u.provider_user_id == provider_user_id
                })
                .cloned()
                .ok_or_else(|| not_found("user at provider", provider_user_id))
        })
    }

    fn login_request_create(&self, request: &LoginRequest) -> SandparkResult<()> {
        self.write(|db| {
            db.login_requests.insert(request.id.clone(), request.clone());
            Ok(())
        })
    }

    fn login_request_get(&self, id: &str) -> SandparkResult<LoginRequest> {
        self.read(|db| {
            db.login_requests
                .get(id)
                .cloned()
                .ok_or_else(|| not_found("login request", id))
        })
    }

    fn login_request_delete(&self, id: &str) -> SandparkResult<()> {
        self.write(|db| {
            db.login_requests
                .remove(id)
                .ok_or_else(|| not_found("login request", id))?;
            Ok(())
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;

    fn playground(domain: &str) -> Playground {
        Playground::builder()
            .id(format!("pg-{}", domain))
            .domain(domain.to_string())
            .default_dind_instance_image("franela/dind:latest".to_string())
            .default_session_duration(Duration::from_secs(3600))
            .build()
    }

    fn session(id: &str) -> Session {
        Session {
            id: id.to_string(),
            playground_id: "pg-localhost".to_string(),
            user_id: None,
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::TimeDelta::hours(1),
            ready: true,
            stack: None,
        }
    }

    fn open(dir: &TempDir) -> FileStorage {
        FileStorage::open(dir.path().join("session")).unwrap()
    }

    #[test]
    fn test_round_trip_through_reopen() -> anyhow::Result<()> {
        let dir = TempDir::new()?;

        {
            let storage = open(&dir);
            storage.playground_create(&playground("localhost"))?;
            storage.session_create(&session("abcd1234"))?;
            storage.instance_create(&Instance {
                name: "node1_abcd1234".to_string(),
                session_id: "abcd1234".to_string(),
                ..Default::default()
            })?;
        }

        let storage = open(&dir);
        assert_eq!(
            storage.playground_find_by_domain("localhost")?.id,
            "pg-localhost"
        );
        assert_eq!(storage.session_get("abcd1234")?.id, "abcd1234");
        assert_eq!(storage.instance_find_by_session("abcd1234")?.len(), 1);
        assert_eq!(storage.session_count()?, 1);
        assert_eq!(storage.instance_count()?, 1);
        Ok(())
    }

    #[test]
    fn test_not_found_is_distinguished() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let storage = open(&dir);

        let err = storage.session_get("missing1").unwrap_err();
        assert!(err.is_not_found());

        let err = storage.instance_delete("missing").unwrap_err();
        assert!(err.is_not_found());
        Ok(())
    }

    #[test]
    fn test_duplicate_domain_conflicts() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let storage = open(&dir);

        storage.playground_create(&playground("localhost"))?;
        let mut other = playground("localhost");
        other.id = "pg-2".to_string();

        let err = storage.playground_create(&other).unwrap_err();
        assert!(matches!(err, SandparkError::Conflict(_)));
        Ok(())
    }

    #[test]
    fn test_instance_name_collision_checked_at_write() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let storage = open(&dir);

        let instance = Instance {
            name: "node1_abcd1234".to_string(),
            session_id: "abcd1234".to_string(),
            ..Default::default()
        };
        storage.instance_create(&instance)?;

        let err = storage.instance_create(&instance).unwrap_err();
        assert!(matches!(err, SandparkError::Conflict(_)));
        Ok(())
    }

    #[test]
    fn test_corrupt_snapshot_is_fatal() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("session");
        fs::write(&path, b"{ not json")?;

        let err = FileStorage::open(&path).unwrap_err();
        assert!(matches!(err, SandparkError::Fatal(_)));
        Ok(())
    }

    #[test]
    fn test_version_mismatch_is_fatal() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("session");
        fs::write(
            &path,
            serde_json::to_vec(&serde_json::json!({ "version": 999 }))?,
        )?;

        let err = FileStorage::open(&path).unwrap_err();
        assert!(matches!(err, SandparkError::Fatal(_)));
        Ok(())
    }

    #[test]
    fn test_snapshot_replacement_leaves_no_temp_file() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let storage = open(&dir);
        storage.playground_create(&playground("localhost"))?;

        assert!(dir.path().join("session").exists());
        assert!(!dir.path().join("session.tmp").exists());
        Ok(())
    }

    #[test]
    fn test_domain_index_follows_updates() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let storage = open(&dir);

        let mut pg = playground("old.example.com");
        storage.playground_create(&pg)?;

        pg.domain = "new.example.com".to_string();
        storage.playground_put(&pg)?;

        assert!(storage
            .playground_find_by_domain("old.example.com")
            .unwrap_err()
            .is_not_found());
        assert_eq!(
            storage.playground_find_by_domain("new.example.com")?.id,
            pg.id
        );
        Ok(())
    }
}
