//! Session context shared by every networked component.
//!
//! All reads and writes of the session keys go through [`SessionContext`]; the backing
//! [`SessionStore`] only persists whole snapshots.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex as StdMutex},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{UserId, UserRole},
    protocol::LoginResponse,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::SessionError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_role: Option<UserRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

impl Session {
    pub fn is_empty(&self) -> bool {
        *self == Session::default()
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<Session, SessionError>;
    async fn save(&self, session: &Session) -> Result<(), SessionError>;
    async fn clear(&self) -> Result<(), SessionError>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    saved: StdMutex<Session>,
}

impl MemorySessionStore {
    pub fn new(initial: Session) -> Self {
        Self {
            saved: StdMutex::new(initial),
        }
    }

    pub fn saved(&self) -> Session {
        self.saved
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Session, SessionError> {
        Ok(self.saved())
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        if let Ok(mut guard) = self.saved.lock() {
            *guard = session.clone();
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), SessionError> {
        self.save(&Session::default()).await
    }
}

/// JSON file store. A missing file is an empty session.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn display_path(&self) -> String {
        self.path.display().to_string()
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Session, SessionError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Session::default())
            }
            Err(source) => {
                return Err(SessionError::Read {
                    path: self.display_path(),
                    source,
                })
            }
        };
        serde_json::from_slice(&raw).map_err(|source| SessionError::Corrupt {
            path: self.display_path(),
            source,
        })
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SessionError::Write {
                    path: parent.display().to_string(),
                    source,
                })?;
        }
        let raw = serde_json::to_vec_pretty(session).map_err(|source| SessionError::Corrupt {
            path: self.display_path(),
            source,
        })?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|source| SessionError::Write {
                path: self.display_path(),
                source,
            })
    }

    async fn clear(&self) -> Result<(), SessionError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::Write {
                path: self.display_path(),
                source,
            }),
        }
    }
}

/// Cloneable handle to the current session. Persistence failures are logged and never
/// invalidate the in-memory copy.
#[derive(Clone)]
pub struct SessionContext {
    current: Arc<RwLock<Session>>,
    store: Arc<dyn SessionStore>,
}

impl SessionContext {
    pub fn in_memory(session: Session) -> Self {
        Self {
            current: Arc::new(RwLock::new(session.clone())),
            store: Arc::new(MemorySessionStore::new(session)),
        }
    }

    pub async fn restore(store: Arc<dyn SessionStore>) -> Result<Self, SessionError> {
        let session = store.load().await?;
        if session.access_token.is_some() {
            info!(user_id = ?session.user_id.map(|id| id.0), "session: restored stored session");
        }
        Ok(Self {
            current: Arc::new(RwLock::new(session)),
            store,
        })
    }

    pub async fn snapshot(&self) -> Session {
        self.current.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.current.read().await.access_token.clone()
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.current.read().await.refresh_token.clone()
    }

    pub async fn user_id(&self) -> Option<UserId> {
        self.current.read().await.user_id
    }

    pub async fn user_role(&self) -> Option<UserRole> {
        self.current.read().await.user_role
    }

    pub async fn is_authenticated(&self) -> bool {
        self.current.read().await.access_token.is_some()
    }

    pub async fn establish(&self, login: &LoginResponse) {
        let session = Session {
            access_token: Some(login.access_token.clone()),
            refresh_token: Some(login.refresh_token.clone()),
            user_role: Some(login.user.role),
            user_id: Some(login.user.user_id),
        };
        self.replace(session).await;
    }

    pub async fn replace_access_token(&self, access_token: String) {
        let session = {
            let mut guard = self.current.write().await;
            guard.access_token = Some(access_token);
            guard.clone()
        };
        self.persist(&session).await;
    }

    pub async fn clear(&self) {
        *self.current.write().await = Session::default();
        if let Err(err) = self.store.clear().await {
            warn!("session: failed to clear persisted session: {err}");
        }
    }

    async fn replace(&self, session: Session) {
        *self.current.write().await = session.clone();
        self.persist(&session).await;
    }

    async fn persist(&self, session: &Session) {
        if let Err(err) = self.store.save(session).await {
            warn!("session: failed to persist session: {err}");
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
