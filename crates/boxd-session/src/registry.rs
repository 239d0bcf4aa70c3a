//! Session registry: creation, lookup, destruction and the implicit
//! `default` session.

use crate::session::{Session, SessionOptions};
use boxd_core::{Config, ProcessInfo, ResourceKind, Result, SandboxError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

pub const DEFAULT_SESSION_ID: &str = "default";

/// Public snapshot of one session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub cwd: String,
    pub isolated: bool,
    pub created_at: DateTime<Utc>,
}

pub struct SessionRegistry {
    config: Arc<Config>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// Serializes lazy creation of the default session so concurrent
    /// callers cannot each spawn one.
    default_lock: Mutex<()>,
}

impl SessionRegistry {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            default_lock: Mutex::new(()),
        }
    }

    /// Create a session, destroying any pre-existing session of the same id.
    pub async fn create(&self, opts: SessionOptions) -> Result<Arc<Session>> {
        if opts.id.is_empty() {
            return Err(SandboxError::Validation("session id is empty".into()));
        }

        if let Some(previous) = self.sessions.write().await.remove(&opts.id) {
            info!(session = %opts.id, "replacing existing session");
            previous.destroy().await;
        }

        let session = Session::spawn(opts, &self.config).await?;
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), Arc::clone(&session));
        debug!(session = %session.id, "session created");
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SandboxError::not_found(ResourceKind::Session, id))
    }

    /// Resolve an optional session id: a name looks up (sessions must be
    /// created explicitly), absence falls through to the default session.
    pub async fn resolve(&self, id: Option<&str>) -> Result<Arc<Session>> {
        match id {
            Some(id) if id != DEFAULT_SESSION_ID => self.get(id).await,
            _ => self.default_session().await,
        }
    }

    /// The lazily-created `default` session.
    pub async fn default_session(&self) -> Result<Arc<Session>> {
        if let Ok(session) = self.get(DEFAULT_SESSION_ID).await {
            return Ok(session);
        }
        let _guard = self.default_lock.lock().await;
        // Re-check under the lock; another caller may have won the race.
        if let Ok(session) = self.get(DEFAULT_SESSION_ID).await {
            return Ok(session);
        }
        self.create(SessionOptions {
            id: DEFAULT_SESSION_ID.to_string(),
            ..SessionOptions::default()
        })
        .await
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .read()
            .await
            .values()
            .map(|s| SessionInfo {
                id: s.id.clone(),
                cwd: s.cwd().to_string(),
                isolated: s.isolated(),
                created_at: s.created_at(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub async fn destroy(&self, id: &str) -> Result<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SandboxError::not_found(ResourceKind::Session, id))?;
        session.destroy().await;
        info!(session = %id, "session destroyed");
        Ok(())
    }

    pub async fn destroy_all(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        for (id, session) in sessions {
            debug!(session = %id, "destroying session");
            session.destroy().await;
        }
    }

    /// Find a background process across sessions, in session-id order.
    /// Returns the owning session together with the process snapshot.
    pub async fn find_process(&self, process_id: &str) -> Result<(Arc<Session>, ProcessInfo)> {
        let mut sessions: Vec<_> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| (id.clone(), Arc::clone(s)))
            .collect();
        sessions.sort_by(|a, b| a.0.cmp(&b.0));

        for (_, session) in sessions {
            if session.processes().contains(process_id).await {
                let info = session.processes().get(process_id).await?;
                return Ok((session, info));
            }
        }
        Err(SandboxError::not_found(ResourceKind::Process, process_id))
    }
}
