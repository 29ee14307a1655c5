//! Session repository port.
//!
//! Call metadata persistence is a collaborator concern; the core reads and
//! writes through this trait only and never touches storage schemas.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::call::CallSession;
use crate::ids::{SessionId, UserId};

/// Errors surfaced by repository implementations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// No session with that id.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// Backend failure (connection, constraint, serialization).
    #[error("repository failure: {0}")]
    Storage(String),
}

/// Narrow persistence interface for call metadata.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Load the session aggregate as last stored.
    async fn load_session(&self, id: &SessionId) -> Result<CallSession, RepositoryError>;

    /// Record that a participant's channel was admitted.
    async fn mark_participant_joined(
        &self,
        session: &SessionId,
        user: &UserId,
        ts: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Record that a participant departed.
    async fn mark_participant_left(
        &self,
        session: &SessionId,
        user: &UserId,
        ts: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Record the terminal transition. Called exactly once per session.
    async fn mark_session_ended(
        &self,
        session: &SessionId,
        ts: DateTime<Utc>,
        duration: Duration,
    ) -> Result<(), RepositoryError>;

    /// Users currently recorded as connected.
    async fn list_connected(&self, session: &SessionId) -> Result<Vec<UserId>, RepositoryError>;
}

#[derive(Debug, Clone)]
struct StoredCall {
    session: CallSession,
    connected: HashSet<UserId>,
    ended_at: Option<DateTime<Utc>>,
}

/// Map-backed repository used by the server binary and the test suites.
#[derive(Debug, Default)]
pub struct InMemorySessionRepository {
    calls: RwLock<HashMap<SessionId, StoredCall>>,
}

impl InMemorySessionRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created session so it can be loaded for admission.
    pub async fn insert(&self, session: CallSession) {
        let id = session.id().clone();
        self.calls.write().await.insert(
            id,
            StoredCall {
                session,
                connected: HashSet::new(),
                ended_at: None,
            },
        );
    }

    /// Number of stored sessions (any state).
    pub async fn len(&self) -> usize {
        self.calls.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.calls.read().await.is_empty()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn load_session(&self, id: &SessionId) -> Result<CallSession, RepositoryError> {
        self.calls
            .read()
            .await
            .get(id)
            .map(|c| c.session.clone())
            .ok_or_else(|| RepositoryError::UnknownSession(id.clone()))
    }

    async fn mark_participant_joined(
        &self,
        session: &SessionId,
        user: &UserId,
        _ts: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut calls = self.calls.write().await;
        let call = calls
            .get_mut(session)
            .ok_or_else(|| RepositoryError::UnknownSession(session.clone()))?;
        call.connected.insert(user.clone());
        // Keep the stored aggregate in step so a reloaded session reflects
        // the call's real lifecycle state.
        let _ = call.session.mark_connected(user);
        Ok(())
    }

    async fn mark_participant_left(
        &self,
        session: &SessionId,
        user: &UserId,
        _ts: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut calls = self.calls.write().await;
        let call = calls
            .get_mut(session)
            .ok_or_else(|| RepositoryError::UnknownSession(session.clone()))?;
        call.connected.remove(user);
        let _ = call.session.mark_gone(user);
        Ok(())
    }

    async fn mark_session_ended(
        &self,
        session: &SessionId,
        ts: DateTime<Utc>,
        _duration: Duration,
    ) -> Result<(), RepositoryError> {
        let mut calls = self.calls.write().await;
        let call = calls
            .get_mut(session)
            .ok_or_else(|| RepositoryError::UnknownSession(session.clone()))?;
        call.ended_at = Some(ts);
        call.connected.clear();
        let _ = call.session.end();
        Ok(())
    }

    async fn list_connected(&self, session: &SessionId) -> Result<Vec<UserId>, RepositoryError> {
        self.calls
            .read()
            .await
            .get(session)
            .map(|c| c.connected.iter().cloned().collect())
            .ok_or_else(|| RepositoryError::UnknownSession(session.clone()))
    }
}
