//! Session management service for conversation tracking.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Event, Session, SessionStatus};
use crate::infrastructure::database::{DatabaseError, SessionRepo};

/// Service for managing conversation sessions with events and state.
pub struct SessionService {
    repo: Arc<SessionRepo>,
}

impl SessionService {
    pub fn new(repo: Arc<SessionRepo>) -> Self {
        Self { repo }
    }

    /// Create a new session. Fails if the id already exists.
    #[instrument(skip(self, initial_state), err)]
    pub async fn create_session(
        &self,
        session_id: &str,
        app_name: &str,
        user_id: &str,
        project_id: Option<String>,
        initial_state: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> DomainResult<Session> {
        let mut session = Session::new(session_id, app_name, user_id, project_id);
        if let Some(state) = initial_state {
            session.state = state.into_iter().collect();
        }

        match self.repo.insert(&session).await {
            Ok(()) => {
                info!(session_id, "session created");
                Ok(session)
            }
            Err(DatabaseError::Constraint(_)) => Err(DomainError::ValidationFailed(format!(
                "Session {session_id} already exists"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_session(&self, session_id: &str) -> DomainResult<Option<Session>> {
        Ok(self.repo.get(session_id).await?)
    }

    pub async fn list_sessions(
        &self,
        project_id: Option<&str>,
        status: Option<SessionStatus>,
        limit: u32,
    ) -> DomainResult<Vec<Session>> {
        Ok(self.repo.list(project_id, status, limit).await?)
    }

    /// Append an event, merging an optional state delta, atomically.
    ///
    /// Events preserve append order within the session.
    #[instrument(skip(self, event, state_delta), fields(event_id = %event.event_id), err)]
    pub async fn append_event(
        &self,
        session_id: &str,
        event: Event,
        state_delta: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> DomainResult<()> {
        self.repo
            .append_event(session_id, &event, state_delta.as_ref())
            .await?;
        Ok(())
    }

    /// Update lifecycle status. `terminated` also stamps `terminated_at`.
    #[instrument(skip(self), err)]
    pub async fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> DomainResult<()> {
        self.repo.update_status(session_id, status).await?;
        info!(session_id, status = %status, "session status updated");
        Ok(())
    }

    /// Convenience wrapper for termination.
    pub async fn terminate_session(&self, session_id: &str) -> DomainResult<()> {
        self.update_status(session_id, SessionStatus::Terminated)
            .await
    }

    /// Read one state value by its namespaced key.
    pub async fn get_state(
        &self,
        session_id: &str,
        key: &str,
    ) -> DomainResult<Option<serde_json::Value>> {
        let session = self.repo.get(session_id).await?;
        Ok(session.and_then(|s| s.state.get(key).cloned()))
    }

    /// Set one state value by its namespaced key.
    #[instrument(skip(self, value), err)]
    pub async fn set_state(
        &self,
        session_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> DomainResult<()> {
        self.repo.set_state_value(session_id, key, value).await?;
        Ok(())
    }
}
