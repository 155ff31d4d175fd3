//! SQLite repository for sessions.
//!
//! Session rows store `events` and `state` as JSON blobs with
//! `json_valid` checks; append order inside `events` is the ordering
//! guarantee, so read-modify-write happens inside one transaction.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::models::{Event, Session, SessionStatus};
use crate::infrastructure::database::errors::DatabaseError;
use crate::infrastructure::database::utils::{parse_datetime, parse_datetime_opt};

pub struct SessionRepo {
    pool: SqlitePool,
}

impl SessionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_session(row: &SqliteRow) -> Result<Session, DatabaseError> {
        let status: String = row.try_get("status").map_err(DatabaseError::from)?;
        let events_json: String = row.try_get("events").map_err(DatabaseError::from)?;
        let state_json: String = row.try_get("state").map_err(DatabaseError::from)?;
        let metadata_json: Option<String> = row.try_get("metadata").map_err(DatabaseError::from)?;

        Ok(Session {
            id: row.try_get("id").map_err(DatabaseError::from)?,
            app_name: row.try_get("app_name").map_err(DatabaseError::from)?,
            user_id: row.try_get("user_id").map_err(DatabaseError::from)?,
            project_id: row.try_get("project_id").map_err(DatabaseError::from)?,
            status: status
                .parse()
                .map_err(|e| DatabaseError::Corrupted(format!("{e}")))?,
            events: serde_json::from_str(&events_json)
                .map_err(|e| DatabaseError::Corrupted(format!("bad events json: {e}")))?,
            state: serde_json::from_str(&state_json)
                .map_err(|e| DatabaseError::Corrupted(format!("bad state json: {e}")))?,
            metadata: metadata_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| DatabaseError::Corrupted(format!("bad metadata json: {e}")))?
                .unwrap_or_default(),
            created_at: parse_datetime(
                &row.try_get::<String, _>("created_at")
                    .map_err(DatabaseError::from)?,
            )?,
            last_update_time: parse_datetime(
                &row.try_get::<String, _>("last_update_time")
                    .map_err(DatabaseError::from)?,
            )?,
            terminated_at: parse_datetime_opt(
                row.try_get::<Option<String>, _>("terminated_at")
                    .map_err(DatabaseError::from)?
                    .as_deref(),
            )?,
        })
    }

    /// Insert a new session. Fails with `Constraint` if the id exists.
    pub async fn insert(&self, session: &Session) -> Result<(), DatabaseError> {
        let events = serde_json::to_string(&session.events)
            .map_err(|e| DatabaseError::Corrupted(format!("unserializable events: {e}")))?;
        let state = serde_json::to_string(&session.state)
            .map_err(|e| DatabaseError::Corrupted(format!("unserializable state: {e}")))?;
        let metadata = serde_json::to_string(&session.metadata)
            .map_err(|e| DatabaseError::Corrupted(format!("unserializable metadata: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO sessions (
                id, app_name, user_id, project_id, status, events, state,
                metadata, created_at, last_update_time, terminated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&session.id)
        .bind(&session.app_name)
        .bind(&session.user_id)
        .bind(&session.project_id)
        .bind(session.status.as_str())
        .bind(events)
        .bind(state)
        .bind(metadata)
        .bind(session.created_at.to_rfc3339())
        .bind(session.last_update_time.to_rfc3339())
        .bind(session.terminated_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Session>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    pub async fn list(
        &self,
        project_id: Option<&str>,
        status: Option<SessionStatus>,
        limit: u32,
    ) -> Result<Vec<Session>, DatabaseError> {
        let mut sql = String::from("SELECT * FROM sessions WHERE 1=1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(project) = project_id {
            sql.push_str(" AND project_id = ?");
            binds.push(project.to_string());
        }
        if let Some(status) = status {
            sql.push_str(" AND status = ?");
            binds.push(status.as_str().to_string());
        }
        sql.push_str(&format!(" ORDER BY created_at DESC LIMIT {limit}"));

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_session).collect()
    }

    /// Append an event and merge a state delta, atomically.
    ///
    /// The current blobs are read and written back inside one transaction
    /// so concurrent appends cannot interleave out of order.
    pub async fn append_event(
        &self,
        session_id: &str,
        event: &Event,
        state_delta: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT events, state FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("session {session_id}")))?;

        let events_json: String = row.try_get("events").map_err(DatabaseError::from)?;
        let state_json: String = row.try_get("state").map_err(DatabaseError::from)?;

        let mut events: Vec<Event> = serde_json::from_str(&events_json)
            .map_err(|e| DatabaseError::Corrupted(format!("bad events json: {e}")))?;
        let mut state: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&state_json)
                .map_err(|e| DatabaseError::Corrupted(format!("bad state json: {e}")))?;

        events.push(event.clone());
        if let Some(delta) = state_delta {
            for (key, value) in delta {
                state.insert(key.clone(), value.clone());
            }
        }

        sqlx::query(
            "UPDATE sessions SET events = ?, state = ?, last_update_time = ? WHERE id = ?",
        )
        .bind(serde_json::to_string(&events).map_err(|e| {
            DatabaseError::Corrupted(format!("unserializable events: {e}"))
        })?)
        .bind(serde_json::to_string(&state).map_err(|e| {
            DatabaseError::Corrupted(format!("unserializable state: {e}"))
        })?)
        .bind(Utc::now().to_rfc3339())
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Update lifecycle status; `terminated` also stamps `terminated_at`.
    pub async fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = if status == SessionStatus::Terminated {
            sqlx::query(
                "UPDATE sessions SET status = ?, terminated_at = ?, last_update_time = ?
                 WHERE id = ?",
            )
            .bind(status.as_str())
            .bind(&now)
            .bind(&now)
            .bind(session_id)
            .execute(&self.pool)
            .await?
            .rows_affected()
        } else {
            sqlx::query("UPDATE sessions SET status = ?, last_update_time = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(&now)
                .bind(session_id)
                .execute(&self.pool)
                .await?
                .rows_affected()
        };

        if affected == 0 {
            return Err(DatabaseError::NotFound(format!("session {session_id}")));
        }
        Ok(())
    }

    /// Set a single state key, atomically.
    pub async fn set_state_value(
        &self,
        session_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT state FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("session {session_id}")))?;

        let state_json: String = row.try_get("state").map_err(DatabaseError::from)?;
        let mut state: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&state_json)
                .map_err(|e| DatabaseError::Corrupted(format!("bad state json: {e}")))?;
        state.insert(key.to_string(), value);

        sqlx::query("UPDATE sessions SET state = ?, last_update_time = ? WHERE id = ?")
            .bind(serde_json::to_string(&state).map_err(|e| {
                DatabaseError::Corrupted(format!("unserializable state: {e}"))
            })?)
            .bind(Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Generate a fresh session id.
    pub fn new_session_id() -> String {
        Uuid::new_v4().to_string()
    }
}
