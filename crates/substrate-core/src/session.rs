//! Agent sessions.
//!
//! A session is `ACTIVE(unacknowledged)` after `init`, `ACTIVE(acknowledged)`
//! after `acknowledge`, and gone after `end`. Heartbeats only touch
//! `last_activity`; they have no bearing on lock or claim staleness.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{info, warn};

use crate::{
    clock::{self, Clock},
    error::require,
    rules::Rules,
    store::Store,
    Error, Result,
};

/// Lifecycle state of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionState {
    Unacknowledged,
    Acknowledged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub agent_id: String,
    pub role: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub rules_version: u64,
    pub rules_acknowledged: bool,
    pub violation_count: u32,
}

impl Session {
    #[must_use]
    pub const fn state(&self) -> SessionState {
        if self.rules_acknowledged {
            SessionState::Acknowledged
        } else {
            SessionState::Unacknowledged
        }
    }
}

type SessionRow = (String, String, i64, i64, i64, bool, i64);

impl TryFrom<SessionRow> for Session {
    type Error = Error;

    fn try_from(
        (agent_id, role, started_at, last_activity, rules_version, rules_acknowledged, violation_count): SessionRow,
    ) -> Result<Self> {
        Ok(Self {
            agent_id,
            role,
            started_at: clock::from_millis(started_at)?,
            last_activity: clock::from_millis(last_activity)?,
            rules_version: u64::try_from(rules_version)
                .map_err(|e| Error::ParseError(format!("Invalid rules version: {e}")))?,
            rules_acknowledged,
            violation_count: u32::try_from(violation_count).unwrap_or(u32::MAX),
        })
    }
}

/// Result of `session.init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInit {
    pub session: Session,
    pub rules_summary: Vec<String>,
    pub requires_acknowledgment: bool,
}

/// Keys still attributed to an agent when its session ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holdings {
    pub locks: Vec<String>,
    pub zones: Vec<String>,
    pub claims: Vec<String>,
}

impl Holdings {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty() && self.zones.is_empty() && self.claims.is_empty()
    }

    fn warnings(&self) -> Vec<String> {
        [
            ("lock", &self.locks),
            ("zone", &self.zones),
            ("claim", &self.claims),
        ]
        .into_iter()
        .filter(|(_, keys)| !keys.is_empty())
        .map(|(kind, keys)| {
            format!(
                "Still holding {} {kind}(s): {}",
                keys.len(),
                keys.join(", ")
            )
        })
        .collect()
    }
}

/// Result of `session.end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnd {
    pub agent_id: String,
    pub warnings: Vec<String>,
    pub recommendation: String,
    pub held: Holdings,
}

const SESSION_COLUMNS: &str = "agent_id, role, started_at, last_activity, rules_version, \
                               rules_acknowledged, violation_count";

#[derive(Debug, Clone)]
pub struct SessionManager {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Start (or restart) a session. Any prior session for the agent is
    /// replaced, including its acknowledgment and violation count.
    pub async fn init(&self, agent_id: &str, role: &str, rules: &Rules) -> Result<SessionInit> {
        let agent_id = require("agentId", agent_id)?;
        let role = require("role", role)?;
        let now = clock::to_millis(self.clock.now());

        sqlx::query(
            "INSERT INTO sessions (agent_id, role, started_at, last_activity, rules_version,
                                   rules_acknowledged, violation_count)
             VALUES (?1, ?2, ?3, ?3, ?4, 0, 0)
             ON CONFLICT(agent_id) DO UPDATE SET
                role = excluded.role,
                started_at = excluded.started_at,
                last_activity = excluded.last_activity,
                rules_version = excluded.rules_version,
                rules_acknowledged = 0,
                violation_count = 0",
        )
        .bind(agent_id)
        .bind(role)
        .bind(now)
        .bind(i64::try_from(rules.version).unwrap_or(i64::MAX))
        .execute(self.store.pool())
        .await?;

        info!(agent_id, role, rules_version = rules.version, "session started");
        let session = self.require_session(agent_id).await?;
        Ok(SessionInit {
            session,
            rules_summary: rules.summary(role),
            requires_acknowledgment: true,
        })
    }

    /// Mark the current rules as acknowledged.
    pub async fn acknowledge(&self, agent_id: &str, rules_version: u64) -> Result<Session> {
        let agent_id = require("agentId", agent_id)?;
        let result = sqlx::query(
            "UPDATE sessions SET rules_acknowledged = 1, rules_version = ?2, last_activity = ?3
             WHERE agent_id = ?1",
        )
        .bind(agent_id)
        .bind(i64::try_from(rules_version).unwrap_or(i64::MAX))
        .bind(clock::to_millis(self.clock.now()))
        .execute(self.store.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(no_session(agent_id));
        }
        info!(agent_id, rules_version, "rules acknowledged");
        self.require_session(agent_id).await
    }

    /// Record liveness. Returns the new `last_activity`.
    pub async fn heartbeat(&self, agent_id: &str) -> Result<DateTime<Utc>> {
        let agent_id = require("agentId", agent_id)?;
        let now = self.clock.now();
        let result = sqlx::query("UPDATE sessions SET last_activity = ?2 WHERE agent_id = ?1")
            .bind(agent_id)
            .bind(clock::to_millis(now))
            .execute(self.store.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(no_session(agent_id));
        }
        clock::from_millis(clock::to_millis(now))
    }

    /// End a session, reporting what the agent still holds.
    ///
    /// Nothing in `held` is released.
    pub async fn end(&self, agent_id: &str, held: Holdings) -> Result<SessionEnd> {
        let agent_id = require("agentId", agent_id)?;
        let result = sqlx::query("DELETE FROM sessions WHERE agent_id = ?1")
            .bind(agent_id)
            .execute(self.store.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(no_session(agent_id));
        }

        let warnings = held.warnings();
        let recommendation = if held.is_empty() {
            "Clean exit: nothing left held".to_string()
        } else {
            warn!(agent_id, ?held, "session ended with resources still held");
            "Release leftover locks and claims with lock.release and claim.release, hand \
             unfinished work over with claim.handoff, or let them expire"
                .to_string()
        };

        info!(agent_id, "session ended");
        Ok(SessionEnd {
            agent_id: agent_id.to_string(),
            warnings,
            recommendation,
            held,
        })
    }

    pub async fn get(&self, agent_id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE agent_id = ?1"
        ))
        .bind(agent_id)
        .fetch_optional(self.store.pool())
        .await?;

        row.map(Session::try_from).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY started_at, agent_id"
        ))
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(Session::try_from).collect()
    }

    /// Bump the agent's violation count. Returns `false` if it has no session.
    pub async fn record_violation(&self, agent_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET violation_count = violation_count + 1 WHERE agent_id = ?1",
        )
        .bind(agent_id)
        .execute(self.store.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn require_session(&self, agent_id: &str) -> Result<Session> {
        self.get(agent_id)
            .await?
            .ok_or_else(|| no_session(agent_id))
    }
}

fn no_session(agent_id: &str) -> Error {
    Error::NotFound(format!("No session for agent '{agent_id}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, config::Settings};

    async fn setup() -> Result<(SessionManager, ManualClock, Rules)> {
        let store = Store::open_in_memory().await?;
        let clock = ManualClock::new(Utc::now());
        let rules = Rules::from_settings(&Settings::default(), clock.now());
        Ok((SessionManager::new(store, Arc::new(clock.clone())), clock, rules))
    }

    #[tokio::test]
    async fn test_init_starts_unacknowledged() -> Result<()> {
        let (sessions, _, rules) = setup().await?;
        let init = sessions.init("agent-a", "developer", &rules).await?;

        assert!(init.requires_acknowledgment);
        assert!(!init.rules_summary.is_empty());
        assert_eq!(init.session.state(), SessionState::Unacknowledged);
        assert_eq!(init.session.rules_version, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_acknowledge_and_reinit_resets() -> Result<()> {
        let (sessions, _, rules) = setup().await?;
        sessions.init("agent-a", "developer", &rules).await?;
        let acked = sessions.acknowledge("agent-a", rules.version).await?;
        assert_eq!(acked.state(), SessionState::Acknowledged);

        sessions.record_violation("agent-a").await?;
        let again = sessions.init("agent-a", "reviewer", &rules).await?;
        assert_eq!(again.session.state(), SessionState::Unacknowledged);
        assert_eq!(again.session.violation_count, 0);
        assert_eq!(again.session.role, "reviewer");
        assert_eq!(sessions.list().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_operations_without_session_are_not_found() -> Result<()> {
        let (sessions, _, _) = setup().await?;
        assert!(matches!(
            sessions.acknowledge("ghost", 1).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            sessions.heartbeat("ghost").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            sessions.end("ghost", Holdings::default()).await,
            Err(Error::NotFound(_))
        ));
        assert!(!sessions.record_violation("ghost").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_heartbeat_moves_last_activity() -> Result<()> {
        let (sessions, clock, rules) = setup().await?;
        let init = sessions.init("agent-a", "developer", &rules).await?;
        clock.advance_minutes(5);

        let beat = sessions.heartbeat("agent-a").await?;
        assert!(beat > init.session.last_activity);
        Ok(())
    }

    #[tokio::test]
    async fn test_end_warns_about_holdings() -> Result<()> {
        let (sessions, _, rules) = setup().await?;
        sessions.init("agent-a", "developer", &rules).await?;
        let held = Holdings {
            locks: vec!["src/x.ts".to_string()],
            zones: Vec::new(),
            claims: vec!["task-1".to_string(), "task-2".to_string()],
        };

        let end = sessions.end("agent-a", held).await?;
        assert_eq!(end.warnings.len(), 2);
        assert!(end.warnings[1].contains("2 claim(s)"));
        assert!(end.recommendation.contains("lock.release"));
        assert!(sessions.get("agent-a").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_clean_end() -> Result<()> {
        let (sessions, _, rules) = setup().await?;
        sessions.init("agent-a", "developer", &rules).await?;
        let end = sessions.end("agent-a", Holdings::default()).await?;
        assert!(end.warnings.is_empty());
        Ok(())
    }
}
