//! Append-only, capped log of blocked actions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    clock::{self, Clock},
    store::Store,
    Error, Result,
};

/// Default number of records retained.
pub const MAX_VIOLATIONS_LOG: u32 = 1000;

/// Agent id used for entries written by the substrate itself.
pub const SYSTEM_AGENT: &str = "SYSTEM";

/// One failed rule inside a violation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFailure {
    pub rule: String,
    pub message: String,
}

/// A logged violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationRecord {
    pub id: i64,
    pub agent_id: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub failures: Vec<RuleFailure>,
    pub timestamp: DateTime<Utc>,
}

type ViolationRow = (i64, String, String, Option<String>, String, i64);

impl TryFrom<ViolationRow> for ViolationRecord {
    type Error = Error;

    fn try_from((id, agent_id, action, target, failures, timestamp): ViolationRow) -> Result<Self> {
        Ok(Self {
            id,
            agent_id,
            action,
            target,
            failures: serde_json::from_str(&failures)?,
            timestamp: clock::from_millis(timestamp)?,
        })
    }
}

/// Handle to the violation log.
#[derive(Debug, Clone)]
pub struct ViolationLog {
    store: Store,
    clock: Arc<dyn Clock>,
    cap: u32,
}

impl ViolationLog {
    #[must_use]
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            cap: MAX_VIOLATIONS_LOG,
        }
    }

    /// Override the number of records retained.
    #[must_use]
    pub const fn with_cap(mut self, cap: u32) -> Self {
        self.cap = cap;
        self
    }

    /// Append a record, evicting the oldest beyond the cap. Returns its id.
    pub async fn append(
        &self,
        agent_id: &str,
        action: &str,
        target: Option<&str>,
        failures: &[RuleFailure],
    ) -> Result<i64> {
        let body = serde_json::to_string(failures)?;
        let result = sqlx::query(
            "INSERT INTO violations (agent_id, action, target, failures, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(agent_id)
        .bind(action)
        .bind(target)
        .bind(body)
        .bind(clock::to_millis(self.clock.now()))
        .execute(self.store.pool())
        .await?;

        let evicted = sqlx::query(
            "DELETE FROM violations WHERE id <= (
                SELECT id FROM violations ORDER BY id DESC LIMIT 1 OFFSET ?1
             )",
        )
        .bind(i64::from(self.cap))
        .execute(self.store.pool())
        .await?
        .rows_affected();

        if evicted > 0 {
            debug!(evicted, cap = self.cap, "violation log trimmed");
        }
        Ok(result.last_insert_rowid())
    }

    /// Most recent records first, optionally filtered by agent.
    pub async fn list(&self, limit: Option<u32>, agent_id: Option<&str>) -> Result<Vec<ViolationRecord>> {
        let limit = i64::from(limit.unwrap_or(self.cap));
        let rows: Vec<ViolationRow> = sqlx::query_as(
            "SELECT id, agent_id, action, target, failures, timestamp
             FROM violations
             WHERE ?1 IS NULL OR agent_id = ?1
             ORDER BY id DESC LIMIT ?2",
        )
        .bind(agent_id)
        .bind(limit)
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(ViolationRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    async fn setup(cap: u32) -> Result<ViolationLog> {
        let store = Store::open_in_memory().await?;
        Ok(ViolationLog::new(store, Arc::new(SystemClock)).with_cap(cap))
    }

    fn failure(rule: &str) -> Vec<RuleFailure> {
        vec![RuleFailure {
            rule: rule.to_string(),
            message: format!("{rule} failed"),
        }]
    }

    #[tokio::test]
    async fn test_append_and_list_newest_first() -> Result<()> {
        let log = setup(10).await?;
        log.append("agent-a", "file-edit", Some("src/x.ts"), &failure("lock-before-edit"))
            .await?;
        log.append("agent-b", "claim", Some("task-1"), &failure("claim-available"))
            .await?;

        let records = log.list(None, None).await?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].agent_id, "agent-b");
        assert_eq!(records[1].failures[0].rule, "lock-before-edit");
        Ok(())
    }

    #[tokio::test]
    async fn test_cap_evicts_oldest() -> Result<()> {
        let log = setup(3).await?;
        for n in 0..5 {
            log.append(&format!("agent-{n}"), "file-edit", None, &failure("zone-respect"))
                .await?;
        }

        let records = log.list(None, None).await?;
        let agents: Vec<&str> = records.iter().map(|r| r.agent_id.as_str()).collect();
        assert_eq!(agents, vec!["agent-4", "agent-3", "agent-2"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_filter_by_agent_and_limit() -> Result<()> {
        let log = setup(10).await?;
        for agent in ["agent-a", "agent-b", "agent-a", "agent-a"] {
            log.append(agent, "claim", None, &failure("claim-quota")).await?;
        }

        assert_eq!(log.list(None, Some("agent-a")).await?.len(), 3);
        assert_eq!(log.list(Some(2), Some("agent-a")).await?.len(), 2);
        assert!(log.list(None, Some("agent-z")).await?.is_empty());
        Ok(())
    }
}
