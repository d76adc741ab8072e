//! Claim management: exclusive, keyed leases on units of work.
//!
//! Claims behave like locks keyed by an arbitrary identifier (a task id, an
//! issue number) with one extra rule: an agent may hold at most
//! `max_claims` live claims at once. Both the key check and the quota check
//! are folded into a single statement.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    clock::{self, Clock},
    error::require,
    lock::ReleaseOutcome,
    store::Store,
    Error, Result,
};

/// Default claim staleness threshold in minutes.
pub const CLAIM_STALE_MINUTES: u32 = 30;

/// Default per-agent claim quota.
pub const MAX_CLAIMS_PER_AGENT: u32 = 3;

/// Exclusive rights to a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    /// What is claimed (key)
    pub what: String,
    /// Claim holder
    pub by: String,
    /// Free-text description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When claimed
    pub since: DateTime<Utc>,
}

type ClaimRow = (String, String, Option<String>, i64);

impl TryFrom<ClaimRow> for Claim {
    type Error = Error;

    fn try_from((what, by, description, since): ClaimRow) -> Result<Self> {
        Ok(Self {
            what,
            by,
            description,
            since: clock::from_millis(since)?,
        })
    }
}

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
    /// Whether the caller now holds the claim
    pub claimed: bool,
    /// Current holder when not claimed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_by: Option<String>,
    /// The claim record when claimed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim: Option<Claim>,
}

/// Manages work claims in the shared store.
#[derive(Debug, Clone)]
pub struct ClaimManager {
    store: Store,
    clock: Arc<dyn Clock>,
    stale_minutes: u32,
    max_claims: u32,
}

impl ClaimManager {
    /// Create a new `ClaimManager` with default threshold and quota.
    #[must_use]
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            stale_minutes: CLAIM_STALE_MINUTES,
            max_claims: MAX_CLAIMS_PER_AGENT,
        }
    }

    /// Override the staleness threshold.
    #[must_use]
    pub const fn with_stale_minutes(mut self, minutes: u32) -> Self {
        self.stale_minutes = minutes;
        self
    }

    /// Override the per-agent quota.
    #[must_use]
    pub const fn with_max_claims(mut self, max: u32) -> Self {
        self.max_claims = max;
        self
    }

    /// Per-agent quota in effect.
    #[must_use]
    pub const fn max_claims(&self) -> u32 {
        self.max_claims
    }

    /// Claim `what` for `agent_id`.
    ///
    /// Returns `claimed: false` with the holder when another agent holds a
    /// live claim, and [`Error::QuotaExceeded`] when the agent is at its
    /// limit. Re-claiming something the agent already holds refreshes it and
    /// never counts against the quota.
    pub async fn claim(
        &self,
        what: &str,
        agent_id: &str,
        description: Option<&str>,
    ) -> Result<ClaimOutcome> {
        let what = require("what", what)?;
        let agent_id = require("agentId", agent_id)?;
        let now = self.clock.now();
        let cutoff = clock::stale_cutoff_millis(now, self.stale_minutes);

        let result = sqlx::query(
            "INSERT INTO claims (what, claimed_by, description, since)
             SELECT ?1, ?2, ?3, ?4
             WHERE EXISTS (
                    SELECT 1 FROM claims WHERE what = ?1 AND claimed_by = ?2 AND since > ?5
                 )
                OR (SELECT COUNT(*) FROM claims WHERE claimed_by = ?2 AND since > ?5) < ?6
             ON CONFLICT(what) DO UPDATE SET
                claimed_by = excluded.claimed_by,
                description = excluded.description,
                since = excluded.since
             WHERE claims.claimed_by = excluded.claimed_by OR claims.since <= ?5",
        )
        .bind(what)
        .bind(agent_id)
        .bind(description)
        .bind(clock::to_millis(now))
        .bind(cutoff)
        .bind(i64::from(self.max_claims))
        .execute(self.store.pool())
        .await?;

        if result.rows_affected() > 0 {
            info!(what, agent_id, "claim granted");
            return Ok(ClaimOutcome {
                claimed: true,
                held_by: None,
                claim: self.get(what).await?,
            });
        }

        match self.get(what).await? {
            Some(existing) if existing.by != agent_id => {
                debug!(what, agent_id, holder = %existing.by, "claim denied");
                Ok(ClaimOutcome {
                    claimed: false,
                    held_by: Some(existing.by),
                    claim: None,
                })
            }
            _ => {
                let held = self.live_count(agent_id).await?;
                warn!(agent_id, held, max = self.max_claims, "claim quota exceeded");
                Err(Error::QuotaExceeded {
                    agent_id: agent_id.to_string(),
                    held,
                    max: self.max_claims,
                })
            }
        }
    }

    /// Release a claim. Only the holder can release a live claim.
    ///
    /// Releasing something with no live claim succeeds without effect.
    pub async fn release(&self, what: &str, agent_id: &str) -> Result<ReleaseOutcome> {
        let what = require("what", what)?;
        let agent_id = require("agentId", agent_id)?;

        if let Some(live) = self.get(what).await? {
            if live.by != agent_id {
                return Err(Error::NotOwner {
                    resource: what.to_string(),
                    holder: live.by,
                    agent_id: agent_id.to_string(),
                });
            }
        }

        let result = sqlx::query("DELETE FROM claims WHERE what = ?1 AND claimed_by = ?2")
            .bind(what)
            .bind(agent_id)
            .execute(self.store.pool())
            .await?;

        let released = result.rows_affected() > 0;
        if released {
            info!(what, agent_id, "claim released");
        }
        Ok(ReleaseOutcome {
            released,
            key: what.to_string(),
        })
    }

    /// Transfer a live claim from `from_agent` to `to_agent`.
    ///
    /// The transfer is one statement: the claim is only moved if
    /// `from_agent` still holds it live and `to_agent` is under quota. The
    /// receiver's claim starts fresh.
    pub async fn handoff(&self, what: &str, from_agent: &str, to_agent: &str) -> Result<Claim> {
        let what = require("what", what)?;
        let from_agent = require("fromAgent", from_agent)?;
        let to_agent = require("toAgent", to_agent)?;
        if from_agent == to_agent {
            return Err(Error::InvalidInput(
                "Cannot hand off a claim to its current holder".to_string(),
            ));
        }

        let now = self.clock.now();
        let cutoff = clock::stale_cutoff_millis(now, self.stale_minutes);
        let result = sqlx::query(
            "UPDATE claims SET claimed_by = ?3, since = ?4
             WHERE what = ?1 AND claimed_by = ?2 AND since > ?5
               AND (SELECT COUNT(*) FROM claims WHERE claimed_by = ?3 AND since > ?5) < ?6",
        )
        .bind(what)
        .bind(from_agent)
        .bind(to_agent)
        .bind(clock::to_millis(now))
        .bind(cutoff)
        .bind(i64::from(self.max_claims))
        .execute(self.store.pool())
        .await?;

        if result.rows_affected() > 0 {
            info!(what, from_agent, to_agent, "claim handed off");
            return self
                .get(what)
                .await?
                .ok_or_else(|| Error::NotFound(format!("claim '{what}'")));
        }

        match self.get(what).await? {
            None => Err(Error::NotFound(format!("No live claim on '{what}'"))),
            Some(live) if live.by != from_agent => Err(Error::NotOwner {
                resource: what.to_string(),
                holder: live.by,
                agent_id: from_agent.to_string(),
            }),
            Some(_) => Err(Error::QuotaExceeded {
                agent_id: to_agent.to_string(),
                held: self.live_count(to_agent).await?,
                max: self.max_claims,
            }),
        }
    }

    /// Live claim on `what`, if any.
    pub async fn get(&self, what: &str) -> Result<Option<Claim>> {
        let row: Option<ClaimRow> = sqlx::query_as(
            "SELECT what, claimed_by, description, since
             FROM claims WHERE what = ?1 AND since > ?2",
        )
        .bind(what)
        .bind(self.cutoff())
        .fetch_optional(self.store.pool())
        .await?;

        row.map(Claim::try_from).transpose()
    }

    /// Live claims held by `agent_id`.
    pub async fn list_for(&self, agent_id: &str) -> Result<Vec<Claim>> {
        let rows: Vec<ClaimRow> = sqlx::query_as(
            "SELECT what, claimed_by, description, since
             FROM claims WHERE claimed_by = ?1 AND since > ?2 ORDER BY since, what",
        )
        .bind(agent_id)
        .bind(self.cutoff())
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(Claim::try_from).collect()
    }

    /// All claims, optionally including stale ones not yet reclaimed.
    pub async fn list(&self, include_stale: bool) -> Result<Vec<Claim>> {
        let floor = if include_stale { i64::MIN } else { self.cutoff() };
        let rows: Vec<ClaimRow> = sqlx::query_as(
            "SELECT what, claimed_by, description, since
             FROM claims WHERE since > ?1 ORDER BY what",
        )
        .bind(floor)
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(Claim::try_from).collect()
    }

    async fn live_count(&self, agent_id: &str) -> Result<u32> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM claims WHERE claimed_by = ?1 AND since > ?2")
                .bind(agent_id)
                .bind(self.cutoff())
                .fetch_one(self.store.pool())
                .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn cutoff(&self) -> i64 {
        clock::stale_cutoff_millis(self.clock.now(), self.stale_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    async fn setup() -> Result<(ClaimManager, ManualClock)> {
        let store = Store::open_in_memory().await?;
        let clock = ManualClock::new(Utc::now());
        let mgr = ClaimManager::new(store, Arc::new(clock.clone()));
        Ok((mgr, clock))
    }

    #[tokio::test]
    async fn test_claim_free_item() -> Result<()> {
        let (mgr, _) = setup().await?;
        let outcome = mgr.claim("task-1", "agent-a", Some("fix parser")).await?;

        assert!(outcome.claimed);
        let claim = outcome.claim.ok_or_else(|| Error::NotFound("claim".into()))?;
        assert_eq!(claim.by, "agent-a");
        assert_eq!(claim.description.as_deref(), Some("fix parser"));
        Ok(())
    }

    #[tokio::test]
    async fn test_claim_conflict_reports_holder() -> Result<()> {
        let (mgr, _) = setup().await?;
        mgr.claim("task-1", "agent-a", None).await?;
        let outcome = mgr.claim("task-1", "agent-b", None).await?;

        assert!(!outcome.claimed);
        assert_eq!(outcome.held_by.as_deref(), Some("agent-a"));
        Ok(())
    }

    #[tokio::test]
    async fn test_quota_then_release_allows_one_more() -> Result<()> {
        let (mgr, _) = setup().await?;
        for task in ["t1", "t2", "t3"] {
            assert!(mgr.claim(task, "agent-a", None).await?.claimed);
        }

        let fourth = mgr.claim("t4", "agent-a", None).await;
        assert!(matches!(
            fourth,
            Err(Error::QuotaExceeded { held: 3, max: 3, .. })
        ));

        mgr.release("t2", "agent-a").await?;
        assert!(mgr.claim("t4", "agent-a", None).await?.claimed);
        assert_eq!(mgr.list_for("agent-a").await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_reclaim_own_item_at_quota() -> Result<()> {
        let (mgr, _) = setup().await?;
        for task in ["t1", "t2", "t3"] {
            mgr.claim(task, "agent-a", None).await?;
        }
        let again = mgr.claim("t1", "agent-a", Some("still on it")).await?;
        assert!(again.claimed);
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_claims_do_not_count_against_quota() -> Result<()> {
        let (mgr, clock) = setup().await?;
        for task in ["t1", "t2", "t3"] {
            mgr.claim(task, "agent-a", None).await?;
        }
        clock.advance_minutes(31);

        assert!(mgr.claim("t4", "agent-a", None).await?.claimed);
        assert!(mgr.claim("t1", "agent-b", None).await?.claimed);
        Ok(())
    }

    #[tokio::test]
    async fn test_release_by_non_holder_fails() -> Result<()> {
        let (mgr, _) = setup().await?;
        mgr.claim("task-1", "agent-a", None).await?;
        let result = mgr.release("task-1", "agent-b").await;
        assert!(matches!(result, Err(Error::NotOwner { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_handoff_moves_claim() -> Result<()> {
        let (mgr, _) = setup().await?;
        mgr.claim("task-1", "agent-a", None).await?;

        let moved = mgr.handoff("task-1", "agent-a", "agent-b").await?;
        assert_eq!(moved.by, "agent-b");
        assert!(mgr.list_for("agent-a").await?.is_empty());
        assert_eq!(mgr.list(false).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_handoff_requires_holder() -> Result<()> {
        let (mgr, _) = setup().await?;
        mgr.claim("task-1", "agent-a", None).await?;

        let stolen = mgr.handoff("task-1", "agent-c", "agent-b").await;
        assert!(matches!(stolen, Err(Error::NotOwner { .. })));

        let missing = mgr.handoff("task-9", "agent-a", "agent-b").await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_handoff_respects_receiver_quota() -> Result<()> {
        let (mgr, _) = setup().await?;
        let mgr = mgr.with_max_claims(1);
        mgr.claim("task-1", "agent-a", None).await?;
        mgr.claim("task-2", "agent-b", None).await?;

        let result = mgr.handoff("task-1", "agent-a", "agent-b").await;
        assert!(matches!(result, Err(Error::QuotaExceeded { .. })));
        assert_eq!(
            mgr.get("task-1").await?.map(|c| c.by).as_deref(),
            Some("agent-a")
        );
        Ok(())
    }
}
