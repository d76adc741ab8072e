//! Lock management: exclusive, path-scoped leases gating file mutation.
//!
//! Acquisition is a single conditional upsert, so of any number of agents
//! racing for the same path at most one is granted. A lock whose
//! `locked_at` is older than the stale threshold no longer counts as held
//! and may be overwritten by the next acquirer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    clock::{self, Clock},
    error::require,
    paths::PathMatching,
    store::Store,
    Error, Result,
};

/// Default lock staleness threshold in minutes.
pub const LOCK_STALE_MINUTES: u32 = 30;

/// Resource type recorded when the caller does not supply one.
pub const DEFAULT_RESOURCE_TYPE: &str = "file-lock";

/// Exclusive mutation rights over one resource path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    /// Path being locked (key)
    pub resource_path: String,
    /// Lock holder
    pub locked_by: String,
    /// Free-text reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Kind of lock, `file-lock` unless stated
    pub resource_type: String,
    /// When acquired or last refreshed
    pub locked_at: DateTime<Utc>,
}

type LockRow = (String, String, Option<String>, String, i64);

impl TryFrom<LockRow> for Lock {
    type Error = Error;

    fn try_from(
        (resource_path, locked_by, reason, resource_type, locked_at): LockRow,
    ) -> Result<Self> {
        Ok(Self {
            resource_path,
            locked_by,
            reason,
            resource_type,
            locked_at: clock::from_millis(locked_at)?,
        })
    }
}

/// Result of an acquire attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockOutcome {
    /// Whether the caller now holds the lock
    pub granted: bool,
    /// Current holder when not granted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_by: Option<String>,
    /// The lock record when granted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<Lock>,
}

/// Result of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseOutcome {
    /// Whether a record was removed (`false` means there was nothing to release)
    pub released: bool,
    /// Key that was released
    pub key: String,
}

/// Whether an agent may mutate a target under current locks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockValidity {
    /// Caller holds a lock covering the target
    pub valid: bool,
    /// Holder of the relevant lock, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    /// Key of the relevant lock, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_path: Option<String>,
}

/// Evaluate a target against a set of live locks.
///
/// An exact key match decides on its own. Otherwise every related lock is
/// considered: one held by another agent in either direction makes the
/// target invalid, and one held by the caller makes it valid only when it
/// sits at or above the target.
#[must_use]
pub fn validity_for(
    locks: &[Lock],
    target: &str,
    agent_id: &str,
    matching: PathMatching,
) -> LockValidity {
    let target = target.trim();
    let relevant = locks
        .iter()
        .find(|l| l.resource_path == target)
        .map(|l| vec![l])
        .unwrap_or_else(|| {
            locks
                .iter()
                .filter(|l| matching.lock_covers(&l.resource_path, target))
                .collect()
        });

    let foreign = relevant.iter().find(|l| l.locked_by != agent_id);
    let own = relevant
        .iter()
        .find(|l| l.locked_by == agent_id && matching.lock_authorizes(&l.resource_path, target));

    match (foreign, own) {
        (Some(other), _) => LockValidity {
            valid: false,
            locked_by: Some(other.locked_by.clone()),
            resource_path: Some(other.resource_path.clone()),
        },
        (None, Some(mine)) => LockValidity {
            valid: true,
            locked_by: Some(mine.locked_by.clone()),
            resource_path: Some(mine.resource_path.clone()),
        },
        (None, None) => LockValidity {
            valid: false,
            locked_by: None,
            resource_path: None,
        },
    }
}

/// Manages path locks in the shared store.
#[derive(Debug, Clone)]
pub struct LockManager {
    store: Store,
    clock: Arc<dyn Clock>,
    stale_minutes: u32,
    matching: PathMatching,
}

impl LockManager {
    /// Create a new `LockManager` with default threshold and matching.
    #[must_use]
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            stale_minutes: LOCK_STALE_MINUTES,
            matching: PathMatching::default(),
        }
    }

    /// Override the staleness threshold.
    #[must_use]
    pub const fn with_stale_minutes(mut self, minutes: u32) -> Self {
        self.stale_minutes = minutes;
        self
    }

    /// Override path matching for [`Self::is_valid_for`].
    #[must_use]
    pub const fn with_matching(mut self, matching: PathMatching) -> Self {
        self.matching = matching;
        self
    }

    /// Acquire (or refresh) the lock on `resource_path`.
    ///
    /// Granted when no live lock exists or the live lock is already held by
    /// `agent_id`; in both cases `locked_at` is set to now.
    pub async fn acquire(
        &self,
        resource_path: &str,
        agent_id: &str,
        reason: Option<&str>,
        resource_type: Option<&str>,
    ) -> Result<LockOutcome> {
        let resource_path = require("resourcePath", resource_path)?;
        let agent_id = require("agentId", agent_id)?;
        let resource_type = resource_type
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_RESOURCE_TYPE);
        let now = self.clock.now();
        let cutoff = clock::stale_cutoff_millis(now, self.stale_minutes);

        let result = sqlx::query(
            "INSERT INTO locks (resource_path, locked_by, reason, resource_type, locked_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(resource_path) DO UPDATE SET
                locked_by = excluded.locked_by,
                reason = excluded.reason,
                resource_type = excluded.resource_type,
                locked_at = excluded.locked_at
             WHERE locks.locked_by = excluded.locked_by OR locks.locked_at <= ?6",
        )
        .bind(resource_path)
        .bind(agent_id)
        .bind(reason)
        .bind(resource_type)
        .bind(clock::to_millis(now))
        .bind(cutoff)
        .execute(self.store.pool())
        .await?;

        if result.rows_affected() == 0 {
            let holder = self.get(resource_path).await?.map(|l| l.locked_by);
            debug!(resource_path, agent_id, holder = ?holder, "lock denied");
            return Ok(LockOutcome {
                granted: false,
                held_by: holder,
                lock: None,
            });
        }

        info!(resource_path, agent_id, "lock granted");
        let lock = self.get(resource_path).await?;
        Ok(LockOutcome {
            granted: true,
            held_by: None,
            lock,
        })
    }

    /// Release a lock. Only the holder can release a live lock.
    ///
    /// Releasing a path with no live lock succeeds without effect.
    pub async fn release(&self, resource_path: &str, agent_id: &str) -> Result<ReleaseOutcome> {
        let resource_path = require("resourcePath", resource_path)?;
        let agent_id = require("agentId", agent_id)?;

        if let Some(live) = self.get(resource_path).await? {
            if live.locked_by != agent_id {
                return Err(Error::NotOwner {
                    resource: resource_path.to_string(),
                    holder: live.locked_by,
                    agent_id: agent_id.to_string(),
                });
            }
        }

        let result = sqlx::query("DELETE FROM locks WHERE resource_path = ?1 AND locked_by = ?2")
            .bind(resource_path)
            .bind(agent_id)
            .execute(self.store.pool())
            .await?;

        let released = result.rows_affected() > 0;
        if released {
            info!(resource_path, agent_id, "lock released");
        }
        Ok(ReleaseOutcome {
            released,
            key: resource_path.to_string(),
        })
    }

    /// Live lock on exactly `resource_path`, if any.
    pub async fn get(&self, resource_path: &str) -> Result<Option<Lock>> {
        let row: Option<LockRow> = sqlx::query_as(
            "SELECT resource_path, locked_by, reason, resource_type, locked_at
             FROM locks WHERE resource_path = ?1 AND locked_at > ?2",
        )
        .bind(resource_path)
        .bind(self.cutoff())
        .fetch_optional(self.store.pool())
        .await?;

        row.map(Lock::try_from).transpose()
    }

    /// All locks, optionally including stale ones not yet reclaimed.
    pub async fn list(&self, include_stale: bool) -> Result<Vec<Lock>> {
        let floor = if include_stale { i64::MIN } else { self.cutoff() };
        let rows: Vec<LockRow> = sqlx::query_as(
            "SELECT resource_path, locked_by, reason, resource_type, locked_at
             FROM locks WHERE locked_at > ?1 ORDER BY resource_path",
        )
        .bind(floor)
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(Lock::try_from).collect()
    }

    /// Live locks held by `agent_id`.
    pub async fn held_by(&self, agent_id: &str) -> Result<Vec<Lock>> {
        let rows: Vec<LockRow> = sqlx::query_as(
            "SELECT resource_path, locked_by, reason, resource_type, locked_at
             FROM locks WHERE locked_by = ?1 AND locked_at > ?2 ORDER BY resource_path",
        )
        .bind(agent_id)
        .bind(self.cutoff())
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(Lock::try_from).collect()
    }

    /// Whether `agent_id` holds a live lock covering `target`.
    pub async fn is_valid_for(&self, target: &str, agent_id: &str) -> Result<LockValidity> {
        let target = require("target", target)?;
        let agent_id = require("agentId", agent_id)?;
        let locks = self.list(false).await?;
        Ok(validity_for(&locks, target, agent_id, self.matching))
    }

    fn cutoff(&self) -> i64 {
        clock::stale_cutoff_millis(self.clock.now(), self.stale_minutes)
    }
}
