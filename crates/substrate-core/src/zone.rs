//! Zone ownership: long-lived path-prefix territories.
//!
//! Zones are not leases; they never go stale and only disappear when
//! deleted. When several zones contain a target the earliest declared one
//! decides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::{
    clock::{self, Clock},
    error::require,
    paths::PathMatching,
    store::Store,
    Error, Result,
};

/// An ownership territory over a path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    /// Zone identifier (key)
    pub zone_id: String,
    /// Path prefix covered
    pub path: String,
    /// Owning agent
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

type ZoneRow = (String, String, String, Option<String>, i64);

impl TryFrom<ZoneRow> for Zone {
    type Error = Error;

    fn try_from((zone_id, path, owner, description, updated_at): ZoneRow) -> Result<Self> {
        Ok(Self {
            zone_id,
            path,
            owner,
            description,
            updated_at: clock::from_millis(updated_at)?,
        })
    }
}

/// Whether a target lies in a zone owned by someone else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneConflict {
    pub conflict: bool,
    /// First zone containing the target, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owning_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Find the first zone containing `target` and report whether it belongs to
/// another agent. `zones` must be in declaration order.
#[must_use]
pub fn find_conflict(
    zones: &[Zone],
    target: &str,
    agent_id: &str,
    matching: PathMatching,
) -> ZoneConflict {
    zones
        .iter()
        .find(|z| matching.zone_contains(&z.path, target))
        .map_or(
            ZoneConflict {
                conflict: false,
                owning_zone: None,
                owner: None,
                path: None,
            },
            |z| ZoneConflict {
                conflict: z.owner != agent_id,
                owning_zone: Some(z.zone_id.clone()),
                owner: Some(z.owner.clone()),
                path: Some(z.path.clone()),
            },
        )
}

/// Manages zones in the shared store.
#[derive(Debug, Clone)]
pub struct ZoneManager {
    store: Store,
    clock: Arc<dyn Clock>,
    matching: PathMatching,
}

impl ZoneManager {
    #[must_use]
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            matching: PathMatching::default(),
        }
    }

    /// Override path matching for [`Self::check_conflict`].
    #[must_use]
    pub const fn with_matching(mut self, matching: PathMatching) -> Self {
        self.matching = matching;
        self
    }

    /// Create or replace a zone. Last writer wins; a replaced zone keeps its
    /// original declaration position.
    pub async fn set_owner(
        &self,
        zone_id: &str,
        path: &str,
        owner: &str,
        description: Option<&str>,
    ) -> Result<Zone> {
        let zone_id = require("zoneId", zone_id)?;
        let path = require("path", path)?;
        let owner = require("owner", owner)?;
        let now = self.clock.now();

        sqlx::query(
            "INSERT INTO zones (zone_id, path, owner, description, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(zone_id) DO UPDATE SET
                path = excluded.path,
                owner = excluded.owner,
                description = excluded.description,
                updated_at = excluded.updated_at",
        )
        .bind(zone_id)
        .bind(path)
        .bind(owner)
        .bind(description)
        .bind(clock::to_millis(now))
        .execute(self.store.pool())
        .await?;

        info!(zone_id, path, owner, "zone set");
        Ok(Zone {
            zone_id: zone_id.to_string(),
            path: path.to_string(),
            owner: owner.to_string(),
            description: description.map(str::to_string),
            updated_at: clock::from_millis(clock::to_millis(now))?,
        })
    }

    /// Delete a zone. Returns whether it existed.
    pub async fn delete(&self, zone_id: &str) -> Result<bool> {
        let zone_id = require("zoneId", zone_id)?;
        let result = sqlx::query("DELETE FROM zones WHERE zone_id = ?1")
            .bind(zone_id)
            .execute(self.store.pool())
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(zone_id, "zone deleted");
        }
        Ok(deleted)
    }

    /// All zones in declaration order.
    pub async fn list(&self) -> Result<Vec<Zone>> {
        let rows: Vec<ZoneRow> = sqlx::query_as(
            "SELECT zone_id, path, owner, description, updated_at FROM zones ORDER BY rowid",
        )
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(Zone::try_from).collect()
    }

    /// Zones owned by `agent_id`.
    pub async fn owned_by(&self, agent_id: &str) -> Result<Vec<Zone>> {
        let rows: Vec<ZoneRow> = sqlx::query_as(
            "SELECT zone_id, path, owner, description, updated_at
             FROM zones WHERE owner = ?1 ORDER BY rowid",
        )
        .bind(agent_id)
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(Zone::try_from).collect()
    }

    /// Check whether `target` falls in a zone owned by another agent.
    pub async fn check_conflict(&self, target: &str, agent_id: &str) -> Result<ZoneConflict> {
        let target = require("target", target)?;
        let agent_id = require("agentId", agent_id)?;
        let zones = self.list().await?;
        Ok(find_conflict(&zones, target, agent_id, self.matching))
    }
}
