//! Stale lease reclamation.
//!
//! Locks and claims whose age in whole minutes exceeds the configured
//! threshold are deleted. Each delete is guarded by the timestamp that was
//! read, so a lease refreshed between the read and the delete survives.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    clock::{self, Clock},
    store::Store,
    Result,
};

/// Keys removed by one reclaim pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleCleaned {
    pub locks: Vec<String>,
    pub claims: Vec<String>,
}

impl StaleCleaned {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty() && self.claims.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum Lease {
    Lock,
    Claim,
}

impl Lease {
    const fn select_sql(self) -> &'static str {
        match self {
            Self::Lock => "SELECT resource_path, locked_at FROM locks",
            Self::Claim => "SELECT what, since FROM claims",
        }
    }

    const fn delete_sql(self) -> &'static str {
        match self {
            Self::Lock => "DELETE FROM locks WHERE resource_path = ?1 AND locked_at = ?2",
            Self::Claim => "DELETE FROM claims WHERE what = ?1 AND since = ?2",
        }
    }
}

/// Deletes expired locks and claims.
#[derive(Debug, Clone)]
pub struct StaleReclaimer {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl StaleReclaimer {
    #[must_use]
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Run one pass with the given thresholds.
    ///
    /// Never fails: a sweep that errors is logged and stops early, and every
    /// key deleted before the error is still reported.
    pub async fn reclaim(&self, lock_minutes: u32, claim_minutes: u32) -> StaleCleaned {
        let cleaned = StaleCleaned {
            locks: self.sweep(Lease::Lock, lock_minutes).await,
            claims: self.sweep(Lease::Claim, claim_minutes).await,
        };
        if cleaned.is_empty() {
            debug!("no stale leases");
        } else {
            info!(locks = ?cleaned.locks, claims = ?cleaned.claims, "reclaimed stale leases");
        }
        cleaned
    }

    async fn sweep(&self, lease: Lease, threshold_minutes: u32) -> Vec<String> {
        let mut removed = Vec::new();
        if let Err(e) = self.sweep_into(lease, threshold_minutes, &mut removed).await {
            warn!(?lease, error = %e, removed = removed.len(), "stale sweep failed");
        }
        removed
    }

    async fn sweep_into(
        &self,
        lease: Lease,
        threshold_minutes: u32,
        removed: &mut Vec<String>,
    ) -> Result<()> {
        let now = self.clock.now();
        let rows: Vec<(String, i64)> = sqlx::query_as(lease.select_sql())
            .fetch_all(self.store.pool())
            .await?;

        for (key, created) in rows {
            if !clock::is_stale(clock::from_millis(created)?, now, threshold_minutes) {
                continue;
            }
            let result = sqlx::query(lease.delete_sql())
                .bind(&key)
                .bind(created)
                .execute(self.store.pool())
                .await?;
            if result.rows_affected() > 0 {
                removed.push(key);
            }
        }
        Ok(())
    }
}
