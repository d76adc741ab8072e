//! The coordination substrate facade.
//!
//! One [`Substrate`] serves every request. Managers are built per call from
//! the stored rules, so a `rules.patch` takes effect on the next request
//! without restarting anything.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    claim::{Claim, ClaimOutcome},
    clock::{Clock, SystemClock},
    config::Settings,
    error::require,
    lock::{Lock, LockOutcome, LockValidity, ReleaseOutcome},
    policy::{Action, PolicyEngine, RuleId, Severity, Verdict},
    rules::Rules,
    session::{Holdings, Session, SessionEnd, SessionInit},
    store::Store,
    violations::ViolationRecord,
    zone::{Zone, ZoneConflict},
    Error, Result,
};

#[derive(Debug, Clone)]
pub struct Substrate {
    engine: PolicyEngine,
}

impl Substrate {
    #[must_use]
    pub fn new(store: Store, clock: Arc<dyn Clock>, settings: Settings) -> Self {
        Self {
            engine: PolicyEngine::new(store, clock, settings),
        }
    }

    /// Connect to the configured database with the system clock.
    pub async fn open(settings: Settings) -> Result<Self> {
        let store = Store::connect(&settings.database_url).await?;
        info!(database_url = %settings.database_url, "substrate store opened");
        Ok(Self::new(store, Arc::new(SystemClock), settings))
    }

    #[must_use]
    pub const fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    // Sessions

    pub async fn init_session(&self, agent_id: &str, role: &str) -> Result<SessionInit> {
        let rules = self.rules().await?;
        self.engine
            .session_manager()
            .init(agent_id, role, &rules)
            .await
    }

    pub async fn acknowledge(&self, agent_id: &str) -> Result<Session> {
        let rules = self.rules().await?;
        self.engine
            .session_manager()
            .acknowledge(agent_id, rules.version)
            .await
    }

    pub async fn heartbeat(&self, agent_id: &str) -> Result<DateTime<Utc>> {
        self.engine.session_manager().heartbeat(agent_id).await
    }

    /// End a session, warning about everything still attributed to the agent.
    pub async fn end_session(&self, agent_id: &str) -> Result<SessionEnd> {
        let agent_id = require("agentId", agent_id)?;
        let sessions = self.engine.session_manager();
        if sessions.get(agent_id).await?.is_none() {
            return Err(Error::NotFound(format!(
                "No session for agent '{agent_id}'"
            )));
        }

        let rules = self.rules().await?;
        let held = Holdings {
            locks: keys(self.engine.lock_manager(&rules).held_by(agent_id).await?, |l| l.resource_path),
            zones: keys(self.engine.zone_manager().owned_by(agent_id).await?, |z| z.zone_id),
            claims: keys(self.engine.claim_manager(&rules).list_for(agent_id).await?, |c| c.what),
        };
        sessions.end(agent_id, held).await
    }

    pub async fn get_session(&self, agent_id: &str) -> Result<Session> {
        let agent_id = require("agentId", agent_id)?;
        self.engine
            .session_manager()
            .get(agent_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("No session for agent '{agent_id}'")))
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.engine.session_manager().list().await
    }

    // Policy

    pub async fn check(&self, agent_id: &str, action: Action, target: Option<&str>) -> Result<Verdict> {
        self.engine.check(agent_id, action, target).await
    }

    /// Run the policy check inline when mutation enforcement is on.
    async fn enforce(&self, agent_id: &str, action: Action, target: &str) -> Result<()> {
        if !self.engine.settings().enforce_on_mutation {
            return Ok(());
        }
        let verdict = self.engine.check(agent_id, action, Some(target)).await?;
        let Some(message) = verdict.block_message() else {
            return Ok(());
        };
        warn!(agent_id, action = %action, target, "mutation refused by policy");

        let mut blocking = verdict
            .checks
            .iter()
            .filter(|c| !c.passed && c.severity == Severity::Block);
        let quota_only = matches!(
            (blocking.next(), blocking.next()),
            (Some(c), None) if c.rule == RuleId::ClaimQuota
        );
        if quota_only {
            return Err(self.quota_exceeded(agent_id).await?);
        }
        Err(Error::Blocked(message.to_string()))
    }

    async fn quota_exceeded(&self, agent_id: &str) -> Result<Error> {
        let rules = self.rules().await?;
        let claims = self.engine.claim_manager(&rules);
        let held = claims.list_for(agent_id).await?.len();
        Ok(Error::QuotaExceeded {
            agent_id: agent_id.to_string(),
            held: u32::try_from(held).unwrap_or(u32::MAX),
            max: claims.max_claims(),
        })
    }

    // Locks

    /// Acquire a lock, failing with [`Error::Conflict`] when another agent
    /// holds it.
    pub async fn acquire_lock(
        &self,
        resource_path: &str,
        agent_id: &str,
        reason: Option<&str>,
        resource_type: Option<&str>,
    ) -> Result<LockOutcome> {
        self.enforce(agent_id, Action::Lock, resource_path).await?;
        let rules = self.rules().await?;
        let outcome = self
            .engine
            .lock_manager(&rules)
            .acquire(resource_path, agent_id, reason, resource_type)
            .await?;
        match (&outcome.granted, &outcome.held_by) {
            (false, Some(holder)) => Err(Error::Conflict {
                resource: resource_path.trim().to_string(),
                holder: holder.clone(),
            }),
            _ => Ok(outcome),
        }
    }

    pub async fn release_lock(&self, resource_path: &str, agent_id: &str) -> Result<ReleaseOutcome> {
        let rules = self.rules().await?;
        self.engine
            .lock_manager(&rules)
            .release(resource_path, agent_id)
            .await
    }

    pub async fn list_locks(&self, include_stale: bool) -> Result<Vec<Lock>> {
        let rules = self.rules().await?;
        self.engine.lock_manager(&rules).list(include_stale).await
    }

    pub async fn validate_lock(&self, target: &str, agent_id: &str) -> Result<LockValidity> {
        let rules = self.rules().await?;
        self.engine
            .lock_manager(&rules)
            .is_valid_for(target, agent_id)
            .await
    }

    // Claims

    /// Claim work, failing with [`Error::Conflict`] when another agent holds
    /// it and [`Error::QuotaExceeded`] at the quota.
    pub async fn create_claim(
        &self,
        what: &str,
        agent_id: &str,
        description: Option<&str>,
    ) -> Result<ClaimOutcome> {
        self.enforce(agent_id, Action::Claim, what).await?;
        let rules = self.rules().await?;
        let outcome = self
            .engine
            .claim_manager(&rules)
            .claim(what, agent_id, description)
            .await?;
        match (&outcome.claimed, &outcome.held_by) {
            (false, Some(holder)) => Err(Error::Conflict {
                resource: what.trim().to_string(),
                holder: holder.clone(),
            }),
            _ => Ok(outcome),
        }
    }

    pub async fn release_claim(&self, what: &str, agent_id: &str) -> Result<ReleaseOutcome> {
        let rules = self.rules().await?;
        self.engine.claim_manager(&rules).release(what, agent_id).await
    }

    pub async fn list_claims(&self, include_stale: bool) -> Result<Vec<Claim>> {
        let rules = self.rules().await?;
        self.engine.claim_manager(&rules).list(include_stale).await
    }

    pub async fn handoff_claim(&self, what: &str, from_agent: &str, to_agent: &str) -> Result<Claim> {
        self.enforce(from_agent, Action::Handoff, what).await?;
        let rules = self.rules().await?;
        self.engine
            .claim_manager(&rules)
            .handoff(what, from_agent, to_agent)
            .await
    }

    // Zones

    pub async fn set_zone(
        &self,
        zone_id: &str,
        path: &str,
        owner: &str,
        description: Option<&str>,
    ) -> Result<Zone> {
        self.engine
            .zone_manager()
            .set_owner(zone_id, path, owner, description)
            .await
    }

    pub async fn delete_zone(&self, zone_id: &str) -> Result<bool> {
        self.engine.zone_manager().delete(zone_id).await
    }

    pub async fn list_zones(&self) -> Result<Vec<Zone>> {
        self.engine.zone_manager().list().await
    }

    pub async fn check_zone(&self, target: &str, agent_id: &str) -> Result<ZoneConflict> {
        self.engine.zone_manager().check_conflict(target, agent_id).await
    }

    // Rules and violations

    pub async fn rules(&self) -> Result<Rules> {
        self.engine.rules_store().get().await
    }

    pub async fn patch_rules(&self, section: &str, updates: &Value, admin_key: Option<&str>) -> Result<Rules> {
        self.engine
            .rules_store()
            .patch(section, updates, admin_key)
            .await
    }

    pub async fn violations(&self, limit: Option<u32>, agent_id: Option<&str>) -> Result<Vec<ViolationRecord>> {
        self.engine.violation_log().list(limit, agent_id).await
    }
}

fn keys<T>(items: Vec<T>, key: impl Fn(T) -> String) -> Vec<String> {
    items.into_iter().map(key).collect()
}
