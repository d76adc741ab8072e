//! The policy engine behind `substrate.check`.
//!
//! A check reclaims stale leases, snapshots locks, zones, claims and the
//! caller's session, then runs the rule checks that apply to the requested
//! action. Evaluation over the snapshot is pure ([`evaluate`]); the engine
//! wraps it with loading and the violation-log side effects.
//!
//! Only `block` checks can make a verdict disallowed. `warn` checks are
//! reported back to the caller, `log` checks are also written to the
//! violation log.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, warn};

use crate::{
    claim::{Claim, ClaimManager},
    clock::Clock,
    config::Settings,
    error::require,
    lock::{validity_for, Lock, LockManager},
    paths::PathMatching,
    reclaim::{StaleCleaned, StaleReclaimer},
    rules::{Rules, RulesStore},
    session::{Session, SessionManager, SessionState},
    store::Store,
    violations::{RuleFailure, ViolationLog, SYSTEM_AGENT},
    zone::{find_conflict, Zone, ZoneManager},
    Result,
};

/// A gated action an agent asks permission for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Action {
    FileEdit,
    FileCreate,
    FileDelete,
    ZoneEnter,
    TaskStart,
    Claim,
    Lock,
    Unlock,
    ReleaseLock,
    Handoff,
}

impl Action {
    const fn is_file_mutation(self) -> bool {
        matches!(self, Self::FileEdit | Self::FileCreate | Self::FileDelete)
    }

    const fn enters_zone(self) -> bool {
        matches!(self, Self::FileEdit | Self::FileCreate | Self::ZoneEnter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Block,
    Warn,
    Log,
}

/// Identifier of an individual check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RuleId {
    SessionActive,
    RulesAcknowledged,
    TargetRequired,
    LockBeforeEdit,
    ZoneRespect,
    ClaimBeforeWork,
    ClaimQuota,
    ClaimAvailable,
    LockAvailable,
    LockOwnership,
    HandoffOwnership,
    DestructiveAction,
}

impl RuleId {
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::SessionActive | Self::RulesAcknowledged | Self::TargetRequired => Severity::Warn,
            Self::DestructiveAction => Severity::Log,
            Self::LockBeforeEdit
            | Self::ZoneRespect
            | Self::ClaimBeforeWork
            | Self::ClaimQuota
            | Self::ClaimAvailable
            | Self::LockAvailable
            | Self::LockOwnership
            | Self::HandoffOwnership => Severity::Block,
        }
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCheck {
    pub rule: RuleId,
    pub severity: Severity,
    pub passed: bool,
    pub message: String,
}

impl RuleCheck {
    fn pass(rule: RuleId, message: impl Into<String>) -> Self {
        Self {
            rule,
            severity: rule.severity(),
            passed: true,
            message: message.into(),
        }
    }

    fn fail(rule: RuleId, message: impl Into<String>) -> Self {
        Self {
            rule,
            severity: rule.severity(),
            passed: false,
            message: message.into(),
        }
    }

    fn outcome(rule: RuleId, result: std::result::Result<String, String>) -> Self {
        match result {
            Ok(message) => Self::pass(rule, message),
            Err(message) => Self::fail(rule, message),
        }
    }

    fn failed_with(&self, severity: Severity) -> bool {
        !self.passed && self.severity == severity
    }
}

/// Verdict returned by `substrate.check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub allowed: bool,
    pub agent_id: String,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub checks: Vec<RuleCheck>,
    /// Messages of failed `block` checks
    pub violations: Vec<String>,
    /// Messages of failed `warn` checks
    pub warnings: Vec<String>,
    pub stale_cleaned: StaleCleaned,
}

impl Verdict {
    /// First blocking message, if the verdict is disallowed.
    #[must_use]
    pub fn block_message(&self) -> Option<&str> {
        self.violations.first().map(String::as_str)
    }
}

/// Snapshot a check is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub agent_id: &'a str,
    pub action: Action,
    pub target: Option<&'a str>,
    pub session: Option<&'a Session>,
    pub rules: &'a Rules,
    /// Live locks
    pub locks: &'a [Lock],
    /// Zones in declaration order
    pub zones: &'a [Zone],
    /// Live claims
    pub claims: &'a [Claim],
    pub matching: PathMatching,
}

/// Run every check that applies to the context's action.
#[must_use]
pub fn evaluate(ctx: &CheckContext<'_>) -> Vec<RuleCheck> {
    let mut checks = session_checks(ctx);

    let Some(target) = ctx.target else {
        checks.push(RuleCheck::fail(
            RuleId::TargetRequired,
            format!("Action {} needs a target; pass target=\"<path or task>\"", ctx.action),
        ));
        if ctx.action == Action::Claim {
            checks.push(claim_quota(ctx, None));
        }
        return checks;
    };

    if ctx.action.is_file_mutation() {
        checks.push(lock_before_edit(ctx, target));
    }
    if ctx.action.enters_zone() && ctx.rules.zones.enforce_ownership {
        checks.push(zone_respect(ctx, target));
    }

    match ctx.action {
        Action::TaskStart => checks.push(claim_before_work(ctx, target)),
        Action::Claim => {
            checks.push(claim_quota(ctx, Some(target)));
            checks.push(claim_available(ctx, target));
        }
        Action::Lock => checks.push(lock_available(ctx, target)),
        Action::Unlock | Action::ReleaseLock => checks.push(lock_ownership(ctx, target)),
        Action::Handoff => checks.push(handoff_ownership(ctx, target)),
        Action::FileDelete => checks.push(RuleCheck::fail(
            RuleId::DestructiveAction,
            format!("{} is deleting '{target}'", ctx.agent_id),
        )),
        Action::FileEdit | Action::FileCreate | Action::ZoneEnter => {}
    }

    checks
}

fn session_checks(ctx: &CheckContext<'_>) -> Vec<RuleCheck> {
    let coordination = &ctx.rules.coordination;
    let mut checks = Vec::new();
    match ctx.session {
        None if coordination.require_session_init => checks.push(RuleCheck::fail(
            RuleId::SessionActive,
            format!(
                "No active session; call session.init(agentId=\"{}\", role=\"<role>\") first",
                ctx.agent_id
            ),
        )),
        None => {}
        Some(session) => {
            checks.push(RuleCheck::pass(RuleId::SessionActive, "Session active"));
            if coordination.require_rules_acknowledgment {
                checks.push(RuleCheck::outcome(
                    RuleId::RulesAcknowledged,
                    match session.state() {
                        SessionState::Acknowledged => Ok("Rules acknowledged".to_string()),
                        SessionState::Unacknowledged => Err(format!(
                            "Rules not acknowledged; call session.acknowledge(agentId=\"{}\")",
                            ctx.agent_id
                        )),
                    },
                ));
            }
        }
    }
    checks
}

fn lock_before_edit(ctx: &CheckContext<'_>, target: &str) -> RuleCheck {
    let validity = validity_for(ctx.locks, target, ctx.agent_id, ctx.matching);
    RuleCheck::outcome(
        RuleId::LockBeforeEdit,
        match (validity.valid, validity.locked_by, validity.resource_path) {
            (true, _, path) => Ok(format!(
                "Lock held on '{}'",
                path.as_deref().unwrap_or(target)
            )),
            (false, Some(holder), path) => Err(format!(
                "'{}' is locked by {holder}; wait for {holder} to release it",
                path.as_deref().unwrap_or(target)
            )),
            (false, None, _) => Err(format!(
                "No lock on '{target}'; you must lock first: lock.acquire(resourcePath=\"{target}\", agentId=\"{}\")",
                ctx.agent_id
            )),
        },
    )
}

fn zone_respect(ctx: &CheckContext<'_>, target: &str) -> RuleCheck {
    let zone = find_conflict(ctx.zones, target, ctx.agent_id, ctx.matching);
    let zone_id = zone.owning_zone.unwrap_or_default();
    RuleCheck::outcome(
        RuleId::ZoneRespect,
        match (zone.conflict, zone.owner) {
            (true, Some(owner)) => Err(format!(
                "'{target}' is in zone {zone_id} owned by {owner}; ask {owner} before touching it"
            )),
            (_, Some(_)) => Ok(format!("'{target}' is in your zone {zone_id}")),
            (_, None) => Ok(format!("'{target}' is not in any owned zone")),
        },
    )
}

fn live_claim<'a>(ctx: &CheckContext<'a>, what: &str) -> Option<&'a Claim> {
    ctx.claims.iter().find(|c| c.what == what)
}

fn claim_before_work(ctx: &CheckContext<'_>, target: &str) -> RuleCheck {
    RuleCheck::outcome(
        RuleId::ClaimBeforeWork,
        match live_claim(ctx, target) {
            Some(c) if c.by == ctx.agent_id => Ok(format!("You hold the claim on '{target}'")),
            Some(c) => Err(format!("'{target}' is claimed by {}; pick other work", c.by)),
            None => Err(format!(
                "'{target}' is not claimed; claim it first: claim.create(what=\"{target}\", agentId=\"{}\")",
                ctx.agent_id
            )),
        },
    )
}

fn claim_quota(ctx: &CheckContext<'_>, target: Option<&str>) -> RuleCheck {
    let max = ctx.rules.coordination.max_concurrent_claims_per_agent;
    let already_mine = target
        .and_then(|t| live_claim(ctx, t))
        .is_some_and(|c| c.by == ctx.agent_id);
    let held = ctx.claims.iter().filter(|c| c.by == ctx.agent_id).count();
    let held = u32::try_from(held).unwrap_or(u32::MAX);

    RuleCheck::outcome(
        RuleId::ClaimQuota,
        if already_mine || held < max {
            Ok(format!("{held} of {max} claims in use"))
        } else {
            Err(format!(
                "You hold {held} of {max} allowed claims; release one with claim.release first"
            ))
        },
    )
}

fn claim_available(ctx: &CheckContext<'_>, target: &str) -> RuleCheck {
    RuleCheck::outcome(
        RuleId::ClaimAvailable,
        match live_claim(ctx, target) {
            Some(c) if c.by != ctx.agent_id => Err(format!("'{target}' is already claimed by {}", c.by)),
            _ => Ok(format!("'{target}' is available")),
        },
    )
}

fn lock_available(ctx: &CheckContext<'_>, target: &str) -> RuleCheck {
    let validity = validity_for(ctx.locks, target, ctx.agent_id, ctx.matching);
    RuleCheck::outcome(
        RuleId::LockAvailable,
        match (validity.valid, validity.locked_by, validity.resource_path) {
            (false, Some(holder), path) => Err(format!(
                "'{}' is locked by {holder}",
                path.as_deref().unwrap_or(target)
            )),
            _ => Ok(format!("'{target}' can be locked")),
        },
    )
}

fn lock_ownership(ctx: &CheckContext<'_>, target: &str) -> RuleCheck {
    RuleCheck::outcome(
        RuleId::LockOwnership,
        match ctx.locks.iter().find(|l| l.resource_path == target) {
            Some(l) if l.locked_by != ctx.agent_id => Err(format!(
                "'{target}' is locked by {}; only {} can release it",
                l.locked_by, l.locked_by
            )),
            Some(_) => Ok(format!("You hold the lock on '{target}'")),
            None => Ok(format!("No live lock on '{target}'")),
        },
    )
}

fn handoff_ownership(ctx: &CheckContext<'_>, target: &str) -> RuleCheck {
    RuleCheck::outcome(
        RuleId::HandoffOwnership,
        match live_claim(ctx, target) {
            Some(c) if c.by == ctx.agent_id => Ok(format!("You hold the claim on '{target}'")),
            Some(c) => Err(format!(
                "'{target}' is claimed by {}; only the holder can hand it off",
                c.by
            )),
            None => Err(format!("'{target}' is not claimed; nothing to hand off")),
        },
    )
}

fn failures(checks: &[RuleCheck], severity: Severity) -> Vec<RuleFailure> {
    checks
        .iter()
        .filter(|c| c.failed_with(severity))
        .map(|c| RuleFailure {
            rule: c.rule.to_string(),
            message: c.message.clone(),
        })
        .collect()
}

/// Evaluates checks against the shared store.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    store: Store,
    clock: Arc<dyn Clock>,
    settings: Settings,
}

impl PolicyEngine {
    #[must_use]
    pub fn new(store: Store, clock: Arc<dyn Clock>, settings: Settings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn rules_store(&self) -> RulesStore {
        RulesStore::new(self.store.clone(), Arc::clone(&self.clock), self.settings.clone())
    }

    /// Lock manager using the thresholds in `rules`.
    #[must_use]
    pub fn lock_manager(&self, rules: &Rules) -> LockManager {
        LockManager::new(self.store.clone(), Arc::clone(&self.clock))
            .with_stale_minutes(rules.coordination.lock_expiry_minutes)
            .with_matching(self.settings.path_matching)
    }

    /// Claim manager using the thresholds and quota in `rules`.
    #[must_use]
    pub fn claim_manager(&self, rules: &Rules) -> ClaimManager {
        ClaimManager::new(self.store.clone(), Arc::clone(&self.clock))
            .with_stale_minutes(rules.coordination.claim_expiry_minutes)
            .with_max_claims(rules.coordination.max_concurrent_claims_per_agent)
    }

    #[must_use]
    pub fn zone_manager(&self) -> ZoneManager {
        ZoneManager::new(self.store.clone(), Arc::clone(&self.clock))
            .with_matching(self.settings.path_matching)
    }

    #[must_use]
    pub fn session_manager(&self) -> SessionManager {
        SessionManager::new(self.store.clone(), Arc::clone(&self.clock))
    }

    #[must_use]
    pub fn violation_log(&self) -> ViolationLog {
        ViolationLog::new(self.store.clone(), Arc::clone(&self.clock))
            .with_cap(self.settings.max_violations_log)
    }

    /// Evaluate whether `agent_id` may perform `action` on `target`.
    pub async fn check(&self, agent_id: &str, action: Action, target: Option<&str>) -> Result<Verdict> {
        let agent_id = require("agentId", agent_id)?;
        let target = target.map(str::trim).filter(|t| !t.is_empty());
        let rules = self.rules_store().get().await?;

        let stale_cleaned = StaleReclaimer::new(self.store.clone(), Arc::clone(&self.clock))
            .reclaim(
                rules.coordination.lock_expiry_minutes,
                rules.coordination.claim_expiry_minutes,
            )
            .await;

        let locks = self.lock_manager(&rules).list(false).await?;
        let claims = self.claim_manager(&rules).list(false).await?;
        let zones = self.zone_manager().list().await?;
        let sessions = self.session_manager();
        let session = sessions.get(agent_id).await?;

        let checks = evaluate(&CheckContext {
            agent_id,
            action,
            target,
            session: session.as_ref(),
            rules: &rules,
            locks: &locks,
            zones: &zones,
            claims: &claims,
            matching: self.settings.path_matching,
        });

        let log = self.violation_log();
        let action_name = action.to_string();
        let blocked = failures(&checks, Severity::Block);
        if !blocked.is_empty() {
            let rules: Vec<&str> = blocked.iter().map(|f| f.rule.as_str()).collect();
            warn!(agent_id, action = %action, target, ?rules, "action blocked");
            log.append(agent_id, &action_name, target, &blocked).await?;
            sessions.record_violation(agent_id).await?;
        }
        let logged = failures(&checks, Severity::Log);
        if !logged.is_empty() {
            log.append(agent_id, &action_name, target, &logged).await?;
        }
        if !stale_cleaned.is_empty() {
            let cleanup: Vec<RuleFailure> = stale_cleaned
                .locks
                .iter()
                .map(|k| ("stale-lock", k))
                .chain(stale_cleaned.claims.iter().map(|k| ("stale-claim", k)))
                .map(|(rule, key)| RuleFailure {
                    rule: rule.to_string(),
                    message: format!("Reclaimed '{key}' after expiry"),
                })
                .collect();
            log.append(SYSTEM_AGENT, "auto-cleanup", None, &cleanup).await?;
        }

        let verdict = Verdict {
            allowed: blocked.is_empty(),
            agent_id: agent_id.to_string(),
            action,
            target: target.map(str::to_string),
            violations: blocked.into_iter().map(|f| f.message).collect(),
            warnings: checks
                .iter()
                .filter(|c| c.failed_with(Severity::Warn))
                .map(|c| c.message.clone())
                .collect(),
            checks,
            stale_cleaned,
        };
        debug!(agent_id, action = %action, allowed = verdict.allowed, "check evaluated");
        Ok(verdict)
    }
}
