//! Versioned coordination rules.
//!
//! The rules document lives in the store as a single row. It is seeded from
//! [`Settings`] the first time it is read and afterwards only changes through
//! [`RulesStore::patch`], which bumps the version. Only the `coordination`
//! thresholds drive engine behavior; the other sections are carried,
//! validated by type and summarized for agents.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use tracing::{info, warn};

use crate::{
    clock::Clock,
    config::Settings,
    store::Store,
    Error, Result,
};

/// The full rules document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rules {
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub coordination: CoordinationRules,
    pub roles: BTreeMap<String, RoleRules>,
    pub zones: ZoneRules,
    pub conflicts: ConflictRules,
    pub communication: CommunicationRules,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct CoordinationRules {
    pub max_concurrent_claims_per_agent: u32,
    pub claim_expiry_minutes: u32,
    pub lock_expiry_minutes: u32,
    pub require_session_init: bool,
    pub require_rules_acknowledgment: bool,
}

impl Default for CoordinationRules {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            max_concurrent_claims_per_agent: settings.max_claims_per_agent,
            claim_expiry_minutes: settings.claim_stale_minutes,
            lock_expiry_minutes: settings.lock_stale_minutes,
            require_session_init: true,
            require_rules_acknowledgment: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RoleRules {
    pub description: String,
    pub can_own_zones: bool,
    pub can_claim_tasks: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ZoneRules {
    pub enforce_ownership: bool,
    pub allow_unowned_edits: bool,
}

impl Default for ZoneRules {
    fn default() -> Self {
        Self {
            enforce_ownership: true,
            allow_unowned_edits: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ConflictRules {
    pub strategy: String,
    pub escalate_after_minutes: u32,
}

impl Default for ConflictRules {
    fn default() -> Self {
        Self {
            strategy: "first-come".to_string(),
            escalate_after_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct CommunicationRules {
    pub heartbeat_interval_minutes: u32,
    pub announce_claims: bool,
    pub announce_handoffs: bool,
}

impl Default for CommunicationRules {
    fn default() -> Self {
        Self {
            heartbeat_interval_minutes: 5,
            announce_claims: true,
            announce_handoffs: true,
        }
    }
}

fn default_roles() -> BTreeMap<String, RoleRules> {
    [
        ("coordinator", "Plans work, assigns zones and resolves conflicts", true, false),
        ("developer", "Claims tasks and edits files under lock", false, true),
        ("reviewer", "Reads and comments; edits only under lock", false, true),
    ]
    .into_iter()
    .map(|(name, description, can_own_zones, can_claim_tasks)| {
        (
            name.to_string(),
            RoleRules {
                description: description.to_string(),
                can_own_zones,
                can_claim_tasks,
            },
        )
    })
    .collect()
}

impl Rules {
    /// Version-1 defaults seeded from settings.
    #[must_use]
    pub fn from_settings(settings: &Settings, now: DateTime<Utc>) -> Self {
        Self {
            version: 1,
            updated_at: now,
            coordination: CoordinationRules {
                max_concurrent_claims_per_agent: settings.max_claims_per_agent,
                claim_expiry_minutes: settings.claim_stale_minutes,
                lock_expiry_minutes: settings.lock_stale_minutes,
                ..CoordinationRules::default()
            },
            roles: default_roles(),
            zones: ZoneRules::default(),
            conflicts: ConflictRules::default(),
            communication: CommunicationRules::default(),
        }
    }

    /// Human-readable lines shown to an agent on `session.init`.
    #[must_use]
    pub fn summary(&self, role: &str) -> Vec<String> {
        let c = &self.coordination;
        let mut lines = vec![
            format!("Rules version {}", self.version),
            format!(
                "Hold at most {} claims at a time",
                c.max_concurrent_claims_per_agent
            ),
            format!(
                "Claims expire after {} minutes, locks after {} minutes",
                c.claim_expiry_minutes, c.lock_expiry_minutes
            ),
            "Call substrate.check before file-edit, file-create, file-delete, zone-enter and task-start"
                .to_string(),
            "Acquire a lock with lock.acquire before editing any file".to_string(),
            "Respect zone ownership; do not edit inside another agent's zone".to_string(),
        ];
        if let Some(rules) = self.roles.get(role) {
            lines.push(format!("Role {role}: {}", rules.description));
        }
        if c.require_rules_acknowledgment {
            lines.push("Acknowledge these rules with session.acknowledge before acting".to_string());
        }
        lines
    }

    fn validate(&self) -> Result<()> {
        let c = &self.coordination;
        let positive = [
            ("maxConcurrentClaimsPerAgent", c.max_concurrent_claims_per_agent),
            ("claimExpiryMinutes", c.claim_expiry_minutes),
            ("lockExpiryMinutes", c.lock_expiry_minutes),
            ("heartbeatIntervalMinutes", self.communication.heartbeat_interval_minutes),
        ];
        match positive.iter().find(|(_, v)| *v == 0) {
            Some((name, _)) => Err(Error::InvalidInput(format!("{name} must be at least 1"))),
            None => Ok(()),
        }
    }
}

/// Top-level rules section addressed by `rules.patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Section {
    Coordination,
    Roles,
    Zones,
    Conflicts,
    Communication,
}

/// Shallow-merge `updates` into an object value.
fn merge_object(base: Value, updates: &Value) -> Result<Value> {
    match (base, updates) {
        (Value::Object(mut base), Value::Object(updates)) => {
            base.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(Value::Object(base))
        }
        _ => Err(Error::InvalidInput(
            "updates must be a JSON object".to_string(),
        )),
    }
}

fn patched<T>(section: &T, updates: &Value) -> Result<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    let merged = merge_object(serde_json::to_value(section)?, updates)?;
    serde_json::from_value(merged).map_err(|e| Error::InvalidInput(format!("Invalid rules update: {e}")))
}

/// Reads and patches the stored rules document.
#[derive(Debug, Clone)]
pub struct RulesStore {
    store: Store,
    clock: Arc<dyn Clock>,
    settings: Settings,
}

impl RulesStore {
    #[must_use]
    pub fn new(store: Store, clock: Arc<dyn Clock>, settings: Settings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    /// Current rules, seeding defaults on first read.
    pub async fn get(&self) -> Result<Rules> {
        let defaults = Rules::from_settings(&self.settings, self.clock.now());
        sqlx::query("INSERT OR IGNORE INTO rules (id, version, body) VALUES (1, ?1, ?2)")
            .bind(i64::try_from(defaults.version).unwrap_or(i64::MAX))
            .bind(serde_json::to_string(&defaults)?)
            .execute(self.store.pool())
            .await?;

        let (body,): (String,) = sqlx::query_as("SELECT body FROM rules WHERE id = 1")
            .fetch_one(self.store.pool())
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Patch one section with a shallow merge and bump the version.
    ///
    /// Requires `admin_key` to match the configured key; patching is refused
    /// outright when no key is configured.
    pub async fn patch(&self, section: &str, updates: &Value, admin_key: Option<&str>) -> Result<Rules> {
        match (self.settings.admin_key.as_deref(), admin_key) {
            (Some(expected), Some(given)) if expected == given => {}
            (None, _) => {
                return Err(Error::Forbidden(
                    "No admin key is configured; rules are read-only".to_string(),
                ))
            }
            _ => {
                warn!(section, "rules patch rejected: bad admin key");
                return Err(Error::Forbidden("Invalid admin key".to_string()));
            }
        }

        let section: Section = section
            .parse()
            .map_err(|_| Error::InvalidInput(format!("Unknown rules section '{section}'")))?;
        let current = self.get().await?;

        let mut next = match section {
            Section::Coordination => Rules {
                coordination: patched(&current.coordination, updates)?,
                ..current.clone()
            },
            Section::Roles => Rules {
                roles: patched(&current.roles, updates)?,
                ..current.clone()
            },
            Section::Zones => Rules {
                zones: patched(&current.zones, updates)?,
                ..current.clone()
            },
            Section::Conflicts => Rules {
                conflicts: patched(&current.conflicts, updates)?,
                ..current.clone()
            },
            Section::Communication => Rules {
                communication: patched(&current.communication, updates)?,
                ..current.clone()
            },
        };
        next.validate()?;
        next.version = current.version + 1;
        next.updated_at = self.clock.now();

        sqlx::query("UPDATE rules SET version = ?1, body = ?2 WHERE id = 1")
            .bind(i64::try_from(next.version).unwrap_or(i64::MAX))
            .bind(serde_json::to_string(&next)?)
            .execute(self.store.pool())
            .await?;

        info!(%section, version = next.version, "rules patched");
        Ok(next)
    }
}
