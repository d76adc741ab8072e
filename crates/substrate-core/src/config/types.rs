//! Settings type definitions

use serde::{Deserialize, Serialize};

use crate::{
    claim::{CLAIM_STALE_MINUTES, MAX_CLAIMS_PER_AGENT},
    lock::LOCK_STALE_MINUTES,
    paths::PathMatching,
    violations::MAX_VIOLATIONS_LOG,
};

/// Default location of the shared store.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://.substrate/substrate.db";

/// Default address for `substrate serve`.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7411";

/// Process-wide settings.
///
/// Loaded from defaults → global → project → env vars → CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub database_url: String,
    pub listen_addr: String,
    /// Required by `rules.patch`; patching is refused while unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_key: Option<String>,
    pub lock_stale_minutes: u32,
    pub claim_stale_minutes: u32,
    pub max_claims_per_agent: u32,
    pub max_violations_log: u32,
    pub path_matching: PathMatching,
    /// Run the policy check inline on `lock.acquire` and `claim.create`
    pub enforce_on_mutation: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            admin_key: None,
            lock_stale_minutes: LOCK_STALE_MINUTES,
            claim_stale_minutes: CLAIM_STALE_MINUTES,
            max_claims_per_agent: MAX_CLAIMS_PER_AGENT,
            max_violations_log: MAX_VIOLATIONS_LOG,
            path_matching: PathMatching::default(),
            enforce_on_mutation: false,
        }
    }
}
