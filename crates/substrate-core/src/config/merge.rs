//! Settings merging logic
//!
//! Config files are parsed into [`PartialSettings`] so that a key left out
//! of a file never resets a value set by an earlier layer.

use serde::{Deserialize, Serialize};

use super::types::Settings;
use crate::paths::PathMatching;

/// A settings layer where every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialSettings {
    pub database_url: Option<String>,
    pub listen_addr: Option<String>,
    pub admin_key: Option<String>,
    pub lock_stale_minutes: Option<u32>,
    pub claim_stale_minutes: Option<u32>,
    pub max_claims_per_agent: Option<u32>,
    pub max_violations_log: Option<u32>,
    pub path_matching: Option<PathMatching>,
    pub enforce_on_mutation: Option<bool>,
}

impl Settings {
    /// Overlay a partial layer on top of these settings (layer wins).
    pub fn merge(self, layer: PartialSettings) -> Self {
        Self {
            database_url: layer.database_url.unwrap_or(self.database_url),
            listen_addr: layer.listen_addr.unwrap_or(self.listen_addr),
            admin_key: layer.admin_key.or(self.admin_key),
            lock_stale_minutes: layer.lock_stale_minutes.unwrap_or(self.lock_stale_minutes),
            claim_stale_minutes: layer
                .claim_stale_minutes
                .unwrap_or(self.claim_stale_minutes),
            max_claims_per_agent: layer
                .max_claims_per_agent
                .unwrap_or(self.max_claims_per_agent),
            max_violations_log: layer.max_violations_log.unwrap_or(self.max_violations_log),
            path_matching: layer.path_matching.unwrap_or(self.path_matching),
            enforce_on_mutation: layer
                .enforce_on_mutation
                .unwrap_or(self.enforce_on_mutation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_keep_previous_layer() {
        let base = Settings {
            lock_stale_minutes: 45,
            admin_key: Some("global".to_string()),
            ..Settings::default()
        };
        let layer = PartialSettings {
            claim_stale_minutes: Some(10),
            ..PartialSettings::default()
        };

        let merged = base.merge(layer);
        assert_eq!(merged.lock_stale_minutes, 45);
        assert_eq!(merged.claim_stale_minutes, 10);
        assert_eq!(merged.admin_key.as_deref(), Some("global"));
    }
}
