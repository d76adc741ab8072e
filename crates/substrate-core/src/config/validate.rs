//! Settings validation

use std::net::SocketAddr;

use super::types::Settings;
use crate::{Error, Result};

impl Settings {
    /// Validate settings values
    ///
    /// # Errors
    ///
    /// Returns error if a threshold is zero, the admin key is blank, or an
    /// address cannot be parsed.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "database_url cannot be empty".to_string(),
            ));
        }

        self.listen_addr.parse::<SocketAddr>().map_err(|e| {
            Error::InvalidConfig(format!(
                "listen_addr '{}' is not a socket address: {e}",
                self.listen_addr
            ))
        })?;

        if let Some(key) = &self.admin_key {
            if key.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "admin_key cannot be empty - either unset it or provide a key".to_string(),
                ));
            }
        }

        let positive = [
            ("lock_stale_minutes", self.lock_stale_minutes),
            ("claim_stale_minutes", self.claim_stale_minutes),
            ("max_claims_per_agent", self.max_claims_per_agent),
            ("max_violations_log", self.max_violations_log),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::InvalidConfig(format!("{name} must be at least 1")));
        }

        Ok(())
    }
}
