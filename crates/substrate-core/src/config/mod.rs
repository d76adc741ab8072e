//! Runtime settings loading and management
//!
//! # Hierarchy
//!
//! Settings are loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: `<config dir>/substrate/config.toml`
//! 3. Project config: `.substrate/config.toml`
//! 4. Environment variables: `SUBSTRATE_*`
//! 5. CLI flags (applied by the binary)
//!
//! # Example Config
//!
//! ```toml
//! database_url = "sqlite://.substrate/substrate.db"
//! listen_addr = "127.0.0.1:7411"
//! admin_key = "change-me"
//! lock_stale_minutes = 30
//! claim_stale_minutes = 30
//! max_claims_per_agent = 3
//! path_matching = "segment"
//! ```
//!
//! Settings only seed the default rules document on first use. Once rules
//! exist in the store, `rules.patch` is the way to change thresholds.

mod load;
mod merge;
mod types;
mod validate;

#[cfg(test)]
mod tests_loading;
#[cfg(test)]
mod tests_validation;

pub use load::{
    global_config_path, load_settings, load_settings_from, load_toml_file, project_config_path,
};
pub use merge::PartialSettings;
pub use types::Settings;
