//! Settings loading from files and environment

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use super::{merge::PartialSettings, types::Settings};
use crate::{paths::PathMatching, Error, Result};

/// Load settings from all sources with hierarchy
///
/// # Errors
///
/// Returns error if:
/// - A config file is malformed TOML or names an unknown key
/// - An environment variable cannot be parsed
/// - The merged values fail validation
pub fn load_settings() -> Result<Settings> {
    let project = project_config_path()?;
    load_settings_from(global_config_path().as_deref(), Some(&project))
}

/// Load settings from explicit file locations, then apply `SUBSTRATE_*`
/// overrides and validate. Missing files are skipped.
///
/// # Errors
///
/// Same as [`load_settings`].
pub fn load_settings_from(global: Option<&Path>, project: Option<&Path>) -> Result<Settings> {
    let settings = [global, project]
        .into_iter()
        .flatten()
        .filter(|path| path.exists())
        .try_fold(Settings::default(), |acc, path| {
            load_toml_file(path).map(|layer| acc.merge(layer))
        })?;

    let settings = settings.apply_env_vars()?;
    settings.validate()?;
    Ok(settings)
}

/// Get path to global config file
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "substrate")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Get path to project config file
///
/// # Errors
///
/// Returns error if current directory cannot be determined
pub fn project_config_path() -> Result<PathBuf> {
    std::env::current_dir()
        .map(|dir| dir.join(".substrate/config.toml"))
        .map_err(|e| Error::IoError(format!("Failed to get current directory: {e}")))
}

/// Load a TOML file into a settings layer
///
/// # Errors
///
/// Returns error if the path is a directory, cannot be read, or is not
/// valid settings TOML.
pub fn load_toml_file(path: &Path) -> Result<PartialSettings> {
    if path.is_dir() {
        return Err(Error::IoError(format!(
            "Config path is a directory, not a file: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::IoError(format!("Failed to read config file {}: {e}", path.display()))
    })?;

    toml::from_str(&content).map_err(|e| {
        Error::ParseError(format!(
            "Failed to parse config file {}: {e}",
            path.display()
        ))
    })
}

fn env_value<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    std::env::var(name).ok().map_or(Ok(None), |raw| {
        raw.trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::InvalidConfig(format!("Invalid {name} value '{raw}': {e}")))
    })
}

impl Settings {
    /// Apply `SUBSTRATE_*` environment variable overrides
    ///
    /// # Errors
    ///
    /// Returns error if environment variable values are invalid
    pub fn apply_env_vars(self) -> Result<Self> {
        let layer = PartialSettings {
            database_url: env_value("SUBSTRATE_DATABASE_URL")?,
            listen_addr: env_value("SUBSTRATE_LISTEN_ADDR")?,
            admin_key: env_value("SUBSTRATE_ADMIN_KEY")?,
            lock_stale_minutes: env_value("SUBSTRATE_LOCK_STALE_MINUTES")?,
            claim_stale_minutes: env_value("SUBSTRATE_CLAIM_STALE_MINUTES")?,
            max_claims_per_agent: env_value("SUBSTRATE_MAX_CLAIMS_PER_AGENT")?,
            max_violations_log: env_value("SUBSTRATE_MAX_VIOLATIONS_LOG")?,
            path_matching: env_value::<PathMatching>("SUBSTRATE_PATH_MATCHING")?,
            enforce_on_mutation: env_value("SUBSTRATE_ENFORCE_ON_MUTATION")?,
        };
        Ok(self.merge(layer))
    }
}
