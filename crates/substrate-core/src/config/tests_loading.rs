//! Loading-focused tests for settings
//!
//! File layering, parse failures and environment overrides. Tests that touch
//! `SUBSTRATE_*` variables run serially.

#[cfg(test)]
mod loading_tests {
    use std::io::Write;

    use serial_test::serial;

    use crate::config::{load_settings_from, load_toml_file, Settings};
    use crate::paths::PathMatching;
    use crate::{Error, Result};

    fn write_file(dir: &tempfile::TempDir, name: &str, body: &str) -> Result<std::path::PathBuf> {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path)?;
        file.write_all(body.as_bytes())?;
        Ok(path)
    }

    #[test]
    #[serial]
    fn test_no_files_returns_defaults() -> Result<()> {
        let settings = load_settings_from(None, None)?;
        assert_eq!(settings, Settings::default());
        Ok(())
    }

    #[test]
    #[serial]
    fn test_project_overrides_global() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let global = write_file(
            &dir,
            "global.toml",
            "lock_stale_minutes = 45\nmax_claims_per_agent = 5\n",
        )?;
        let project = write_file(&dir, "project.toml", "max_claims_per_agent = 2\n")?;

        let settings = load_settings_from(Some(&global), Some(&project))?;
        assert_eq!(settings.lock_stale_minutes, 45);
        assert_eq!(settings.max_claims_per_agent, 2);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_missing_files_are_skipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let absent = dir.path().join("nope.toml");
        let settings = load_settings_from(Some(&absent), None)?;
        assert_eq!(settings.max_claims_per_agent, 3);
        Ok(())
    }

    #[test]
    fn test_malformed_toml_returns_parse_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_file(&dir, "bad.toml", "lock_stale_minutes = \n [[[")?;
        assert!(matches!(load_toml_file(&path), Err(Error::ParseError(_))));
        Ok(())
    }

    #[test]
    fn test_unknown_key_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_file(&dir, "typo.toml", "lock_stale_minuets = 10\n")?;
        assert!(load_toml_file(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_directory_is_not_a_config_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(matches!(load_toml_file(dir.path()), Err(Error::IoError(_))));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_env_overrides_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let project = write_file(&dir, "project.toml", "claim_stale_minutes = 15\n")?;

        std::env::set_var("SUBSTRATE_CLAIM_STALE_MINUTES", "60");
        std::env::set_var("SUBSTRATE_PATH_MATCHING", "substring");
        let result = load_settings_from(None, Some(&project));
        std::env::remove_var("SUBSTRATE_CLAIM_STALE_MINUTES");
        std::env::remove_var("SUBSTRATE_PATH_MATCHING");

        let settings = result?;
        assert_eq!(settings.claim_stale_minutes, 60);
        assert_eq!(settings.path_matching, PathMatching::Substring);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_is_config_error() {
        std::env::set_var("SUBSTRATE_ENFORCE_ON_MUTATION", "maybe");
        let result = load_settings_from(None, None);
        std::env::remove_var("SUBSTRATE_ENFORCE_ON_MUTATION");

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
