//! Validation-focused tests for settings

#[cfg(test)]
mod validation_tests {
    use crate::config::Settings;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let settings = Settings {
            lock_stale_minutes: 0,
            ..Settings::default()
        };
        let result = settings.validate();
        assert!(result.is_err_and(|e| e.to_string().contains("lock_stale_minutes")));
    }

    #[test]
    fn test_zero_quota_rejected() {
        let settings = Settings {
            max_claims_per_agent: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_blank_admin_key_rejected() {
        let settings = Settings {
            admin_key: Some("  ".to_string()),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_bad_listen_addr_rejected() {
        let settings = Settings {
            listen_addr: "localhost".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
