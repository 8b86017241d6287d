use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Process-wide settings of the confirmation engine.
///
/// Loaded once at startup and replaced wholesale by
/// [`ConfirmationEngine::update_config`](crate::application::engine::ConfirmationEngine::update_config).
/// Background tasks capture one snapshot when they start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Confirmations a deposit needs before it is credited.
    pub confirmation_threshold: u32,
    pub confirmation_interval_min_ms: u64,
    pub confirmation_interval_max_ms: u64,
    pub withdrawal_broadcast_delay_ms: u64,
    /// Chance, in percent, that a deposit fails before its first confirmation.
    pub failure_rate_percent: u8,
    /// Withdrawals strictly above this amount wait for an administrator.
    pub withdrawal_approval_threshold: Option<Decimal>,
    pub base_fee: Decimal,
    pub fee_cap_fraction: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confirmation_threshold: 3,
            confirmation_interval_min_ms: 30_000,
            confirmation_interval_max_ms: 120_000,
            withdrawal_broadcast_delay_ms: 60_000,
            failure_rate_percent: 5,
            withdrawal_approval_threshold: Some(dec!(1.0)),
            base_fee: dec!(0.0001),
            fee_cap_fraction: dec!(0.01),
        }
    }
}

impl EngineConfig {
    /// Reads and validates a JSON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::ConfigurationUnavailable(format!("{}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            EngineError::ConfigurationUnavailable(format!("{}: {}", path.display(), e))
        })?;
        config
            .validate()
            .map_err(|e| EngineError::ConfigurationUnavailable(e.to_string()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.confirmation_threshold == 0 {
            return Err(EngineError::ValidationError(
                "confirmation_threshold must be at least 1".to_string(),
            ));
        }
        if self.confirmation_interval_min_ms > self.confirmation_interval_max_ms {
            return Err(EngineError::ValidationError(
                "confirmation interval min exceeds max".to_string(),
            ));
        }
        if self.failure_rate_percent > 100 {
            return Err(EngineError::ValidationError(
                "failure_rate_percent must be within 0..=100".to_string(),
            ));
        }
        if self
            .withdrawal_approval_threshold
            .is_some_and(|threshold| threshold < Decimal::ZERO)
        {
            return Err(EngineError::ValidationError(
                "withdrawal_approval_threshold must not be negative".to_string(),
            ));
        }
        if self.base_fee < Decimal::ZERO || self.fee_cap_fraction < Decimal::ZERO {
            return Err(EngineError::ValidationError(
                "fees must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn confirmation_interval(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.confirmation_interval_min_ms),
            Duration::from_millis(self.confirmation_interval_max_ms),
        )
    }

    pub fn withdrawal_broadcast_delay(&self) -> Duration {
        Duration::from_millis(self.withdrawal_broadcast_delay_ms)
    }

    pub fn requires_approval(&self, amount: Decimal) -> bool {
        self.withdrawal_approval_threshold
            .is_some_and(|threshold| amount > threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_platform_settings() {
        let config = EngineConfig::default();
        assert_eq!(config.confirmation_threshold, 3);
        assert_eq!(config.failure_rate_percent, 5);
        assert_eq!(config.withdrawal_approval_threshold, Some(dec!(1.0)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"confirmation_threshold": 6}"#).unwrap();
        assert_eq!(config.confirmation_threshold, 6);
        assert_eq!(config.withdrawal_broadcast_delay_ms, 60_000);
    }

    #[test]
    fn test_validate_rejects_inverted_interval() {
        let config = EngineConfig {
            confirmation_interval_min_ms: 10,
            confirmation_interval_max_ms: 5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_threshold_and_bad_rate() {
        let zero = EngineConfig {
            confirmation_threshold: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let rate = EngineConfig {
            failure_rate_percent: 101,
            ..Default::default()
        };
        assert!(rate.validate().is_err());
    }

    #[test]
    fn test_requires_approval_is_strictly_above() {
        let config = EngineConfig::default();
        assert!(!config.requires_approval(dec!(1.0)));
        assert!(config.requires_approval(dec!(1.01)));

        let open = EngineConfig {
            withdrawal_approval_threshold: None,
            ..Default::default()
        };
        assert!(!open.requires_approval(dec!(1000)));
    }

    #[test]
    fn test_load_missing_file_is_unavailable() {
        let result = EngineConfig::load("does/not/exist.json");
        assert!(matches!(
            result,
            Err(EngineError::ConfigurationUnavailable(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"confirmation_threshold": 2, "failure_rate_percent": 0}}"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.confirmation_threshold, 2);
        assert_eq!(config.failure_rate_percent, 0);
    }

    #[test]
    fn test_load_invalid_values_is_unavailable() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"confirmation_threshold": 0}}"#).unwrap();

        assert!(matches!(
            EngineConfig::load(file.path()),
            Err(EngineError::ConfigurationUnavailable(_))
        ));
    }
}
