//! Store configuration.

use crate::error::{StoreError, StoreResult};
use convault_crypto::{KdfParams, KeyManager, MIN_SECRET_LEN};
use std::time::Duration;

const DAY_SECS: u64 = 86_400;

/// Configuration for the conversation store and its services.
///
/// Built from the environment at startup via [`StoreConfig::from_env`];
/// configuration problems are fatal there, never discovered mid-operation.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Operator-supplied encryption secret (`CONVAULT_SECRET`).
    pub secret: String,

    /// PBKDF2 iteration count (`CONVAULT_KDF_ITERATIONS`).
    pub kdf_iterations: u32,

    /// Retention window for message rows (`CONVAULT_RETENTION_DAYS`).
    pub message_retention: Duration,

    /// Retention window for derived-analysis rows
    /// (`CONVAULT_ANALYSIS_RETENTION_DAYS`).
    pub analysis_retention: Duration,

    /// Minimum k-anonymity cohort size for reads (`CONVAULT_COHORT_SIZE`).
    pub cohort_size: usize,

    /// Interval between scheduled retention sweeps
    /// (`CONVAULT_SWEEP_INTERVAL_SECS`).
    pub sweep_interval: Duration,

    /// Per-operation timeout for the async facade
    /// (`CONVAULT_OP_TIMEOUT_MS`).
    pub op_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            kdf_iterations: KdfParams::default().iterations,
            message_retention: Duration::from_secs(90 * DAY_SECS),
            analysis_retention: Duration::from_secs(180 * DAY_SECS),
            cohort_size: 5,
            sweep_interval: Duration::from_secs(DAY_SECS),
            op_timeout: Duration::from_millis(5_000),
        }
    }
}

impl StoreConfig {
    /// Reads configuration from the process environment.
    ///
    /// Fails with [`StoreError::Config`] on a missing/short secret or an
    /// unparsable numeric value.
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StoreResult<Self> {
        let defaults = Self::default();

        let secret = lookup("CONVAULT_SECRET").unwrap_or_default();
        if secret.len() < MIN_SECRET_LEN {
            return Err(StoreError::Config(format!(
                "CONVAULT_SECRET must be set and at least {MIN_SECRET_LEN} characters"
            )));
        }

        let kdf_iterations = parse_or(&lookup, "CONVAULT_KDF_ITERATIONS", defaults.kdf_iterations)?;
        let retention_days: u64 = parse_or(&lookup, "CONVAULT_RETENTION_DAYS", 90)?;
        let analysis_days: u64 = parse_or(&lookup, "CONVAULT_ANALYSIS_RETENTION_DAYS", 180)?;
        let cohort_size: usize = parse_or(&lookup, "CONVAULT_COHORT_SIZE", defaults.cohort_size)?;
        let sweep_secs: u64 = parse_or(&lookup, "CONVAULT_SWEEP_INTERVAL_SECS", DAY_SECS)?;
        let timeout_ms: u64 = parse_or(&lookup, "CONVAULT_OP_TIMEOUT_MS", 5_000)?;

        if cohort_size == 0 {
            return Err(StoreError::Config(
                "CONVAULT_COHORT_SIZE must be at least 1".into(),
            ));
        }

        Ok(Self {
            secret,
            kdf_iterations,
            message_retention: Duration::from_secs(retention_days * DAY_SECS),
            analysis_retention: Duration::from_secs(analysis_days * DAY_SECS),
            cohort_size,
            sweep_interval: Duration::from_secs(sweep_secs),
            op_timeout: Duration::from_millis(timeout_ms),
        })
    }

    /// Derives the process key manager from this configuration.
    pub fn key_manager(&self) -> StoreResult<KeyManager> {
        let params = KdfParams {
            iterations: self.kdf_iterations,
        };
        KeyManager::from_secret(&self.secret, &params)
            .map_err(|e| StoreError::Config(e.to_string()))
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> StoreResult<T> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| StoreError::Config(format!("{key} has an invalid value"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn full_environment_parses() {
        let cfg = StoreConfig::from_lookup(lookup(&[
            ("CONVAULT_SECRET", "a-long-enough-operator-secret"),
            ("CONVAULT_KDF_ITERATIONS", "150000"),
            ("CONVAULT_RETENTION_DAYS", "30"),
            ("CONVAULT_ANALYSIS_RETENTION_DAYS", "60"),
            ("CONVAULT_COHORT_SIZE", "7"),
            ("CONVAULT_SWEEP_INTERVAL_SECS", "3600"),
            ("CONVAULT_OP_TIMEOUT_MS", "2500"),
        ]))
        .unwrap();

        assert_eq!(cfg.kdf_iterations, 150_000);
        assert_eq!(cfg.message_retention, Duration::from_secs(30 * DAY_SECS));
        assert_eq!(cfg.analysis_retention, Duration::from_secs(60 * DAY_SECS));
        assert_eq!(cfg.cohort_size, 7);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(3_600));
        assert_eq!(cfg.op_timeout, Duration::from_millis(2_500));
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let cfg = StoreConfig::from_lookup(lookup(&[(
            "CONVAULT_SECRET",
            "a-long-enough-operator-secret",
        )]))
        .unwrap();

        assert_eq!(cfg.kdf_iterations, 100_000);
        assert_eq!(cfg.message_retention, Duration::from_secs(90 * DAY_SECS));
        assert_eq!(cfg.cohort_size, 5);
    }

    #[test]
    fn missing_secret_is_fatal() {
        let result = StoreConfig::from_lookup(lookup(&[]));
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn short_secret_is_fatal() {
        let result = StoreConfig::from_lookup(lookup(&[("CONVAULT_SECRET", "too-short")]));
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn unparsable_number_is_fatal() {
        let result = StoreConfig::from_lookup(lookup(&[
            ("CONVAULT_SECRET", "a-long-enough-operator-secret"),
            ("CONVAULT_COHORT_SIZE", "five"),
        ]));
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn zero_cohort_size_is_fatal() {
        let result = StoreConfig::from_lookup(lookup(&[
            ("CONVAULT_SECRET", "a-long-enough-operator-secret"),
            ("CONVAULT_COHORT_SIZE", "0"),
        ]));
        assert!(matches!(result, Err(StoreError::Config(_))));
    }
}
