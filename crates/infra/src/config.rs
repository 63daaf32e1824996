//! Runtime configuration loaded from environment variables.

use std::time::Duration;

use thiserror::Error;

use florist_orders::RECLASSIFY_LOOKBACK_DAYS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloristConfig {
    /// PostgreSQL connection URL (`DATABASE_URL`). Unset means in-memory.
    pub database_url: Option<String>,
    /// Pause between two date sweeps (`FLORIST_RECLASSIFY_INTERVAL_SECS`).
    pub reclassify_interval: Duration,
    /// Orders further overdue than this are left alone by the sweep
    /// (`FLORIST_RECLASSIFY_LOOKBACK_DAYS`).
    pub reclassify_lookback_days: u64,
    /// Pool size (`FLORIST_DB_MAX_CONNECTIONS`).
    pub db_max_connections: u32,
}

impl Default for FloristConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            reclassify_interval: Duration::from_secs(3600),
            reclassify_lookback_days: RECLASSIFY_LOOKBACK_DAYS,
            db_max_connections: 5,
        }
    }
}

impl FloristConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup` (a stand-in for the environment).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()),
            reclassify_interval: number(&lookup, "FLORIST_RECLASSIFY_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.reclassify_interval),
            reclassify_lookback_days: number(&lookup, "FLORIST_RECLASSIFY_LOOKBACK_DAYS")?
                .unwrap_or(defaults.reclassify_lookback_days),
            db_max_connections: number(&lookup, "FLORIST_DB_MAX_CONNECTIONS")?
                .unwrap_or(defaults.db_max_connections),
        })
    }

    /// The database URL, for callers that cannot run without one.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }
}

fn number<N>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<N>, ConfigError>
where
    N: std::str::FromStr + PartialOrd + Default,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    match raw.trim().parse::<N>() {
        Ok(n) if n > N::default() => Ok(Some(n)),
        _ => Err(ConfigError::InvalidNumber { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = FloristConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(config, FloristConfig::default());
        assert_eq!(config.reclassify_lookback_days, 30);
        assert_eq!(
            config.require_database_url(),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
    }

    #[test]
    fn values_are_parsed() {
        let config = FloristConfig::from_lookup(env(&[
            ("DATABASE_URL", "postgres://localhost/florist"),
            ("FLORIST_RECLASSIFY_INTERVAL_SECS", "60"),
            ("FLORIST_RECLASSIFY_LOOKBACK_DAYS", " 14 "),
            ("FLORIST_DB_MAX_CONNECTIONS", "12"),
        ]))
        .unwrap();
        assert_eq!(config.require_database_url(), Ok("postgres://localhost/florist"));
        assert_eq!(config.reclassify_interval, Duration::from_secs(60));
        assert_eq!(config.reclassify_lookback_days, 14);
        assert_eq!(config.db_max_connections, 12);
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = FloristConfig::from_lookup(env(&[("FLORIST_DB_MAX_CONNECTIONS", "zero")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                name: "FLORIST_DB_MAX_CONNECTIONS",
                value: "zero".to_string()
            }
        );
        assert!(
            FloristConfig::from_lookup(env(&[("FLORIST_RECLASSIFY_INTERVAL_SECS", "0")])).is_err()
        );
    }
}
