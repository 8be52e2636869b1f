// Engine configuration
//
// All tunables are read from environment variables (after loading `.env`), with
// defaults matching the production loyalty program.

use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors raised while reading the environment
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Thresholds and windows used by the receipt settlement pipeline
#[derive(Debug, Clone)]
pub struct SettlementPolicy {
    /// Receipts scoring below this are flagged for manual review
    pub quality_threshold: i32,
    /// Approved receipts scoring at least this are reported as auto-approved
    pub auto_approve_threshold: i32,
    /// Sliding lookback for duplicate detection
    pub duplicate_window: chrono::Duration,
    /// Probability that an approved receipt is sampled for audit
    pub audit_sample_rate: f64,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            quality_threshold: 50,
            auto_approve_threshold: 80,
            duplicate_window: chrono::Duration::hours(1),
            audit_sample_rate: 0.05,
        }
    }
}

/// Shift rules for the field-agent attendance clock
#[derive(Debug, Clone)]
pub struct ShiftPolicy {
    pub start: NaiveTime,
    pub grace: chrono::Duration,
    pub duration: chrono::Duration,
    /// Offset of the site the agents work at; shift dates are local to it
    pub site_offset: FixedOffset,
}

impl Default for ShiftPolicy {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            grace: chrono::Duration::minutes(15),
            duration: chrono::Duration::hours(8),
            site_offset: FixedOffset::east_opt(3 * 3600).unwrap_or_else(|| Utc.fix()),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub settlement: SettlementPolicy,
    pub brand_rule_cache_ttl: Duration,
    pub shift: ShiftPolicy,
    pub enable_jobs: bool,
    pub job_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(3),
            settlement: SettlementPolicy::default(),
            brand_rule_cache_ttl: Duration::from_secs(60),
            shift: ShiftPolicy::default(),
            enable_jobs: false,
            job_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let duplicate_window_secs: i64 = parse_or(&lookup, "DUPLICATE_WINDOW_SECS", 3600)?;
        let audit_sample_rate: f64 = parse_or(&lookup, "AUDIT_SAMPLE_RATE", 0.05)?;
        if !(0.0..=1.0).contains(&audit_sample_rate) {
            return Err(ConfigError::Invalid {
                key: "AUDIT_SAMPLE_RATE",
                value: audit_sample_rate.to_string(),
            });
        }

        let settlement = SettlementPolicy {
            quality_threshold: parse_or(&lookup, "QUALITY_THRESHOLD", 50)?,
            auto_approve_threshold: parse_or(&lookup, "AUTO_APPROVE_THRESHOLD", 80)?,
            duplicate_window: chrono::Duration::seconds(duplicate_window_secs.max(0)),
            audit_sample_rate,
        };

        let shift_start = match lookup("SHIFT_START") {
            Some(raw) => NaiveTime::parse_from_str(&raw, "%H:%M").map_err(|_| ConfigError::Invalid {
                key: "SHIFT_START",
                value: raw,
            })?,
            None => defaults.shift.start,
        };
        let offset_minutes: i32 = parse_or(&lookup, "SITE_UTC_OFFSET_MINUTES", 180)?;
        let site_offset = FixedOffset::east_opt(offset_minutes * 60).ok_or(ConfigError::Invalid {
            key: "SITE_UTC_OFFSET_MINUTES",
            value: offset_minutes.to_string(),
        })?;

        let shift = ShiftPolicy {
            start: shift_start,
            grace: chrono::Duration::minutes(parse_or(&lookup, "SHIFT_GRACE_MINUTES", 15)?),
            duration: chrono::Duration::hours(parse_or(&lookup, "SHIFT_DURATION_HOURS", 8)?),
            site_offset,
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL"),
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", defaults.max_connections)?,
            acquire_timeout: Duration::from_secs(parse_or(&lookup, "DATABASE_ACQUIRE_TIMEOUT_SECS", 3)?),
            settlement,
            brand_rule_cache_ttl: Duration::from_secs(parse_or(&lookup, "BRAND_RULE_CACHE_TTL_SECS", 60)?),
            shift,
            enable_jobs: parse_or(&lookup, "ENABLE_JOBS", false)?,
            job_interval: Duration::from_secs(parse_or(&lookup, "JOB_INTERVAL_SECS", 24 * 60 * 60)?),
        })
    }

    /// Database URL, required by the binary
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or(ConfigError::Missing("DATABASE_URL"))
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_empty() {
        let config = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.settlement.quality_threshold, 50);
        assert_eq!(config.settlement.auto_approve_threshold, 80);
        assert_eq!(config.settlement.duplicate_window, chrono::Duration::hours(1));
        assert_eq!(config.settlement.audit_sample_rate, 0.05);
        assert_eq!(config.shift.start, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(config.shift.grace, chrono::Duration::minutes(15));
        assert_eq!(config.shift.site_offset.local_minus_utc(), 3 * 3600);
        assert!(!config.enable_jobs);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/loyalty"),
            ("DUPLICATE_WINDOW_SECS", "600"),
            ("AUDIT_SAMPLE_RATE", "0"),
            ("SHIFT_START", "07:30"),
            ("ENABLE_JOBS", "true"),
        ]))
        .unwrap();

        assert_eq!(config.require_database_url().unwrap(), "postgres://localhost/loyalty");
        assert_eq!(config.settlement.duplicate_window, chrono::Duration::minutes(10));
        assert_eq!(config.settlement.audit_sample_rate, 0.0);
        assert_eq!(config.shift.start, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert!(config.enable_jobs);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = EngineConfig::from_lookup(lookup_from(&[("QUALITY_THRESHOLD", "high")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "QUALITY_THRESHOLD",
                value: "high".to_string()
            }
        );

        let err = EngineConfig::from_lookup(lookup_from(&[("AUDIT_SAMPLE_RATE", "1.5")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "AUDIT_SAMPLE_RATE", .. }));

        let err = EngineConfig::from_lookup(lookup_from(&[("SHIFT_START", "8am")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "SHIFT_START", .. }));
    }

    #[test]
    fn test_missing_database_url() {
        let config = EngineConfig::default();
        assert_eq!(
            config.require_database_url().unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
    }
}
