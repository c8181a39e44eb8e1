//! Configuration management for the dispatch service
//!
//! Process settings come from environment variables (a `.env` file is
//! honoured by the binary). Routing rules live in a separate YAML document
//! whose path is configured here.

use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::health::HealthThresholds;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Path of the routing rules document
    pub rules_path: PathBuf,

    /// Seconds between health probe cycles
    pub probe_interval_secs: u64,
    /// Upper bound on a single probe (in milliseconds)
    pub probe_timeout_ms: u64,
    /// Consecutive failures before a target is degraded
    pub degraded_after: u32,
    /// Consecutive failures before a target is unreachable
    pub unreachable_after: u32,

    /// Budget of a dispatch that does not carry its own (in milliseconds)
    pub default_timeout_ms: u64,
    /// Ceiling on any single backend HTTP call (in seconds)
    pub backend_timeout_secs: u64,

    /// Number of decisions kept in the audit log
    pub audit_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            host: lookup("DISPATCH_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_var(&lookup, "DISPATCH_PORT", 8080)?,

            rules_path: lookup("DISPATCH_RULES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config/routing_rules.yaml")),

            probe_interval_secs: parse_var(&lookup, "DISPATCH_PROBE_INTERVAL_SECS", 30)?,
            probe_timeout_ms: parse_var(&lookup, "DISPATCH_PROBE_TIMEOUT_MS", 2_000)?,
            degraded_after: parse_var(&lookup, "DISPATCH_DEGRADED_AFTER", 1)?,
            unreachable_after: parse_var(&lookup, "DISPATCH_UNREACHABLE_AFTER", 3)?,

            default_timeout_ms: parse_var(&lookup, "DISPATCH_DEFAULT_TIMEOUT_MS", 30_000)?,
            backend_timeout_secs: parse_var(&lookup, "DISPATCH_BACKEND_TIMEOUT_SECS", 120)?,

            audit_capacity: parse_var(&lookup, "DISPATCH_AUDIT_CAPACITY", 256)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.degraded_after == 0 {
            bail!("DISPATCH_DEGRADED_AFTER must be at least 1");
        }
        if self.unreachable_after < self.degraded_after {
            bail!(
                "DISPATCH_UNREACHABLE_AFTER ({}) must not be below DISPATCH_DEGRADED_AFTER ({})",
                self.unreachable_after,
                self.degraded_after
            );
        }
        if self.probe_interval_secs == 0 {
            bail!("DISPATCH_PROBE_INTERVAL_SECS must be at least 1");
        }
        if self.default_timeout_ms == 0 {
            bail!("DISPATCH_DEFAULT_TIMEOUT_MS must be at least 1");
        }
        Ok(())
    }

    pub fn health_thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            degraded_after: self.degraded_after,
            unreachable_after: self.unreachable_after,
        }
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        None => Ok(default),
    }
}
