//! Runtime configuration, read from `ARENA_*` environment variables.

use crate::models::DEFAULT_ELO;
use crate::ports::RetryPolicy;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArenaConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Total ledger-write attempts, including the first.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_elo")]
    pub default_elo: i32,
    #[serde(default = "default_upset_threshold")]
    pub upset_threshold: i32,
    #[serde(default = "default_protocol_fee_bps")]
    pub protocol_fee_bps: u32,
    #[serde(default = "default_analysis_failure_threshold")]
    pub analysis_failure_threshold: u32,
    #[serde(default = "default_analysis_cooldown_secs")]
    pub analysis_cooldown_secs: u64,
    /// CSV question bank; the built-in pool is used when unset.
    #[serde(default)]
    pub question_bank_path: Option<PathBuf>,
}

fn default_tick_interval_ms() -> u64 {
    5_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2_000
}

fn default_elo() -> i32 {
    DEFAULT_ELO
}

fn default_upset_threshold() -> i32 {
    100
}

fn default_protocol_fee_bps() -> u32 {
    500
}

fn default_analysis_failure_threshold() -> u32 {
    3
}

fn default_analysis_cooldown_secs() -> u64 {
    300
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            default_elo: default_elo(),
            upset_threshold: default_upset_threshold(),
            protocol_fee_bps: default_protocol_fee_bps(),
            analysis_failure_threshold: default_analysis_failure_threshold(),
            analysis_cooldown_secs: default_analysis_cooldown_secs(),
            question_bank_path: None,
        }
    }
}

/// Parse `key` via `lookup`, falling back to `default` when unset or malformed.
fn read<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("ignoring {key}={raw:?}: not a valid value, using default");
                default
            }
        },
    }
}

impl ArenaConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let mut config = Self {
            tick_interval_ms: read(&lookup, "ARENA_TICK_INTERVAL_MS", d.tick_interval_ms),
            retry_attempts: read(&lookup, "ARENA_RETRY_ATTEMPTS", d.retry_attempts),
            retry_delay_ms: read(&lookup, "ARENA_RETRY_DELAY_MS", d.retry_delay_ms),
            default_elo: read(&lookup, "ARENA_DEFAULT_ELO", d.default_elo),
            upset_threshold: read(&lookup, "ARENA_UPSET_THRESHOLD", d.upset_threshold),
            protocol_fee_bps: read(&lookup, "ARENA_PROTOCOL_FEE_BPS", d.protocol_fee_bps),
            analysis_failure_threshold: read(
                &lookup,
                "ARENA_ANALYSIS_FAILURE_THRESHOLD",
                d.analysis_failure_threshold,
            ),
            analysis_cooldown_secs: read(&lookup, "ARENA_ANALYSIS_COOLDOWN_SECS", d.analysis_cooldown_secs),
            question_bank_path: lookup("ARENA_QUESTION_BANK")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        };
        if config.retry_attempts == 0 {
            warn!("ARENA_RETRY_ATTEMPTS must be at least 1, using default");
            config.retry_attempts = d.retry_attempts;
        }
        if config.protocol_fee_bps > 10_000 {
            warn!("ARENA_PROTOCOL_FEE_BPS above 10000, using default");
            config.protocol_fee_bps = d.protocol_fee_bps;
        }
        if config.tick_interval_ms == 0 {
            warn!("ARENA_TICK_INTERVAL_MS must be positive, using default");
            config.tick_interval_ms = d.tick_interval_ms;
        }
        config
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn analysis_cooldown(&self) -> Duration {
        Duration::from_secs(self.analysis_cooldown_secs)
    }
}
