//! Environment configuration

use crate::scheduler::SchedulerConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_POLL_PERIOD_MS: u64 = 1000;
const DEFAULT_ALARM_PERIOD_MS: u64 = 1000;
const DEFAULT_CACHE_CAPACITY: usize = 1024;
const DEFAULT_MAX_MISMATCH_RETRIES: u32 = 10;
const DEFAULT_DIALOG_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    pub db_path: PathBuf,
    pub poll_period: Duration,
    pub alarm_period: Duration,
    pub cache_capacity: usize,
    pub max_mismatch_retries: u32,
    /// Idle time after which an unfinished dialog is rolled back
    pub dialog_timeout: Duration,
}

impl BotConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to
    /// the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = lookup("STATEBOT_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(format!("{home}/.statebot/statebot.db"))
            },
            PathBuf::from,
        );

        Self {
            db_path,
            poll_period: Duration::from_millis(parse_or(
                &lookup,
                "STATEBOT_POLL_PERIOD_MS",
                DEFAULT_POLL_PERIOD_MS,
            )),
            alarm_period: Duration::from_millis(parse_or(
                &lookup,
                "STATEBOT_ALARM_PERIOD_MS",
                DEFAULT_ALARM_PERIOD_MS,
            )),
            cache_capacity: parse_or(&lookup, "STATEBOT_CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY),
            max_mismatch_retries: parse_or(
                &lookup,
                "STATEBOT_MAX_MISMATCH_RETRIES",
                DEFAULT_MAX_MISMATCH_RETRIES,
            ),
            dialog_timeout: Duration::from_secs(parse_or(
                &lookup,
                "STATEBOT_DIALOG_TIMEOUT_SECS",
                DEFAULT_DIALOG_TIMEOUT_SECS,
            )),
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            period: self.alarm_period,
            max_mismatch_retries: self.max_mismatch_retries,
        }
    }
}

fn parse_or<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid configuration value, using default");
            default
        }),
    }
}
