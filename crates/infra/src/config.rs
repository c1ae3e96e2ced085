//! Runtime configuration for the sync engine.

use core::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const MAX_CONFLICT_RETRIES_ENV: &str = "REVSYNC_MAX_CONFLICT_RETRIES";
pub const FAILURE_POLICY_ENV: &str = "REVSYNC_FAILURE_POLICY";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },
}

/// What the sync worker does with an event whose processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log at `error` and move on to the next event.
    #[default]
    LogAndContinue,
    /// Park the event in the dead-letter queue for a later redrive.
    DeadLetter,
    /// Stop the worker.
    Halt,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "log_and_continue" | "log" | "continue" => Ok(FailurePolicy::LogAndContinue),
            "dead_letter" | "deadletter" => Ok(FailurePolicy::DeadLetter),
            "halt" | "stop" => Ok(FailurePolicy::Halt),
            other => Err(format!(
                "unknown failure policy '{other}' (expected log_and_continue, dead_letter or halt)"
            )),
        }
    }
}

/// Sync engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Extra attempts after a write conflict, with freshly reloaded state.
    pub max_conflict_retries: u32,
    pub failure_policy: FailurePolicy,
    /// How long the worker waits on the bus before checking for shutdown.
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 1,
            failure_policy: FailurePolicy::LogAndContinue,
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl SyncConfig {
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Defaults overridden by `REVSYNC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`SyncConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(MAX_CONFLICT_RETRIES_ENV) {
            config.max_conflict_retries = raw.trim().parse().map_err(|e| ConfigError::Invalid {
                var: MAX_CONFLICT_RETRIES_ENV,
                message: format!("'{raw}': {e}"),
            })?;
        }

        if let Some(raw) = lookup(FAILURE_POLICY_ENV) {
            config.failure_policy = raw.parse().map_err(|message| ConfigError::Invalid {
                var: FAILURE_POLICY_ENV,
                message,
            })?;
        }

        Ok(config)
    }
}
