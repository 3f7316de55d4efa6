// Copyright (c) 2025 - Cowboy AI, Inc.
//! Engine configuration

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::domain::MONEY_DECIMALS;
use crate::errors::{ReferralError, ReferralResult};

/// Tunables for rule evaluation, commits and rebuilds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deepest cascade level an emitted event may be dispatched at
    pub max_cascade_depth: u8,

    /// Decimal places commissions are rounded to
    pub commission_precision: u32,

    /// Upper bound for a background rebuild
    pub rebuild_timeout: Duration,

    /// Events folded per batch during a rebuild
    pub rebuild_batch_size: usize,

    /// Extra commit attempts after a transient store error
    pub commit_retries: u32,

    /// Delay before the first retry, doubled on each further attempt
    pub commit_retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: 2,
            commission_precision: 2,
            rebuild_timeout: Duration::from_secs(30),
            rebuild_batch_size: 512,
            commit_retries: 3,
            commit_retry_backoff: Duration::from_millis(50),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> ReferralResult<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ReferralError::Configuration(format!("{} has invalid value '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}

impl EngineConfig {
    /// Read `REFERRAL_*` variables, falling back to defaults
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `REFERRAL_MAX_CASCADE_DEPTH` | `max_cascade_depth` |
    /// | `REFERRAL_COMMISSION_PRECISION` | `commission_precision` |
    /// | `REFERRAL_REBUILD_TIMEOUT_SECS` | `rebuild_timeout` |
    /// | `REFERRAL_REBUILD_BATCH_SIZE` | `rebuild_batch_size` |
    /// | `REFERRAL_COMMIT_RETRIES` | `commit_retries` |
    /// | `REFERRAL_COMMIT_RETRY_BACKOFF_MS` | `commit_retry_backoff` |
    pub fn from_env() -> ReferralResult<Self> {
        let defaults = Self::default();
        let config = Self {
            max_cascade_depth: env_or("REFERRAL_MAX_CASCADE_DEPTH", defaults.max_cascade_depth)?,
            commission_precision: env_or("REFERRAL_COMMISSION_PRECISION", defaults.commission_precision)?,
            rebuild_timeout: Duration::from_secs(env_or(
                "REFERRAL_REBUILD_TIMEOUT_SECS",
                defaults.rebuild_timeout.as_secs(),
            )?),
            rebuild_batch_size: env_or("REFERRAL_REBUILD_BATCH_SIZE", defaults.rebuild_batch_size)?,
            commit_retries: env_or("REFERRAL_COMMIT_RETRIES", defaults.commit_retries)?,
            commit_retry_backoff: Duration::from_millis(env_or(
                "REFERRAL_COMMIT_RETRY_BACKOFF_MS",
                defaults.commit_retry_backoff.as_millis() as u64,
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ReferralResult<()> {
        if self.commission_precision > MONEY_DECIMALS {
            return Err(ReferralError::Configuration(format!(
                "commission_precision {} exceeds {} decimal places",
                self.commission_precision, MONEY_DECIMALS
            )));
        }
        if self.rebuild_batch_size == 0 {
            return Err(ReferralError::Configuration(
                "rebuild_batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_cascade_depth(mut self, depth: u8) -> Self {
        self.max_cascade_depth = depth;
        self
    }

    pub fn with_commission_precision(mut self, precision: u32) -> Self {
        self.commission_precision = precision;
        self
    }

    pub fn with_rebuild_timeout(mut self, timeout: Duration) -> Self {
        self.rebuild_timeout = timeout;
        self
    }

    pub fn with_rebuild_batch_size(mut self, size: usize) -> Self {
        self.rebuild_batch_size = size;
        self
    }

    pub fn with_commit_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.commit_retries = retries;
        self.commit_retry_backoff = backoff;
        self
    }

    /// Delay before retry number `attempt` (starting at 1)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.commit_retry_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}
