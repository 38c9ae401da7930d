//!
//! # Configuration
//!
//! Tunables for the shared step infrastructure. Values come from
//! `HODEI_STEPS_*` environment variables with defaults for anything unset
//! or unparsable.
//!

use crate::error::StepError;
use crate::limiter::RateLimiter;
use crate::port::clock::{Clock, TokioClock};
use crate::work_pool::WorkPool;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const ENV_MAX_CONCURRENT_TRANSFERS: &str = "HODEI_STEPS_MAX_CONCURRENT_TRANSFERS";
pub const ENV_HEALTH_CHECK_WORKERS: &str = "HODEI_STEPS_HEALTH_CHECK_WORKERS";
pub const ENV_HEALTHY_INTERVAL_MS: &str = "HODEI_STEPS_HEALTHY_INTERVAL_MS";
pub const ENV_UNHEALTHY_INTERVAL_MS: &str = "HODEI_STEPS_UNHEALTHY_INTERVAL_MS";
pub const ENV_START_TIMEOUT_MS: &str = "HODEI_STEPS_START_TIMEOUT_MS";
pub const ENV_TEMP_DIR: &str = "HODEI_STEPS_TEMP_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepsConfig {
    /// Slots of the transfer rate limiter.
    pub max_concurrent_transfers: usize,
    /// Size of the health-check work pool.
    pub health_check_workers: usize,
    pub healthy_interval: Duration,
    pub unhealthy_interval: Duration,
    /// Bootstrap deadline for the first healthy probe. `None` waits forever.
    pub start_timeout: Option<Duration>,
    /// Scratch space for uploads.
    pub temp_dir: PathBuf,
}

impl Default for StepsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 5,
            health_check_workers: 10,
            healthy_interval: Duration::from_secs(30),
            unhealthy_interval: Duration::from_millis(500),
            start_timeout: Some(Duration::from_secs(60)),
            temp_dir: env::temp_dir(),
        }
    }
}

impl StepsConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read the configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse_usize = |key: &str, default: usize| {
            lookup(key)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        };
        let parse_millis = |key: &str| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        Self {
            max_concurrent_transfers: parse_usize(
                ENV_MAX_CONCURRENT_TRANSFERS,
                defaults.max_concurrent_transfers,
            ),
            health_check_workers: parse_usize(
                ENV_HEALTH_CHECK_WORKERS,
                defaults.health_check_workers,
            ),
            healthy_interval: parse_millis(ENV_HEALTHY_INTERVAL_MS)
                .unwrap_or(defaults.healthy_interval),
            unhealthy_interval: parse_millis(ENV_UNHEALTHY_INTERVAL_MS)
                .unwrap_or(defaults.unhealthy_interval),
            start_timeout: match parse_millis(ENV_START_TIMEOUT_MS) {
                Some(d) if d.is_zero() => None,
                Some(d) => Some(d),
                None => defaults.start_timeout,
            },
            temp_dir: lookup(ENV_TEMP_DIR)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
        }
    }

    pub fn with_max_concurrent_transfers(mut self, n: usize) -> Self {
        self.max_concurrent_transfers = n;
        self
    }

    pub fn with_health_check_workers(mut self, n: usize) -> Self {
        self.health_check_workers = n;
        self
    }

    pub fn with_healthy_interval(mut self, interval: Duration) -> Self {
        self.healthy_interval = interval;
        self
    }

    pub fn with_unhealthy_interval(mut self, interval: Duration) -> Self {
        self.unhealthy_interval = interval;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn validate(&self) -> Result<(), StepError> {
        if self.max_concurrent_transfers == 0 {
            return Err(StepError::configuration(
                "max concurrent transfers must be positive",
            ));
        }
        if self.health_check_workers == 0 {
            return Err(StepError::configuration(
                "health check workers must be positive",
            ));
        }
        if self.healthy_interval.is_zero() || self.unhealthy_interval.is_zero() {
            return Err(StepError::configuration(
                "health check intervals must be positive",
            ));
        }
        Ok(())
    }
}

/// Shared infrastructure handed to step constructors.
#[derive(Clone)]
pub struct StepEnvironment {
    pub config: StepsConfig,
    pub rate_limiter: RateLimiter,
    pub work_pool: WorkPool,
    pub clock: Arc<dyn Clock>,
}

impl StepEnvironment {
    pub fn from_config(config: StepsConfig) -> Result<Self, StepError> {
        config.validate()?;
        Ok(Self {
            rate_limiter: RateLimiter::new(config.max_concurrent_transfers),
            work_pool: WorkPool::new(config.health_check_workers)?,
            clock: TokioClock::shared(),
            config,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn temp_dir(&self) -> &std::path::Path {
        &self.config.temp_dir
    }
}

impl std::fmt::Debug for StepEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepEnvironment")
            .field("config", &self.config)
            .field("rate_limiter", &self.rate_limiter)
            .field("work_pool", &self.work_pool)
            .finish_non_exhaustive()
    }
}
