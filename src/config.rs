//! Executor configuration and concurrency budgeting.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Factor by which the dry-run hit count is multiplied to get a mutant's hit limit.
///
/// Deliberately high: property-based test libraries replay a failing scenario many times
/// while shrinking, which must not be mistaken for an infinite loop.
pub const HIT_LIMIT_FACTOR: u64 = 100;

/// Configuration for a mutation test execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Total worker budget shared by the checker and test-runner pools.
    pub concurrency: Option<usize>,
    /// Checker names, applied in order.
    pub checkers: Vec<String>,
    /// Multiplier applied to the estimated net test time.
    pub timeout_factor: f64,
    /// Flat timeout allowance in milliseconds.
    pub timeout_ms: u64,
    /// Multiplier applied to the dry-run hit count.
    pub hit_limit_factor: u64,
    /// Run every covering test even after the first failure.
    pub disable_bail: bool,
    /// Directory the sandboxed copy of the project lives in.
    pub sandbox_dir: Option<PathBuf>,
    /// Capacity of the channels between pipeline stages.
    pub channel_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            checkers: Vec::new(),
            timeout_factor: 1.5,
            timeout_ms: 5000,
            hit_limit_factor: HIT_LIMIT_FACTOR,
            disable_bail: false,
            sandbox_dir: None,
            channel_capacity: 64,
        }
    }
}

impl ExecutorConfig {
    /// Set the total concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Set the checker list.
    pub fn with_checkers<I, S>(mut self, checkers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.checkers = checkers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the timeout factor.
    pub fn with_timeout_factor(mut self, timeout_factor: f64) -> Self {
        self.timeout_factor = timeout_factor;
        self
    }

    /// Set the flat timeout in milliseconds.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the hit-limit factor.
    pub fn with_hit_limit_factor(mut self, hit_limit_factor: u64) -> Self {
        self.hit_limit_factor = hit_limit_factor;
        self
    }

    /// Disable bail-on-first-failure in the test runner.
    pub fn with_disable_bail(mut self, disable_bail: bool) -> Self {
        self.disable_bail = disable_bail;
        self
    }

    /// Set the sandbox directory.
    pub fn with_sandbox_dir(mut self, sandbox_dir: impl Into<PathBuf>) -> Self {
        self.sandbox_dir = Some(sandbox_dir.into());
        self
    }

    /// Set the inter-stage channel capacity.
    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity.max(1);
        self
    }

    /// Path of `file_name` inside the sandbox.
    pub fn sandbox_file_for(&self, file_name: &str) -> String {
        match &self.sandbox_dir {
            Some(dir) => dir.join(Path::new(file_name)).to_string_lossy().into_owned(),
            None => file_name.to_string(),
        }
    }

    /// Configured or machine-derived total concurrency.
    pub fn total_concurrency(&self) -> usize {
        match self.concurrency {
            Some(concurrency) => concurrency.max(1),
            None => {
                let cpus = num_cpus::get();
                if cpus > 4 { cpus - 1 } else { cpus.max(1) }
            }
        }
    }
}

/// Split of the worker budget between the checker and test-runner pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyBudget {
    /// Checker pool capacity.
    pub checkers: usize,
    /// Initial test-runner pool capacity.
    pub test_runners: usize,
}

impl ConcurrencyBudget {
    /// Split the total concurrency; checkers take the larger half when configured.
    pub fn split(total: usize, has_checkers: bool) -> Self {
        let total = total.max(1);
        if has_checkers {
            Self {
                checkers: total.div_ceil(2).max(1),
                test_runners: (total / 2).max(1),
            }
        } else {
            Self {
                checkers: 0,
                test_runners: total,
            }
        }
    }

    /// Budget for `config`.
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::split(config.total_concurrency(), !config.checkers.is_empty())
    }
}
