//! Test-runner workers and per-mutant run options.

use std::time::Duration;

use async_trait::async_trait;

use crate::concurrent::{Resource, ResourceDecorator, ResourceFactory};
use crate::config::ExecutorConfig;
use crate::error::WorkerError;
use crate::mutant::{MutantRunResult, MutantWithCoverage};

/// Everything a test runner needs to test one mutant.
#[derive(Debug, Clone, PartialEq)]
pub struct MutantRunOptions {
    /// The mutant to activate.
    pub active_mutant: MutantWithCoverage,
    /// Upper bound for the whole run.
    pub timeout: Duration,
    /// Tests to run; `None` runs the full suite.
    pub test_filter: Option<Vec<String>>,
    /// Abort once the mutant was hit this often.
    pub hit_limit: Option<u64>,
    /// The mutated file inside the sandbox.
    pub sandbox_file_name: String,
    /// Keep running after the first failing test.
    pub disable_bail: bool,
}

/// A pooled worker that runs the test suite against one active mutant.
#[async_trait]
pub trait TestRunner: Resource {
    /// Run the tests selected by `options`.
    async fn mutant_run(&self, options: MutantRunOptions) -> Result<MutantRunResult, WorkerError>;
}

/// Derives [`MutantRunOptions`] from a mutant and the run configuration.
#[derive(Debug, Clone)]
pub struct RunPlanner {
    config: ExecutorConfig,
    time_overhead: Duration,
}

impl RunPlanner {
    /// Planner for `config`. `time_overhead` is the fixed per-run cost measured during the dry run.
    pub fn new(config: &ExecutorConfig, time_overhead: Duration) -> Self {
        Self {
            config: config.clone(),
            time_overhead,
        }
    }

    /// Options for testing `mutant`.
    pub fn options_for(&self, mutant: &MutantWithCoverage) -> MutantRunOptions {
        let millis = self.config.timeout_factor * mutant.estimated_net_time_ms
            + self.config.timeout_ms as f64
            + self.time_overhead.as_secs_f64() * 1000.0;
        MutantRunOptions {
            active_mutant: mutant.clone(),
            // Float-to-int `as` saturates; negative or NaN budgets become zero.
            timeout: Duration::from_millis(millis.round() as u64),
            test_filter: if mutant.is_static {
                None
            } else {
                Some(mutant.covered_by.clone())
            },
            hit_limit: mutant
                .hit_count
                .map(|hits| hits.saturating_mul(self.config.hit_limit_factor)),
            sandbox_file_name: self.config.sandbox_file_for(mutant.file_name()),
            disable_bail: self.config.disable_bail,
        }
    }
}

/// Test runner that enforces the run timeout and survives a crash of its process.
///
/// A run exceeding its timeout yields [`MutantRunResult::Timeout`] and the stuck worker is
/// replaced. A crash is retried once in a fresh worker; a second crash yields
/// [`MutantRunResult::Error`].
pub struct TestRunnerRetryDecorator {
    decorator: ResourceDecorator<dyn TestRunner>,
}

impl TestRunnerRetryDecorator {
    /// Wrap the worker produced by `producer`.
    pub fn new(producer: ResourceFactory<dyn TestRunner>) -> Self {
        Self {
            decorator: ResourceDecorator::new("Test runner", producer),
        }
    }
}

#[async_trait]
impl Resource for TestRunnerRetryDecorator {
    async fn init(&self) -> Result<(), WorkerError> {
        self.decorator.init().await
    }

    async fn dispose(&self) -> Result<(), WorkerError> {
        self.decorator.dispose().await
    }
}

#[async_trait]
impl TestRunner for TestRunnerRetryDecorator {
    async fn mutant_run(&self, options: MutantRunOptions) -> Result<MutantRunResult, WorkerError> {
        let timeout = options.timeout;
        let outcome = self
            .decorator
            .call_with_retry(|runner| {
                let options = options.clone();
                async move {
                    match tokio::time::timeout(timeout, runner.mutant_run(options)).await {
                        Ok(result) => result.map(Some),
                        Err(_elapsed) => Ok(None),
                    }
                }
            })
            .await;

        match outcome {
            Ok(Some(result)) => Ok(result),
            Ok(None) => {
                log::debug!(
                    "Mutant {} timed out after {timeout:?}; replacing the test runner.",
                    options.active_mutant.id()
                );
                self.decorator.recover().await?;
                Ok(MutantRunResult::Timeout {
                    reason: Some(format!("test run exceeded {} ms", timeout.as_millis())),
                })
            }
            Err(err) if err.is_crash() => Ok(MutantRunResult::Error {
                error_message: err.to_string(),
            }),
            Err(err) => Err(err),
        }
    }
}
