//! The mutation test pipeline.
//!
//! ```text
//! mutants ─▶ ignore filter ─▶ checker 1 ─▶ … ─▶ checker n ─▶ coverage filter ─▶ test runs
//!                 │               │                 │               │               │
//!                 └───────────────┴─────────────────┴───────────────┴───────────────┴─▶ results
//! ```
//!
//! Every stage is a task joined to its neighbours by bounded channels. Each mutant leaves the
//! pipeline through exactly one stage, as exactly one [`MutantResult`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt, pin_mut, stream};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use crate::checker::{CheckerRegistry, CheckerResource, CheckerRetryDecorator, CheckerStage, CheckerWorker};
use crate::concurrent::{Pool, ResourceFactory};
use crate::config::{ConcurrencyBudget, ExecutorConfig};
use crate::error::ExecutorError;
use crate::group::DependencyResolver;
use crate::mutant::{MutantResult, MutantStatus, MutantWithCoverage};
use crate::report::MutantReporter;
use crate::test_runner::{RunPlanner, TestRunner, TestRunnerRetryDecorator};

/// Builder for [`MutationTestExecutor`].
pub struct ExecutorBuilder {
    config: ExecutorConfig,
    checkers: Option<ResourceFactory<dyn CheckerResource>>,
    registry: Option<CheckerRegistry>,
    test_runners: Option<ResourceFactory<dyn TestRunner>>,
    resolver: Option<Arc<dyn DependencyResolver>>,
    reporter: Option<Arc<dyn MutantReporter>>,
    time_overhead: Duration,
}

impl ExecutorBuilder {
    /// Host checker plugins from `registry` in in-process [`CheckerWorker`]s.
    pub fn checker_registry(mut self, registry: CheckerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use custom checker workers (e.g. proxies to child processes).
    ///
    /// Takes precedence over [`checker_registry`](Self::checker_registry).
    pub fn checker_workers(mut self, factory: ResourceFactory<dyn CheckerResource>) -> Self {
        self.checkers = Some(factory);
        self
    }

    /// Test-runner workers. Required.
    pub fn test_runners(mut self, factory: ResourceFactory<dyn TestRunner>) -> Self {
        self.test_runners = Some(factory);
        self
    }

    /// Enable dependency-aware grouping for checkers without their own grouping.
    pub fn dependency_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Result sink. Required.
    pub fn reporter(mut self, reporter: Arc<dyn MutantReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Fixed per-run overhead measured by the dry run, added to every timeout.
    pub fn time_overhead(mut self, time_overhead: Duration) -> Self {
        self.time_overhead = time_overhead;
        self
    }

    /// Validate the setup and create the worker pools. No worker is started yet.
    pub fn build(self) -> Result<MutationTestExecutor, ExecutorError> {
        let test_runners = self
            .test_runners
            .ok_or_else(|| ExecutorError::Setup("no test runner factory configured".to_string()))?;
        let reporter = self
            .reporter
            .ok_or_else(|| ExecutorError::Setup("no reporter configured".to_string()))?;

        let budget = ConcurrencyBudget::from_config(&self.config);

        let checker_pool = if self.config.checkers.is_empty() {
            None
        } else {
            let workers = match (self.checkers, self.registry) {
                (Some(factory), _) => factory,
                (None, Some(registry)) => {
                    if let Some(unknown) = self.config.checkers.iter().find(|c| !registry.contains(c)) {
                        return Err(ExecutorError::Setup(format!(
                            "no checker registered under the name \"{unknown}\""
                        )));
                    }
                    let names = self.config.checkers.clone();
                    Arc::new(move || {
                        Arc::new(CheckerWorker::new(registry.clone(), names.clone()))
                            as Arc<dyn CheckerResource>
                    }) as ResourceFactory<dyn CheckerResource>
                }
                (None, None) => {
                    return Err(ExecutorError::Setup(
                        "checkers are configured but no checker registry or workers were provided"
                            .to_string(),
                    ));
                }
            };
            let factory: ResourceFactory<dyn CheckerResource> = Arc::new(move || {
                Arc::new(CheckerRetryDecorator::new(Arc::clone(&workers))) as Arc<dyn CheckerResource>
            });
            Some(Pool::new(budget.checkers, factory))
        };

        let runner_factory: ResourceFactory<dyn TestRunner> = Arc::new(move || {
            Arc::new(TestRunnerRetryDecorator::new(Arc::clone(&test_runners))) as Arc<dyn TestRunner>
        });

        Ok(MutationTestExecutor {
            planner: RunPlanner::new(&self.config, self.time_overhead),
            config: self.config,
            budget,
            checker_pool,
            test_runner_pool: Pool::new(budget.test_runners, runner_factory),
            resolver: self.resolver,
            reporter,
        })
    }
}

/// Drives every mutant through ignore filtering, checking, coverage filtering and test runs.
pub struct MutationTestExecutor {
    config: ExecutorConfig,
    budget: ConcurrencyBudget,
    planner: RunPlanner,
    checker_pool: Option<Pool<dyn CheckerResource>>,
    test_runner_pool: Pool<dyn TestRunner>,
    resolver: Option<Arc<dyn DependencyResolver>>,
    reporter: Arc<dyn MutantReporter>,
}

impl MutationTestExecutor {
    /// Start building an executor for `config`.
    pub fn builder(config: ExecutorConfig) -> ExecutorBuilder {
        ExecutorBuilder {
            config,
            checkers: None,
            registry: None,
            test_runners: None,
            resolver: None,
            reporter: None,
            time_overhead: Duration::ZERO,
        }
    }

    /// How the worker budget was split between the pools.
    pub fn budget(&self) -> ConcurrencyBudget {
        self.budget
    }

    /// Run the pipeline over `mutants`.
    ///
    /// Returns exactly one result per input mutant, in input order, after handing the same set to
    /// [`MutantReporter::report_all`]. Both pools are disposed before returning.
    pub async fn execute(
        self,
        mutants: Vec<MutantWithCoverage>,
    ) -> Result<Vec<MutantResult>, ExecutorError> {
        let started = Instant::now();
        let outcome = self.run_pipeline(mutants).await;

        if let Some(pool) = &self.checker_pool {
            if let Err(err) = pool.dispose().await {
                log::warn!("Failed to dispose checker workers: {err}");
            }
        }
        if let Err(err) = self.test_runner_pool.dispose().await {
            log::warn!("Failed to dispose test runners: {err}");
        }

        let results = outcome?;
        self.reporter.report_all(&results);
        log::info!("Done in {}.", format_elapsed(started.elapsed()));
        Ok(results)
    }

    async fn run_pipeline(
        &self,
        mutants: Vec<MutantWithCoverage>,
    ) -> Result<Vec<MutantResult>, ExecutorError> {
        let capacity = self.config.channel_capacity.max(1);
        let expected = mutants.len();
        let order: HashMap<String, usize> = mutants
            .iter()
            .enumerate()
            .map(|(idx, m)| (m.id().to_string(), idx))
            .collect();

        let (results_tx, mut results_rx) = mpsc::channel::<MutantResult>(capacity);
        let mut tasks: JoinSet<Result<(), ExecutorError>> = JoinSet::new();

        let (candidates_tx, candidates_rx) = mpsc::channel(capacity);
        tasks.spawn(ignore_stage(
            mutants,
            Arc::clone(&self.reporter),
            results_tx.clone(),
            candidates_tx,
        ));

        let checked_rx = self.spawn_checkers(&mut tasks, candidates_rx, &results_tx, capacity);

        let (covered_tx, covered_rx) = mpsc::channel(capacity);
        tasks.spawn(coverage_stage(
            checked_rx,
            Arc::clone(&self.reporter),
            results_tx.clone(),
            covered_tx,
        ));

        tasks.spawn(test_run_stage(
            self.test_runner_pool.clone(),
            covered_rx,
            self.planner.clone(),
            Arc::clone(&self.reporter),
            results_tx,
        ));

        let mut results = Vec::with_capacity(expected);
        loop {
            tokio::select! {
                Some(result) = results_rx.recv() => results.push(result),
                Some(joined) = tasks.join_next() => {
                    if let Err(err) = flatten(joined) {
                        let err = root_cause(&mut tasks, err);
                        tasks.shutdown().await;
                        return Err(err);
                    }
                }
                else => break,
            }
        }

        if results.len() != expected {
            return Err(ExecutorError::Incomplete {
                expected,
                actual: results.len(),
            });
        }
        results.sort_by_key(|r| order.get(&r.id).copied().unwrap_or(usize::MAX));
        Ok(results)
    }

    /// Chain one stage per configured checker and return the stream of mutants that passed all.
    fn spawn_checkers(
        &self,
        tasks: &mut JoinSet<Result<(), ExecutorError>>,
        input: mpsc::Receiver<MutantWithCoverage>,
        results: &mpsc::Sender<MutantResult>,
        capacity: usize,
    ) -> mpsc::Receiver<MutantWithCoverage> {
        let Some(pool) = &self.checker_pool else {
            return input;
        };

        let mut previous = input;
        for checker in &self.config.checkers {
            let (passed_tx, passed_rx) = mpsc::channel(capacity);
            let stage = CheckerStage::new(
                checker.clone(),
                pool.clone(),
                self.resolver.clone(),
                Arc::clone(&self.reporter),
            );
            tasks.spawn(stage.run(previous, passed_tx, results.clone()));
            previous = passed_rx;
        }

        let (released_tx, released_rx) = mpsc::channel(capacity);
        tasks.spawn(release_checkers(
            previous,
            released_tx,
            pool.clone(),
            self.test_runner_pool.clone(),
            self.budget.checkers,
        ));
        released_rx
    }
}

fn flatten(joined: Result<Result<(), ExecutorError>, JoinError>) -> Result<(), ExecutorError> {
    joined.map_err(|err| ExecutorError::Stage(err.to_string()))?
}

/// A closed channel is a symptom; prefer the failure of the stage that stopped consuming.
fn root_cause(tasks: &mut JoinSet<Result<(), ExecutorError>>, first: ExecutorError) -> ExecutorError {
    let mut cause = first;
    while let Some(joined) = tasks.try_join_next() {
        if let Err(err) = flatten(joined) {
            if matches!(cause, ExecutorError::ChannelClosed(_))
                && !matches!(err, ExecutorError::ChannelClosed(_))
            {
                cause = err;
            }
        }
    }
    cause
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    match (secs / 3600, (secs % 3600) / 60, secs % 60) {
        (0, 0, s) => format!("{s} second(s)"),
        (0, m, s) => format!("{m} minute(s) and {s} second(s)"),
        (h, m, s) => format!("{h} hour(s), {m} minute(s) and {s} second(s)"),
    }
}

fn receiver_stream<T: Send>(rx: mpsc::Receiver<T>) -> impl Stream<Item = T> + Send {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
}

async fn ignore_stage(
    mutants: Vec<MutantWithCoverage>,
    reporter: Arc<dyn MutantReporter>,
    results: mpsc::Sender<MutantResult>,
    candidates: mpsc::Sender<MutantWithCoverage>,
) -> Result<(), ExecutorError> {
    for mutant in mutants {
        if mutant.mutant.status == Some(MutantStatus::Ignored) {
            results
                .send(reporter.report_mutant_status(&mutant, MutantStatus::Ignored))
                .await
                .map_err(|_| ExecutorError::ChannelClosed("results"))?;
        } else {
            candidates
                .send(mutant)
                .await
                .map_err(|_| ExecutorError::ChannelClosed("ignore filter"))?;
        }
    }
    Ok(())
}

/// Forward everything that passed the last checker, then hand the checker budget to the tests.
async fn release_checkers(
    mut input: mpsc::Receiver<MutantWithCoverage>,
    output: mpsc::Sender<MutantWithCoverage>,
    checker_pool: Pool<dyn CheckerResource>,
    test_runner_pool: Pool<dyn TestRunner>,
    allotment: usize,
) -> Result<(), ExecutorError> {
    while let Some(mutant) = input.recv().await {
        output
            .send(mutant)
            .await
            .map_err(|_| ExecutorError::ChannelClosed("checkers"))?;
    }
    log::debug!("Checker(s) finished.");
    checker_pool.dispose().await?;
    test_runner_pool.add_capacity(allotment);
    Ok(())
}

async fn coverage_stage(
    mut input: mpsc::Receiver<MutantWithCoverage>,
    reporter: Arc<dyn MutantReporter>,
    results: mpsc::Sender<MutantResult>,
    covered: mpsc::Sender<MutantWithCoverage>,
) -> Result<(), ExecutorError> {
    while let Some(mutant) = input.recv().await {
        if mutant.has_no_coverage() {
            results
                .send(reporter.report_mutant_status(&mutant, MutantStatus::NoCoverage))
                .await
                .map_err(|_| ExecutorError::ChannelClosed("results"))?;
        } else {
            covered
                .send(mutant)
                .await
                .map_err(|_| ExecutorError::ChannelClosed("coverage filter"))?;
        }
    }
    Ok(())
}

async fn test_run_stage(
    pool: Pool<dyn TestRunner>,
    input: mpsc::Receiver<MutantWithCoverage>,
    planner: RunPlanner,
    reporter: Arc<dyn MutantReporter>,
    results: mpsc::Sender<MutantResult>,
) -> Result<(), ExecutorError> {
    let runs = pool.schedule(receiver_stream(input), move |runner, mutant| {
        let options = planner.options_for(&mutant);
        async move {
            let run = runner.mutant_run(options).await?;
            Ok::<_, ExecutorError>((mutant, run))
        }
    });
    pin_mut!(runs);

    while let Some(outcome) = runs.next().await {
        let (mutant, run) = outcome?;
        results
            .send(reporter.report_mutant_run_result(&mutant, &run))
            .await
            .map_err(|_| ExecutorError::ChannelClosed("results"))?;
    }
    Ok(())
}
