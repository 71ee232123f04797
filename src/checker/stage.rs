//! One checker's pass over the mutant stream.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::{StreamExt, pin_mut, stream};
use tokio::sync::mpsc;

use super::CheckResults;
use super::worker::CheckerResource;
use crate::concurrent::Pool;
use crate::error::ExecutorError;
use crate::group::{DependencyResolver, GroupBuilder};
use crate::mutant::{CheckStatus, Mutant, MutantResult, MutantWithCoverage};
use crate::report::MutantReporter;

/// Runs a single named checker over every mutant it receives.
///
/// The stage needs the whole input before it can group, so it drains its input channel first.
/// Passing mutants go downstream; rejected mutants become terminal results.
pub struct CheckerStage {
    checker: String,
    pool: Pool<dyn CheckerResource>,
    resolver: Option<Arc<dyn DependencyResolver>>,
    reporter: Arc<dyn MutantReporter>,
}

impl CheckerStage {
    /// Stage for `checker`, calling workers from `pool`.
    ///
    /// `resolver` enables dependency-aware grouping when the checker has no grouping of its own.
    pub fn new(
        checker: impl Into<String>,
        pool: Pool<dyn CheckerResource>,
        resolver: Option<Arc<dyn DependencyResolver>>,
        reporter: Arc<dyn MutantReporter>,
    ) -> Self {
        Self {
            checker: checker.into(),
            pool,
            resolver,
            reporter,
        }
    }

    /// Drain `input`, check every mutant, and route each to `passed` or `failed`.
    pub async fn run(
        self,
        mut input: mpsc::Receiver<MutantWithCoverage>,
        passed: mpsc::Sender<MutantWithCoverage>,
        failed: mpsc::Sender<MutantResult>,
    ) -> Result<(), ExecutorError> {
        let mut batch = Vec::new();
        while let Some(mutant) = input.recv().await {
            batch.push(mutant);
        }
        if batch.is_empty() {
            log::debug!("{} has nothing to check.", self.checker);
            return Ok(());
        }

        self.activate().await?;
        let groups = self.groups(batch).await?;
        log::debug!("{} created {} groups.", self.checker, groups.len());

        let checker = self.checker.clone();
        let checked = self.pool.schedule(stream::iter(groups), move |worker, group| {
            let checker = checker.clone();
            async move {
                let plain: Vec<Mutant> = group.iter().map(|m| m.mutant.clone()).collect();
                let verdicts = worker
                    .check(&plain)
                    .await
                    .map_err(|source| ExecutorError::checker(checker, source))?;
                Ok::<_, ExecutorError>((group, verdicts))
            }
        });
        pin_mut!(checked);

        while let Some(outcome) = checked.next().await {
            let (group, mut verdicts) = outcome?;
            self.route(group, &mut verdicts, &passed, &failed).await?;
        }
        Ok(())
    }

    async fn activate(&self) -> Result<(), ExecutorError> {
        // Workers created lazily later would miss the broadcast.
        self.pool.init().await?;
        let name = self.checker.clone();
        self.pool
            .run_on_all(|worker| {
                let name = name.clone();
                async move { worker.set_active_checker(&name).await }
            })
            .await
            .map_err(|source| ExecutorError::checker(self.checker.clone(), source))
    }

    async fn groups(
        &self,
        batch: Vec<MutantWithCoverage>,
    ) -> Result<Vec<Vec<MutantWithCoverage>>, ExecutorError> {
        let plain: Vec<Mutant> = batch.iter().map(|m| m.mutant.clone()).collect();

        let custom = {
            let worker = self.pool.acquire().await?;
            worker
                .resource()
                .create_groups(&plain)
                .await
                .map_err(|source| ExecutorError::checker(self.checker.clone(), source))?
        };

        let groups = match (custom, &self.resolver) {
            (Some(groups), _) => groups,
            (None, Some(resolver)) => {
                let resolver = Arc::clone(resolver);
                tokio::task::spawn_blocking(move || GroupBuilder::new(resolver.as_ref()).build(&plain))
                    .await
                    .map_err(|err| ExecutorError::Stage(format!("grouping failed: {err}")))?
            }
            (None, None) => return Ok(batch.into_iter().map(|m| vec![m]).collect()),
        };

        self.assemble(batch, groups)
    }

    /// Map grouped plain mutants back onto the coverage-carrying originals.
    ///
    /// Unknown ids are fatal. Duplicates are dropped and mutants left out of every group are
    /// appended as singletons.
    fn assemble(
        &self,
        batch: Vec<MutantWithCoverage>,
        groups: Vec<Vec<Mutant>>,
    ) -> Result<Vec<Vec<MutantWithCoverage>>, ExecutorError> {
        let order: Vec<String> = batch.iter().map(|m| m.id().to_string()).collect();
        let mut pending: HashMap<String, MutantWithCoverage> = batch
            .into_iter()
            .map(|m| (m.id().to_string(), m))
            .collect();
        let mut assigned: HashSet<String> = HashSet::new();

        let mut out = Vec::with_capacity(groups.len());
        for group in groups {
            let mut members = Vec::with_capacity(group.len());
            for mutant in group {
                match pending.remove(&mutant.id) {
                    Some(full) => {
                        assigned.insert(mutant.id);
                        members.push(full);
                    }
                    None if assigned.contains(&mutant.id) => log::warn!(
                        "{} grouped mutant {} more than once; checking it once.",
                        self.checker,
                        mutant.id
                    ),
                    None => {
                        return Err(ExecutorError::UnknownGroupMember {
                            checker: self.checker.clone(),
                            mutant_id: mutant.id,
                        });
                    }
                }
            }
            if !members.is_empty() {
                out.push(members);
            }
        }

        if !pending.is_empty() {
            log::warn!(
                "{} left {} mutant(s) out of its groups; checking them on their own.",
                self.checker,
                pending.len()
            );
            for id in order {
                if let Some(mutant) = pending.remove(&id) {
                    out.push(vec![mutant]);
                }
            }
        }
        Ok(out)
    }

    async fn route(
        &self,
        group: Vec<MutantWithCoverage>,
        verdicts: &mut CheckResults,
        passed: &mpsc::Sender<MutantWithCoverage>,
        failed: &mpsc::Sender<MutantResult>,
    ) -> Result<(), ExecutorError> {
        for mutant in group {
            let Some(verdict) = verdicts.remove(mutant.id()) else {
                return Err(ExecutorError::MissingCheckResult {
                    checker: self.checker.clone(),
                    mutant_id: mutant.id().to_string(),
                });
            };
            match verdict.status {
                CheckStatus::Passed => passed
                    .send(mutant)
                    .await
                    .map_err(|_| ExecutorError::ChannelClosed("checker"))?,
                CheckStatus::CompileError | CheckStatus::Timeout => {
                    let result = self.reporter.report_check_failed(&mutant, &verdict);
                    failed
                        .send(result)
                        .await
                        .map_err(|_| ExecutorError::ChannelClosed("results"))?
                }
            }
        }
        Ok(())
    }
}
