//! Worker hosting the configured checker plugins.

use std::sync::{Mutex, OnceLock, PoisonError};

use async_trait::async_trait;

use super::{CheckResults, Checker, CheckerRegistry};
use crate::concurrent::Resource;
use crate::error::WorkerError;
use crate::mutant::Mutant;

/// A pooled worker that can run checks.
#[async_trait]
pub trait CheckerResource: Resource {
    /// Select which hosted checker subsequent calls use.
    async fn set_active_checker(&self, checker: &str) -> Result<(), WorkerError>;

    /// Run the active checker on `mutants`.
    async fn check(&self, mutants: &[Mutant]) -> Result<CheckResults, WorkerError>;

    /// Ask the active checker for its own grouping.
    async fn create_groups(&self, mutants: &[Mutant]) -> Result<Option<Vec<Vec<Mutant>>>, WorkerError>;
}

struct NamedChecker {
    name: String,
    checker: Box<dyn Checker>,
}

/// Hosts one instance of every configured checker; one of them is active at a time.
pub struct CheckerWorker {
    registry: CheckerRegistry,
    names: Vec<String>,
    checkers: OnceLock<Vec<NamedChecker>>,
    active: Mutex<Option<usize>>,
}

impl CheckerWorker {
    /// Worker for the checkers `names`, instantiated from `registry` on [`Resource::init`].
    pub fn new(registry: CheckerRegistry, names: Vec<String>) -> Self {
        Self {
            registry,
            names,
            checkers: OnceLock::new(),
            active: Mutex::new(None),
        }
    }

    fn active_checker(&self) -> Result<&NamedChecker, WorkerError> {
        let active = *self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match (active, self.checkers.get()) {
            (Some(idx), Some(checkers)) => checkers.get(idx).ok_or(WorkerError::NoActiveChecker),
            _ => Err(WorkerError::NoActiveChecker),
        }
    }
}

#[async_trait]
impl Resource for CheckerWorker {
    async fn init(&self) -> Result<(), WorkerError> {
        if self.checkers.get().is_some() {
            return Ok(());
        }
        let mut checkers = Vec::with_capacity(self.names.len());
        for name in &self.names {
            let checker = self.registry.create(name)?;
            checker.init().await.map_err(|err| match err {
                WorkerError::Init { .. } => err,
                other => WorkerError::Init {
                    checker: name.clone(),
                    reason: other.to_string(),
                },
            })?;
            checkers.push(NamedChecker {
                name: name.clone(),
                checker,
            });
        }
        // A concurrent init may have won; either set of checkers is equivalent.
        let _ = self.checkers.set(checkers);
        Ok(())
    }
}

#[async_trait]
impl CheckerResource for CheckerWorker {
    async fn set_active_checker(&self, checker: &str) -> Result<(), WorkerError> {
        let idx = self
            .checkers
            .get()
            .and_then(|checkers| checkers.iter().position(|c| c.name == checker))
            .ok_or_else(|| WorkerError::UnknownChecker(checker.to_string()))?;
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(idx);
        Ok(())
    }

    async fn check(&self, mutants: &[Mutant]) -> Result<CheckResults, WorkerError> {
        self.active_checker()?.checker.check(mutants).await
    }

    async fn create_groups(&self, mutants: &[Mutant]) -> Result<Option<Vec<Vec<Mutant>>>, WorkerError> {
        self.active_checker()?.checker.create_groups(mutants).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutant::CheckResult;

    struct Verdict(fn(&Mutant) -> CheckResult);

    #[async_trait]
    impl Checker for Verdict {
        async fn check(&self, mutants: &[Mutant]) -> Result<CheckResults, WorkerError> {
            Ok(mutants.iter().map(|m| (m.id.clone(), (self.0)(m))).collect())
        }
    }

    struct BrokenInit;

    #[async_trait]
    impl Checker for BrokenInit {
        async fn init(&self) -> Result<(), WorkerError> {
            Err(WorkerError::rejected("tsconfig.json not found"))
        }

        async fn check(&self, _mutants: &[Mutant]) -> Result<CheckResults, WorkerError> {
            unreachable!("never initialized")
        }
    }

    fn registry() -> CheckerRegistry {
        CheckerRegistry::new()
            .register("pass", || Box::new(Verdict(|_| CheckResult::passed())))
            .register("fail", || {
                Box::new(Verdict(|m| CheckResult::compile_error(format!("{} broke", m.id))))
            })
            .register("broken", || Box::new(BrokenInit))
    }

    #[tokio::test]
    async fn switches_between_hosted_checkers() {
        let worker = CheckerWorker::new(registry(), vec!["pass".to_string(), "fail".to_string()]);
        worker.init().await.expect("init should succeed");
        let mutants = [Mutant::new("1", "a.ts")];

        assert_eq!(
            worker.check(&mutants).await,
            Err(WorkerError::NoActiveChecker)
        );

        worker.set_active_checker("pass").await.expect("pass is hosted");
        assert_eq!(
            worker.check(&mutants).await.expect("check succeeds")["1"],
            CheckResult::passed()
        );

        worker.set_active_checker("fail").await.expect("fail is hosted");
        assert_eq!(
            worker.check(&mutants).await.expect("check succeeds")["1"],
            CheckResult::compile_error("1 broke")
        );
    }

    #[tokio::test]
    async fn activating_an_unhosted_checker_fails() {
        let worker = CheckerWorker::new(registry(), vec!["pass".to_string()]);
        worker.init().await.expect("init should succeed");
        assert_eq!(
            worker.set_active_checker("fail").await,
            Err(WorkerError::UnknownChecker("fail".to_string()))
        );
    }

    #[tokio::test]
    async fn init_failures_name_the_checker() {
        let worker = CheckerWorker::new(registry(), vec!["pass".to_string(), "broken".to_string()]);
        let err = worker.init().await.expect_err("init should fail");
        assert_eq!(
            err.to_string(),
            "an error occurred during initialization of the \"broken\" checker: tsconfig.json not found"
        );
    }

    #[tokio::test]
    async fn unknown_checker_names_fail_init() {
        let worker = CheckerWorker::new(registry(), vec!["typescript".to_string()]);
        assert_eq!(
            worker.init().await,
            Err(WorkerError::UnknownChecker("typescript".to_string()))
        );
    }
}
