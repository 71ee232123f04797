//! Crash recovery for checker workers.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::CheckResults;
use super::worker::CheckerResource;
use crate::concurrent::{Resource, ResourceDecorator, ResourceFactory};
use crate::error::WorkerError;
use crate::mutant::Mutant;

/// Checker worker that survives a crash of its underlying process.
///
/// `check` is retried once in a fresh worker, which gets the previously active checker
/// re-applied first. `create_groups` is not retried.
pub struct CheckerRetryDecorator {
    decorator: ResourceDecorator<dyn CheckerResource>,
    active: Mutex<Option<String>>,
}

impl CheckerRetryDecorator {
    /// Wrap the worker produced by `producer`.
    pub fn new(producer: ResourceFactory<dyn CheckerResource>) -> Self {
        Self {
            decorator: ResourceDecorator::new("Checker", producer),
            active: Mutex::new(None),
        }
    }

    fn active(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Resource for CheckerRetryDecorator {
    async fn init(&self) -> Result<(), WorkerError> {
        self.decorator.init().await
    }

    async fn dispose(&self) -> Result<(), WorkerError> {
        self.decorator.dispose().await
    }
}

#[async_trait]
impl CheckerResource for CheckerRetryDecorator {
    async fn set_active_checker(&self, checker: &str) -> Result<(), WorkerError> {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(checker.to_string());
        self.decorator
            .current()
            .await
            .set_active_checker(checker)
            .await
    }

    async fn check(&self, mutants: &[Mutant]) -> Result<CheckResults, WorkerError> {
        let active = self.active();
        self.decorator
            .call_with_recovery(
                |worker| async move { worker.check(mutants).await },
                |fresh| async move {
                    match active {
                        Some(name) => fresh.set_active_checker(&name).await,
                        None => Ok(()),
                    }
                },
            )
            .await
    }

    async fn create_groups(&self, mutants: &[Mutant]) -> Result<Option<Vec<Vec<Mutant>>>, WorkerError> {
        self.decorator.current().await.create_groups(mutants).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::mutant::CheckResult;
    use crate::testing;

    /// Crashes on the first check of the first instance only.
    struct FlakyChecker {
        instance: usize,
        active: Mutex<Option<String>>,
        inits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Resource for FlakyChecker {
        async fn init(&self) -> Result<(), WorkerError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl CheckerResource for FlakyChecker {
        async fn set_active_checker(&self, checker: &str) -> Result<(), WorkerError> {
            *self.active.lock().expect("active lock") = Some(checker.to_string());
            Ok(())
        }

        async fn check(&self, mutants: &[Mutant]) -> Result<CheckResults, WorkerError> {
            if self.instance == 0 {
                return Err(WorkerError::crashed(4242, Some(1), "segfault"));
            }
            let active = self.active.lock().expect("active lock").clone();
            match active {
                Some(name) => Ok(mutants
                    .iter()
                    .map(|m| (m.id.clone(), CheckResult::compile_error(name.clone())))
                    .collect()),
                None => Err(WorkerError::NoActiveChecker),
            }
        }

        async fn create_groups(
            &self,
            _mutants: &[Mutant],
        ) -> Result<Option<Vec<Vec<Mutant>>>, WorkerError> {
            Err(WorkerError::crashed(4243, None, "gone"))
        }
    }

    fn flaky() -> (CheckerRetryDecorator, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let produced = Arc::new(AtomicUsize::new(0));
        let inits = Arc::new(AtomicUsize::new(0));
        let factory_produced = Arc::clone(&produced);
        let factory_inits = Arc::clone(&inits);
        let producer: ResourceFactory<dyn CheckerResource> = Arc::new(move || {
            let instance = factory_produced.fetch_add(1, Ordering::SeqCst);
            Arc::new(FlakyChecker {
                instance,
                active: Mutex::new(None),
                inits: Arc::clone(&factory_inits),
            }) as Arc<dyn CheckerResource>
        });
        (CheckerRetryDecorator::new(producer), produced, inits)
    }

    #[tokio::test]
    async fn check_retries_in_a_fresh_worker_with_the_active_checker_restored() {
        testing::capture_logs();
        let (decorator, produced, inits) = flaky();
        decorator.init().await.expect("init should succeed");
        decorator
            .set_active_checker("typescript")
            .await
            .expect("activation should succeed");

        let results = decorator
            .check(&[Mutant::new("1", "a.ts")])
            .await
            .expect("retry should succeed");

        assert_eq!(results["1"], CheckResult::compile_error("typescript"));
        assert_eq!(produced.load(Ordering::SeqCst), 2);
        assert_eq!(inits.load(Ordering::SeqCst), 2);
        assert_eq!(
            testing::warnings_containing("[4242]"),
            vec![
                "Checker process [4242] crashed with exit code 1. Retrying in a new process. (segfault)"
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn create_groups_is_not_retried() {
        let (decorator, produced, _) = flaky();
        let err = decorator
            .create_groups(&[])
            .await
            .expect_err("crash should propagate");
        assert!(err.is_crash());
        assert_eq!(produced.load(Ordering::SeqCst), 1);
    }
}
