//! Checker plugins and the pipeline stage that runs them.
//!
//! A checker (typically a type checker) decides cheaply whether a mutant is worth running the
//! tests for. Checkers are hosted in [`CheckerWorker`]s, wrapped for crash recovery by
//! [`CheckerRetryDecorator`] and driven by [`CheckerStage`]. [`ProcessChecker`] runs them in a
//! child process instead.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::mutant::{CheckResult, Mutant};

pub mod process;
pub mod retry;
pub mod stage;
pub mod worker;

pub use process::{ProcessChecker, ProcessCommand, serve_checker, serve_stdio};
pub use retry::CheckerRetryDecorator;
pub use stage::CheckerStage;
pub use worker::{CheckerResource, CheckerWorker};

/// Verdicts keyed by mutant id.
pub type CheckResults = HashMap<String, CheckResult>;

/// A checker plugin.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Prepare the checker (e.g. build the initial program). Failures are fatal for the run.
    async fn init(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Check every mutant in `mutants` with all of them active at once.
    ///
    /// Must return a verdict for every mutant id it was given.
    async fn check(&self, mutants: &[Mutant]) -> Result<CheckResults, WorkerError>;

    /// Optionally partition `mutants` into groups that may be checked together.
    ///
    /// `None` leaves grouping to the pipeline.
    async fn create_groups(&self, mutants: &[Mutant]) -> Result<Option<Vec<Vec<Mutant>>>, WorkerError> {
        let _ = mutants;
        Ok(None)
    }
}

/// Builds fresh checker instances.
pub type CheckerFactory = Arc<dyn Fn() -> Box<dyn Checker> + Send + Sync>;

/// Checker plugins by name.
#[derive(Clone, Default)]
pub struct CheckerRegistry {
    factories: BTreeMap<String, CheckerFactory>,
}

impl fmt::Debug for CheckerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckerRegistry")
            .field("checkers", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CheckerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any earlier registration.
    pub fn register<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Checker> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// True when `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiate the checker registered under `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn Checker>, WorkerError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| WorkerError::UnknownChecker(name.to_string()))
    }
}
