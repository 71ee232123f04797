//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used items from this crate.
//!
//! # Example
//!
//! ```rust
//! use mutant_sieve::prelude::*;
//!
//! let config = ExecutorConfig::default().with_concurrency(4).with_checkers(["typescript"]);
//! assert_eq!(ConcurrencyBudget::from_config(&config).checkers, 2);
//! ```

pub use crate::checker::{
    CheckResults, Checker, CheckerRegistry, CheckerResource, ProcessChecker, ProcessCommand,
};
pub use crate::concurrent::{Pool, Resource, ResourceFactory};
pub use crate::config::{ConcurrencyBudget, ExecutorConfig};
pub use crate::error::{ExecutorError, WorkerError};
pub use crate::executor::MutationTestExecutor;
pub use crate::group::{DependencyResolver, GroupBuilder, SourceImportResolver, StaticDependencies};
pub use crate::mutant::{
    CheckResult, CheckStatus, Mutant, MutantResult, MutantRunResult, MutantStatus,
    MutantWithCoverage,
};
pub use crate::report::{MutantReporter, ReportFormat, ResultCollector, RunSummary, render_report};
pub use crate::test_runner::{MutantRunOptions, TestRunner};
