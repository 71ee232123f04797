//! Dependency-aware grouping of mutants for batch checking.
//!
//! Mutants in files that do not depend on each other can be activated together in one checker
//! call without their effects interfering.

pub mod builder;
pub mod graph;
pub mod resolver;

pub use builder::GroupBuilder;
pub use graph::{DependencyGraph, DependencyNode, Discovery};
pub use resolver::{DependencyResolver, ResolveError, SourceImportResolver, StaticDependencies};
