//! # mutant-sieve
//!
//! `mutant-sieve` verifies and schedules mutants for a mutation testing run:
//! - `concurrent`: bounded worker pools and crash-recovering worker decorators
//! - `checker`: checker plugins, their workers and the per-checker pipeline stage
//! - `group`: dependency-aware grouping so independent mutants are checked together
//! - `test_runner`: test-runner workers, run options and timeout handling
//! - `executor`: the pipeline tying it all together, one result per mutant
//! - `report`: result mapping, summaries and rendered reports
//!
//! Workers are abstract: real deployments back them with child processes, tests back them with
//! in-memory fakes.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub mod checker;
pub mod concurrent;
pub mod config;
pub mod error;
pub mod executor;
pub mod group;
pub mod mutant;
pub mod prelude;
pub mod report;
pub mod test_runner;

#[cfg(test)]
mod testing;
