//! Result reporting and run summaries.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::mutant::{CheckResult, MutantResult, MutantRunResult, MutantStatus, MutantWithCoverage};

/// Turns verdicts into [`MutantResult`]s and observes the final result set.
///
/// The default methods build the canonical result for each kind of verdict; override them to
/// stream progress somewhere as results are produced.
pub trait MutantReporter: Send + Sync {
    /// A mutant resolved without any worker involvement (ignored, no coverage).
    fn report_mutant_status(
        &self,
        mutant: &MutantWithCoverage,
        status: MutantStatus,
    ) -> MutantResult {
        let reason = match status {
            MutantStatus::Ignored => mutant.mutant.status_reason.clone(),
            _ => None,
        };
        MutantResult::new(mutant, status).with_reason(reason)
    }

    /// A checker rejected the mutant, either with a diagnostic or by running out of time.
    ///
    /// Only called for verdicts other than [`CheckStatus::Passed`](crate::mutant::CheckStatus::Passed).
    /// The mutant never reached the tests, so it is a compile error either way.
    fn report_check_failed(&self, mutant: &MutantWithCoverage, check: &CheckResult) -> MutantResult {
        MutantResult::new(mutant, MutantStatus::CompileError).with_reason(check.reason.clone())
    }

    /// The test runner finished with the mutant active.
    fn report_mutant_run_result(
        &self,
        mutant: &MutantWithCoverage,
        run: &MutantRunResult,
    ) -> MutantResult {
        result_for_run(mutant, run)
    }

    /// The run finished; `results` holds exactly one entry per input mutant, in input order.
    fn report_all(&self, results: &[MutantResult]);
}

/// Canonical result for a test-runner outcome.
pub fn result_for_run(mutant: &MutantWithCoverage, run: &MutantRunResult) -> MutantResult {
    match run {
        MutantRunResult::Killed {
            killed_by,
            failure_message,
            nr_of_tests,
        } => {
            let mut result = MutantResult::new(mutant, MutantStatus::Killed)
                .with_reason(Some(failure_message.clone()));
            result.killed_by = killed_by.clone();
            result.tests_completed = Some(*nr_of_tests);
            result
        }
        MutantRunResult::Survived { nr_of_tests } => {
            let mut result = MutantResult::new(mutant, MutantStatus::Survived);
            result.tests_completed = Some(*nr_of_tests);
            result
        }
        MutantRunResult::Timeout { reason } => {
            MutantResult::new(mutant, MutantStatus::Timeout).with_reason(reason.clone())
        }
        MutantRunResult::Error { error_message } => {
            MutantResult::new(mutant, MutantStatus::RuntimeError)
                .with_reason(Some(error_message.clone()))
        }
    }
}

/// Reporter that keeps the final result set in memory.
#[derive(Debug, Default)]
pub struct ResultCollector {
    results: Mutex<Vec<MutantResult>>,
}

impl ResultCollector {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Results passed to the last [`MutantReporter::report_all`] call.
    pub fn results(&self) -> Vec<MutantResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Summary of the collected results.
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_results(&self.results())
    }
}

impl MutantReporter for ResultCollector {
    fn report_all(&self, results: &[MutantResult]) {
        *self.results.lock().unwrap_or_else(PoisonError::into_inner) = results.to_vec();
    }
}

/// Supported output formats for run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Markdown summary.
    Markdown,
    /// JSON summary with all mutants inline.
    Json,
}

/// Aggregated run counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Total mutants.
    pub total: usize,
    /// Detected / (detected + undetected), percentage.
    pub mutation_score: f64,
    /// Killed mutants.
    pub killed: usize,
    /// Survived mutants.
    pub survived: usize,
    /// Timed-out mutants.
    pub timeout: usize,
    /// Mutants no test covers.
    pub no_coverage: usize,
    /// Mutants rejected by a checker.
    pub compile_error: usize,
    /// Mutants whose test run errored.
    pub runtime_error: usize,
    /// Ignored mutants.
    pub ignored: usize,
}

impl RunSummary {
    /// Build summary from final results.
    pub fn from_results(results: &[MutantResult]) -> Self {
        let mut out = Self {
            total: results.len(),
            mutation_score: 0.0,
            killed: 0,
            survived: 0,
            timeout: 0,
            no_coverage: 0,
            compile_error: 0,
            runtime_error: 0,
            ignored: 0,
        };

        for result in results {
            match result.status {
                MutantStatus::Killed => out.killed += 1,
                MutantStatus::Survived => out.survived += 1,
                MutantStatus::Timeout => out.timeout += 1,
                MutantStatus::NoCoverage => out.no_coverage += 1,
                MutantStatus::CompileError => out.compile_error += 1,
                MutantStatus::RuntimeError => out.runtime_error += 1,
                MutantStatus::Ignored => out.ignored += 1,
            }
        }

        let detected = out.killed + out.timeout;
        let valid = detected + out.survived + out.no_coverage;
        out.mutation_score = if valid > 0 {
            (detected as f64) * 100.0 / (valid as f64)
        } else {
            100.0
        };

        out
    }
}

/// Render run report in requested format.
pub fn render_report(
    results: &[MutantResult],
    format: ReportFormat,
) -> Result<String, serde_json::Error> {
    let summary = RunSummary::from_results(results);

    match format {
        ReportFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
            "summary": summary,
            "mutants": results,
        })),
        ReportFormat::Markdown => {
            let mut out = String::from("# Mutation Test Results\n\n");

            out.push_str("## Summary\n\n| metric | count |\n|---|---:|\n");
            for (metric, count) in [
                ("total", summary.total),
                ("killed", summary.killed),
                ("survived", summary.survived),
                ("timeout", summary.timeout),
                ("no coverage", summary.no_coverage),
                ("compile error", summary.compile_error),
                ("runtime error", summary.runtime_error),
                ("ignored", summary.ignored),
            ] {
                out.push_str(&format!("| {metric} | {count} |\n"));
            }
            out.push_str(&format!(
                "| mutation score | {:.2}% |\n",
                summary.mutation_score
            ));

            let undetected: Vec<&MutantResult> = results
                .iter()
                .filter(|r| matches!(r.status, MutantStatus::Survived | MutantStatus::NoCoverage))
                .collect();
            if !undetected.is_empty() {
                out.push_str("\n## Undetected mutants\n\n");
                for r in undetected {
                    out.push_str(&format!(
                        "- `{}` {}:{}:{} {} ({})\n",
                        r.id,
                        r.file_name,
                        r.location.start.line,
                        r.location.start.column,
                        r.mutator_name,
                        r.status
                    ));
                }
            }

            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutant::Mutant;

    fn mutant(id: &str) -> MutantWithCoverage {
        MutantWithCoverage::new(Mutant::new(id, "src/a.ts")).with_covered_by(["t1"])
    }

    fn results_with(statuses: &[MutantStatus]) -> Vec<MutantResult> {
        statuses
            .iter()
            .enumerate()
            .map(|(idx, status)| MutantResult::new(&mutant(&idx.to_string()), *status))
            .collect()
    }

    struct Silent;

    impl MutantReporter for Silent {
        fn report_all(&self, _results: &[MutantResult]) {}
    }

    #[test]
    fn run_results_map_to_statuses() {
        let m = mutant("1");
        let killed = Silent.report_mutant_run_result(
            &m,
            &MutantRunResult::Killed {
                killed_by: vec!["t1".to_string()],
                failure_message: "expected 3".to_string(),
                nr_of_tests: 4,
            },
        );
        assert_eq!(killed.status, MutantStatus::Killed);
        assert_eq!(killed.killed_by, vec!["t1".to_string()]);
        assert_eq!(killed.tests_completed, Some(4));
        assert_eq!(killed.status_reason.as_deref(), Some("expected 3"));

        let errored = Silent.report_mutant_run_result(
            &m,
            &MutantRunResult::Error {
                error_message: "worker died".to_string(),
            },
        );
        assert_eq!(errored.status, MutantStatus::RuntimeError);

        let timed_out =
            Silent.report_mutant_run_result(&m, &MutantRunResult::Timeout { reason: None });
        assert_eq!(timed_out.status, MutantStatus::Timeout);
    }

    #[test]
    fn check_failures_keep_the_reason() {
        let m = mutant("1");
        let failed = Silent.report_check_failed(&m, &CheckResult::compile_error("TS2322"));
        assert_eq!(failed.status, MutantStatus::CompileError);
        assert_eq!(failed.status_reason.as_deref(), Some("TS2322"));

        let slow = Silent.report_check_failed(&m, &CheckResult::timeout("tsc slow"));
        assert_eq!(slow.status, MutantStatus::CompileError);
        assert_eq!(slow.status_reason.as_deref(), Some("tsc slow"));
    }

    #[test]
    fn ignored_mutants_keep_their_ignore_reason() {
        let mut m = mutant("1");
        m.mutant.status = Some(MutantStatus::Ignored);
        m.mutant.status_reason = Some("disabled by comment".to_string());
        let result = Silent.report_mutant_status(&m, MutantStatus::Ignored);
        assert_eq!(result.status_reason.as_deref(), Some("disabled by comment"));
    }

    #[test]
    fn summary_counts_all_statuses() {
        let summary = RunSummary::from_results(&results_with(&[
            MutantStatus::Killed,
            MutantStatus::Survived,
            MutantStatus::Timeout,
            MutantStatus::NoCoverage,
            MutantStatus::CompileError,
            MutantStatus::RuntimeError,
            MutantStatus::Ignored,
        ]));
        assert_eq!(summary.total, 7);
        assert_eq!(summary.killed, 1);
        assert_eq!(summary.no_coverage, 1);
        assert_eq!(summary.ignored, 1);
        assert!((summary.mutation_score - 50.0).abs() < 1e-12);
    }

    #[test]
    fn summary_handles_no_valid_mutants() {
        let summary =
            RunSummary::from_results(&results_with(&[MutantStatus::Ignored, MutantStatus::CompileError]));
        assert_eq!(summary.mutation_score, 100.0);
    }

    #[test]
    fn collector_keeps_the_final_set() {
        let collector = ResultCollector::new();
        collector.report_all(&results_with(&[MutantStatus::Killed, MutantStatus::Survived]));
        assert_eq!(collector.results().len(), 2);
        assert_eq!(collector.summary().survived, 1);
    }

    #[test]
    fn report_renders_json_and_markdown() {
        let results = results_with(&[MutantStatus::Killed, MutantStatus::Survived]);
        let md = render_report(&results, ReportFormat::Markdown).expect("markdown renders");
        assert!(md.contains("| killed | 1 |"));
        assert!(md.contains("| mutation score | 50.00% |"));
        assert!(md.contains("## Undetected mutants"));
        assert!(md.contains("`1` src/a.ts"));

        let json = render_report(&results, ReportFormat::Json).expect("json renders");
        assert!(json.contains("\"survived\": 1"));
        assert!(json.contains("\"mutants\":"));
    }
}
