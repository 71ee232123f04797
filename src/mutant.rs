//! Mutant data model shared by every pipeline stage.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Line/column position inside a source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// One-based line.
    pub line: u32,
    /// Zero-based column.
    pub column: u32,
}

/// Source range of a mutant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Start of the mutated range.
    pub start: Position,
    /// End of the mutated range.
    pub end: Position,
}

/// Terminal (or upstream-assigned) status of a mutant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutantStatus {
    /// At least one test failed.
    Killed,
    /// All covering tests passed.
    Survived,
    /// No test executes the mutant.
    NoCoverage,
    /// A checker rejected the mutant.
    CompileError,
    /// The test runner reported an error.
    RuntimeError,
    /// The run (or check) exceeded its time budget.
    Timeout,
    /// Excluded upstream.
    Ignored,
}

impl fmt::Display for MutantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Killed => "killed",
            Self::Survived => "survived",
            Self::NoCoverage => "no_coverage",
            Self::CompileError => "compile_error",
            Self::RuntimeError => "runtime_error",
            Self::Timeout => "timeout",
            Self::Ignored => "ignored",
        };
        f.write_str(s)
    }
}

/// A single syntactic variant of the program under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutant {
    /// Unique identifier.
    pub id: String,
    /// File the mutant lives in.
    pub file_name: String,
    /// Mutated range.
    #[serde(default)]
    pub location: Location,
    /// Name of the mutator that produced it.
    #[serde(default)]
    pub mutator_name: String,
    /// Replacement source text.
    #[serde(default)]
    pub replacement: String,
    /// Status assigned upstream, if any.
    #[serde(default)]
    pub status: Option<MutantStatus>,
    /// Reason for the upstream status.
    #[serde(default)]
    pub status_reason: Option<String>,
}

impl Mutant {
    /// Create a pending mutant for `file_name`.
    pub fn new(id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            location: Location::default(),
            mutator_name: String::new(),
            replacement: String::new(),
            status: None,
            status_reason: None,
        }
    }

    /// Set the upstream status.
    pub fn with_status(mut self, status: MutantStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// A mutant matched with the tests that execute it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutantWithCoverage {
    /// The mutant itself.
    #[serde(flatten)]
    pub mutant: Mutant,
    /// Tests known to execute the mutant.
    #[serde(default)]
    pub covered_by: Vec<String>,
    /// Executed during static initialization.
    #[serde(default, rename = "static")]
    pub is_static: bool,
    /// Net test time of the covering tests measured by the dry run.
    #[serde(default)]
    pub estimated_net_time_ms: f64,
    /// Number of times the mutant was hit during the dry run.
    #[serde(default)]
    pub hit_count: Option<u64>,
}

impl MutantWithCoverage {
    /// Wrap a mutant without coverage information.
    pub fn new(mutant: Mutant) -> Self {
        Self {
            mutant,
            covered_by: Vec::new(),
            is_static: false,
            estimated_net_time_ms: 0.0,
            hit_count: None,
        }
    }

    /// Set the covering tests.
    pub fn with_covered_by<I, S>(mut self, tests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.covered_by = tests.into_iter().map(Into::into).collect();
        self
    }

    /// Mark as static.
    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    /// Set dry-run timing and hit count.
    pub fn with_dry_run(mut self, estimated_net_time_ms: f64, hit_count: Option<u64>) -> Self {
        self.estimated_net_time_ms = estimated_net_time_ms;
        self.hit_count = hit_count;
        self
    }

    /// Mutant id.
    pub fn id(&self) -> &str {
        &self.mutant.id
    }

    /// File the mutant lives in.
    pub fn file_name(&self) -> &str {
        &self.mutant.file_name
    }

    /// No test can reach this mutant.
    pub fn has_no_coverage(&self) -> bool {
        !self.is_static && self.covered_by.is_empty()
    }
}

/// Outcome of a checker for one mutant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// The mutant is valid.
    Passed,
    /// The mutant does not compile.
    CompileError,
    /// The checker ran out of time.
    Timeout,
}

/// Checker verdict for one mutant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Verdict.
    pub status: CheckStatus,
    /// Diagnostic text.
    #[serde(default)]
    pub reason: Option<String>,
}

impl CheckResult {
    /// A passing verdict.
    pub fn passed() -> Self {
        Self {
            status: CheckStatus::Passed,
            reason: None,
        }
    }

    /// A compile error with diagnostic text.
    pub fn compile_error(reason: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::CompileError,
            reason: Some(reason.into()),
        }
    }

    /// A checker timeout.
    pub fn timeout(reason: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Timeout,
            reason: Some(reason.into()),
        }
    }
}

/// Outcome of running the test suite against one mutant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MutantRunResult {
    /// Tests failed.
    Killed {
        /// Tests that killed the mutant.
        killed_by: Vec<String>,
        /// Failure message of the first killing test.
        failure_message: String,
        /// Tests executed.
        nr_of_tests: u32,
    },
    /// Tests passed.
    Survived {
        /// Tests executed.
        nr_of_tests: u32,
    },
    /// The run exceeded its timeout or hit limit.
    Timeout {
        /// Optional detail.
        #[serde(default)]
        reason: Option<String>,
    },
    /// The runner errored.
    Error {
        /// Error detail.
        error_message: String,
    },
}

/// Terminal record for one mutant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutantResult {
    /// Mutant id.
    pub id: String,
    /// File the mutant lives in.
    pub file_name: String,
    /// Mutated range.
    pub location: Location,
    /// Mutator name.
    pub mutator_name: String,
    /// Replacement text.
    pub replacement: String,
    /// Final status.
    pub status: MutantStatus,
    /// Diagnostic or error detail.
    #[serde(default)]
    pub status_reason: Option<String>,
    /// Tests covering the mutant.
    #[serde(default)]
    pub covered_by: Vec<String>,
    /// Tests that killed the mutant.
    #[serde(default)]
    pub killed_by: Vec<String>,
    /// Tests executed against the mutant.
    #[serde(default)]
    pub tests_completed: Option<u32>,
    /// Executed during static initialization.
    #[serde(default, rename = "static")]
    pub is_static: bool,
}

impl MutantResult {
    /// Build a result for `mutant` with the given status.
    pub fn new(mutant: &MutantWithCoverage, status: MutantStatus) -> Self {
        Self {
            id: mutant.mutant.id.clone(),
            file_name: mutant.mutant.file_name.clone(),
            location: mutant.mutant.location,
            mutator_name: mutant.mutant.mutator_name.clone(),
            replacement: mutant.mutant.replacement.clone(),
            status,
            status_reason: None,
            covered_by: mutant.covered_by.clone(),
            killed_by: Vec::new(),
            tests_completed: None,
            is_static: mutant.is_static,
        }
    }

    /// Attach a reason.
    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.status_reason = reason;
        self
    }
}
