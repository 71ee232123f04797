//! Worker and pipeline failure taxonomy.

use thiserror::Error;

use crate::concurrent::PoolError;

/// Failure of a call into a worker resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// The worker process died mid-call.
    #[error("worker process [{pid}] crashed with exit code {}: {reason}", display_exit_code(.exit_code))]
    Crashed {
        /// Process id of the dead worker.
        pid: u32,
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Crash detail.
        reason: String,
    },
    /// The worker process was killed for exhausting memory.
    #[error("worker process [{pid}] ran out of memory")]
    OutOfMemory {
        /// Process id of the dead worker.
        pid: u32,
        /// Exit code, if known.
        exit_code: Option<i32>,
    },
    /// The worker rejected the call (application-level failure).
    #[error("{0}")]
    Rejected(String),
    /// A checker failed to initialize.
    #[error("an error occurred during initialization of the \"{checker}\" checker: {reason}")]
    Init {
        /// Checker name.
        checker: String,
        /// Failure detail.
        reason: String,
    },
    /// No checker is registered under this name.
    #[error("no checker registered under the name \"{0}\"")]
    UnknownChecker(String),
    /// `check` was called before any checker was activated.
    #[error("no active checker set on this worker")]
    NoActiveChecker,
}

fn display_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "unknown".to_string(),
    }
}

impl WorkerError {
    /// Build a crash error.
    pub fn crashed(pid: u32, exit_code: Option<i32>, reason: impl Into<String>) -> Self {
        Self::Crashed {
            pid,
            exit_code,
            reason: reason.into(),
        }
    }

    /// Build an application-level rejection.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// True for failures that a fresh worker can recover from.
    pub fn is_crash(&self) -> bool {
        matches!(self, Self::Crashed { .. } | Self::OutOfMemory { .. })
    }

    /// Process id of a crashed worker.
    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::Crashed { pid, .. } | Self::OutOfMemory { pid, .. } => Some(*pid),
            _ => None,
        }
    }
}

/// Fatal failure of a mutation test run.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A pool could not create, initialize or hand out a worker.
    #[error("worker pool failure: {0}")]
    Pool(#[from] PoolError),
    /// A worker failed outside of crash recovery.
    #[error("worker failure: {0}")]
    Worker(#[from] WorkerError),
    /// A checker call failed.
    #[error("checker \"{checker}\" failed: {source}")]
    Checker {
        /// Checker name.
        checker: String,
        /// Underlying failure.
        #[source]
        source: WorkerError,
    },
    /// A checker answered without a verdict for a mutant it was given.
    #[error("checker \"{checker}\" returned no result for mutant {mutant_id}")]
    MissingCheckResult {
        /// Checker name.
        checker: String,
        /// Mutant left without a verdict.
        mutant_id: String,
    },
    /// A checker's own grouping referenced a mutant it was not given.
    #[error("checker \"{checker}\" grouped unknown mutant {mutant_id}")]
    UnknownGroupMember {
        /// Checker name.
        checker: String,
        /// Unknown mutant id.
        mutant_id: String,
    },
    /// The run ended without exactly one result per mutant.
    #[error("expected {expected} mutant results, collected {actual}")]
    Incomplete {
        /// Number of input mutants.
        expected: usize,
        /// Number of results collected.
        actual: usize,
    },
    /// A downstream stage stopped consuming.
    #[error("pipeline stage \"{0}\" closed early")]
    ChannelClosed(&'static str),
    /// A stage task panicked or was cancelled.
    #[error("pipeline stage failed: {0}")]
    Stage(String),
    /// The executor was built without a required collaborator.
    #[error("invalid executor setup: {0}")]
    Setup(String),
}

impl ExecutorError {
    /// Wrap a failure of `checker`.
    pub fn checker(checker: impl Into<String>, source: WorkerError) -> Self {
        Self::Checker {
            checker: checker.into(),
            source,
        }
    }
}
