//! Checker worker backed by a child process.
//!
//! The parent writes one JSON [`WorkerRequest`] per line to the child's stdin and reads one JSON
//! [`WorkerResponse`] per line from its stdout. A child that exits or closes its stdout while a
//! request is outstanding is reported as [`WorkerError::Crashed`] or
//! [`WorkerError::OutOfMemory`], so [`CheckerRetryDecorator`](super::CheckerRetryDecorator) can
//! replace it. The child side of the protocol is [`serve_checker`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::CheckResults;
use super::worker::CheckerResource;
use crate::concurrent::{Resource, ResourceFactory};
use crate::error::WorkerError;
use crate::mutant::Mutant;

/// How long a child gets to exit after its stdin closes before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Stderr lines kept to explain a crash.
const STDERR_TAIL: usize = 20;

/// A call sent to a checker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Initialize every hosted checker.
    Init,
    /// Select the checker later calls use.
    SetActiveChecker {
        /// Checker name.
        name: String,
    },
    /// Check mutants with the active checker.
    Check {
        /// Mutants to check together.
        mutants: Vec<Mutant>,
    },
    /// Ask the active checker for its own grouping.
    CreateGroups {
        /// Mutants to group.
        mutants: Vec<Mutant>,
    },
}

/// A checker process's answer to one [`WorkerRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerResponse {
    /// `init` or `set_active_checker` succeeded.
    Done,
    /// Verdicts for a `check`.
    Checked {
        /// Verdicts keyed by mutant id.
        results: CheckResults,
    },
    /// Answer to `create_groups`.
    Groups {
        /// The checker's grouping, if it has one.
        groups: Option<Vec<Vec<Mutant>>>,
    },
    /// The call failed inside the process.
    Failed {
        /// Failure detail.
        message: String,
    },
    /// A hosted checker failed to initialize.
    InitFailed {
        /// Checker name.
        checker: String,
        /// Failure detail.
        reason: String,
    },
}

impl WorkerResponse {
    /// Encode a failed call for the parent.
    pub fn from_error(err: WorkerError) -> Self {
        match err {
            WorkerError::Init { checker, reason } => Self::InitFailed { checker, reason },
            other => Self::Failed {
                message: other.to_string(),
            },
        }
    }

    /// Decode a failed call on the parent side.
    pub fn into_result(self) -> Result<Self, WorkerError> {
        match self {
            Self::Failed { message } => Err(WorkerError::Rejected(message)),
            Self::InitFailed { checker, reason } => Err(WorkerError::Init { checker, reason }),
            other => Ok(other),
        }
    }
}

/// How to start a checker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
}

impl ProcessCommand {
    /// Run `program`, looked up on `PATH` when it is not a path.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Run the child in `dir`.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    fn spawn(&self) -> Result<Connection, WorkerError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|err| {
            WorkerError::rejected(format!("cannot start checker process {}: {err}", self.program))
        })?;
        let pid = child.id().unwrap_or_default();
        let missing = |stream: &str| {
            WorkerError::rejected(format!("checker process [{pid}] has no {stream} pipe"))
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
        log::debug!("Started checker process [{pid}] ({}).", self.program);

        Ok(Connection {
            child,
            pid,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr: drain_stderr(pid, stderr),
        })
    }
}

/// Keep the last lines the child writes to stderr.
fn drain_stderr(pid: u32, stderr: ChildStderr) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL);
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log::debug!("checker process [{pid}]: {line}");
            if tail.len() == STDERR_TAIL {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        Vec::from(tail)
    })
}

struct Connection {
    child: Child,
    pid: u32,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: JoinHandle<Vec<String>>,
}

impl Connection {
    /// Send one request line and read one reply line. `None` when the child went away.
    async fn exchange(&mut self, line: &str) -> Option<String> {
        let written = async {
            self.stdin.write_all(line.as_bytes()).await?;
            self.stdin.write_all(b"\n").await?;
            self.stdin.flush().await
        }
        .await;
        if written.is_err() {
            return None;
        }
        self.stdout.next_line().await.ok().flatten()
    }

    /// Reap a child that stopped answering and describe how it died.
    async fn crash_error(self) -> WorkerError {
        let Connection {
            mut child,
            pid,
            stdin,
            stderr,
            ..
        } = self;
        drop(stdin);
        let status = match timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            _ => {
                if let Err(err) = child.kill().await {
                    log::debug!("checker process [{pid}] could not be killed: {err}");
                }
                None
            }
        };
        let tail = match timeout(EXIT_GRACE, stderr).await {
            Ok(Ok(tail)) => tail,
            _ => Vec::new(),
        };
        classify_exit(pid, status, &tail)
    }

    /// Close stdin and wait for the child to exit, killing it after [`EXIT_GRACE`].
    async fn shutdown(self) -> Result<(), WorkerError> {
        let Connection {
            mut child,
            pid,
            stdin,
            ..
        } = self;
        drop(stdin);
        match timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(WorkerError::rejected(format!(
                "checker process [{pid}] could not be awaited: {err}"
            ))),
            Err(_) => child.kill().await.map_err(|err| {
                WorkerError::rejected(format!("checker process [{pid}] could not be killed: {err}"))
            }),
        }
    }
}

fn classify_exit(pid: u32, status: Option<ExitStatus>, stderr: &[String]) -> WorkerError {
    let exit_code = status.and_then(|status| status.code());
    let stderr = stderr.join("\n");
    let out_of_memory = stderr.to_ascii_lowercase().contains("out of memory")
        || status.is_some_and(|status| killed_by_sigkill(&status));
    if out_of_memory {
        return WorkerError::OutOfMemory { pid, exit_code };
    }

    let reason = match (stderr.trim(), status) {
        ("", Some(status)) => format!("process exited unexpectedly ({status})"),
        ("", None) => "process stopped answering".to_string(),
        (stderr, _) => stderr.to_string(),
    };
    WorkerError::crashed(pid, exit_code, reason)
}

/// The kernel's OOM killer ends processes with SIGKILL.
#[cfg(unix)]
fn killed_by_sigkill(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;

    status.signal() == Some(9)
}

#[cfg(not(unix))]
fn killed_by_sigkill(_status: &ExitStatus) -> bool {
    false
}

/// Checker worker running in its own process, started lazily on the first call.
pub struct ProcessChecker {
    command: ProcessCommand,
    connection: Mutex<Option<Connection>>,
}

impl ProcessChecker {
    /// Worker that starts `command` on first use.
    pub fn new(command: ProcessCommand) -> Self {
        Self {
            command,
            connection: Mutex::new(None),
        }
    }

    /// Factory for pools and [`CheckerRetryDecorator`](super::CheckerRetryDecorator): every
    /// worker gets its own process.
    pub fn factory(command: ProcessCommand) -> ResourceFactory<dyn CheckerResource> {
        Arc::new(move || Arc::new(Self::new(command.clone())) as Arc<dyn CheckerResource>)
    }

    async fn request(&self, request: &WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        let line = serde_json::to_string(request).map_err(|err| {
            WorkerError::rejected(format!("cannot encode checker request: {err}"))
        })?;

        let mut guard = self.connection.lock().await;
        let mut connection = match guard.take() {
            Some(connection) => connection,
            None => self.command.spawn()?,
        };
        let Some(reply) = connection.exchange(&line).await else {
            return Err(connection.crash_error().await);
        };
        *guard = Some(connection);
        drop(guard);

        serde_json::from_str::<WorkerResponse>(&reply)
            .map_err(|err| {
                WorkerError::rejected(format!("malformed response from checker process: {err}"))
            })?
            .into_result()
    }
}

fn unexpected(response: WorkerResponse) -> WorkerError {
    WorkerError::rejected(format!("unexpected response from checker process: {response:?}"))
}

#[async_trait]
impl Resource for ProcessChecker {
    async fn init(&self) -> Result<(), WorkerError> {
        match self.request(&WorkerRequest::Init).await? {
            WorkerResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn dispose(&self) -> Result<(), WorkerError> {
        let connection = self.connection.lock().await.take();
        match connection {
            Some(connection) => connection.shutdown().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CheckerResource for ProcessChecker {
    async fn set_active_checker(&self, checker: &str) -> Result<(), WorkerError> {
        let request = WorkerRequest::SetActiveChecker {
            name: checker.to_string(),
        };
        match self.request(&request).await? {
            WorkerResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn check(&self, mutants: &[Mutant]) -> Result<CheckResults, WorkerError> {
        let request = WorkerRequest::Check {
            mutants: mutants.to_vec(),
        };
        match self.request(&request).await? {
            WorkerResponse::Checked { results } => Ok(results),
            other => Err(unexpected(other)),
        }
    }

    async fn create_groups(&self, mutants: &[Mutant]) -> Result<Option<Vec<Vec<Mutant>>>, WorkerError> {
        let request = WorkerRequest::CreateGroups {
            mutants: mutants.to_vec(),
        };
        match self.request(&request).await? {
            WorkerResponse::Groups { groups } => Ok(groups),
            other => Err(unexpected(other)),
        }
    }
}

/// Answer requests read line by line from `input` using `checker`, until `input` ends.
///
/// This is the loop a checker host binary runs, typically around a
/// [`CheckerWorker`](super::CheckerWorker). Malformed requests get a `failed` reply. The checker
/// is disposed once `input` closes.
pub async fn serve_checker<C, R, W>(checker: &C, input: R, mut output: W) -> std::io::Result<()>
where
    C: CheckerResource + ?Sized,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => answer(checker, request).await,
            Err(err) => WorkerResponse::Failed {
                message: format!("malformed checker request: {err}"),
            },
        };
        let mut encoded = serde_json::to_string(&response).map_err(std::io::Error::other)?;
        encoded.push('\n');
        output.write_all(encoded.as_bytes()).await?;
        output.flush().await?;
    }

    if let Err(err) = checker.dispose().await {
        log::debug!("checker could not be disposed: {err}");
    }
    Ok(())
}

/// [`serve_checker`] over the process's own stdin and stdout.
pub async fn serve_stdio<C: CheckerResource + ?Sized>(checker: &C) -> std::io::Result<()> {
    serve_checker(checker, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

async fn answer<C: CheckerResource + ?Sized>(checker: &C, request: WorkerRequest) -> WorkerResponse {
    let outcome = match request {
        WorkerRequest::Init => checker.init().await.map(|()| WorkerResponse::Done),
        WorkerRequest::SetActiveChecker { name } => checker
            .set_active_checker(&name)
            .await
            .map(|()| WorkerResponse::Done),
        WorkerRequest::Check { mutants } => checker
            .check(&mutants)
            .await
            .map(|results| WorkerResponse::Checked { results }),
        WorkerRequest::CreateGroups { mutants } => checker
            .create_groups(&mutants)
            .await
            .map(|groups| WorkerResponse::Groups { groups }),
    };
    outcome.unwrap_or_else(WorkerResponse::from_error)
}
