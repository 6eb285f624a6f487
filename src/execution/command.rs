//! Synchronous command execution with a bounded deadline

use crate::errors::ExecError;
use crate::utils::{normalize_output, squash_control};
use log::debug;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// Deadline applied when a spec leaves `timeout_secs` at zero
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const EXIT_CODE_SUCCESS: i32 = 0;
const EXIT_CODE_ERR_DEFAULT: i32 = 1;
const EXIT_CODE_TIMEOUT: i32 = 124;

/// How long output readers get once the child is gone
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// One command invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute
    pub program: String,
    /// Program arguments
    pub args: Vec<String>,
    /// Deadline in seconds, 0 selects [`DEFAULT_TIMEOUT_SECS`]
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Deadline with the default applied
    pub fn effective_timeout(&self) -> Duration {
        match self.timeout_secs {
            0 => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            secs => Duration::from_secs(secs),
        }
    }
}

/// How a command finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ExitClass {
    Success,
    Timeout,
    NonZeroExit(i32),
    LaunchFailure,
}

impl ExitClass {
    /// Numeric exit code in the conventional shell encoding
    pub fn code(&self) -> i32 {
        match self {
            ExitClass::Success => EXIT_CODE_SUCCESS,
            ExitClass::Timeout => EXIT_CODE_TIMEOUT,
            ExitClass::NonZeroExit(code) => *code,
            ExitClass::LaunchFailure => EXIT_CODE_ERR_DEFAULT,
        }
    }
}

/// Result of one [`CommandSpec`] execution
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit: ExitClass,
    /// Present exactly when `exit` is not [`ExitClass::Success`]
    pub error: Option<ExecError>,
}

impl CommandOutcome {
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            stdout,
            stderr,
            exit: ExitClass::Success,
            error: None,
        }
    }

    pub fn launch_failure(program: &str, reason: &str) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit: ExitClass::LaunchFailure,
            error: Some(ExecError::Launch {
                program: program.to_string(),
                reason: squash_control(reason),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit == ExitClass::Success
    }

    /// Error text together with captured stderr, on one line
    pub fn diagnostic(&self) -> String {
        match &self.error {
            Some(err @ ExecError::NonZeroExit { .. }) => err.to_string(),
            Some(err) if self.stderr.is_empty() => err.to_string(),
            Some(err) => format!("{} ({})", err, self.stderr),
            None => self.stderr.clone(),
        }
    }

    pub fn into_result(self) -> Result<CommandOutcome, ExecError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Run a command to completion within its deadline.
pub fn run_command(spec: &CommandSpec) -> CommandOutcome {
    debug!("Running command: {} {:?}", spec.program, spec.args);

    let timeout = spec.effective_timeout();
    let mut child = match Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            debug!("Failed to launch {}: {}", spec.program, e);
            return CommandOutcome::launch_failure(&spec.program, &e.to_string());
        }
    };

    let stdout_reader = spawn_pipe_reader(child.stdout.take());
    let stderr_reader = spawn_pipe_reader(child.stderr.take());

    let waited = wait_with_deadline(&mut child, timeout);
    if let Err(e) = &waited {
        debug!("Failed to wait {}: {}", spec.program, e);
        if let Err(e) = kill_process_group(&mut child) {
            debug!("Failed to kill {}: {}", spec.program, e);
        }
        if let Err(e) = child.wait() {
            debug!("Failed to reap {}: {}", spec.program, e);
        }
    }

    let drain_deadline = Instant::now() + PIPE_DRAIN_TIMEOUT;
    let stdout = normalize_output(&collect_pipe(stdout_reader, drain_deadline));
    let stderr = normalize_output(&collect_pipe(stderr_reader, drain_deadline));

    let outcome = match waited {
        Ok(Waited::TimedOut) => CommandOutcome {
            stdout,
            stderr,
            exit: ExitClass::Timeout,
            error: Some(ExecError::Timeout {
                program: squash_control(&spec.program),
                args: spec.args.iter().map(|a| squash_control(a)).collect(),
                seconds: timeout.as_secs(),
            }),
        },
        Ok(Waited::Exited(Some(EXIT_CODE_SUCCESS))) => CommandOutcome::success(stdout, stderr),
        Ok(Waited::Exited(code)) => {
            let code = code.unwrap_or(EXIT_CODE_ERR_DEFAULT);
            CommandOutcome {
                error: Some(ExecError::NonZeroExit {
                    program: squash_control(&spec.program),
                    code,
                    stderr: stderr.clone(),
                }),
                stdout,
                stderr,
                exit: ExitClass::NonZeroExit(code),
            }
        }
        Err(e) => CommandOutcome {
            error: Some(ExecError::NonZeroExit {
                program: squash_control(&spec.program),
                code: EXIT_CODE_ERR_DEFAULT,
                stderr: squash_control(&e.to_string()),
            }),
            stdout,
            stderr,
            exit: ExitClass::NonZeroExit(EXIT_CODE_ERR_DEFAULT),
        },
    };

    debug!(
        "Finished running command {}: {:?}",
        spec.program, outcome.exit
    );
    outcome
}

enum Waited {
    Exited(Option<i32>),
    TimedOut,
}

/// Wait for the child, killing and reaping it once the deadline passes.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> io::Result<Waited> {
    match child.wait_timeout(timeout)? {
        Some(status) => Ok(Waited::Exited(status.code())),
        None => {
            // Timeout wins even if the child exits between the deadline and the kill.
            if let Err(e) = kill_process_group(child) {
                debug!("Failed to kill timed out child: {}", e);
            }
            child.wait()?;
            Ok(Waited::TimedOut)
        }
    }
}

/// Kill the child's whole process group, falling back to the child alone.
///
/// Children are spawned as group leaders, so the group id is the child's pid.
pub(crate) fn kill_process_group(child: &mut Child) -> io::Result<()> {
    let group = Pid::from_raw(child.id() as i32);
    match killpg(group, Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!("Failed to kill process group {}: {}", group, e);
            child.kill()
        }
    }
}

fn spawn_pipe_reader<R>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut stream| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            // Partial output is still worth reporting.
            let _ = stream.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
        rx
    })
}

/// Output gathered by a reader, or nothing if it is still blocked at `deadline`.
///
/// A process that escaped the group can hold the write end open forever; its
/// reader thread is left behind rather than waited on.
fn collect_pipe(reader: Option<Receiver<Vec<u8>>>, deadline: Instant) -> Vec<u8> {
    let Some(reader) = reader else {
        return Vec::new();
    };
    match reader.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(buf) => buf,
        Err(e) => {
            debug!("Giving up on output reader: {}", e);
            Vec::new()
        }
    }
}
