//! Long-running command execution bound to a cancellation token
//!
//! The daemon's stdout/stderr are handed to the caller as [`DaemonPipe`]s
//! while a watcher thread owns the child. When the token fires the watcher
//! gives the process a short grace period, kills its process group if it is
//! still running, and closes both pipes, waking any reader blocked on them. Errors are reported through a one-slot channel
//! that never blocks the watcher: a report that finds the slot full is
//! logged and dropped.

use crate::errors::ExecError;
use crate::execution::cancel::CancelToken;
use crate::execution::command::{kill_process_group, CommandSpec};
use crate::utils::squash_control;
use log::{debug, error, warn};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, IntoRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

/// Time a cancelled daemon gets to exit on its own before it is killed
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Read end of a daemon's output pipe.
///
/// Clones share the same descriptor. Reads wait in `poll(2)` on the pipe and
/// on a wake-up pipe, so closing interrupts readers that are already blocked.
/// Once closed, every read returns end-of-file.
#[derive(Debug, Clone)]
pub struct DaemonPipe {
    stream: &'static str,
    shared: Arc<PipeShared>,
}

#[derive(Debug)]
struct PipeShared {
    file: RwLock<Option<File>>,
    closed: AtomicBool,
    wake_rx: File,
    wake_tx: File,
}

impl DaemonPipe {
    fn new(stream: &'static str, fd: OwnedFd) -> nix::Result<Self> {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
        let (wake_rx, wake_tx) = nix::unistd::pipe()?;
        Ok(Self {
            stream,
            shared: Arc::new(PipeShared {
                file: RwLock::new(Some(File::from(fd))),
                closed: AtomicBool::new(false),
                wake_rx: File::from(wake_rx),
                wake_tx: File::from(wake_tx),
            }),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn close(&self) -> nix::Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // The byte is never consumed, so every later poll wakes as well.
        if let Err(e) = (&self.shared.wake_tx).write_all(&[1]) {
            debug!("Failed to wake {} readers: {}", self.stream, e);
        }

        let taken = self
            .shared
            .file
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match taken {
            Some(file) => nix::unistd::close(file.into_raw_fd()),
            None => Ok(()),
        }
    }
}

impl Read for DaemonPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.is_closed() {
                return Ok(0);
            }
            let guard = self
                .shared
                .file
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let Some(file) = guard.as_ref() else {
                return Ok(0);
            };

            let mut fds = [
                PollFd::new(file.as_fd(), PollFlags::POLLIN),
                PollFd::new(self.shared.wake_rx.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
            if fds[1].any().unwrap_or(false) {
                return Ok(0);
            }

            let mut reader: &File = file;
            match reader.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                other => return other,
            }
        }
    }
}

/// Handle returned by [`run_daemon`]
#[derive(Debug)]
pub struct DaemonHandle {
    pub stdout: Option<DaemonPipe>,
    pub stderr: Option<DaemonPipe>,
    pub errors: Receiver<ExecError>,
    watcher: Option<thread::JoinHandle<()>>,
}

impl DaemonHandle {
    /// Build a handle for a daemon that never started
    pub fn failed(err: ExecError) -> Self {
        let (reporter, errors) = ErrorReporter::channel();
        reporter.report(err);
        Self {
            stdout: None,
            stderr: None,
            errors,
            watcher: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.watcher.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Block until the watcher has torn the daemon down.
    ///
    /// Only returns once the cancellation token has fired.
    pub fn join(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            if watcher.join().is_err() {
                error!("Daemon watcher thread panicked");
            }
        }
    }

    /// Every error reported so far
    pub fn drain_errors(&self) -> Vec<ExecError> {
        self.errors.try_iter().collect()
    }
}

struct ErrorReporter {
    tx: SyncSender<ExecError>,
}

impl ErrorReporter {
    fn channel() -> (Self, Receiver<ExecError>) {
        let (tx, rx) = sync_channel(1);
        (Self { tx }, rx)
    }

    fn report(&self, err: ExecError) {
        match self.tx.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(err)) => {
                warn!("Dropping daemon error, channel full: {}", err);
            }
            Err(TrySendError::Disconnected(err)) => {
                debug!("Daemon error receiver gone: {}", err);
            }
        }
    }
}

/// Start `spec` as a daemon and return as soon as the process is running.
pub fn run_daemon(spec: &CommandSpec, cancel: &CancelToken, grace: Duration) -> DaemonHandle {
    debug!("Starting daemon: {} {:?}", spec.program, spec.args);

    let program = squash_control(&spec.program);
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
            error!("Failed to start daemon {}: {}", spec.program, e);
            return DaemonHandle::failed(ExecError::Launch {
                program,
                reason: squash_control(&e.to_string()),
            });
        }
    };

    let pipes = match (child.stdout.take(), child.stderr.take()) {
        (Some(out), Some(err)) => DaemonPipe::new("STDOUT", OwnedFd::from(out))
            .map_err(|e| ("STDOUT", e.to_string()))
            .and_then(|stdout| {
                DaemonPipe::new("STDERR", OwnedFd::from(err))
                    .map(|stderr| (stdout, stderr))
                    .map_err(|e| ("STDERR", e.to_string()))
            }),
        (out, _) => {
            let stream = if out.is_none() { "STDOUT" } else { "STDERR" };
            Err((stream, "pipe not captured".to_string()))
        }
    };
    let (stdout, stderr) = match pipes {
        Ok(pipes) => pipes,
        Err((stream, reason)) => {
            error!("Failed to get {} pipe of {}: {}", stream, spec.program, reason);
            if let Err(e) = kill_process_group(&mut child) {
                debug!("Failed to kill daemon {}: {}", spec.program, e);
            }
            if let Err(e) = child.wait() {
                debug!("Failed to reap daemon {}: {}", spec.program, e);
            }
            return DaemonHandle::failed(ExecError::Pipe { program, stream });
        }
    };

    let (reporter, errors) = ErrorReporter::channel();
    let watcher = {
        let cancel = cancel.clone();
        let stdout = stdout.clone();
        let stderr = stderr.clone();
        thread::spawn(move || {
            cancel.wait();
            teardown(child, &program, [&stdout, &stderr], grace, &reporter);
        })
    };

    DaemonHandle {
        stdout: Some(stdout),
        stderr: Some(stderr),
        errors,
        watcher: Some(watcher),
    }
}

fn teardown(
    mut child: Child,
    program: &str,
    pipes: [&DaemonPipe; 2],
    grace: Duration,
    reporter: &ErrorReporter,
) {
    match child.wait_timeout(grace) {
        Ok(Some(status)) => {
            debug!("Daemon {} exited with {}", program, status);
            return;
        }
        Ok(None) => {}
        Err(e) => {
            error!("Failed to wait daemon {}: {}", program, e);
            reporter.report(ExecError::Wait {
                program: program.to_string(),
                reason: squash_control(&e.to_string()),
            });
        }
    }

    if let Err(e) = kill_process_group(&mut child) {
        error!("Failed to stop daemon {}: {}", program, e);
        reporter.report(ExecError::Kill {
            program: program.to_string(),
            reason: squash_control(&e.to_string()),
        });
        return;
    }
    match child.wait() {
        Ok(status) => debug!("Daemon {} stopped: {}", program, status),
        Err(e) => debug!("Failed to reap daemon {}: {}", program, e),
    }

    for pipe in pipes {
        if let Err(e) = pipe.close() {
            error!("Failed to close {} pipe of {}: {}", pipe.stream, program, e);
            reporter.report(ExecError::Close {
                program: program.to_string(),
                stream: pipe.stream,
                reason: e.to_string(),
            });
        }
    }
}
