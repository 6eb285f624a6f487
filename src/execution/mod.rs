//! Execution layer: running commands and daemons
//!
//! This module owns every child process the installer creates.
//!
//! # Features
//!
//! - **Command runner**: run to completion under a deadline, classify the exit
//! - **Daemon runner**: start a long-running process bound to a [`CancelToken`]
//! - **Executor trait**: capability seam shared by the direct runner and the
//!   namespace-crossing wrapper in [`crate::isolation`]
//!
//! # Examples
//!
//! ```ignore
//! use kmod_installer::execution::{BasicExecutor, CommandSpec, Executor};
//!
//! let outcome = BasicExecutor::new().run_command(&CommandSpec::new("uname").arg("-r"));
//! println!("{}", outcome.stdout);
//! ```

pub mod cancel;
pub mod command;
pub mod daemon;

pub use cancel::CancelToken;
pub use command::{CommandOutcome, CommandSpec, ExitClass, DEFAULT_TIMEOUT_SECS};
pub use daemon::{DaemonHandle, DaemonPipe, DEFAULT_GRACE_PERIOD};

use std::time::Duration;

/// Something that can run commands on behalf of the installer
pub trait Executor: Send + Sync {
    /// Run to completion and classify the result
    fn run_command(&self, spec: &CommandSpec) -> CommandOutcome;

    /// Start a daemon that lives until `cancel` fires
    fn run_daemon(&self, spec: &CommandSpec, cancel: &CancelToken) -> DaemonHandle;
}

/// Runs commands directly in the caller's own namespaces
#[derive(Debug, Clone)]
pub struct BasicExecutor {
    grace: Duration,
}

impl BasicExecutor {
    pub fn new() -> Self {
        Self {
            grace: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Override how long a cancelled daemon may take to exit before it is killed
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

impl Default for BasicExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for BasicExecutor {
    fn run_command(&self, spec: &CommandSpec) -> CommandOutcome {
        command::run_command(spec)
    }

    fn run_daemon(&self, spec: &CommandSpec, cancel: &CancelToken) -> DaemonHandle {
        daemon::run_daemon(spec, cancel, self.grace)
    }
}

#[cfg(test)]
mod tests;
