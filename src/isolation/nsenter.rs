//! `nsenter`-based namespace crossing

use crate::execution::{
    BasicExecutor, CancelToken, CommandOutcome, CommandSpec, DaemonHandle, Executor,
};
use log::debug;

/// Delegate program that performs the namespace entry
pub const NSENTER_COMMAND: &str = "nsenter";

/// Enter the mount, IPC and network namespaces of PID 1. Entering its mount
/// namespace also exposes the host's root filesystem.
pub const DEFAULT_NSENTER_ARGS: [&str; 4] = [
    "--mount=/proc/1/ns/mnt",
    "--ipc=/proc/1/ns/ipc",
    "--net=/proc/1/ns/net",
    "--",
];

/// Which namespaces to enter and with which delegate program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceTarget {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for NamespaceTarget {
    fn default() -> Self {
        Self {
            program: NSENTER_COMMAND.to_string(),
            args: DEFAULT_NSENTER_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl NamespaceTarget {
    /// Build the target from an optional override string.
    ///
    /// An empty or missing override selects [`DEFAULT_NSENTER_ARGS`]. The
    /// override is split on `separator` when one is given, otherwise it is
    /// passed through as a single argument.
    pub fn resolve(override_args: Option<&str>, separator: Option<&str>) -> Self {
        let raw = match override_args {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Self::default(),
        };

        let args = match separator {
            Some(sep) if !sep.is_empty() => raw.split(sep).map(str::to_string).collect(),
            _ => vec![raw.to_string()],
        };

        Self {
            program: NSENTER_COMMAND.to_string(),
            args,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Rewrite `spec` so it runs through the delegate
    pub fn wrap(&self, spec: &CommandSpec) -> CommandSpec {
        let mut args = Vec::with_capacity(self.args.len() + spec.args.len() + 1);
        args.extend(self.args.iter().cloned());
        args.push(spec.program.clone());
        args.extend(spec.args.iter().cloned());

        CommandSpec {
            program: self.program.clone(),
            args,
            timeout_secs: spec.timeout_secs,
        }
    }
}

/// Executor that runs every command inside the target's namespaces
#[derive(Debug, Clone)]
pub struct NsenterExecutor<E = BasicExecutor> {
    inner: E,
    target: NamespaceTarget,
}

impl NsenterExecutor<BasicExecutor> {
    pub fn new(target: NamespaceTarget) -> Self {
        Self::with_executor(BasicExecutor::new(), target)
    }
}

impl<E: Executor> NsenterExecutor<E> {
    pub fn with_executor(inner: E, target: NamespaceTarget) -> Self {
        Self { inner, target }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn target(&self) -> &NamespaceTarget {
        &self.target
    }

    /// Replace the namespace arguments
    pub fn set_args(&mut self, args: Vec<String>) {
        self.target.args = args;
    }
}

impl<E: Executor> Executor for NsenterExecutor<E> {
    fn run_command(&self, spec: &CommandSpec) -> CommandOutcome {
        let wrapped = self.target.wrap(spec);
        debug!("Entering host namespaces for {}", spec.program);
        self.inner.run_command(&wrapped)
    }

    fn run_daemon(&self, spec: &CommandSpec, cancel: &CancelToken) -> DaemonHandle {
        let wrapped = self.target.wrap(spec);
        debug!("Entering host namespaces for daemon {}", spec.program);
        self.inner.run_daemon(&wrapped, cancel)
    }
}
