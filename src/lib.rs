//! kmod-installer: install kernel modules onto the host from a container
//!
//! Finds the module build matching the host kernel, copies it into the
//! host's module tree and loads it by running `depmod`/`insmod`/`modprobe`
//! inside the host's namespaces through `nsenter`.
//!
//! # Modules
//!
//! - **execution**: Command and daemon runners, the `Executor` trait
//! - **isolation**: Namespace-crossing executor
//! - **host**: Host identity and module paths
//! - **storage**: Module file copy and autoload marker
//! - **controller**: Installation orchestration
//!
//! # Example
//!
//! ```ignore
//! use kmod_installer::{InstallerBuilder, NamespaceTarget, NsenterExecutor};
//!
//! let installer = InstallerBuilder::new()
//!     .skip_errors(false)
//!     .build(NsenterExecutor::new(NamespaceTarget::default()))?;
//!
//! let report = installer.run();
//! println!("{:?}", report.outcome);
//! ```

// Core modules
pub mod errors;
pub mod utils;

// Layered modules
pub mod execution;
pub mod host;
pub mod isolation;
pub mod storage;

// Main controller
pub mod controller;

// Public API
pub use controller::{
    is_already_loaded, ActivationMode, InstallOutcome, InstallReport, InstallStep, Installer,
    InstallerBuilder, InstallerConfig, StepStatus,
};
pub use errors::{ExecError, InstallerError, Result};
pub use execution::{
    BasicExecutor, CancelToken, CommandOutcome, CommandSpec, DaemonHandle, Executor, ExitClass,
};
pub use host::HostIdentity;
pub use isolation::{NamespaceTarget, NsenterExecutor};
