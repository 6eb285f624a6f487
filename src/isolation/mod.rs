//! Isolation layer: crossing into the host's namespaces
//!
//! A containerised installer cannot load modules or run `depmod` against the
//! host's module tree from its own namespaces. This module wraps any
//! [`Executor`](crate::execution::Executor) so each command is started
//! through `nsenter` with the namespaces of a host process.
//!
//! # Examples
//!
//! ```ignore
//! use kmod_installer::isolation::{NamespaceTarget, NsenterExecutor};
//!
//! let target = NamespaceTarget::resolve(std::env::var("CMD_NSENTER_RUN_ARGS").ok().as_deref(), None);
//! let executor = NsenterExecutor::new(target);
//! ```

pub mod nsenter;
pub use nsenter::{NamespaceTarget, NsenterExecutor, DEFAULT_NSENTER_ARGS, NSENTER_COMMAND};
