//! Storage layer: module files on the host filesystem
//!
//! The installer writes straight into the host's module tree and
//! configuration directories, which the container sees through host mounts.
//!
//! # Features
//!
//! - **Copy**: all-or-nothing per file, first failure aborts
//! - **Markers**: create-once files that are never overwritten

pub mod modules;
pub use modules::{copy_dir_files, ensure_file, list_files};
