//! Host identification from the running kernel
//!
//! The container shares the host's kernel, so `uname(2)` inside the
//! container reports the host's release string.

use crate::errors::{InstallerError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Operating system, architecture and kernel of the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostIdentity {
    /// Operating system name, e.g. `linux`
    pub os: String,
    /// CPU architecture in container-image naming, e.g. `amd64`
    pub arch: String,
    /// Raw kernel release, e.g. `3.10.0-1160.el7.x86_64`
    pub kernel: String,
    /// Version part of the release, e.g. `3.10.0`
    pub kernel_version: String,
    /// Leading release number, e.g. `1160`
    pub kernel_release: String,
}

impl HostIdentity {
    /// Identify the host this process runs on
    pub fn detect() -> Result<Self> {
        let uts = nix::sys::utsname::uname()
            .map_err(|e| InstallerError::HostIdentity(format!("uname failed: {}", e)))?;
        let release = uts.release().to_string_lossy().into_owned();
        Self::from_release(std::env::consts::OS, canonical_arch(std::env::consts::ARCH), &release)
    }

    /// Build an identity from an explicit kernel release string
    pub fn from_release(os: &str, arch: &str, release: &str) -> Result<Self> {
        let (kernel_version, kernel_release) = parse_kernel_release(release)?;
        Ok(Self {
            os: os.to_string(),
            arch: arch.to_string(),
            kernel: release.to_string(),
            kernel_version,
            kernel_release,
        })
    }

    /// `{root}/{os}/{kernel_version}/{kernel_release}/{arch}`, lower-cased components
    pub fn source_dir(&self, root: &Path) -> PathBuf {
        root.join(self.os.to_lowercase())
            .join(self.kernel_version.to_lowercase())
            .join(self.kernel_release.to_lowercase())
            .join(self.arch.to_lowercase())
    }

    /// `{modules_root}/{kernel}/{subdir}`, lower-cased components
    pub fn destination_dir(&self, modules_root: &Path, subdir: &str) -> PathBuf {
        modules_root
            .join(self.kernel.to_lowercase())
            .join(subdir.to_lowercase())
    }
}

/// Split `3.10.0-1160.el7.x86_64` into (`3.10.0`, `1160`).
pub fn parse_kernel_release(release: &str) -> Result<(String, String)> {
    let mut parts = release.split('-');
    let version = parts.next().unwrap_or_default();
    let rest = match parts.next() {
        Some(rest) if !version.is_empty() => rest,
        _ => {
            return Err(InstallerError::HostIdentity(format!(
                "failed to parse kernel version and release. origin string is {:?}",
                release
            )))
        }
    };
    let number = rest.split('.').next().unwrap_or_default();
    Ok((version.to_string(), number.to_string()))
}

/// Map Rust target architecture names onto the names module builds are published under
pub fn canonical_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64le",
        "mips64" => "mips64le",
        "loongarch64" => "loong64",
        other => other,
    }
}
