//! Utility functions for installer operations

use nix::unistd::{access, geteuid, AccessFlags};
use std::path::{Path, PathBuf};

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Check if running as root
pub fn is_root() -> bool {
    geteuid().is_root()
}

/// Get current effective UID
pub fn get_uid() -> u32 {
    geteuid().as_raw()
}

/// Collapse every run of tab, CR and LF characters into a single space.
pub fn squash_control(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for ch in text.chars() {
        if matches!(ch, '\t' | '\n' | '\r') {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(ch);
            in_run = false;
        }
    }
    out
}

/// Trim one trailing newline, then squash the rest onto a single line.
pub fn normalize_output(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.strip_suffix('\n').unwrap_or(&text);
    squash_control(trimmed)
}

/// Resolve a program name to an executable path using PATH semantics.
pub fn find_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return access(&path, AccessFlags::X_OK).is_ok().then_some(path);
    }

    let path_value = std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string());
    path_value
        .split(':')
        .map(|entry| if entry.is_empty() { "." } else { entry })
        .map(|dir| Path::new(dir).join(program))
        .find(|candidate| access(candidate, AccessFlags::X_OK).is_ok())
}
