//! Daemon executable validation and `PATH` resolution

use crate::error::{ProxyError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '`', '$', '(', ')', '<', '>'];

/// Characters permitted in an executable path
static ALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_./-]+$").expect("Failed to compile binary path regex"));

/// Check the configured executable against the allow-list.
pub fn validate(binary: &str) -> Result<()> {
    let reject = |reason: &str| ProxyError::InvalidBinary {
        path: binary.to_string(),
        reason: reason.to_string(),
    };

    if binary.trim().is_empty() {
        return Err(reject("empty path"));
    }
    if let Some(c) = binary.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        return Err(reject(&format!("contains shell metacharacter '{}'", c)));
    }
    if !ALLOWED.is_match(binary) {
        return Err(reject("contains characters outside [A-Za-z0-9_./-]"));
    }
    Ok(())
}

/// Validate `binary` and resolve it to an executable file.
///
/// Bare names are searched on `PATH`; anything containing a `/` is taken as a
/// path and must itself be executable.
pub fn resolve(binary: &str) -> Result<PathBuf> {
    validate(binary)?;

    if binary.contains('/') {
        let path = PathBuf::from(binary);
        return if is_executable(&path) {
            Ok(path)
        } else {
            Err(ProxyError::InvalidBinary {
                path: binary.to_string(),
                reason: "not an executable file".to_string(),
            })
        };
    }

    std::env::var_os("PATH")
        .iter()
        .flat_map(std::env::split_paths)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| ProxyError::InvalidBinary {
            path: binary.to_string(),
            reason: "not found on PATH".to_string(),
        })
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
