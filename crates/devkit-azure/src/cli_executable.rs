//! Locates delegate executables before they are spawned, so a missing Azure
//! CLI is reported as such instead of as an opaque spawn failure.

use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

fn is_executable_file(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(windows)]
fn candidate_names(executable: &str) -> Vec<String> {
    if Path::new(executable).extension().is_some() {
        return vec![executable.to_string()];
    }
    ["", ".exe", ".cmd", ".bat"]
        .iter()
        .map(|suffix| format!("{executable}{suffix}"))
        .collect()
}

#[cfg(not(windows))]
fn candidate_names(executable: &str) -> Vec<String> {
    vec![executable.to_string()]
}

/// Resolves `executable` to a runnable file, searching `PATH` for bare names.
pub fn resolve_executable(executable: &str) -> Option<PathBuf> {
    let trimmed = executable.trim();
    if trimmed.is_empty() {
        return None;
    }

    let candidate = Path::new(trimmed);
    if candidate.is_absolute() || trimmed.contains(std::path::MAIN_SEPARATOR) {
        return is_executable_file(candidate).then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        candidate_names(trimmed)
            .into_iter()
            .map(|name| dir.join(name))
            .find(|path| is_executable_file(path))
    })
}

pub fn is_executable_available(executable: &str) -> bool {
    resolve_executable(executable).is_some()
}
