//! Host-level probes used by the preflight gating check and the system
//! info endpoint: free disk space and external tool availability.

use serde::Serialize;
use std::ffi::CString;
use std::path::{Path, PathBuf};

use crate::error::{ErrorCode, MirrorError, Result};

/// Free disk space in whole gigabytes at `path`.
pub fn available_disk_gb(path: &Path) -> Result<u64> {
    let c_path = CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| {
        MirrorError::with_internal(
            ErrorCode::Io,
            "invalid path for disk space check",
            path.display().to_string(),
        )
    })?;

    // SAFETY: statvfs writes into the zeroed buffer on success only.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(MirrorError::with_internal(
            ErrorCode::Io,
            "disk space check failed",
            std::io::Error::last_os_error().to_string(),
        ));
    }

    let bytes = stat.f_bavail as u128 * stat.f_frsize as u128;
    Ok((bytes / (1024 * 1024 * 1024)) as u64)
}

/// Locate a tool on PATH. Absolute or relative paths are checked directly.
pub fn find_tool(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

/// Availability of one required external tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub name: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Probe the given tools on PATH.
pub fn probe_tools<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<ToolStatus> {
    names
        .into_iter()
        .map(|name| {
            let path = find_tool(name);
            ToolStatus {
                name: name.to_string(),
                available: path.is_some(),
                path: path.map(|p| p.display().to_string()),
            }
        })
        .collect()
}
