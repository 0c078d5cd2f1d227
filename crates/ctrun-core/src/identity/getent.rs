//! `getent` fallback for non-files passwd and group databases (LDAP, SSSD, ...).

use std::path::{Path, PathBuf};
use std::process::Command;

use ctrun_common::constants::GETENT_BINARY;
use ctrun_common::error::{CtrunError, Result};

/// Locates the `getent` binary on `PATH`.
#[must_use]
pub fn find_getent() -> Option<PathBuf> {
    which::which(GETENT_BINARY).ok()
}

/// Runs `getent <database> <key>` and returns its standard output.
///
/// # Errors
///
/// Returns an I/O error if the binary cannot be spawned, or an RPC-style
/// error if `getent` exits non-zero (no entry, or unknown database).
pub fn query(binary: &Path, database: &str, key: &str) -> Result<String> {
    tracing::debug!(binary = %binary.display(), database, key, "querying getent");
    let output = Command::new(binary)
        .args([database, key])
        .output()
        .map_err(|e| CtrunError::Io {
            path: binary.to_path_buf(),
            source: e,
        })?;
    if !output.status.success() {
        return Err(CtrunError::Rpc {
            method: format!("getent {database}"),
            message: format!("no entry for {key:?} ({})", output.status),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
