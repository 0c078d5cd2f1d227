//! Configuration model for a ctrun invocation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants;

/// Root configuration for a ctrun invocation.
///
/// Defaults come from [`constants`]; the CLI overrides individual fields
/// from flags and environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtrunConfig {
    /// Daemon socket path.
    pub address: PathBuf,
    /// Daemon namespace.
    pub namespace: String,
    /// Image reference used when none is given.
    pub default_image: String,
    /// Path of the extra bind-mount declaration file.
    pub mounts_file: PathBuf,
    /// Prefix for per-invocation container names.
    pub name_prefix: String,
    /// Attach the task to this process's stdio instead of capturing output.
    pub inherit_stdio: bool,
    /// Identity database locations.
    pub identity: IdentitySources,
}

impl Default for CtrunConfig {
    fn default() -> Self {
        Self {
            address: PathBuf::from(constants::DEFAULT_ADDRESS),
            namespace: constants::DEFAULT_NAMESPACE.to_string(),
            default_image: constants::DEFAULT_IMAGE.to_string(),
            mounts_file: PathBuf::from(constants::DEFAULT_MOUNTS_FILE),
            name_prefix: constants::DEFAULT_NAME_PREFIX.to_string(),
            inherit_stdio: false,
            identity: IdentitySources::default(),
        }
    }
}

/// Host files consulted when resolving a user identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySources {
    /// passwd-format user database.
    pub passwd: PathBuf,
    /// group-format group database.
    pub group: PathBuf,
    /// Subordinate UID allocations.
    pub subuid: PathBuf,
    /// Subordinate GID allocations.
    pub subgid: PathBuf,
}

impl Default for IdentitySources {
    fn default() -> Self {
        Self {
            passwd: PathBuf::from(constants::PASSWD_FILE),
            group: PathBuf::from(constants::GROUP_FILE),
            subuid: PathBuf::from(constants::SUBUID_FILE),
            subgid: PathBuf::from(constants::SUBGID_FILE),
        }
    }
}
