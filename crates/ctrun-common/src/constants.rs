//! System-wide constants and default paths.

/// Default daemon socket.
pub const DEFAULT_ADDRESS: &str = "/run/containerd/containerd.sock";

/// Daemon namespace all ctrun resources are created in.
pub const DEFAULT_NAMESPACE: &str = "ctrun";

/// Image used when none is given on the command line.
pub const DEFAULT_IMAGE: &str = "docker.io/library/alpine:latest";

/// Extra bind-mount declarations, relative to the working directory.
pub const DEFAULT_MOUNTS_FILE: &str = "mounts";

/// Prefix of per-invocation container names (`<prefix>-<pid>`).
pub const DEFAULT_NAME_PREFIX: &str = "run";

/// OCI runtime-spec version emitted in generated specs.
pub const OCI_VERSION: &str = "1.1.0";

/// `PATH` injected when the image does not declare one.
pub const DEFAULT_PATH_ENV: &str =
    "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Local user database.
pub const PASSWD_FILE: &str = "/etc/passwd";

/// Local group database.
pub const GROUP_FILE: &str = "/etc/group";

/// Subordinate UID allocations.
pub const SUBUID_FILE: &str = "/etc/subuid";

/// Subordinate GID allocations.
pub const SUBGID_FILE: &str = "/etc/subgid";

/// Directory-service lookup tool used when the local files have no entry.
pub const GETENT_BINARY: &str = "getent";

/// Exit code reported when a task's exit could not be observed.
pub const UNKNOWN_EXIT_CODE: u32 = 255;

/// Read and write timeout for ordinary daemon requests, in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
