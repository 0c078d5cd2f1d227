//! Domain primitive types used across the ctrun workspace.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of a daemon-resident container (and of its snapshot).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerName(String);

impl ContainerName {
    /// Creates a container name from a string value.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Derives a per-invocation name, `<prefix>-<pid>`, from the current process.
    #[must_use]
    pub fn for_process(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", std::process::id()))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a task as reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task exists but its process has not been started.
    Created,
    /// Task process is running.
    Running,
    /// Task process has exited.
    Stopped,
    /// Task process is frozen.
    Paused,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// Exit status of a task's process.
///
/// The default value (code 0, no error) is what a detached run reports,
/// since it never waits for the process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Numeric exit code.
    pub code: u32,
    /// When the process exited, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exited_at: Option<DateTime<Utc>>,
    /// Failure reported while collecting the exit, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExitStatus {
    /// Creates an exit status stamped with the current time.
    #[must_use]
    pub fn exited(code: u32) -> Self {
        Self {
            code,
            exited_at: Some(Utc::now()),
            error: None,
        }
    }

    /// Returns `true` if the process exited with code 0 and no error.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.code == 0 && self.error.is_none()
    }

    /// Returns the exit code in the form `std::process::exit` expects.
    ///
    /// Codes that do not fit an `i32` are reported as `-1`.
    #[must_use]
    pub fn process_code(&self) -> i32 {
        i32::try_from(self.code).unwrap_or(-1)
    }
}

/// Version information reported by the runtime daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Release version string.
    pub version: String,
    /// Source revision the daemon was built from.
    pub revision: String,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [Revision: {}]", self.version, self.revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_for_process_uses_pid() {
        let name = ContainerName::for_process("run");
        assert_eq!(name.as_str(), format!("run-{}", std::process::id()));
    }

    #[test]
    fn task_status_serializes_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
    }

    #[test]
    fn default_exit_status_is_success() {
        let status = ExitStatus::default();
        assert!(status.success());
        assert_eq!(status.process_code(), 0);
    }

    #[test]
    fn exit_status_with_error_is_not_success() {
        let status = ExitStatus {
            code: 0,
            exited_at: None,
            error: Some("shim died".into()),
        };
        assert!(!status.success());
    }

    #[test]
    fn oversized_exit_code_maps_to_minus_one() {
        let status = ExitStatus::exited(u32::MAX);
        assert_eq!(status.process_code(), -1);
    }

    #[test]
    fn version_display_includes_revision() {
        let v = Version {
            version: "1.7.0".into(),
            revision: "abc123".into(),
        };
        assert_eq!(v.to_string(), "1.7.0 [Revision: abc123]");
    }
}
