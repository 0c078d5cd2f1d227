//! Runtime daemon client abstraction.
//!
//! [`RuntimeService`] is the narrow interface the lifecycle code talks to.
//! Calls are keyed by container name; [`Container`] and [`Task`] wrap a
//! client reference to give the object-style API the lifecycle reads best in.

pub mod daemon;
pub mod handle;
pub mod io;
pub mod memory;
pub mod wait;

use chrono::{DateTime, Utc};
use ctrun_common::error::Result;
use ctrun_common::types::{ContainerName, ExitStatus, TaskStatus, Version};
use ctrun_core::idmap::{IdMapping, RootPair};
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

pub use self::handle::{Container, Task};
pub use self::io::{IoSpec, OutputBuffer, TaskOptions};
pub use self::wait::{ExitNotifier, ExitWaiter};

use crate::image::{Image, PullOptions};
use crate::spec::RuntimeSpec;

/// How the container's root filesystem snapshot is prepared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SnapshotStrategy {
    /// Plain snapshot of the image's unpacked layers.
    New {
        /// Snapshot key.
        key: String,
        /// Image reference the snapshot is derived from.
        image: String,
    },
    /// Snapshot whose files are chowned into the user namespace's host range.
    Remapped {
        /// Snapshot key.
        key: String,
        /// Image reference the snapshot is derived from.
        image: String,
        /// Host UID owning container root's files.
        uid: u32,
        /// Host GID owning container root's files.
        gid: u32,
    },
}

impl SnapshotStrategy {
    /// Picks `Remapped` at the mapping's root pair, or `New` without a mapping.
    #[must_use]
    pub fn for_mapping(key: &str, image: &Image, mapping: Option<&IdMapping>) -> Self {
        match mapping.map(IdMapping::root_pair) {
            Some(RootPair { uid, gid }) => Self::Remapped {
                key: key.to_string(),
                image: image.name.clone(),
                uid,
                gid,
            },
            None => Self::New {
                key: key.to_string(),
                image: image.name.clone(),
            },
        }
    }

    /// Snapshot key.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::New { key, .. } | Self::Remapped { key, .. } => key,
        }
    }

    /// Host owner of the snapshot's root, if remapped.
    #[must_use]
    pub const fn owner(&self) -> Option<RootPair> {
        match self {
            Self::New { .. } => None,
            Self::Remapped { uid, gid, .. } => Some(RootPair {
                uid: *uid,
                gid: *gid,
            }),
        }
    }
}

/// Whether deleting a container also removes its snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Leave the snapshot behind.
    KeepSnapshot,
    /// Remove the snapshot together with the container.
    WithSnapshotCleanup,
}

/// Container record held by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Container name.
    pub name: ContainerName,
    /// Image reference it was created from.
    pub image: String,
    /// Snapshot key of its root filesystem.
    pub snapshot_key: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Task record held by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Owning container.
    pub container: ContainerName,
    /// Host PID of the task's process (0 until known).
    pub pid: u32,
    /// Current status.
    pub status: TaskStatus,
}

/// Operations the runtime daemon offers a client.
///
/// Implementations are expected to fail rather than coalesce on name
/// collisions, and to report a missing resource as `CtrunError::NotFound`.
pub trait RuntimeService: Send + Sync {
    /// Returns the daemon's version.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon cannot be queried.
    fn version(&self) -> Result<Version>;

    /// Looks an image up in the daemon's local store.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the image is not present locally.
    fn get_image(&self, reference: &str) -> Result<Image>;

    /// Pulls an image.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull or unpack fails.
    fn pull(&self, reference: &str, options: &PullOptions) -> Result<Image>;

    /// Creates a container bound to a new snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken, the image is unknown, or the
    /// snapshot cannot be prepared.
    fn new_container(
        &self,
        name: &ContainerName,
        snapshot: &SnapshotStrategy,
        spec: &RuntimeSpec,
    ) -> Result<ContainerInfo>;

    /// Loads a container by name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such container exists.
    fn load_container(&self, name: &ContainerName) -> Result<ContainerInfo>;

    /// Deletes a container.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such container exists, or an error if it still
    /// has a running task.
    fn delete_container(&self, name: &ContainerName, mode: DeleteMode) -> Result<()>;

    /// Creates the container's task.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is missing or already has a task.
    fn new_task(
        &self,
        container: &ContainerName,
        io: &IoSpec,
        options: &TaskOptions,
    ) -> Result<TaskInfo>;

    /// Loads the container's task.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the container has no task.
    fn task(&self, container: &ContainerName) -> Result<TaskInfo>;

    /// Returns the task's current status.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the container has no task.
    fn task_status(&self, container: &ContainerName) -> Result<TaskStatus> {
        self.task(container).map(|t| t.status)
    }

    /// Starts the task's process, returning its PID.
    ///
    /// # Errors
    ///
    /// Returns an error if the task is missing or cannot be started.
    fn start_task(&self, container: &ContainerName) -> Result<u32>;

    /// Subscribes to the task's exit.
    ///
    /// The subscription is in place when this returns, so an exit occurring
    /// afterwards is always delivered.
    ///
    /// # Errors
    ///
    /// Returns an error if the task is missing or the subscription fails.
    fn wait_task(&self, container: &ContainerName) -> Result<ExitWaiter>;

    /// Sends a signal to the task's process.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no live process to signal.
    fn kill_task(&self, container: &ContainerName, signal: Signal) -> Result<()>;

    /// Deletes the task record, returning the process's exit status.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no task, or an error if it is still running.
    fn delete_task(&self, container: &ContainerName) -> Result<ExitStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrun_core::idmap::IdMap;

    #[test]
    fn snapshot_for_mapping_uses_root_pair() {
        let image = Image::new("alpine", "sha256:0");
        let range = IdMap::new(0, 100_000, 65_536);
        let mapping = IdMapping::new(vec![range], vec![IdMap::new(0, 200_000, 10)]).unwrap();

        let snapshot = SnapshotStrategy::for_mapping("run-1", &image, Some(&mapping));
        assert_eq!(
            snapshot.owner(),
            Some(RootPair {
                uid: 100_000,
                gid: 200_000
            })
        );
        assert_eq!(snapshot.key(), "run-1");
    }

    #[test]
    fn snapshot_without_mapping_is_plain() {
        let image = Image::new("alpine", "sha256:0");
        let snapshot = SnapshotStrategy::for_mapping("run-1", &image, None);
        assert!(matches!(snapshot, SnapshotStrategy::New { .. }));
        assert!(snapshot.owner().is_none());
    }

    #[test]
    fn snapshot_serializes_with_kind_tag() {
        let snapshot = SnapshotStrategy::Remapped {
            key: "k".into(),
            image: "alpine".into(),
            uid: 1,
            gid: 2,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["kind"], "remapped");
        assert_eq!(json["uid"], 1);
    }
}
