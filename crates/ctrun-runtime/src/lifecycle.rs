//! Single-run lifecycle: image → container → task → exit → cleanup.
//!
//! ```text
//! Idle → ImageReady → ContainerCreated → TaskCreated → TaskRunning → TaskExited → Cleaned
//!                                                           └──────→ Detached
//! ```
//!
//! A run that waits for its task registers one cleanup obligation per
//! created resource and releases them in reverse order however the run ends.
//! A detached run registers none: its container and task outlive the process
//! and are removed later with [`crate::ops`].

use std::fmt;
use std::path::PathBuf;

use ctrun_common::constants::DEFAULT_MOUNTS_FILE;
use ctrun_common::error::{CtrunError, Result};
use ctrun_common::types::{ContainerName, ExitStatus};
use ctrun_core::idmap::IdMapping;
use ctrun_core::mounts::load_mounts;

use crate::cleanup::Obligations;
use crate::client::{
    Container, DeleteMode, IoSpec, OutputBuffer, RuntimeService, SnapshotStrategy, Task,
    TaskOptions,
};
use crate::image::{Image, PullOptions};
use crate::spec::{RuntimeSpec, SpecBuilder};

/// Whether a run waits for its task and cleans up afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPolicy {
    /// Start the task and return; container and task are left in place.
    Detached,
    /// Wait for the task to exit, then delete task and container.
    WaitAndCleanup,
}

impl RunPolicy {
    /// Waits only when an explicit command was given.
    #[must_use]
    pub const fn for_command(command: Option<&str>) -> Self {
        match command {
            Some(_) => Self::WaitAndCleanup,
            None => Self::Detached,
        }
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing done yet.
    Idle,
    /// Image is present locally.
    ImageReady,
    /// Container exists on the daemon.
    ContainerCreated,
    /// Task exists but has not been started.
    TaskCreated,
    /// Task process is running.
    TaskRunning,
    /// Task process exited and its status was received.
    TaskExited,
    /// Task and container were deleted.
    Cleaned,
    /// Task was started and left running.
    Detached,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::ImageReady => "image-ready",
            Self::ContainerCreated => "container-created",
            Self::TaskCreated => "task-created",
            Self::TaskRunning => "task-running",
            Self::TaskExited => "task-exited",
            Self::Cleaned => "cleaned",
            Self::Detached => "detached",
        };
        f.write_str(s)
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Container the run used.
    pub container: ContainerName,
    /// Final state: `Cleaned` or `Detached`.
    pub state: LifecycleState,
    /// Task exit status; the default value for detached runs.
    pub status: ExitStatus,
    /// Captured stdout and stderr (empty unless output was buffered).
    pub output: Vec<u8>,
}

/// Drives one run against a runtime service.
pub struct LifecycleController<'c> {
    client: &'c dyn RuntimeService,
    name: ContainerName,
    image: String,
    command: Option<String>,
    mapping: Option<IdMapping>,
    mounts_file: PathBuf,
    io: IoSpec,
    policy: RunPolicy,
    state: LifecycleState,
}

impl<'c> LifecycleController<'c> {
    /// Creates a detached run of `image`'s default command with buffered I/O.
    #[must_use]
    pub fn new(
        client: &'c dyn RuntimeService,
        name: ContainerName,
        image: impl Into<String>,
    ) -> Self {
        Self {
            client,
            name,
            image: image.into(),
            command: None,
            mapping: None,
            mounts_file: PathBuf::from(DEFAULT_MOUNTS_FILE),
            io: IoSpec::Buffered(OutputBuffer::new()),
            policy: RunPolicy::Detached,
            state: LifecycleState::Idle,
        }
    }

    /// Sets the command line and derives the run policy from it.
    #[must_use]
    pub fn command(mut self, command: Option<String>) -> Self {
        self.policy = RunPolicy::for_command(command.as_deref());
        self.command = command;
        self
    }

    /// Overrides the run policy.
    #[must_use]
    pub const fn policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs the container in a user namespace with this mapping.
    #[must_use]
    pub fn id_mapping(mut self, mapping: Option<IdMapping>) -> Self {
        self.mapping = mapping;
        self
    }

    /// Reads extra mounts from this file.
    #[must_use]
    pub fn mounts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.mounts_file = path.into();
        self
    }

    /// Sets where the task's standard streams go.
    #[must_use]
    pub fn io(mut self, io: IoSpec) -> Self {
        self.io = io;
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Container name.
    #[must_use]
    pub const fn name(&self) -> &ContainerName {
        &self.name
    }

    fn transition(&mut self, next: LifecycleState) {
        tracing::info!(container = %self.name, from = %self.state, to = %next, "state transition");
        self.state = next;
    }

    /// Executes the run.
    ///
    /// # Errors
    ///
    /// Returns the error of the phase that failed: `ImageResolution`,
    /// `ContainerCreation`, `TaskCreation` or `TaskStart`, or the wait error
    /// if the exit notification is lost. Resources registered for cleanup
    /// are released before returning.
    pub fn run(&mut self) -> Result<RunOutcome> {
        let client = self.client;
        let name = self.name.clone();
        let waiting = self.policy == RunPolicy::WaitAndCleanup;

        let image = self.resolve_image()?;
        self.transition(LifecycleState::ImageReady);

        let spec = self.build_spec(&image);
        let snapshot = SnapshotStrategy::for_mapping(name.as_str(), &image, self.mapping.as_ref());
        let wrap = |e: CtrunError| CtrunError::ContainerCreation {
            name: name.to_string(),
            source: Box::new(e),
        };
        check_snapshot_owner(&spec, &snapshot).map_err(wrap)?;
        let info = client.new_container(&name, &snapshot, &spec).map_err(wrap)?;
        tracing::info!(container = %name, snapshot = %info.snapshot_key, image = %info.image, "container created");
        let container = Container::new(client, &name);
        self.transition(LifecycleState::ContainerCreated);

        let mut obligations = Obligations::new();
        if waiting {
            obligations.push("delete container", move || {
                container.delete(DeleteMode::WithSnapshotCleanup)
            });
        }

        let options = TaskOptions::for_root(snapshot.owner());
        let task = container
            .new_task(&self.io, &options)
            .map_err(|e| CtrunError::TaskCreation {
                name: name.to_string(),
                source: Box::new(e),
            })?;
        self.transition(LifecycleState::TaskCreated);

        let start_failed = |e: CtrunError| CtrunError::TaskStart {
            name: name.to_string(),
            source: Box::new(e),
        };

        if !waiting {
            if let Err(e) = task.start() {
                if let Err(cleanup) = remove_task(task) {
                    tracing::warn!(container = %name, error = %cleanup, "cleanup failed");
                }
                return Err(start_failed(e));
            }
            self.transition(LifecycleState::TaskRunning);
            self.transition(LifecycleState::Detached);
            return Ok(RunOutcome {
                container: name.clone(),
                state: LifecycleState::Detached,
                status: ExitStatus::default(),
                output: Vec::new(),
            });
        }

        obligations.push("delete task", move || remove_task(task));

        // The subscription must exist before the process can exit.
        let waiter = task.wait().map_err(start_failed)?;
        if let Err(e) = task.start() {
            obligations.run_last();
            return Err(start_failed(e));
        }
        self.transition(LifecycleState::TaskRunning);

        let status = waiter.wait()?;
        tracing::info!(container = %name, code = status.code, "task exited");
        self.transition(LifecycleState::TaskExited);

        obligations.run_all();
        self.transition(LifecycleState::Cleaned);

        Ok(RunOutcome {
            container: name.clone(),
            state: LifecycleState::Cleaned,
            output: self.io.buffer().map(OutputBuffer::contents).unwrap_or_default(),
            status,
        })
    }

    /// Finds the image locally, pulling it if absent.
    fn resolve_image(&self) -> Result<Image> {
        let wrap = |e: CtrunError| CtrunError::ImageResolution {
            reference: self.image.clone(),
            source: Box::new(e),
        };
        match self.client.get_image(&self.image) {
            Ok(image) => Ok(image),
            Err(e) if e.is_not_found() => {
                tracing::info!(image = %self.image, "image not present locally");
                self.client
                    .pull(&self.image, &PullOptions::default())
                    .map_err(wrap)
            }
            Err(e) => Err(wrap(e)),
        }
    }

    fn build_spec(&self, image: &Image) -> RuntimeSpec {
        let mounts = load_mounts(&self.mounts_file);
        tracing::debug!(container = %self.name, count = mounts.len(), "extra mounts loaded");
        let mut builder = SpecBuilder::new(image)
            .hostname(self.name.as_str())
            .mounts(mounts);
        if let Some(command) = &self.command {
            builder = builder.command(command);
        }
        if let Some(mapping) = &self.mapping {
            builder = builder.id_mapping(mapping);
        }
        builder.build()
    }
}

impl fmt::Debug for LifecycleController<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("command", &self.command)
            .field("policy", &self.policy)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Verifies the user-namespace root and the snapshot owner agree.
fn check_snapshot_owner(spec: &RuntimeSpec, snapshot: &SnapshotStrategy) -> Result<()> {
    let root = spec.user_namespace_root();
    let owner = snapshot.owner();
    if root == owner {
        return Ok(());
    }
    Err(CtrunError::Config {
        message: format!(
            "user namespace root {root:?} does not match snapshot owner {owner:?}"
        ),
    })
}

/// Deletes a task, treating an already-gone task as done.
fn remove_task(task: Task<'_>) -> Result<()> {
    match task.delete() {
        Ok(status) => {
            tracing::debug!(container = %task.container(), code = status.code, "task deleted");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            tracing::debug!(container = %task.container(), "task already gone");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryRuntime;
    use ctrun_core::idmap::{IdMap, RootPair};

    #[test]
    fn policy_follows_command_presence() {
        assert_eq!(RunPolicy::for_command(Some("ls")), RunPolicy::WaitAndCleanup);
        assert_eq!(RunPolicy::for_command(None), RunPolicy::Detached);
    }

    #[test]
    fn state_display_is_kebab_case() {
        assert_eq!(LifecycleState::ContainerCreated.to_string(), "container-created");
        assert_eq!(LifecycleState::Detached.to_string(), "detached");
    }

    #[test]
    fn matching_owner_passes_consistency_check() {
        let image = Image::new("alpine", "sha256:0");
        let mapping = IdMapping::new(
            vec![IdMap::new(0, 100_000, 65_536)],
            vec![IdMap::new(0, 100_000, 65_536)],
        )
        .unwrap();
        let spec = SpecBuilder::new(&image).id_mapping(&mapping).build();
        let snapshot = SnapshotStrategy::for_mapping("k", &image, Some(&mapping));
        assert!(check_snapshot_owner(&spec, &snapshot).is_ok());
    }

    #[test]
    fn mismatched_owner_fails_consistency_check() {
        let image = Image::new("alpine", "sha256:0");
        let spec = SpecBuilder::new(&image).build();
        let snapshot = SnapshotStrategy::Remapped {
            key: "k".into(),
            image: "alpine".into(),
            uid: 1,
            gid: 1,
        };
        assert_eq!(
            snapshot.owner(),
            Some(RootPair { uid: 1, gid: 1 })
        );
        assert!(check_snapshot_owner(&spec, &snapshot).is_err());
    }

    #[test]
    fn controller_starts_idle() {
        let rt = MemoryRuntime::new();
        let controller = LifecycleController::new(&rt, ContainerName::new("run-1"), "alpine");
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert_eq!(controller.name().as_str(), "run-1");
    }
}
