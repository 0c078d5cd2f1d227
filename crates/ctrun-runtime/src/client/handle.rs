//! Borrowed container and task handles over a [`RuntimeService`].

use ctrun_common::error::Result;
use ctrun_common::types::{ContainerName, ExitStatus, TaskStatus};
use nix::sys::signal::Signal;

use super::{ContainerInfo, DeleteMode, ExitWaiter, IoSpec, RuntimeService, TaskInfo, TaskOptions};

/// A container on the daemon, bound to the client that created or loaded it.
#[derive(Clone, Copy)]
pub struct Container<'c> {
    client: &'c dyn RuntimeService,
    name: &'c ContainerName,
}

impl<'c> Container<'c> {
    /// Wraps an existing container name.
    #[must_use]
    pub const fn new(client: &'c dyn RuntimeService, name: &'c ContainerName) -> Self {
        Self { client, name }
    }

    /// Container name.
    #[must_use]
    pub const fn name(&self) -> &ContainerName {
        self.name
    }

    /// Fetches the container record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the container is gone.
    pub fn info(&self) -> Result<ContainerInfo> {
        self.client.load_container(self.name)
    }

    /// Creates the container's task.
    ///
    /// # Errors
    ///
    /// Propagates the daemon's error.
    pub fn new_task(&self, io: &IoSpec, options: &TaskOptions) -> Result<Task<'c>> {
        let info = self.client.new_task(self.name, io, options)?;
        tracing::debug!(container = %self.name, pid = info.pid, "task created");
        Ok(Task {
            client: self.client,
            container: self.name,
        })
    }

    /// Loads the container's existing task.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the container has no task.
    pub fn task(&self) -> Result<Task<'c>> {
        self.client.task(self.name)?;
        Ok(Task {
            client: self.client,
            container: self.name,
        })
    }

    /// Deletes the container.
    ///
    /// # Errors
    ///
    /// Propagates the daemon's error.
    pub fn delete(&self, mode: DeleteMode) -> Result<()> {
        self.client.delete_container(self.name, mode)
    }
}

impl std::fmt::Debug for Container<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container").field("name", self.name).finish()
    }
}

/// A container's task.
#[derive(Clone, Copy)]
pub struct Task<'c> {
    client: &'c dyn RuntimeService,
    container: &'c ContainerName,
}

impl Task<'_> {
    /// Owning container.
    #[must_use]
    pub const fn container(&self) -> &ContainerName {
        self.container
    }

    /// Fetches the task record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the task is gone.
    pub fn info(&self) -> Result<TaskInfo> {
        self.client.task(self.container)
    }

    /// Current status.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the task is gone.
    pub fn status(&self) -> Result<TaskStatus> {
        self.client.task_status(self.container)
    }

    /// Starts the process.
    ///
    /// # Errors
    ///
    /// Propagates the daemon's error.
    pub fn start(&self) -> Result<u32> {
        self.client.start_task(self.container)
    }

    /// Subscribes to the process's exit.
    ///
    /// # Errors
    ///
    /// Propagates the daemon's error.
    pub fn wait(&self) -> Result<ExitWaiter> {
        self.client.wait_task(self.container)
    }

    /// Signals the process.
    ///
    /// # Errors
    ///
    /// Propagates the daemon's error.
    pub fn kill(&self, signal: Signal) -> Result<()> {
        self.client.kill_task(self.container, signal)
    }

    /// Deletes the task record.
    ///
    /// # Errors
    ///
    /// Propagates the daemon's error.
    pub fn delete(&self) -> Result<ExitStatus> {
        self.client.delete_task(self.container)
    }
}

impl std::fmt::Debug for Task<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("container", self.container)
            .finish()
    }
}
