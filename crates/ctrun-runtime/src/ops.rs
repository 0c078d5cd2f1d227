//! Stop and delete operations for containers left behind by detached runs.

use ctrun_common::error::{CtrunError, Result};
use ctrun_common::types::{ContainerName, TaskStatus};
use nix::sys::signal::Signal;

use crate::client::{Container, DeleteMode, RuntimeService, Task};

/// Kills and removes a container's task.
///
/// A container without a task is already stopped. A running task is killed
/// with `SIGKILL` and reaped; a created or stopped one is just deleted. A
/// paused task is refused.
///
/// # Errors
///
/// Returns `NotFound` if the container does not exist, `InvalidState` if the
/// task is paused, or the daemon's error from kill or delete. A task that is
/// gone by the time it is killed counts as stopped.
pub fn stop_container(client: &dyn RuntimeService, name: &ContainerName) -> Result<()> {
    let container = Container::new(client, name);
    let _ = container.info()?;

    let task = match container.task() {
        Ok(task) => task,
        Err(e) if e.is_not_found() => {
            tracing::debug!(container = %name, "no task to stop");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let status = task.status()?;
    tracing::debug!(container = %name, status = %status, "stopping task");
    match status {
        TaskStatus::Running => {
            let waiter = match task.wait() {
                Ok(waiter) => Some(waiter),
                Err(e) => {
                    tracing::warn!(container = %name, error = %e, "cannot subscribe to task exit");
                    None
                }
            };
            if let Err(e) = task.kill(Signal::SIGKILL) {
                if let Err(cleanup) = delete_task(task) {
                    tracing::warn!(container = %name, error = %cleanup, "task delete after failed kill");
                }
                if e.is_not_found() {
                    tracing::debug!(container = %name, "task exited before kill");
                    return Ok(());
                }
                return Err(e);
            }
            if let Some(waiter) = waiter {
                match waiter.wait() {
                    Ok(exit) if !exit.success() => {
                        tracing::debug!(container = %name, code = exit.code, "task exited non-zero");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(container = %name, error = %e, "task exit not observed"),
                }
            }
            delete_task(task)
        }
        TaskStatus::Created | TaskStatus::Stopped => delete_task(task),
        TaskStatus::Paused => Err(CtrunError::InvalidState {
            name: name.to_string(),
            state: status.to_string(),
            message: "unpause the task before stopping it".into(),
        }),
    }
}

/// Deletes a container together with its snapshot.
///
/// # Errors
///
/// Returns `NotFound` if the container does not exist, or the daemon's error
/// if it still has a task.
pub fn delete_container(client: &dyn RuntimeService, name: &ContainerName) -> Result<()> {
    let container = Container::new(client, name);
    let _ = container.info()?;
    container.delete(DeleteMode::WithSnapshotCleanup)?;
    tracing::info!(container = %name, "container deleted");
    Ok(())
}

/// Deletes a task, ignoring a process that was already reaped.
fn delete_task(task: Task<'_>) -> Result<()> {
    match task.delete() {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            tracing::debug!(container = %task.container(), "task already reaped");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
