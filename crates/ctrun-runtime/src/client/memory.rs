//! In-memory runtime service.
//!
//! Holds images, containers, snapshots and tasks in a map behind a mutex and
//! journals every call, so lifecycle code can be driven end to end without a
//! daemon. Exit statuses are delivered only to waiters subscribed at the time
//! the task exits; a waiter registered afterwards sees a closed channel.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use ctrun_common::error::{CtrunError, Result};
use ctrun_common::types::{ContainerName, ExitStatus, TaskStatus, Version};
use nix::sys::signal::Signal;

use super::{
    ContainerInfo, DeleteMode, ExitNotifier, ExitWaiter, IoSpec, RuntimeService,
    SnapshotStrategy, TaskInfo, TaskOptions,
};
use crate::image::{Image, PullOptions};
use crate::spec::RuntimeSpec;

/// Identifies a [`RuntimeService`] method in the call journal and for
/// failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Operation {
    Version,
    GetImage,
    Pull,
    NewContainer,
    LoadContainer,
    DeleteContainer,
    NewTask,
    Task,
    StartTask,
    WaitTask,
    KillTask,
    DeleteTask,
}

/// One journaled call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Method invoked.
    pub operation: Operation,
    /// Image reference or container name the call targeted.
    pub target: String,
}

/// What a task does once started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitBehavior {
    /// Exits as soon as it starts, writing `output` to buffered I/O.
    Immediate {
        /// Exit code.
        code: u32,
        /// Bytes written to stdout.
        output: String,
    },
    /// Keeps running until signalled.
    RunUntilKilled,
    /// Exits with code 0 but drops every subscribed waiter unnotified, as a
    /// daemon connection lost before the exit event would.
    LoseExit,
}

impl Default for ExitBehavior {
    fn default() -> Self {
        Self::Immediate {
            code: 0,
            output: String::new(),
        }
    }
}

#[derive(Debug)]
struct TaskRecord {
    info: TaskInfo,
    io: IoSpec,
    options: TaskOptions,
    exit: Option<ExitStatus>,
    waiters: Vec<ExitNotifier>,
}

impl TaskRecord {
    fn exit(&mut self, status: ExitStatus) {
        self.info.status = TaskStatus::Stopped;
        for waiter in self.waiters.drain(..) {
            waiter.notify(status.clone());
        }
        self.exit = Some(status);
    }
}

#[derive(Debug)]
struct ContainerRecord {
    info: ContainerInfo,
    snapshot: SnapshotStrategy,
    spec: RuntimeSpec,
    task: Option<TaskRecord>,
}

#[derive(Debug)]
struct State {
    version: Version,
    local: BTreeMap<String, Image>,
    registry: BTreeMap<String, Image>,
    containers: BTreeMap<ContainerName, ContainerRecord>,
    snapshots: BTreeSet<String>,
    failures: HashSet<Operation>,
    calls: Vec<Call>,
    signals: Vec<(ContainerName, Signal)>,
    behavior: ExitBehavior,
    next_pid: u32,
}

/// [`RuntimeService`] backed by process memory.
#[derive(Debug)]
pub struct MemoryRuntime {
    state: Mutex<State>,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuntime {
    /// Creates an empty runtime whose tasks exit immediately with code 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                version: Version {
                    version: "memory".into(),
                    revision: env!("CARGO_PKG_VERSION").into(),
                },
                local: BTreeMap::new(),
                registry: BTreeMap::new(),
                containers: BTreeMap::new(),
                snapshots: BTreeSet::new(),
                failures: HashSet::new(),
                calls: Vec::new(),
                signals: Vec::new(),
                behavior: ExitBehavior::default(),
                next_pid: 1000,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a call and applies any injected failure for it.
    fn enter(&self, operation: Operation, target: &str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(Call {
            operation,
            target: target.to_string(),
        });
        if state.failures.contains(&operation) {
            return Err(CtrunError::Rpc {
                method: format!("{operation:?}"),
                message: format!("injected failure for {target}"),
            });
        }
        Ok(state)
    }

    /// Adds an image to the local store.
    #[must_use]
    pub fn with_local_image(self, image: Image) -> Self {
        let _ = self.lock().local.insert(image.name.clone(), image);
        self
    }

    /// Makes an image available for pulling.
    #[must_use]
    pub fn with_registry_image(self, image: Image) -> Self {
        let _ = self.lock().registry.insert(image.name.clone(), image);
        self
    }

    /// Sets what tasks started from now on do.
    #[must_use]
    pub fn with_exit_behavior(self, behavior: ExitBehavior) -> Self {
        self.lock().behavior = behavior;
        self
    }

    /// Makes every subsequent call to `operation` fail.
    pub fn fail_on(&self, operation: Operation) {
        let _ = self.lock().failures.insert(operation);
    }

    /// Clears an injected failure.
    pub fn recover(&self, operation: Operation) {
        let _ = self.lock().failures.remove(&operation);
    }

    /// Moves a running task to `paused`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the container has no task.
    pub fn pause_task(&self, container: &ContainerName) -> Result<()> {
        let mut state = self.lock();
        let task = task_mut(&mut state, container)?;
        task.info.status = TaskStatus::Paused;
        Ok(())
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Operations of every call made so far, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().calls.iter().map(|c| c.operation).collect()
    }

    /// Signals delivered through `kill_task`.
    #[must_use]
    pub fn signals(&self) -> Vec<(ContainerName, Signal)> {
        self.lock().signals.clone()
    }

    /// Names of existing containers.
    #[must_use]
    pub fn container_names(&self) -> Vec<ContainerName> {
        self.lock().containers.keys().cloned().collect()
    }

    /// Returns `true` if the container exists.
    #[must_use]
    pub fn has_container(&self, name: &ContainerName) -> bool {
        self.lock().containers.contains_key(name)
    }

    /// Returns `true` if the container exists and has a task.
    #[must_use]
    pub fn has_task(&self, name: &ContainerName) -> bool {
        self.lock()
            .containers
            .get(name)
            .is_some_and(|c| c.task.is_some())
    }

    /// Returns `true` if a snapshot with this key exists.
    #[must_use]
    pub fn has_snapshot(&self, key: &str) -> bool {
        self.lock().snapshots.contains(key)
    }

    /// Returns `true` if the image is in the local store.
    #[must_use]
    pub fn has_local_image(&self, reference: &str) -> bool {
        self.lock().local.contains_key(reference)
    }

    /// Snapshot strategy the container was created with.
    #[must_use]
    pub fn snapshot_of(&self, name: &ContainerName) -> Option<SnapshotStrategy> {
        self.lock().containers.get(name).map(|c| c.snapshot.clone())
    }

    /// Runtime spec the container was created with.
    #[must_use]
    pub fn spec_of(&self, name: &ContainerName) -> Option<RuntimeSpec> {
        self.lock().containers.get(name).map(|c| c.spec.clone())
    }

    /// Options the container's task was created with.
    #[must_use]
    pub fn task_options_of(&self, name: &ContainerName) -> Option<TaskOptions> {
        self.lock()
            .containers
            .get(name)
            .and_then(|c| c.task.as_ref())
            .map(|t| t.options)
    }
}

fn container_mut<'s>(
    state: &'s mut State,
    name: &ContainerName,
) -> Result<&'s mut ContainerRecord> {
    state
        .containers
        .get_mut(name)
        .ok_or_else(|| CtrunError::NotFound {
            kind: "container",
            id: name.to_string(),
        })
}

fn task_mut<'s>(state: &'s mut State, name: &ContainerName) -> Result<&'s mut TaskRecord> {
    container_mut(state, name)?
        .task
        .as_mut()
        .ok_or_else(|| CtrunError::NotFound {
            kind: "task",
            id: name.to_string(),
        })
}

fn invalid_state(name: &ContainerName, status: TaskStatus, message: &str) -> CtrunError {
    CtrunError::InvalidState {
        name: name.to_string(),
        state: status.to_string(),
        message: message.to_string(),
    }
}

impl RuntimeService for MemoryRuntime {
    fn version(&self) -> Result<Version> {
        let state = self.enter(Operation::Version, "")?;
        Ok(state.version.clone())
    }

    fn get_image(&self, reference: &str) -> Result<Image> {
        let state = self.enter(Operation::GetImage, reference)?;
        state
            .local
            .get(reference)
            .cloned()
            .ok_or_else(|| CtrunError::NotFound {
                kind: "image",
                id: reference.to_string(),
            })
    }

    fn pull(&self, reference: &str, options: &PullOptions) -> Result<Image> {
        let mut state = self.enter(Operation::Pull, reference)?;
        let image = state
            .registry
            .get(reference)
            .cloned()
            .ok_or_else(|| CtrunError::Rpc {
                method: "images.pull".into(),
                message: format!("{reference}: not found in registry"),
            })?;
        if options.unpack {
            let _ = state.local.insert(reference.to_string(), image.clone());
        }
        Ok(image)
    }

    fn new_container(
        &self,
        name: &ContainerName,
        snapshot: &SnapshotStrategy,
        spec: &RuntimeSpec,
    ) -> Result<ContainerInfo> {
        let mut state = self.enter(Operation::NewContainer, name.as_str())?;
        if state.containers.contains_key(name) {
            return Err(CtrunError::Rpc {
                method: "containers.create".into(),
                message: format!("container {name}: already exists"),
            });
        }
        let (SnapshotStrategy::New { image, key } | SnapshotStrategy::Remapped { image, key, .. }) =
            snapshot;
        if !state.local.contains_key(image) {
            return Err(CtrunError::NotFound {
                kind: "image",
                id: image.clone(),
            });
        }
        if !state.snapshots.insert(key.clone()) {
            return Err(CtrunError::Rpc {
                method: "containers.create".into(),
                message: format!("snapshot {key}: already exists"),
            });
        }

        let info = ContainerInfo {
            name: name.clone(),
            image: image.clone(),
            snapshot_key: key.clone(),
            created_at: Utc::now(),
        };
        let _ = state.containers.insert(
            name.clone(),
            ContainerRecord {
                info: info.clone(),
                snapshot: snapshot.clone(),
                spec: spec.clone(),
                task: None,
            },
        );
        Ok(info)
    }

    fn load_container(&self, name: &ContainerName) -> Result<ContainerInfo> {
        let mut state = self.enter(Operation::LoadContainer, name.as_str())?;
        container_mut(&mut state, name).map(|c| c.info.clone())
    }

    fn delete_container(&self, name: &ContainerName, mode: DeleteMode) -> Result<()> {
        let mut state = self.enter(Operation::DeleteContainer, name.as_str())?;
        let record = container_mut(&mut state, name)?;
        if let Some(task) = &record.task {
            if task.info.status != TaskStatus::Stopped {
                return Err(invalid_state(
                    name,
                    task.info.status,
                    "delete the task before the container",
                ));
            }
        }
        let key = record.info.snapshot_key.clone();
        let _ = state.containers.remove(name);
        if mode == DeleteMode::WithSnapshotCleanup {
            let _ = state.snapshots.remove(&key);
        }
        Ok(())
    }

    fn new_task(
        &self,
        container: &ContainerName,
        io: &IoSpec,
        options: &TaskOptions,
    ) -> Result<TaskInfo> {
        let mut state = self.enter(Operation::NewTask, container.as_str())?;
        let pid = state.next_pid;
        state.next_pid += 1;
        let record = container_mut(&mut state, container)?;
        if record.task.is_some() {
            return Err(CtrunError::Rpc {
                method: "tasks.create".into(),
                message: format!("task for {container}: already exists"),
            });
        }
        let info = TaskInfo {
            container: container.clone(),
            pid,
            status: TaskStatus::Created,
        };
        record.task = Some(TaskRecord {
            info: info.clone(),
            io: io.clone(),
            options: *options,
            exit: None,
            waiters: Vec::new(),
        });
        Ok(info)
    }

    fn task(&self, container: &ContainerName) -> Result<TaskInfo> {
        let mut state = self.enter(Operation::Task, container.as_str())?;
        task_mut(&mut state, container).map(|t| t.info.clone())
    }

    fn start_task(&self, container: &ContainerName) -> Result<u32> {
        let mut state = self.enter(Operation::StartTask, container.as_str())?;
        let behavior = state.behavior.clone();
        let task = task_mut(&mut state, container)?;
        if task.info.status != TaskStatus::Created {
            return Err(invalid_state(container, task.info.status, "task already started"));
        }
        task.info.status = TaskStatus::Running;
        match behavior {
            ExitBehavior::Immediate { code, output } => {
                if let Some(buffer) = task.io.buffer() {
                    buffer.append(output.as_bytes());
                }
                task.exit(ExitStatus::exited(code));
            }
            ExitBehavior::LoseExit => {
                task.waiters.clear();
                task.info.status = TaskStatus::Stopped;
                task.exit = Some(ExitStatus::exited(0));
            }
            ExitBehavior::RunUntilKilled => {}
        }
        Ok(task.info.pid)
    }

    fn wait_task(&self, container: &ContainerName) -> Result<ExitWaiter> {
        let mut state = self.enter(Operation::WaitTask, container.as_str())?;
        let task = task_mut(&mut state, container)?;
        let (notifier, waiter) = ExitWaiter::channel(container.clone());
        // An already exited task has nothing left to deliver.
        if task.exit.is_none() {
            task.waiters.push(notifier);
        }
        Ok(waiter)
    }

    fn kill_task(&self, container: &ContainerName, signal: Signal) -> Result<()> {
        let mut state = self.enter(Operation::KillTask, container.as_str())?;
        state.signals.push((container.clone(), signal));
        let task = task_mut(&mut state, container)?;
        if task.info.status == TaskStatus::Stopped {
            return Err(CtrunError::NotFound {
                kind: "process",
                id: container.to_string(),
            });
        }
        let code = 128 + u32::try_from(signal as i32).unwrap_or_default();
        task.exit(ExitStatus::exited(code));
        Ok(())
    }

    fn delete_task(&self, container: &ContainerName) -> Result<ExitStatus> {
        let mut state = self.enter(Operation::DeleteTask, container.as_str())?;
        let task = task_mut(&mut state, container)?;
        let status = task.info.status;
        match status {
            TaskStatus::Running | TaskStatus::Paused => Err(invalid_state(
                container,
                status,
                "kill the task before deleting it",
            )),
            TaskStatus::Created | TaskStatus::Stopped => {
                let status = task.exit.clone().unwrap_or_default();
                container_mut(&mut state, container)?.task = None;
                Ok(status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::OutputBuffer;
    use crate::spec::SpecBuilder;

    const ALPINE: &str = "docker.io/library/alpine:latest";

    fn runtime() -> MemoryRuntime {
        MemoryRuntime::new().with_local_image(Image::new(ALPINE, "sha256:a1"))
    }

    fn create(rt: &MemoryRuntime, name: &ContainerName) {
        let image = Image::new(ALPINE, "sha256:a1");
        let spec = SpecBuilder::new(&image).build();
        let snapshot = SnapshotStrategy::for_mapping(name.as_str(), &image, None);
        rt.new_container(name, &snapshot, &spec).unwrap();
    }

    #[test]
    fn missing_image_is_not_found() {
        let rt = MemoryRuntime::new();
        assert!(rt.get_image(ALPINE).unwrap_err().is_not_found());
    }

    #[test]
    fn pull_stores_image_locally() {
        let rt = MemoryRuntime::new().with_registry_image(Image::new(ALPINE, "sha256:a1"));
        rt.pull(ALPINE, &PullOptions::default()).unwrap();
        assert!(rt.has_local_image(ALPINE));
    }

    #[test]
    fn duplicate_container_name_fails() {
        let rt = runtime();
        let name = ContainerName::new("run-1");
        create(&rt, &name);
        let image = Image::new(ALPINE, "sha256:a1");
        let snapshot = SnapshotStrategy::for_mapping("other", &image, None);
        let err = rt
            .new_container(&name, &snapshot, &SpecBuilder::new(&image).build())
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn waiter_registered_before_start_sees_exit() {
        let rt = runtime().with_exit_behavior(ExitBehavior::Immediate {
            code: 7,
            output: "hi\n".into(),
        });
        let name = ContainerName::new("run-1");
        create(&rt, &name);
        let buffer = OutputBuffer::new();
        rt.new_task(&name, &IoSpec::Buffered(buffer.clone()), &TaskOptions::default())
            .unwrap();

        let waiter = rt.wait_task(&name).unwrap();
        rt.start_task(&name).unwrap();
        assert_eq!(waiter.wait().unwrap().code, 7);
        assert_eq!(buffer.contents(), b"hi\n");
    }

    #[test]
    fn waiter_registered_after_exit_sees_closed_channel() {
        let rt = runtime();
        let name = ContainerName::new("run-1");
        create(&rt, &name);
        rt.new_task(&name, &IoSpec::Null, &TaskOptions::default())
            .unwrap();
        rt.start_task(&name).unwrap();
        assert!(rt.wait_task(&name).unwrap().wait().is_err());
    }

    #[test]
    fn kill_exits_with_signal_code() {
        let rt = runtime().with_exit_behavior(ExitBehavior::RunUntilKilled);
        let name = ContainerName::new("run-1");
        create(&rt, &name);
        rt.new_task(&name, &IoSpec::Null, &TaskOptions::default())
            .unwrap();
        rt.start_task(&name).unwrap();
        let waiter = rt.wait_task(&name).unwrap();
        rt.kill_task(&name, Signal::SIGKILL).unwrap();
        assert_eq!(waiter.wait().unwrap().code, 137);
        assert_eq!(rt.delete_task(&name).unwrap().code, 137);
    }

    #[test]
    fn running_task_blocks_deletes() {
        let rt = runtime().with_exit_behavior(ExitBehavior::RunUntilKilled);
        let name = ContainerName::new("run-1");
        create(&rt, &name);
        rt.new_task(&name, &IoSpec::Null, &TaskOptions::default())
            .unwrap();
        rt.start_task(&name).unwrap();
        assert!(rt.delete_task(&name).is_err());
        assert!(rt
            .delete_container(&name, DeleteMode::WithSnapshotCleanup)
            .is_err());
        assert!(rt.has_task(&name));
    }

    #[test]
    fn delete_with_snapshot_cleanup_removes_snapshot() {
        let rt = runtime();
        let kept = ContainerName::new("kept");
        let cleaned = ContainerName::new("cleaned");
        create(&rt, &kept);
        create(&rt, &cleaned);

        rt.delete_container(&kept, DeleteMode::KeepSnapshot).unwrap();
        rt.delete_container(&cleaned, DeleteMode::WithSnapshotCleanup)
            .unwrap();
        assert!(rt.has_snapshot("kept"));
        assert!(!rt.has_snapshot("cleaned"));
        assert!(rt.container_names().is_empty());
    }

    #[test]
    fn injected_failure_is_journaled_and_recoverable() {
        let rt = runtime();
        rt.fail_on(Operation::Version);
        assert!(rt.version().is_err());
        rt.recover(Operation::Version);
        assert_eq!(rt.version().unwrap().version, "memory");
        assert_eq!(rt.operations(), vec![Operation::Version, Operation::Version]);
    }
}
