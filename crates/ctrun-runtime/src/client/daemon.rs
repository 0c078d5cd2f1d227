//! Runtime daemon client over a Unix socket.
//!
//! Every request opens a fresh connection and writes one newline-delimited
//! JSON object `{"method", "namespace", "params"}`. The daemon answers with
//! one line holding either `{"result": ...}` or `{"error": {"code", "message"}}`.
//! `tasks.wait` is the exception: the daemon first acknowledges the
//! subscription, then keeps the connection open and sends the exit event
//! when the task stops. Requests are never retried.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ctrun_common::constants::{REQUEST_TIMEOUT_SECS, UNKNOWN_EXIT_CODE};
use ctrun_common::error::{CtrunError, Result};
use ctrun_common::types::{ContainerName, ExitStatus, Version};
use nix::sys::signal::Signal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    ContainerInfo, DeleteMode, ExitWaiter, IoSpec, OutputBuffer, RuntimeService,
    SnapshotStrategy, TaskInfo, TaskOptions,
};
use crate::image::{Image, PullOptions};
use crate::spec::RuntimeSpec;

const WAIT_METHOD: &str = "tasks.wait";

/// Methods that may legitimately block for longer than a request timeout.
const UNBOUNDED_METHODS: &[&str] = &["images.pull", WAIT_METHOD];

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ReplyError>,
}

#[derive(Debug, Deserialize)]
struct ReplyError {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Subscribed {
    subscribed: bool,
}

#[derive(Debug, Deserialize)]
struct WaitEvent {
    exit_status: u32,
    #[serde(default)]
    exited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    output: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Started {
    pid: u32,
}

/// [`RuntimeService`] speaking JSON-RPC to a daemon socket.
#[derive(Debug)]
pub struct DaemonClient {
    socket: PathBuf,
    namespace: String,
    buffers: Mutex<HashMap<ContainerName, OutputBuffer>>,
}

impl DaemonClient {
    /// Checks the socket accepts connections and returns a client for it.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the socket cannot be dialed.
    pub fn connect(socket: impl Into<PathBuf>, namespace: impl Into<String>) -> Result<Self> {
        let socket = socket.into();
        let _probe = UnixStream::connect(&socket).map_err(|e| CtrunError::Connection {
            address: socket.clone(),
            source: e,
        })?;
        let namespace = namespace.into();
        tracing::debug!(socket = %socket.display(), namespace = %namespace, "connected to runtime daemon");
        Ok(Self {
            socket,
            namespace,
            buffers: Mutex::new(HashMap::new()),
        })
    }

    /// Socket path.
    #[must_use]
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Namespace sent with every request.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Opens a connection and writes one request on it.
    fn send(&self, method: &str, params: &Value) -> Result<BufReader<UnixStream>> {
        let io_err = |e| CtrunError::Io {
            path: self.socket.clone(),
            source: e,
        };
        let mut stream = UnixStream::connect(&self.socket).map_err(|e| CtrunError::Connection {
            address: self.socket.clone(),
            source: e,
        })?;
        let timeout = Some(Duration::from_secs(REQUEST_TIMEOUT_SECS));
        stream.set_write_timeout(timeout).map_err(io_err)?;
        if !UNBOUNDED_METHODS.contains(&method) {
            stream.set_read_timeout(timeout).map_err(io_err)?;
        }

        let request = json!({
            "method": method,
            "namespace": self.namespace,
            "params": params,
        });
        let mut payload = serde_json::to_string(&request)?;
        payload.push('\n');
        stream.write_all(payload.as_bytes()).map_err(io_err)?;

        tracing::trace!(method, "request sent");
        Ok(BufReader::new(stream))
    }

    /// Sends a request and decodes its single reply.
    fn call<T: DeserializeOwned>(&self, method: &str, params: &Value) -> Result<T> {
        let mut reader = self.send(method, params)?;
        read_reply(&mut reader, method, &self.socket)
    }

    fn buffer_for(&self, container: &ContainerName) -> Option<OutputBuffer> {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(container)
            .cloned()
    }
}

/// Reads one reply line and decodes its result.
fn read_reply<T: DeserializeOwned>(
    reader: &mut BufReader<UnixStream>,
    method: &str,
    socket: &Path,
) -> Result<T> {
    let mut line = String::new();
    let bytes = reader.read_line(&mut line).map_err(|e| CtrunError::Io {
        path: socket.to_path_buf(),
        source: e,
    })?;
    if bytes == 0 {
        return Err(CtrunError::Rpc {
            method: method.to_string(),
            message: "connection closed before reply".into(),
        });
    }

    let reply: Reply = serde_json::from_str(&line)?;
    if let Some(error) = reply.error {
        return Err(reply_error(method, error));
    }
    let result = reply.result.unwrap_or(Value::Null);
    Ok(serde_json::from_value(result)?)
}

fn reply_error(method: &str, error: ReplyError) -> CtrunError {
    if error.code == "not_found" {
        let kind = match method.split('.').next() {
            Some("images") => "image",
            Some("containers") => "container",
            Some("tasks") => "task",
            _ => "resource",
        };
        return CtrunError::NotFound {
            kind,
            id: error.message,
        };
    }
    CtrunError::Rpc {
        method: method.to_string(),
        message: format!("{}: {}", error.code, error.message),
    }
}

fn io_params(io: &IoSpec) -> Value {
    match io {
        IoSpec::Null => json!({ "kind": "null" }),
        IoSpec::Inherit => {
            let fd = |n: u8| format!("/proc/{}/fd/{n}", std::process::id());
            json!({
                "kind": "inherit",
                "stdin": fd(0),
                "stdout": fd(1),
                "stderr": fd(2),
            })
        }
        IoSpec::Buffered(_) => json!({ "kind": "buffered" }),
    }
}

impl RuntimeService for DaemonClient {
    fn version(&self) -> Result<Version> {
        self.call("version", &json!({}))
    }

    fn get_image(&self, reference: &str) -> Result<Image> {
        self.call("images.get", &json!({ "reference": reference }))
    }

    fn pull(&self, reference: &str, options: &PullOptions) -> Result<Image> {
        tracing::info!(image = reference, "pulling image");
        self.call(
            "images.pull",
            &json!({ "reference": reference, "unpack": options.unpack }),
        )
    }

    fn new_container(
        &self,
        name: &ContainerName,
        snapshot: &SnapshotStrategy,
        spec: &RuntimeSpec,
    ) -> Result<ContainerInfo> {
        self.call(
            "containers.create",
            &json!({ "name": name, "snapshot": snapshot, "spec": spec }),
        )
    }

    fn load_container(&self, name: &ContainerName) -> Result<ContainerInfo> {
        self.call("containers.get", &json!({ "name": name }))
    }

    fn delete_container(&self, name: &ContainerName, mode: DeleteMode) -> Result<()> {
        let _: Value = self.call("containers.delete", &json!({ "name": name, "mode": mode }))?;
        Ok(())
    }

    fn new_task(
        &self,
        container: &ContainerName,
        io: &IoSpec,
        options: &TaskOptions,
    ) -> Result<TaskInfo> {
        let info: TaskInfo = self.call(
            "tasks.create",
            &json!({ "container": container, "io": io_params(io), "options": options }),
        )?;
        if let Some(buffer) = io.buffer() {
            let _ = self
                .buffers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(container.clone(), buffer.clone());
        }
        Ok(info)
    }

    fn task(&self, container: &ContainerName) -> Result<TaskInfo> {
        self.call("tasks.get", &json!({ "container": container }))
    }

    fn start_task(&self, container: &ContainerName) -> Result<u32> {
        let started: Started = self.call("tasks.start", &json!({ "container": container }))?;
        Ok(started.pid)
    }

    fn wait_task(&self, container: &ContainerName) -> Result<ExitWaiter> {
        let mut reader = self.send(WAIT_METHOD, &json!({ "container": container }))?;
        let ack: Subscribed = read_reply(&mut reader, WAIT_METHOD, &self.socket)?;
        if !ack.subscribed {
            return Err(CtrunError::Rpc {
                method: WAIT_METHOD.into(),
                message: format!("daemon declined exit subscription for {container}"),
            });
        }

        let (notifier, waiter) = ExitWaiter::channel(container.clone());
        let buffer = self.buffer_for(container);
        let socket = self.socket.clone();
        let name = container.clone();
        let _handle = thread::Builder::new()
            .name(format!("wait-{container}"))
            .spawn(move || {
                let status = match read_reply::<WaitEvent>(&mut reader, WAIT_METHOD, &socket) {
                    Ok(event) => {
                        if let (Some(buffer), Some(output)) = (&buffer, &event.output) {
                            buffer.append(output.as_bytes());
                        }
                        ExitStatus {
                            code: event.exit_status,
                            exited_at: event.exited_at,
                            error: None,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(container = %name, error = %e, "lost exit event");
                        ExitStatus {
                            code: UNKNOWN_EXIT_CODE,
                            exited_at: None,
                            error: Some(e.to_string()),
                        }
                    }
                };
                notifier.notify(status);
            })
            .map_err(|e| CtrunError::Io {
                path: self.socket.clone(),
                source: e,
            })?;
        Ok(waiter)
    }

    fn kill_task(&self, container: &ContainerName, signal: Signal) -> Result<()> {
        let _: Value = self.call(
            "tasks.kill",
            &json!({ "container": container, "signal": signal.as_str() }),
        )?;
        Ok(())
    }

    fn delete_task(&self, container: &ContainerName) -> Result<ExitStatus> {
        let status = self.call("tasks.delete", &json!({ "container": container }))?;
        let _ = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(container);
        Ok(status)
    }
}
