//! Task I/O wiring and per-platform task options.

use std::sync::{Arc, Mutex, PoisonError};

use ctrun_core::idmap::RootPair;
use serde::{Deserialize, Serialize};

/// Shared buffer collecting a task's stdout and stderr.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

impl OutputBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes.
    pub fn append(&self, bytes: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
    }

    /// Returns a copy of everything written so far.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns `true` if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }
}

/// Where a task's standard streams go.
#[derive(Debug, Clone, Default)]
pub enum IoSpec {
    /// Discard all output, no stdin.
    #[default]
    Null,
    /// Share this process's stdin, stdout and stderr.
    Inherit,
    /// Capture stdout and stderr into a buffer; stdin is empty.
    Buffered(OutputBuffer),
}

impl IoSpec {
    /// Returns the capture buffer, if output is buffered.
    #[must_use]
    pub const fn buffer(&self) -> Option<&OutputBuffer> {
        match self {
            Self::Buffered(buffer) => Some(buffer),
            Self::Null | Self::Inherit => None,
        }
    }
}

/// Per-platform options for task creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Host UID owning the task's I/O pipes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_uid: Option<u32>,
    /// Host GID owning the task's I/O pipes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_gid: Option<u32>,
}

impl TaskOptions {
    /// Options for a task whose container root maps to `root` on the host.
    ///
    /// Without a user namespace the pipes keep the daemon's ownership.
    #[must_use]
    pub fn for_root(root: Option<RootPair>) -> Self {
        root.map_or_else(Self::default, |r| Self {
            io_uid: Some(r.uid),
            io_gid: Some(r.gid),
        })
    }
}
