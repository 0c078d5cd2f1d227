//! One-shot exit notification.
//!
//! The daemon side produces exactly one [`ExitStatus`] per subscription and
//! the waiter consumes it exactly once. A notifier dropped without sending
//! surfaces as an error on the waiting side instead of a hang.

use std::sync::mpsc::{self, Receiver, SyncSender};

use ctrun_common::error::{CtrunError, Result};
use ctrun_common::types::{ContainerName, ExitStatus};

/// Sending half: delivers the exit status once.
#[derive(Debug)]
pub struct ExitNotifier {
    tx: SyncSender<ExitStatus>,
}

impl ExitNotifier {
    /// Delivers the exit status. A waiter that already went away is ignored.
    pub fn notify(self, status: ExitStatus) {
        let _ = self.tx.send(status);
    }
}

/// Receiving half: blocks until the task exits.
#[derive(Debug)]
pub struct ExitWaiter {
    container: ContainerName,
    rx: Receiver<ExitStatus>,
}

impl ExitWaiter {
    /// Creates a connected notifier/waiter pair for a container's task.
    #[must_use]
    pub fn channel(container: ContainerName) -> (ExitNotifier, Self) {
        let (tx, rx) = mpsc::sync_channel(1);
        (ExitNotifier { tx }, Self { container, rx })
    }

    /// Container whose task is being waited on.
    #[must_use]
    pub const fn container(&self) -> &ContainerName {
        &self.container
    }

    /// Blocks until the exit status arrives. There is no timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the notifier was dropped without delivering.
    pub fn wait(self) -> Result<ExitStatus> {
        self.rx.recv().map_err(|_| CtrunError::Rpc {
            method: "task.wait".into(),
            message: format!(
                "exit notification channel closed for container {}",
                self.container
            ),
        })
    }
}
