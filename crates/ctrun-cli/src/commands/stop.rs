//! `ctrun --stop <name>`: kill and remove a detached container's task.

use ctrun_common::config::CtrunConfig;
use ctrun_common::types::ContainerName;
use ctrun_runtime::client::daemon::DaemonClient;
use ctrun_runtime::ops;

/// Stops the named container's task.
///
/// # Errors
///
/// Returns an error if the daemon is unreachable, the container does not
/// exist, or the task cannot be stopped.
pub fn execute(config: &CtrunConfig, name: &str) -> anyhow::Result<()> {
    let client = DaemonClient::connect(&config.address, &config.namespace)?;
    let name = ContainerName::new(name);
    ops::stop_container(&client, &name)?;
    tracing::info!(container = %name, "task stopped");
    Ok(())
}
