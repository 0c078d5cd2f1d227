//! `ctrun --rm <name>`: delete a detached container and its snapshot.

use ctrun_common::config::CtrunConfig;
use ctrun_common::types::ContainerName;
use ctrun_runtime::client::daemon::DaemonClient;
use ctrun_runtime::ops;

/// Deletes the named container.
///
/// # Errors
///
/// Returns an error if the daemon is unreachable, the container does not
/// exist, or it still has a task.
pub fn execute(config: &CtrunConfig, name: &str) -> anyhow::Result<()> {
    let client = DaemonClient::connect(&config.address, &config.namespace)?;
    ops::delete_container(&client, &ContainerName::new(name))?;
    Ok(())
}
