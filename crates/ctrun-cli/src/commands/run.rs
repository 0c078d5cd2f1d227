//! Default operation: run one container.

use std::io::Write;

use anyhow::Context;
use ctrun_common::config::CtrunConfig;
use ctrun_common::types::ContainerName;
use ctrun_core::identity::IdentityResolver;
use ctrun_core::idmap::IdMapping;
use ctrun_runtime::client::daemon::DaemonClient;
use ctrun_runtime::client::{IoSpec, OutputBuffer, RuntimeService};
use ctrun_runtime::lifecycle::{LifecycleController, LifecycleState, RunOutcome};

use crate::output;

/// Positional arguments of a run.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    /// User to remap into; `None` runs without a user namespace.
    pub username: Option<String>,
    /// Image reference; `None` uses the configured default.
    pub image: Option<String>,
    /// Command line; `None` starts the image default and detaches.
    pub command: Option<String>,
}

/// Executes a run and returns the exit code to report.
///
/// # Errors
///
/// Returns an error if the user cannot be resolved, the daemon is
/// unreachable, or any lifecycle phase fails.
pub fn execute(config: &CtrunConfig, args: RunArgs) -> anyhow::Result<i32> {
    let mapping = resolve_mapping(config, args.username.as_deref())?;

    let client = DaemonClient::connect(&config.address, &config.namespace)?;
    match client.version() {
        Ok(version) => tracing::info!(version = %version, "runtime daemon"),
        Err(e) => tracing::warn!(error = %e, "could not query daemon version"),
    }

    let name = ContainerName::for_process(&config.name_prefix);
    let image = args.image.unwrap_or_else(|| config.default_image.clone());
    let io = if config.inherit_stdio {
        IoSpec::Inherit
    } else {
        IoSpec::Buffered(OutputBuffer::new())
    };

    let mut controller = LifecycleController::new(&client, name, image)
        .command(args.command)
        .id_mapping(mapping)
        .mounts_file(&config.mounts_file)
        .io(io);
    let outcome = controller.run()?;

    let mut stdout = std::io::stdout().lock();
    output::write_output(&mut stdout, &outcome.output)?;
    stdout.flush()?;

    Ok(exit_code(&outcome))
}

/// Maps a run outcome to the process exit code, logging an exit error.
fn exit_code(outcome: &RunOutcome) -> i32 {
    if outcome.state == LifecycleState::Detached {
        tracing::info!(
            container = %outcome.container,
            "task left running; remove it with --stop and --rm"
        );
        return 0;
    }
    if let Some(error) = &outcome.status.error {
        tracing::error!(
            container = %outcome.container,
            code = outcome.status.code,
            error = %error,
            "container exited with error"
        );
    }
    outcome.status.process_code()
}

fn resolve_mapping(config: &CtrunConfig, username: Option<&str>) -> anyhow::Result<Option<IdMapping>> {
    let Some(username) = username else {
        tracing::warn!("no username given, running without user namespace remapping");
        return Ok(None);
    };
    let identity = IdentityResolver::new(config.identity.clone())
        .resolve(username)
        .with_context(|| format!("cannot remap container into user {username}"))?;
    let mapping = IdMapping::from_identity(&identity)?;
    let root = mapping.root_pair();
    tracing::info!(user = username, root_uid = root.uid, root_gid = root.gid, "user namespace mapping");
    Ok(Some(mapping))
}

#[cfg(test)]
mod tests {
    use ctrun_common::types::ExitStatus;

    use super::*;

    fn outcome(state: LifecycleState, status: ExitStatus) -> RunOutcome {
        RunOutcome {
            container: ContainerName::new("run-7"),
            state,
            status,
            output: Vec::new(),
        }
    }

    #[test]
    fn detached_run_exits_zero() {
        let status = ExitStatus::exited(3);
        assert_eq!(exit_code(&outcome(LifecycleState::Detached, status)), 0);
    }

    #[test]
    fn waited_run_reports_task_code() {
        let status = ExitStatus::exited(3);
        assert_eq!(exit_code(&outcome(LifecycleState::Cleaned, status)), 3);
    }

    #[test]
    fn exit_error_keeps_task_code() {
        let status = ExitStatus {
            error: Some("exit event lost".into()),
            ..ExitStatus::exited(255)
        };
        assert_eq!(exit_code(&outcome(LifecycleState::Cleaned, status)), 255);
    }
}
