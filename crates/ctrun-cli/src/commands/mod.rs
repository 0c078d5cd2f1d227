//! CLI argument definitions and dispatch.

pub mod rm;
pub mod run;
pub mod stop;

use std::path::PathBuf;

use clap::Parser;
use ctrun_common::config::CtrunConfig;
use ctrun_common::constants::{
    DEFAULT_ADDRESS, DEFAULT_MOUNTS_FILE, DEFAULT_NAMESPACE, DEFAULT_NAME_PREFIX,
};

/// ctrun: run one container on a containerd-style runtime daemon.
///
/// Without a command the image's default process is started and left
/// running; with a command, ctrun waits for it, removes the container and
/// exits with the command's exit code.
#[derive(Parser, Debug)]
#[command(name = "ctrun", version, about, long_about = None)]
pub struct Cli {
    /// User whose subordinate UID/GID ranges the container is remapped into.
    pub username: Option<String>,

    /// Image reference.
    pub image: Option<String>,

    /// Command to run, split on whitespace (no quoting).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// Runtime daemon socket.
    #[arg(long, env = "CTRUN_ADDRESS", default_value = DEFAULT_ADDRESS)]
    pub address: PathBuf,

    /// Daemon namespace for all created resources.
    #[arg(long, env = "CTRUN_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Extra bind-mount declaration file (`destination:type:source` per line).
    #[arg(long, default_value = DEFAULT_MOUNTS_FILE)]
    pub mounts: PathBuf,

    /// Prefix of the container name (`<prefix>-<pid>`).
    #[arg(long, default_value = DEFAULT_NAME_PREFIX)]
    pub name_prefix: String,

    /// Attach the task to this terminal instead of capturing its output.
    #[arg(long)]
    pub inherit_stdio: bool,

    /// Kill and remove the task of a container left by a detached run.
    #[arg(long, value_name = "NAME", conflicts_with = "rm")]
    pub stop: Option<String>,

    /// Remove a container (and its snapshot) left by a detached run.
    #[arg(long, value_name = "NAME")]
    pub rm: Option<String>,
}

impl Cli {
    /// Overlays the parsed flags on the default configuration.
    #[must_use]
    pub fn config(&self) -> CtrunConfig {
        CtrunConfig {
            address: self.address.clone(),
            namespace: self.namespace.clone(),
            mounts_file: self.mounts.clone(),
            name_prefix: self.name_prefix.clone(),
            inherit_stdio: self.inherit_stdio,
            ..CtrunConfig::default()
        }
    }

    /// The command line, or `None` for a detached run.
    ///
    /// A blank command (e.g. `""`) counts as no command.
    #[must_use]
    pub fn command_line(&self) -> Option<String> {
        let line = self.command.join(" ");
        if line.trim().is_empty() {
            return None;
        }
        Some(line)
    }
}

/// Dispatches the parsed CLI to its handler, returning the process exit code.
///
/// # Errors
///
/// Returns an error if the selected operation fails.
pub fn execute(cli: Cli) -> anyhow::Result<i32> {
    let config = cli.config();
    if let Some(name) = &cli.stop {
        stop::execute(&config, name)?;
        return Ok(0);
    }
    if let Some(name) = &cli.rm {
        rm::execute(&config, name)?;
        return Ok(0);
    }

    let args = run::RunArgs {
        command: cli.command_line(),
        username: cli.username,
        image: cli.image,
    };
    run::execute(&config, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ctrun").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn bare_invocation_is_detached_default_run() {
        let cli = parse(&[]);
        assert!(cli.username.is_none());
        assert!(cli.image.is_none());
        assert!(cli.command_line().is_none());
    }

    #[test]
    fn trailing_words_form_the_command() {
        let cli = parse(&["alice", "docker.io/library/busybox:latest", "echo", "hello", "world"]);
        assert_eq!(cli.username.as_deref(), Some("alice"));
        assert_eq!(cli.image.as_deref(), Some("docker.io/library/busybox:latest"));
        assert_eq!(cli.command_line().as_deref(), Some("echo hello world"));
    }

    #[test]
    fn command_may_carry_flags() {
        let cli = parse(&["alice", "alpine", "ls", "-la", "/"]);
        assert_eq!(cli.command_line().as_deref(), Some("ls -la /"));
    }

    #[test]
    fn blank_command_is_detached() {
        let cli = parse(&["alice", "alpine", "", " "]);
        assert!(cli.command_line().is_none());
    }

    #[test]
    fn flags_override_config() {
        let cli = parse(&[
            "--address",
            "/tmp/daemon.sock",
            "--namespace",
            "test",
            "--mounts",
            "/etc/ctrun/mounts",
            "--name-prefix",
            "job",
            "--inherit-stdio",
        ]);
        let config = cli.config();
        assert_eq!(config.address, PathBuf::from("/tmp/daemon.sock"));
        assert_eq!(config.namespace, "test");
        assert_eq!(config.mounts_file, PathBuf::from("/etc/ctrun/mounts"));
        assert_eq!(config.name_prefix, "job");
        assert!(config.inherit_stdio);
        assert_eq!(config.default_image, "docker.io/library/alpine:latest");
    }

    #[test]
    fn stop_and_rm_conflict() {
        let result =
            Cli::try_parse_from(["ctrun", "--stop", "run-1", "--rm", "run-1"]);
        assert!(result.is_err());
    }

    #[test]
    fn stop_takes_a_container_name() {
        let cli = parse(&["--stop", "run-42"]);
        assert_eq!(cli.stop.as_deref(), Some("run-42"));
    }
}
