//! OCI runtime spec construction.
//!
//! [`SpecBuilder`] combines image defaults, an optional command override, an
//! optional user-namespace mapping and the extra bind mounts into one
//! immutable [`RuntimeSpec`]. Construction is pure.

use ctrun_common::constants::{DEFAULT_PATH_ENV, OCI_VERSION};
use ctrun_core::idmap::{IdMap, IdMapping, RootPair};
use ctrun_core::mounts::MountDecl;
use serde::{Deserialize, Serialize};

use crate::image::Image;

/// OCI runtime configuration for one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSpec {
    /// Runtime-spec version.
    pub oci_version: String,
    /// Process to run.
    pub process: Process,
    /// Root filesystem, relative to the bundle.
    pub root: Root,
    /// Container hostname.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    /// Mount table, in mount order.
    pub mounts: Vec<Mount>,
    /// Linux-specific settings.
    pub linux: Linux,
}

impl RuntimeSpec {
    /// Returns `true` if the spec asks for a user namespace.
    #[must_use]
    pub fn has_user_namespace(&self) -> bool {
        self.linux
            .namespaces
            .iter()
            .any(|ns| ns.ns_type == NamespaceType::User)
    }

    /// Host UID/GID that container root maps to under this spec, if namespaced.
    #[must_use]
    pub fn user_namespace_root(&self) -> Option<RootPair> {
        if !self.has_user_namespace() {
            return None;
        }
        IdMapping::new(self.linux.uid_mappings.clone(), self.linux.gid_mappings.clone())
            .ok()
            .map(|m| m.root_pair())
    }
}

/// Process section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    /// Allocate a terminal.
    pub terminal: bool,
    /// User the process runs as, inside the container.
    pub user: User,
    /// Argument vector.
    pub args: Vec<String>,
    /// `KEY=value` environment.
    pub env: Vec<String>,
    /// Working directory.
    pub cwd: String,
}

/// Process user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// UID inside the container.
    pub uid: u32,
    /// GID inside the container.
    pub gid: u32,
}

/// Root filesystem section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    /// Path relative to the bundle.
    pub path: String,
    /// Mount the root read-only.
    pub readonly: bool,
}

/// One mount table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Path inside the container.
    pub destination: String,
    /// Filesystem type.
    #[serde(rename = "type")]
    pub mount_type: String,
    /// Source device or path.
    pub source: String,
    /// Mount options.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Mount {
    fn new(destination: &str, mount_type: &str, source: &str, options: &[&str]) -> Self {
        Self {
            destination: destination.to_string(),
            mount_type: mount_type.to_string(),
            source: source.to_string(),
            options: options.iter().map(|o| (*o).to_string()).collect(),
        }
    }
}

impl From<MountDecl> for Mount {
    fn from(decl: MountDecl) -> Self {
        let decl = decl.with_option("rbind");
        Self {
            destination: decl.destination,
            mount_type: decl.mount_type,
            source: decl.source,
            options: decl.options,
        }
    }
}

/// Linux section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Linux {
    /// Namespaces to create.
    pub namespaces: Vec<Namespace>,
    /// UID mappings for the user namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uid_mappings: Vec<IdMap>,
    /// GID mappings for the user namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gid_mappings: Vec<IdMap>,
}

/// A namespace to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace kind.
    #[serde(rename = "type")]
    pub ns_type: NamespaceType,
}

/// Namespace kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    /// PID namespace.
    Pid,
    /// Network namespace.
    Network,
    /// IPC namespace.
    Ipc,
    /// UTS namespace.
    Uts,
    /// Mount namespace.
    Mount,
    /// User namespace.
    User,
}

const DEFAULT_NAMESPACES: [NamespaceType; 5] = [
    NamespaceType::Pid,
    NamespaceType::Ipc,
    NamespaceType::Uts,
    NamespaceType::Mount,
    NamespaceType::Network,
];

/// Splits a command line on whitespace.
///
/// There is no quoting or escaping: `sh -c "echo hi"` becomes
/// `["sh", "-c", "\"echo", "hi\""]`.
#[must_use]
pub fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// Builder for a [`RuntimeSpec`].
#[derive(Debug)]
pub struct SpecBuilder<'a> {
    image: &'a Image,
    args: Option<Vec<String>>,
    id_mapping: Option<&'a IdMapping>,
    mounts: Vec<MountDecl>,
    hostname: String,
}

impl<'a> SpecBuilder<'a> {
    /// Starts from the image's defaults.
    #[must_use]
    pub const fn new(image: &'a Image) -> Self {
        Self {
            image,
            args: None,
            id_mapping: None,
            mounts: Vec::new(),
            hostname: String::new(),
        }
    }

    /// Overrides the image's default arguments with a whitespace-split command.
    ///
    /// A blank command keeps the image defaults.
    #[must_use]
    pub fn command(mut self, command: &str) -> Self {
        let args = split_command(command);
        if !args.is_empty() {
            self.args = Some(args);
        }
        self
    }

    /// Runs the container in a user namespace with this mapping.
    #[must_use]
    pub fn id_mapping(mut self, mapping: &'a IdMapping) -> Self {
        self.id_mapping = Some(mapping);
        self
    }

    /// Appends extra bind mounts after the default mounts.
    #[must_use]
    pub fn mounts(mut self, mounts: impl IntoIterator<Item = MountDecl>) -> Self {
        self.mounts.extend(mounts);
        self
    }

    /// Sets the container hostname.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Produces the spec.
    #[must_use]
    pub fn build(self) -> RuntimeSpec {
        let config = &self.image.config;

        let args = self.args.unwrap_or_else(|| {
            let defaults = config.default_args();
            if defaults.is_empty() {
                vec!["/bin/sh".to_string()]
            } else {
                defaults
            }
        });

        let mut env = config.env.clone();
        if !env.iter().any(|e| e.starts_with("PATH=")) {
            env.push(DEFAULT_PATH_ENV.to_string());
        }

        let cwd = if config.working_dir.is_empty() {
            "/".to_string()
        } else {
            config.working_dir.clone()
        };

        let mut linux = Linux {
            namespaces: DEFAULT_NAMESPACES
                .iter()
                .map(|&ns_type| Namespace { ns_type })
                .collect(),
            ..Linux::default()
        };
        if let Some(mapping) = self.id_mapping {
            linux.namespaces.push(Namespace {
                ns_type: NamespaceType::User,
            });
            linux.uid_mappings = mapping.uids().to_vec();
            linux.gid_mappings = mapping.gids().to_vec();
        }

        let mut mounts = default_mounts(self.id_mapping.is_some());
        mounts.extend(self.mounts.into_iter().map(Mount::from));

        RuntimeSpec {
            oci_version: OCI_VERSION.to_string(),
            process: Process {
                terminal: false,
                user: User::default(),
                args,
                env,
                cwd,
            },
            root: Root {
                path: "rootfs".to_string(),
                readonly: false,
            },
            hostname: self.hostname,
            mounts,
            linux,
        }
    }
}

// A user-namespaced process cannot mount a fresh sysfs, so it gets the host's
// read-only instead.
fn default_mounts(user_namespace: bool) -> Vec<Mount> {
    let sys = if user_namespace {
        Mount::new("/sys", "none", "/sys", &["rbind", "nosuid", "noexec", "nodev", "ro"])
    } else {
        Mount::new("/sys", "sysfs", "sysfs", &["nosuid", "noexec", "nodev", "ro"])
    };
    vec![
        Mount::new("/proc", "proc", "proc", &["nosuid", "noexec", "nodev"]),
        Mount::new("/dev", "tmpfs", "tmpfs", &["nosuid", "strictatime", "mode=755", "size=65536k"]),
        Mount::new(
            "/dev/pts",
            "devpts",
            "devpts",
            &["nosuid", "noexec", "newinstance", "ptmxmode=0666", "mode=0620"],
        ),
        Mount::new("/dev/shm", "tmpfs", "shm", &["nosuid", "noexec", "nodev", "mode=1777", "size=65536k"]),
        Mount::new("/dev/mqueue", "mqueue", "mqueue", &["nosuid", "noexec", "nodev"]),
        sys,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageConfig;

    fn alpine() -> Image {
        Image::new("docker.io/library/alpine:latest", "sha256:abc").with_config(ImageConfig {
            cmd: vec!["/bin/sh".into()],
            env: vec!["PATH=/bin".into()],
            ..ImageConfig::default()
        })
    }

    fn mapping() -> IdMapping {
        let range = IdMap::new(0, 100_000, 65_536);
        IdMapping::new(vec![range], vec![range]).unwrap()
    }

    #[test]
    fn command_replaces_image_default_args() {
        let image = alpine();
        let spec = SpecBuilder::new(&image).command("echo hello world").build();
        assert_eq!(spec.process.args, vec!["echo", "hello", "world"]);
    }

    #[test]
    fn blank_command_keeps_image_defaults() {
        let image = alpine();
        let spec = SpecBuilder::new(&image).command("   ").build();
        assert_eq!(spec.process.args, vec!["/bin/sh"]);
    }

    #[test]
    fn image_without_args_falls_back_to_shell() {
        let image = Image::new("scratch", "sha256:0");
        let spec = SpecBuilder::new(&image).build();
        assert_eq!(spec.process.args, vec!["/bin/sh"]);
        assert_eq!(spec.process.cwd, "/");
    }

    #[test]
    fn default_path_added_only_when_missing() {
        let image = alpine();
        let spec = SpecBuilder::new(&image).build();
        assert_eq!(spec.process.env, vec!["PATH=/bin"]);

        let bare = Image::new("scratch", "sha256:0");
        let spec = SpecBuilder::new(&bare).build();
        assert_eq!(spec.process.env, vec![DEFAULT_PATH_ENV]);
    }

    #[test]
    fn split_command_has_no_quoting() {
        assert_eq!(
            split_command("sh -c \"echo hi\""),
            vec!["sh", "-c", "\"echo", "hi\""]
        );
    }

    #[test]
    fn no_mapping_means_no_user_namespace() {
        let image = alpine();
        let spec = SpecBuilder::new(&image).build();
        assert!(!spec.has_user_namespace());
        assert!(spec.user_namespace_root().is_none());
        assert!(spec.linux.uid_mappings.is_empty());
    }

    #[test]
    fn mapping_adds_user_namespace_and_tables() {
        let image = alpine();
        let mapping = mapping();
        let spec = SpecBuilder::new(&image).id_mapping(&mapping).build();

        assert!(spec.has_user_namespace());
        assert_eq!(spec.linux.uid_mappings, vec![IdMap::new(0, 100_000, 65_536)]);
        assert_eq!(spec.linux.gid_mappings, vec![IdMap::new(0, 100_000, 65_536)]);
        assert_eq!(spec.user_namespace_root(), Some(mapping.root_pair()));
    }

    #[test]
    fn namespaced_spec_binds_host_sys() {
        let image = alpine();
        let mapping = mapping();
        let spec = SpecBuilder::new(&image).id_mapping(&mapping).build();
        let sys = spec.mounts.iter().find(|m| m.destination == "/sys").unwrap();
        assert_eq!(sys.source, "/sys");
        assert!(sys.options.contains(&"rbind".to_string()));
    }

    #[test]
    fn extra_mounts_follow_defaults_in_order_with_rbind() {
        let image = alpine();
        let spec = SpecBuilder::new(&image)
            .mounts(vec![
                MountDecl::new("/etc/hosts", "bind", "/etc/hosts"),
                MountDecl::new("/data", "bind", "/srv/data"),
            ])
            .build();

        let tail: Vec<&Mount> = spec.mounts.iter().rev().take(2).rev().collect();
        assert_eq!(tail[0].destination, "/etc/hosts");
        assert_eq!(tail[1].destination, "/data");
        assert_eq!(tail[1].source, "/srv/data");
        assert_eq!(tail[1].options, vec!["rbind"]);
    }

    #[test]
    fn spec_serializes_oci_field_names() {
        let image = alpine();
        let mapping = mapping();
        let spec = SpecBuilder::new(&image).id_mapping(&mapping).hostname("run-1").build();
        let json = serde_json::to_value(&spec).unwrap();

        assert_eq!(json["ociVersion"], OCI_VERSION);
        assert_eq!(json["hostname"], "run-1");
        assert_eq!(json["linux"]["uidMappings"][0]["hostID"], 100_000);
        assert_eq!(json["mounts"][0]["type"], "proc");
        assert!(
            json["linux"]["namespaces"]
                .as_array()
                .unwrap()
                .iter()
                .any(|ns| ns["type"] == "user")
        );
    }
}
