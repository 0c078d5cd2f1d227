//! Image descriptors as reported by the daemon.

use serde::{Deserialize, Serialize};

/// Options for pulling an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullOptions {
    /// Unpack layers into the snapshotter after fetching.
    pub unpack: bool,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self { unpack: true }
    }
}

/// Runtime defaults baked into an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    /// Entrypoint argv prefix.
    #[serde(default)]
    pub entrypoint: Vec<String>,
    /// Default command appended to the entrypoint.
    #[serde(default)]
    pub cmd: Vec<String>,
    /// `KEY=value` environment entries.
    #[serde(default)]
    pub env: Vec<String>,
    /// Working directory; empty means `/`.
    #[serde(default)]
    pub working_dir: String,
}

impl ImageConfig {
    /// Default process arguments: entrypoint followed by cmd.
    #[must_use]
    pub fn default_args(&self) -> Vec<String> {
        self.entrypoint.iter().chain(&self.cmd).cloned().collect()
    }
}

/// An image known to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Fully qualified reference, e.g. `docker.io/library/alpine:latest`.
    pub name: String,
    /// Manifest digest.
    pub digest: String,
    /// Runtime defaults.
    #[serde(default)]
    pub config: ImageConfig,
}

impl Image {
    /// Creates an image with an empty config.
    #[must_use]
    pub fn new(name: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            digest: digest.into(),
            config: ImageConfig::default(),
        }
    }

    /// Replaces the image config.
    #[must_use]
    pub fn with_config(mut self, config: ImageConfig) -> Self {
        self.config = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_args_join_entrypoint_and_cmd() {
        let config = ImageConfig {
            entrypoint: vec!["/docker-entrypoint.sh".into()],
            cmd: vec!["nginx".into(), "-g".into()],
            ..ImageConfig::default()
        };
        assert_eq!(config.default_args(), vec!["/docker-entrypoint.sh", "nginx", "-g"]);
    }

    #[test]
    fn pull_unpacks_by_default() {
        assert!(PullOptions::default().unpack);
    }

    #[test]
    fn image_config_deserializes_with_missing_fields() {
        let image: Image =
            serde_json::from_str(r#"{"name":"alpine","digest":"sha256:00","config":{"cmd":["/bin/sh"]}}"#)
                .unwrap();
        assert_eq!(image.config.cmd, vec!["/bin/sh"]);
        assert!(image.config.entrypoint.is_empty());
    }
}
