//! User-namespace ID mapping.
//!
//! An [`IdMapping`] holds the tables mapping in-container UIDs/GIDs to host
//! IDs. The same
//! mapping feeds two consumers that must agree with each other: the runtime
//! spec (namespace mapping tables) and the snapshot request (host owner of the
//! root filesystem, the [`RootPair`]).

use ctrun_common::error::{CtrunError, LookupKind, Result};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// One contiguous range of a UID or GID mapping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdMap {
    /// First ID of the range inside the container.
    #[serde(rename = "containerID")]
    pub container_id: u32,
    /// First ID of the range on the host.
    #[serde(rename = "hostID")]
    pub host_id: u32,
    /// Number of IDs in the range.
    pub size: u32,
}

impl IdMap {
    /// Creates a mapping range.
    #[must_use]
    pub const fn new(container_id: u32, host_id: u32, size: u32) -> Self {
        Self {
            container_id,
            host_id,
            size,
        }
    }

    fn host_for(&self, container_id: u32) -> Option<u32> {
        let offset = container_id.checked_sub(self.container_id)?;
        if offset >= self.size {
            return None;
        }
        self.host_id.checked_add(offset)
    }
}

/// Host UID/GID that container ID 0 maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RootPair {
    /// Host UID of container root.
    pub uid: u32,
    /// Host GID of container root.
    pub gid: u32,
}

/// UID and GID mapping tables for a user namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMapping {
    uids: Vec<IdMap>,
    gids: Vec<IdMap>,
    root: RootPair,
}

impl IdMapping {
    /// Builds a mapping from explicit tables.
    ///
    /// # Errors
    ///
    /// Returns a `NoSubordinateRange` lookup error if either table is empty,
    /// or a configuration error if container ID 0 is not covered.
    pub fn new(uids: Vec<IdMap>, gids: Vec<IdMap>) -> Result<Self> {
        if uids.is_empty() || gids.is_empty() {
            return Err(CtrunError::lookup(
                LookupKind::NoSubordinateRange,
                "",
                "both UID and GID mapping tables must be non-empty",
            ));
        }
        let root = RootPair {
            uid: to_host(0, &uids)?,
            gid: to_host(0, &gids)?,
        };
        Ok(Self { uids, gids, root })
    }

    /// Builds the mapping for a resolved identity's subordinate ranges.
    ///
    /// # Errors
    ///
    /// Returns a `NoSubordinateRange` lookup error naming the user if the
    /// identity has no UID or no GID ranges.
    pub fn from_identity(identity: &Identity) -> Result<Self> {
        if !identity.has_subordinate_ranges() {
            return Err(CtrunError::lookup(
                LookupKind::NoSubordinateRange,
                &identity.username,
                "no subordinate UID/GID allocation",
            ));
        }
        Self::new(identity.sub_uids.clone(), identity.sub_gids.clone())
    }

    /// UID mapping table.
    #[must_use]
    pub fn uids(&self) -> &[IdMap] {
        &self.uids
    }

    /// GID mapping table.
    #[must_use]
    pub fn gids(&self) -> &[IdMap] {
        &self.gids
    }

    /// Host UID/GID of container root.
    #[must_use]
    pub const fn root_pair(&self) -> RootPair {
        self.root
    }
}

fn to_host(container_id: u32, maps: &[IdMap]) -> Result<u32> {
    maps.iter()
        .find_map(|m| m.host_for(container_id))
        .ok_or_else(|| CtrunError::Config {
            message: format!("container ID {container_id} cannot be mapped to a host ID"),
        })
}
