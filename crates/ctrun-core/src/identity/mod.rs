//! User identity resolution for user-namespace remapping.
//!
//! Lookups try the local passwd/group files first and fall back to
//! `getent`, so users served by a directory service still resolve. The
//! subordinate UID/GID allocations of the user are read alongside.

pub mod db;
pub mod getent;
pub mod subid;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ctrun_common::config::IdentitySources;
use ctrun_common::error::{CtrunError, LookupKind, Result};

use self::db::{GroupEntry, PasswdEntry};
use crate::idmap::IdMap;

/// A resolved user: numeric IDs plus subordinate ID ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Login name.
    pub username: String,
    /// Primary UID.
    pub uid: u32,
    /// GID of the group named after the user.
    pub gid: u32,
    /// Subordinate UID ranges, container starts contiguous from 0.
    pub sub_uids: Vec<IdMap>,
    /// Subordinate GID ranges, container starts contiguous from 0.
    pub sub_gids: Vec<IdMap>,
}

impl Identity {
    /// Returns `true` if both UID and GID allocations are present.
    #[must_use]
    pub fn has_subordinate_ranges(&self) -> bool {
        !self.sub_uids.is_empty() && !self.sub_gids.is_empty()
    }
}

/// Resolves usernames against the host's identity databases.
#[derive(Debug)]
pub struct IdentityResolver {
    sources: IdentitySources,
    getent: OnceLock<Option<PathBuf>>,
}

impl IdentityResolver {
    /// Creates a resolver reading the given files; `getent` is located lazily.
    #[must_use]
    pub const fn new(sources: IdentitySources) -> Self {
        Self {
            sources,
            getent: OnceLock::new(),
        }
    }

    /// Uses an explicit `getent` binary, or disables the fallback with `None`.
    #[must_use]
    pub fn with_getent(self, binary: Option<PathBuf>) -> Self {
        let getent = OnceLock::new();
        let _ = getent.set(binary);
        Self { getent, ..self }
    }

    /// Resolves a user for namespace remapping.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound`/`GroupNotFound` if either lookup fails in both
    /// the local files and `getent`, and `NoSubordinateRange` if the user has
    /// no subordinate UID or GID allocation.
    pub fn resolve(&self, username: &str) -> Result<Identity> {
        let identity = self.resolve_unmapped(username)?;
        if identity.sub_uids.is_empty() {
            return Err(CtrunError::lookup(
                LookupKind::NoSubordinateRange,
                username,
                format!("no entry in {}", self.sources.subuid.display()),
            ));
        }
        if identity.sub_gids.is_empty() {
            return Err(CtrunError::lookup(
                LookupKind::NoSubordinateRange,
                username,
                format!("no entry in {}", self.sources.subgid.display()),
            ));
        }
        Ok(identity)
    }

    /// Resolves a user without requiring subordinate ranges.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound`/`GroupNotFound` if either lookup fails.
    pub fn resolve_unmapped(&self, username: &str) -> Result<Identity> {
        let user = self.lookup_user(username)?;
        let group = self.lookup_group(username)?;

        let sub_uids = subid::to_ranges(read_allocations(&self.sources.subuid, &user.name, user.uid));
        let sub_gids =
            subid::to_ranges(read_allocations(&self.sources.subgid, &group.name, group.gid));

        tracing::debug!(
            user = %user.name,
            uid = user.uid,
            gid = group.gid,
            uid_ranges = sub_uids.len(),
            gid_ranges = sub_gids.len(),
            "resolved identity"
        );
        Ok(Identity {
            username: user.name,
            uid: user.uid,
            gid: group.gid,
            sub_uids,
            sub_gids,
        })
    }

    /// Looks a user up in the local passwd file, then via `getent passwd`.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if neither source has the user.
    pub fn lookup_user(&self, name: &str) -> Result<PasswdEntry> {
        if let Some(entry) = read_db(&self.sources.passwd, db::parse_passwd)
            .into_iter()
            .find(|e| e.name == name)
        {
            return Ok(entry);
        }
        tracing::debug!(name, "user not in local files, trying getent");
        self.getent_lookup("passwd", name, db::parse_passwd)
            .map_err(|e| CtrunError::lookup(LookupKind::UserNotFound, name, e.to_string()))
    }

    /// Looks a group up in the local group file, then via `getent group`.
    ///
    /// # Errors
    ///
    /// Returns `GroupNotFound` if neither source has the group.
    pub fn lookup_group(&self, name: &str) -> Result<GroupEntry> {
        if let Some(entry) = read_db(&self.sources.group, db::parse_group)
            .into_iter()
            .find(|e| e.name == name)
        {
            return Ok(entry);
        }
        tracing::debug!(name, "group not in local files, trying getent");
        self.getent_lookup("group", name, db::parse_group)
            .map_err(|e| CtrunError::lookup(LookupKind::GroupNotFound, name, e.to_string()))
    }

    fn getent_lookup<T>(&self, database: &str, key: &str, parse: fn(&str) -> Vec<T>) -> Result<T> {
        let binary = self
            .getent
            .get_or_init(getent::find_getent)
            .as_deref()
            .ok_or_else(|| CtrunError::NotFound {
                kind: "binary",
                id: ctrun_common::constants::GETENT_BINARY.to_string(),
            })?;
        let output = getent::query(binary, database, key)?;
        parse(&output)
            .into_iter()
            .next()
            .ok_or_else(|| CtrunError::NotFound {
                kind: "getent entry",
                id: format!("{database} {key}"),
            })
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(IdentitySources::default())
    }
}

fn read_db<T>(path: &Path, parse: fn(&str) -> Vec<T>) -> Vec<T> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse(&content),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "cannot read identity file");
            Vec::new()
        }
    }
}

fn read_allocations(path: &Path, name: &str, id: u32) -> Vec<(u32, u32)> {
    match std::fs::read_to_string(path) {
        Ok(content) => subid::parse_allocations(&content, name, id),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "cannot read subordinate ID file");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        sources: IdentitySources,
    }

    fn fixture(subuid: &str, subgid: &str) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let write = |name: &str, content: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, content).expect("write fixture");
            path
        };
        let sources = IdentitySources {
            passwd: write(
                "passwd",
                "root:x:0:0:root:/root:/bin/sh\nalice:x:1000:1000::/home/alice:/bin/sh\nbob:x:1001:1001::/home/bob:/bin/sh\n",
            ),
            group: write("group", "root:x:0:\nalice:x:1000:\n"),
            subuid: write("subuid", subuid),
            subgid: write("subgid", subgid),
        };
        Fixture { _dir: dir, sources }
    }

    fn resolver(f: &Fixture) -> IdentityResolver {
        IdentityResolver::new(f.sources.clone()).with_getent(None)
    }

    #[test]
    fn resolves_user_with_subordinate_ranges() {
        let f = fixture("alice:100000:65536\n", "alice:100000:65536\n");
        let identity = resolver(&f).resolve("alice").expect("resolve");
        assert_eq!(identity.uid, 1000);
        assert_eq!(identity.gid, 1000);
        assert_eq!(identity.sub_uids, vec![IdMap::new(0, 100_000, 65_536)]);
        assert_eq!(identity.sub_gids, vec![IdMap::new(0, 100_000, 65_536)]);
    }

    #[test]
    fn unknown_user_without_getent_is_user_not_found() {
        let f = fixture("", "");
        let err = resolver(&f).resolve("mallory").unwrap_err();
        assert!(matches!(
            err,
            CtrunError::Lookup {
                kind: LookupKind::UserNotFound,
                ..
            }
        ));
    }

    #[test]
    fn user_without_group_is_group_not_found() {
        let f = fixture("bob:100000:65536\n", "bob:100000:65536\n");
        let err = resolver(&f).resolve("bob").unwrap_err();
        assert!(matches!(
            err,
            CtrunError::Lookup {
                kind: LookupKind::GroupNotFound,
                ..
            }
        ));
    }

    #[test]
    fn missing_subgid_allocation_is_no_subordinate_range() {
        let f = fixture("alice:100000:65536\n", "");
        let err = resolver(&f).resolve("alice").unwrap_err();
        assert!(matches!(
            err,
            CtrunError::Lookup {
                kind: LookupKind::NoSubordinateRange,
                ..
            }
        ));
    }

    #[test]
    fn unmapped_resolution_tolerates_missing_ranges() {
        let f = fixture("", "");
        let identity = resolver(&f).resolve_unmapped("alice").expect("resolve");
        assert!(!identity.has_subordinate_ranges());
    }

    #[test]
    fn missing_identity_files_fall_through_to_lookup_error() {
        let sources = IdentitySources {
            passwd: "/nonexistent/passwd".into(),
            group: "/nonexistent/group".into(),
            subuid: "/nonexistent/subuid".into(),
            subgid: "/nonexistent/subgid".into(),
        };
        let resolver = IdentityResolver::new(sources).with_getent(None);
        assert!(resolver.lookup_user("root").is_err());
    }
}
