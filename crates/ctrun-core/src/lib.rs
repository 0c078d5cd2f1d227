//! # ctrun-core
//!
//! Host-side primitives that a run needs before it talks to the daemon:
//! - **Identity**: user/group lookup with a `getent` fallback, plus
//!   subordinate UID/GID allocations.
//! - **ID mapping**: container-to-host UID/GID tables and the root pair.
//! - **Mounts**: the line-oriented extra bind-mount declaration file.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod identity;
pub mod idmap;
pub mod mounts;
