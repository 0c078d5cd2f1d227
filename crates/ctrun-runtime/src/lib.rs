//! Container and task lifecycle management for ctrun.
//!
//! The daemon is reached through the [`client::RuntimeService`] trait, with a
//! Unix-socket JSON-RPC implementation for real use and an in-memory one for
//! tests. [`lifecycle::LifecycleController`] drives a single run;
//! [`ops`] holds the out-of-band stop and delete operations.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cleanup;
pub mod client;
pub mod image;
pub mod lifecycle;
pub mod ops;
pub mod spec;
