//! zenc core library
//!
//! Answers two questions about a ZFS dataset before a transfer touches it:
//! is native encryption enabled, and is the key currently unloaded. Both
//! depend on a one-shot probe of whether the installed zfs supports native
//! encryption at all.
//!
//! - [`context`]: deadlines and cancellation for external commands
//! - [`tool_runner`]: bounded execution of the zfs binary
//! - [`zfs`]: property queries, capability probe, gates, send preflight
//! - [`config`], [`logging`], [`exit_codes`]: CLI plumbing
//!
//! The binary entry point is in `main.rs`.

pub mod config;
pub mod context;
pub mod exit_codes;
pub mod logging;
pub mod tool_runner;
pub mod zfs;

// Scripted collaborators for unit and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
