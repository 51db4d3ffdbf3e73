//! zfs command-line integration.
//!
//! - [`get`]: property queries (`zfs get`)
//! - [`capability`]: one-shot detection of native-encryption CLI support
//! - [`encryption`]: the encryption and key-status gates
//! - [`preflight`]: send preflight built on the key-status gate

pub mod capability;
pub mod encryption;
pub mod get;
pub mod preflight;

pub use capability::{
    CapabilityProber, CapabilityState, FeatureDetector, KeyVocabularyDetector, OverrideSource,
    ProbeFailure, VersionDetector, ENCRYPTION_CLI_OVERRIDE_ENV,
};
pub use encryption::{EncryptionGate, EncryptionStatus, GateError, GateOp, KeyLoadStatus, Violation};
pub use get::{parse_get_output, ParseError, PropertyQuery, QueryError, ZfsGet};
pub use preflight::{AllowReason, SendDecision, SendPreflight};

use crate::context::QueryContext;
use crate::tool_runner::{CommandRunner, ToolError, ToolOutput, ToolSpec};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default name of the zfs binary, resolved through PATH.
pub const DEFAULT_ZFS_BINARY: &str = "zfs";

/// Builds and runs zfs invocations through a [`CommandRunner`].
#[derive(Clone)]
pub struct ZfsCli {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    timeout: Option<Duration>,
}

impl ZfsCli {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
            timeout: None,
        }
    }

    /// Per-invocation timeout; the runner default applies when unset.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn run(&self, ctx: &QueryContext, args: Vec<String>) -> Result<ToolOutput, ToolError> {
        let mut spec = ToolSpec::new(self.binary.clone(), args);
        if let Some(timeout) = self.timeout {
            spec = spec.with_timeout(timeout);
        }
        self.runner.run(ctx, &spec)
    }
}

impl fmt::Debug for ZfsCli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZfsCli")
            .field("binary", &self.binary)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
