//! Live-send preflight.
//!
//! A live (non-raw) `zfs send` from a dataset whose key is unloaded must not
//! be started. Raw sends carry ciphertext and never need the key.

use super::encryption::{EncryptionGate, EncryptionStatus, GateError, KeyLoadStatus};
use crate::context::QueryContext;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Why a send was allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowReason {
    RawSend,
    CapabilityAbsent,
    NotEncrypted,
    KeyLoaded,
}

/// Outcome of [`SendPreflight::check_live_send`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum SendDecision {
    Allowed { reason: AllowReason },
    Blocked { dataset: String },
}

impl SendDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, SendDecision::Allowed { .. })
    }

    /// Converts a block into [`zenc_common::Error::KeyNotLoaded`].
    pub fn into_result(self) -> zenc_common::Result<AllowReason> {
        match self {
            SendDecision::Allowed { reason } => Ok(reason),
            SendDecision::Blocked { dataset } => Err(zenc_common::Error::KeyNotLoaded { dataset }),
        }
    }
}

/// Decides whether a send may start.
#[derive(Debug, Clone)]
pub struct SendPreflight {
    gate: Arc<EncryptionGate>,
}

impl SendPreflight {
    pub fn new(gate: Arc<EncryptionGate>) -> Self {
        Self { gate }
    }

    /// Raw sends are always allowed. A live send is blocked only when the
    /// dataset is encrypted and its key is confirmed unloaded.
    ///
    /// `keystatus` is only consulted for encrypted datasets; zfs reports it
    /// as `-` on unencrypted ones.
    #[instrument(skip(self, ctx))]
    pub fn check_live_send(
        &self,
        ctx: &QueryContext,
        dataset: &str,
        raw: bool,
    ) -> Result<SendDecision, GateError> {
        if raw {
            return Ok(SendDecision::Allowed {
                reason: AllowReason::RawSend,
            });
        }

        let reason = match self.gate.encryption_status(ctx, dataset)? {
            EncryptionStatus::Unsupported => AllowReason::CapabilityAbsent,
            EncryptionStatus::Disabled => AllowReason::NotEncrypted,
            EncryptionStatus::Enabled { .. } => match self.gate.key_status(ctx, dataset)? {
                KeyLoadStatus::CapabilityAbsent => AllowReason::CapabilityAbsent,
                KeyLoadStatus::Loaded => AllowReason::KeyLoaded,
                KeyLoadStatus::Unloaded => {
                    info!(dataset, "live send blocked: key not loaded");
                    return Ok(SendDecision::Blocked {
                        dataset: dataset.to_string(),
                    });
                }
            },
        };
        Ok(SendDecision::Allowed { reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockQuery, MockRunner, Reply};
    use crate::zfs::capability::{CapabilityProber, OverrideSource};
    use crate::zfs::ZfsCli;

    fn preflight(forced: Option<bool>, query: Arc<MockQuery>) -> SendPreflight {
        let runner = Arc::new(MockRunner::new().on("load-key", Reply::exit(2).stderr("load-key keylocation")));
        let prober = Arc::new(
            CapabilityProber::new(ZfsCli::new(runner, "zfs")).with_override(OverrideSource::Fixed(forced)),
        );
        SendPreflight::new(Arc::new(EncryptionGate::new(prober, query)))
    }

    #[test]
    fn test_raw_send_skips_checks() {
        let query = Arc::new(MockQuery::new().failing("should not run"));
        let decision = preflight(None, Arc::clone(&query))
            .check_live_send(&QueryContext::background(), "tank/secret", true)
            .unwrap();
        assert_eq!(
            decision,
            SendDecision::Allowed {
                reason: AllowReason::RawSend
            }
        );
        assert_eq!(query.call_count(), 0);
    }

    #[test]
    fn test_unloaded_key_blocks_live_send() {
        let query = Arc::new(
            MockQuery::new()
                .with("encryption", "aes-256-gcm")
                .with("keystatus", "unavailable"),
        );
        let decision = preflight(None, query)
            .check_live_send(&QueryContext::background(), "tank/secret", false)
            .unwrap();
        assert!(!decision.is_allowed());

        let err = decision.into_result().unwrap_err();
        assert_eq!(err.code(), 70);
    }

    #[test]
    fn test_loaded_key_allows_live_send() {
        let query = Arc::new(
            MockQuery::new()
                .with("encryption", "aes-256-gcm")
                .with("keystatus", "available"),
        );
        let decision = preflight(None, query)
            .check_live_send(&QueryContext::background(), "tank/secret", false)
            .unwrap();
        assert_eq!(decision.into_result().unwrap(), AllowReason::KeyLoaded);
    }

    #[test]
    fn test_unencrypted_dataset_never_reads_keystatus() {
        let query = Arc::new(MockQuery::new().with("encryption", "off").with("keystatus", "-"));
        let decision = preflight(None, Arc::clone(&query))
            .check_live_send(&QueryContext::background(), "tank/plain", false)
            .unwrap();
        assert_eq!(
            decision,
            SendDecision::Allowed {
                reason: AllowReason::NotEncrypted
            }
        );
        assert_eq!(query.call_count(), 1);
    }

    #[test]
    fn test_capability_absent_allows() {
        let query = Arc::new(MockQuery::new());
        let decision = preflight(Some(false), Arc::clone(&query))
            .check_live_send(&QueryContext::background(), "tank/secret", false)
            .unwrap();
        assert_eq!(
            decision,
            SendDecision::Allowed {
                reason: AllowReason::CapabilityAbsent
            }
        );
        assert_eq!(query.call_count(), 0);
    }

    #[test]
    fn test_gate_errors_propagate() {
        let query = Arc::new(MockQuery::new().with("encryption", "aes-256-gcm").with("keystatus", "bogus"));
        let err = preflight(None, query)
            .check_live_send(&QueryContext::background(), "tank/secret", false)
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
