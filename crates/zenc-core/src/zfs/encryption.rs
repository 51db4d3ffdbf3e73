//! Encryption and key-status gates.
//!
//! Two questions higher-level transfer logic asks before touching a dataset:
//!
//! - Is native encryption enabled on it?
//! - Is its key currently unloaded?
//!
//! Both short-circuit to `false` when the installed zfs has no encryption
//! support at all. For the key check this means "assume loaded", which
//! never blocks a transfer on a system without encryption.
//!
//! Values zfs documents as impossible (no value at all, or an unknown
//! `keystatus`) are reported as [`GateError::Fatal`] instead of an ordinary
//! failure so callers cannot mistake them for transient errors.

use super::capability::{CapabilityProber, ProbeFailure};
use super::get::{PropertyQuery, QueryError};
use crate::context::QueryContext;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};
use zenc_common::{DatasetName, DatasetNameError, SourceAuthority};

const ENCRYPTION_PROPERTY: &str = "encryption";
const KEYSTATUS_PROPERTY: &str = "keystatus";

/// Which gate produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOp {
    EncryptionEnabled,
    KeyUnloaded,
}

impl fmt::Display for GateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateOp::EncryptionEnabled => write!(f, "zfs get encryption enabled"),
            GateOp::KeyUnloaded => write!(f, "zfs get key loaded"),
        }
    }
}

/// Recoverable reasons a gate could not answer.
#[derive(Debug, Error)]
pub enum GateCause {
    #[error("invalid dataset name: {0}")]
    InvalidName(#[source] DatasetNameError),

    #[error(transparent)]
    Capability(ProbeFailure),

    #[error("cannot get `{property}` property: {source}")]
    Query {
        property: &'static str,
        #[source]
        source: QueryError,
    },

    #[error("`{property}` property should never be \"-\"")]
    DataIntegrity { property: &'static str },
}

/// zfs reported a state outside its documented contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("zfs get should return a value for `{property}`")]
    EmptyValue { property: &'static str },

    #[error("unknown key status {value:?}")]
    UnknownKeyStatus { value: String },
}

/// Error from a gate, tagged with the operation and dataset.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("{op} fs={dataset:?}: {cause}")]
    Failed {
        op: GateOp,
        dataset: String,
        #[source]
        cause: GateCause,
    },

    #[error("{op} fs={dataset:?}: fatal: {violation}")]
    Fatal {
        op: GateOp,
        dataset: String,
        #[source]
        violation: Violation,
    },
}

impl GateError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, GateError::Fatal { .. })
    }

    pub fn op(&self) -> GateOp {
        match self {
            GateError::Failed { op, .. } | GateError::Fatal { op, .. } => *op,
        }
    }

    pub fn dataset(&self) -> &str {
        match self {
            GateError::Failed { dataset, .. } | GateError::Fatal { dataset, .. } => dataset,
        }
    }

    pub fn cause(&self) -> Option<&GateCause> {
        match self {
            GateError::Failed { cause, .. } => Some(cause),
            GateError::Fatal { .. } => None,
        }
    }

    pub fn violation(&self) -> Option<&Violation> {
        match self {
            GateError::Fatal { violation, .. } => Some(violation),
            GateError::Failed { .. } => None,
        }
    }
}

impl From<GateError> for zenc_common::Error {
    fn from(err: GateError) -> Self {
        let message = err.to_string();
        match err {
            GateError::Fatal { dataset, .. } => {
                zenc_common::Error::ContractViolation { dataset, message }
            }
            GateError::Failed { dataset, cause, .. } => match cause {
                GateCause::InvalidName(source) => {
                    zenc_common::Error::InvalidDataset { dataset, source }
                }
                GateCause::Capability(failure) if failure.is_timeout() => {
                    zenc_common::Error::Timeout(message)
                }
                GateCause::Capability(_) => zenc_common::Error::Execution(message),
                GateCause::Query {
                    source: QueryError::DatasetDoesNotExist(_),
                    ..
                } => zenc_common::Error::DatasetNotFound { dataset },
                GateCause::Query { source, .. } if source.is_timeout() => {
                    zenc_common::Error::Timeout(message)
                }
                GateCause::Query { .. } => zenc_common::Error::Query { dataset, message },
                GateCause::DataIntegrity { .. } => {
                    zenc_common::Error::DataIntegrity { dataset, message }
                }
            },
        }
    }
}

/// Encryption state of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EncryptionStatus {
    /// zfs has no native-encryption support.
    Unsupported,
    /// `encryption=off`.
    Disabled,
    /// Any other value; it names the cipher.
    Enabled { cipher: String },
}

impl EncryptionStatus {
    pub fn is_enabled(&self) -> bool {
        matches!(self, EncryptionStatus::Enabled { .. })
    }
}

/// Whether a dataset's key is in kernel memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyLoadStatus {
    /// zfs has no native-encryption support; treated as loaded.
    CapabilityAbsent,
    Loaded,
    Unloaded,
}

impl KeyLoadStatus {
    /// True exactly when the key is confirmed absent.
    pub fn is_unloaded(&self) -> bool {
        matches!(self, KeyLoadStatus::Unloaded)
    }
}

/// Operation + dataset pair used to tag errors.
struct Call<'a> {
    op: GateOp,
    dataset: &'a str,
}

impl Call<'_> {
    fn failed(&self, cause: GateCause) -> GateError {
        GateError::Failed {
            op: self.op,
            dataset: self.dataset.to_string(),
            cause,
        }
    }

    fn fatal(&self, violation: Violation) -> GateError {
        error!(op = %self.op, dataset = self.dataset, %violation, "zfs contract violation");
        GateError::Fatal {
            op: self.op,
            dataset: self.dataset.to_string(),
            violation,
        }
    }
}

/// The encryption gates.
///
/// Cheap to share: hold it in an `Arc` and call from any thread. The only
/// shared state is the prober's capability cache.
pub struct EncryptionGate {
    prober: Arc<CapabilityProber>,
    query: Arc<dyn PropertyQuery>,
}

impl EncryptionGate {
    pub fn new(prober: Arc<CapabilityProber>, query: Arc<dyn PropertyQuery>) -> Self {
        Self { prober, query }
    }

    pub fn prober(&self) -> &CapabilityProber {
        &self.prober
    }

    /// Whether native encryption is enabled on `dataset`.
    ///
    /// Returns `Ok(false)` if zfs has no encryption support.
    pub fn encryption_enabled(&self, ctx: &QueryContext, dataset: &str) -> Result<bool, GateError> {
        self.encryption_status(ctx, dataset)
            .map(|status| status.is_enabled())
    }

    /// Returns `Ok(true)` exactly when the key of `dataset` is confirmed
    /// unloaded.
    ///
    /// Live (non-raw) sends from a dataset with an unloaded key must not be
    /// started: some zfs receive versions corrupt the target volume in that
    /// situation. Raw sends are unaffected. Returns `Ok(false)` if zfs has no
    /// encryption support.
    pub fn key_is_unloaded(&self, ctx: &QueryContext, dataset: &str) -> Result<bool, GateError> {
        self.key_status(ctx, dataset)
            .map(|status| status.is_unloaded())
    }

    pub fn encryption_status(
        &self,
        ctx: &QueryContext,
        dataset: &str,
    ) -> Result<EncryptionStatus, GateError> {
        let call = Call {
            op: GateOp::EncryptionEnabled,
            dataset,
        };
        let name = match self.precheck(ctx, &call)? {
            Some(name) => name,
            None => return Ok(EncryptionStatus::Unsupported),
        };

        let value = self.query_one(ctx, &call, &name, ENCRYPTION_PROPERTY)?;
        let status = match value.as_str() {
            "" => {
                return Err(call.fatal(Violation::EmptyValue {
                    property: ENCRYPTION_PROPERTY,
                }))
            }
            "-" => {
                warn!(dataset, "zfs reported `encryption` as not applicable");
                return Err(call.failed(GateCause::DataIntegrity {
                    property: ENCRYPTION_PROPERTY,
                }));
            }
            "off" => EncryptionStatus::Disabled,
            // The enabled value is the cipher name, which varies by zfs
            // version and configuration. Assumes zfs has no sentinel besides
            // "off" and "-".
            cipher => EncryptionStatus::Enabled {
                cipher: cipher.to_string(),
            },
        };
        debug!(dataset, ?status, "encryption status");
        Ok(status)
    }

    pub fn key_status(&self, ctx: &QueryContext, dataset: &str) -> Result<KeyLoadStatus, GateError> {
        let call = Call {
            op: GateOp::KeyUnloaded,
            dataset,
        };
        let name = match self.precheck(ctx, &call)? {
            Some(name) => name,
            None => return Ok(KeyLoadStatus::CapabilityAbsent),
        };

        let value = self.query_one(ctx, &call, &name, KEYSTATUS_PROPERTY)?;
        let status = match value.as_str() {
            "" => {
                return Err(call.fatal(Violation::EmptyValue {
                    property: KEYSTATUS_PROPERTY,
                }))
            }
            "available" => KeyLoadStatus::Loaded,
            "unavailable" => KeyLoadStatus::Unloaded,
            other => {
                return Err(call.fatal(Violation::UnknownKeyStatus {
                    value: other.to_string(),
                }))
            }
        };
        debug!(dataset, ?status, "key status");
        Ok(status)
    }

    /// Probe the capability, then validate the name. `None` means zfs has no
    /// encryption support and the caller should short-circuit; the name is
    /// not looked at in that case.
    fn precheck(&self, ctx: &QueryContext, call: &Call<'_>) -> Result<Option<DatasetName>, GateError> {
        let supported = self
            .prober
            .probe_supported(ctx)
            .map_err(|e| call.failed(GateCause::Capability(e)))?;
        if !supported {
            debug!(op = %call.op, dataset = call.dataset, "encryption unsupported, short-circuit");
            return Ok(None);
        }

        let name = DatasetName::parse(call.dataset)
            .map_err(|e| call.failed(GateCause::InvalidName(e)))?;
        Ok(Some(name))
    }

    fn query_one(
        &self,
        ctx: &QueryContext,
        call: &Call<'_>,
        name: &DatasetName,
        property: &'static str,
    ) -> Result<String, GateError> {
        let props = self
            .query
            .get(ctx, name, &[property], SourceAuthority::ANY)
            .map_err(|source| call.failed(GateCause::Query { property, source }))?;
        Ok(props.get(property).to_string())
    }
}

impl fmt::Debug for EncryptionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionGate")
            .field("prober", &self.prober)
            .finish_non_exhaustive()
    }
}
