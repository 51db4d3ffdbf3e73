//! Native-encryption CLI capability detection.
//!
//! Older zfs releases have no encryption subcommands at all. Before asking
//! any dataset about its encryption state we probe the installed tool once
//! and cache the answer for the lifetime of the [`CapabilityProber`].
//!
//! The default probe runs `zfs load-key` without arguments. That call is
//! expected to fail; what matters is whether the usage text it prints
//! mentions the key-loading vocabulary (`load-key`, `keylocation`).
//!
//! The result can be forced with `ZENC_ENCRYPTION_CLI_SUPPORTED` for
//! environments where the heuristic is unreliable.

use super::ZfsCli;
use crate::context::QueryContext;
use crate::tool_runner::{ToolError, ToolOutput};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Environment variable that forces the capability result.
pub const ENCRYPTION_CLI_OVERRIDE_ENV: &str = "ZENC_ENCRYPTION_CLI_SUPPORTED";

/// The probe could not produce a trustworthy answer.
#[derive(Debug, Clone, Error)]
pub enum ProbeFailure {
    #[error("native encryption cli support feature check failed: {0}")]
    NotRun(#[source] Arc<ToolError>),

    #[error("native encryption cli support feature check failed: zfs {termination}")]
    AbnormalExit { termination: String, timed_out: bool },
}

impl ProbeFailure {
    fn from_output(output: &ToolOutput) -> Self {
        ProbeFailure::AbnormalExit {
            termination: output.termination(),
            timed_out: output.timed_out || output.cancelled,
        }
    }

    /// True when the probe was cut short by a deadline or cancellation.
    pub fn is_timeout(&self) -> bool {
        match self {
            ProbeFailure::NotRun(e) => matches!(e.as_ref(), ToolError::Context(_)),
            ProbeFailure::AbnormalExit { timed_out, .. } => *timed_out,
        }
    }
}

impl From<ProbeFailure> for zenc_common::Error {
    fn from(failure: ProbeFailure) -> Self {
        if failure.is_timeout() {
            zenc_common::Error::Timeout(failure.to_string())
        } else {
            zenc_common::Error::Execution(failure.to_string())
        }
    }
}

/// Strategy deciding from probe output whether encryption is supported.
pub trait FeatureDetector: Send + Sync {
    /// Short identifier for logs and reports.
    fn name(&self) -> &'static str;

    /// Arguments passed to the zfs binary for the probe.
    fn probe_args(&self) -> Vec<String>;

    /// Decide from the combined stdout+stderr of the probe.
    fn detect(&self, combined_output: &str) -> bool;
}

/// Looks for the key-loading vocabulary in the `zfs load-key` usage text.
#[derive(Debug, Clone)]
pub struct KeyVocabularyDetector {
    required: Vec<String>,
}

impl Default for KeyVocabularyDetector {
    fn default() -> Self {
        Self {
            required: vec!["load-key".to_string(), "keylocation".to_string()],
        }
    }
}

impl KeyVocabularyDetector {
    pub fn with_required<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
        }
    }
}

impl FeatureDetector for KeyVocabularyDetector {
    fn name(&self) -> &'static str {
        "key-vocabulary"
    }

    fn probe_args(&self) -> Vec<String> {
        vec!["load-key".to_string()]
    }

    fn detect(&self, combined_output: &str) -> bool {
        self.required
            .iter()
            .all(|needle| combined_output.contains(needle.as_str()))
    }
}

/// Parses `zfs version` and requires OpenZFS 0.8 (the first release with
/// native encryption) or later.
#[derive(Debug, Clone, Copy)]
pub struct VersionDetector {
    min_major: u32,
    min_minor: u32,
}

impl Default for VersionDetector {
    fn default() -> Self {
        Self {
            min_major: 0,
            min_minor: 8,
        }
    }
}

impl VersionDetector {
    /// Userland version from `zfs version` output, e.g. `zfs-2.1.5-1` → (2, 1).
    pub fn parse_userland_version(output: &str) -> Option<(u32, u32)> {
        let line = output
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with("zfs-") && !l.starts_with("zfs-kmod-"))?;
        let mut numbers = line["zfs-".len()..]
            .split(|c: char| !c.is_ascii_digit())
            .filter(|s| !s.is_empty());
        let major = numbers.next()?.parse().ok()?;
        let minor = numbers.next()?.parse().ok()?;
        Some((major, minor))
    }
}

impl FeatureDetector for VersionDetector {
    fn name(&self) -> &'static str {
        "version"
    }

    fn probe_args(&self) -> Vec<String> {
        vec!["version".to_string()]
    }

    fn detect(&self, combined_output: &str) -> bool {
        match Self::parse_userland_version(combined_output) {
            Some(version) => version >= (self.min_major, self.min_minor),
            None => false,
        }
    }
}

/// Where the forced capability value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideSource {
    /// Read an environment variable at probe time, falling back to a
    /// configured value when it is unset.
    Env {
        key: String,
        fallback: Option<bool>,
    },
    /// A fixed value (`None` = no override).
    Fixed(Option<bool>),
}

impl Default for OverrideSource {
    fn default() -> Self {
        OverrideSource::Env {
            key: ENCRYPTION_CLI_OVERRIDE_ENV.to_string(),
            fallback: None,
        }
    }
}

impl OverrideSource {
    pub fn resolve(&self) -> Option<bool> {
        match self {
            OverrideSource::Fixed(value) => *value,
            OverrideSource::Env { key, fallback } => match std::env::var(key) {
                Ok(raw) if !raw.trim().is_empty() => match parse_bool(raw.trim()) {
                    Some(value) => Some(value),
                    None => {
                        warn!(key = %key, value = %raw, "ignoring unparseable boolean override");
                        *fallback
                    }
                },
                _ => *fallback,
            },
        }
    }
}

/// Accepts the usual spellings: 1/0, t/f, true/false, yes/no, on/off.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Cached outcome of the one-shot probe.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityState {
    /// Final answer after applying the override; always `false` when
    /// `error` is set.
    pub supported: bool,
    /// What the detector concluded from the probe output.
    pub detected: bool,
    /// Forced value, if an override was in effect.
    pub forced: Option<bool>,
    /// Detector used for the probe.
    pub detector: &'static str,
    /// Hard probe failure; callers must check this before `supported`.
    #[serde(serialize_with = "serialize_failure")]
    pub error: Option<ProbeFailure>,
    /// When the probe ran (RFC 3339).
    pub detected_at: String,
}

fn serialize_failure<S>(failure: &Option<ProbeFailure>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match failure {
        Some(f) => serializer.serialize_some(&f.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Owns the once-only capability cache.
///
/// Build one per process (or per test) and share it through `Arc`.
pub struct CapabilityProber {
    zfs: ZfsCli,
    detector: Box<dyn FeatureDetector>,
    override_source: OverrideSource,
    state: OnceLock<CapabilityState>,
    probe_runs: AtomicUsize,
}

impl CapabilityProber {
    /// Prober using the `load-key` vocabulary heuristic and the
    /// environment override.
    pub fn new(zfs: ZfsCli) -> Self {
        Self {
            zfs,
            detector: Box::new(KeyVocabularyDetector::default()),
            override_source: OverrideSource::default(),
            state: OnceLock::new(),
            probe_runs: AtomicUsize::new(0),
        }
    }

    pub fn with_detector(mut self, detector: Box<dyn FeatureDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_override(mut self, source: OverrideSource) -> Self {
        self.override_source = source;
        self
    }

    /// Whether zfs exposes native-encryption subcommands.
    ///
    /// The first call runs the probe; concurrent callers block until it
    /// completes and every later call returns the cached result. A hard
    /// probe failure is returned on every call.
    pub fn probe_supported(&self, ctx: &QueryContext) -> Result<bool, ProbeFailure> {
        let state = self.state(ctx);
        match &state.error {
            Some(failure) => Err(failure.clone()),
            None => Ok(state.supported),
        }
    }

    /// The cached state, probing first if needed.
    pub fn state(&self, ctx: &QueryContext) -> &CapabilityState {
        self.state.get_or_init(|| self.run_probe(ctx))
    }

    /// The cached state without triggering a probe.
    pub fn cached(&self) -> Option<&CapabilityState> {
        self.state.get()
    }

    /// How many times the probe subprocess was started.
    pub fn probe_runs(&self) -> usize {
        self.probe_runs.load(Ordering::SeqCst)
    }

    #[instrument(skip(self, ctx), fields(detector = self.detector.name()))]
    fn run_probe(&self, ctx: &QueryContext) -> CapabilityState {
        self.probe_runs.fetch_add(1, Ordering::SeqCst);

        let (output, error) = match self.zfs.run(ctx, self.detector.probe_args()) {
            Ok(out) if out.terminated_normally() => (out.combined_output(), None),
            Ok(out) => {
                let failure = ProbeFailure::from_output(&out);
                (out.combined_output(), Some(failure))
            }
            Err(e) => (String::new(), Some(ProbeFailure::NotRun(Arc::new(e)))),
        };

        let detected = self.detector.detect(&output);
        let forced = self.override_source.resolve();
        // A failed probe is never cached as supported, whatever the override says.
        let supported = error.is_none() && forced.unwrap_or(detected);

        if let Some(failure) = &error {
            warn!(error = %failure, "encryption cli feature check failed");
        }
        if let Some(value) = forced {
            if value != detected {
                info!(forced = value, detected, "encryption cli support overridden");
            }
        }
        debug!(supported, detected, ?forced, "encryption cli feature check complete");

        CapabilityState {
            supported,
            detected,
            forced,
            detector: self.detector.name(),
            error,
            detected_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl fmt::Debug for CapabilityProber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityProber")
            .field("zfs", &self.zfs)
            .field("detector", &self.detector.name())
            .field("override_source", &self.override_source)
            .field("state", &self.state.get())
            .finish()
    }
}
