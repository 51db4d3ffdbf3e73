//! Capability override read from the process environment.
//!
//! These tests mutate `ZENC_ENCRYPTION_CLI_SUPPORTED`, so they serialize on
//! a lock and restore the variable afterwards.

use std::env;
use std::sync::{Arc, Mutex, OnceLock};
use zenc_core::context::QueryContext;
use zenc_core::mock::{MockRunner, Reply};
use zenc_core::zfs::{CapabilityProber, OverrideSource, ZfsCli, ENCRYPTION_CLI_OVERRIDE_ENV};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

struct EnvGuard {
    key: String,
    value: Option<String>,
}

impl EnvGuard {
    fn set(key: &str, value: &str) -> Self {
        let saved = env::var(key).ok();
        env::set_var(key, value);
        Self {
            key: key.to_string(),
            value: saved,
        }
    }

    fn remove(key: &str) -> Self {
        let saved = env::var(key).ok();
        env::remove_var(key);
        Self {
            key: key.to_string(),
            value: saved,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.value {
            Some(value) => env::set_var(&self.key, value),
            None => env::remove_var(&self.key),
        }
    }
}

fn prober(usage: &str, fallback: Option<bool>) -> CapabilityProber {
    let runner = Arc::new(MockRunner::new().on("load-key", Reply::exit(2).stderr(usage)));
    CapabilityProber::new(ZfsCli::new(runner, "zfs")).with_override(OverrideSource::Env {
        key: ENCRYPTION_CLI_OVERRIDE_ENV.to_string(),
        fallback,
    })
}

fn lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

#[test]
fn env_true_forces_support() {
    let _lock = lock();
    let _guard = EnvGuard::set(ENCRYPTION_CLI_OVERRIDE_ENV, "1");

    let prober = prober("unrecognized command 'load-key'", None);
    assert!(prober.probe_supported(&QueryContext::background()).unwrap());
    assert_eq!(prober.cached().unwrap().forced, Some(true));
}

#[test]
fn env_false_beats_detection_and_config() {
    let _lock = lock();
    let _guard = EnvGuard::set(ENCRYPTION_CLI_OVERRIDE_ENV, "false");

    let prober = prober("load-key keylocation", Some(true));
    assert!(!prober.probe_supported(&QueryContext::background()).unwrap());
}

#[test]
fn unparseable_env_falls_back() {
    let _lock = lock();
    let _guard = EnvGuard::set(ENCRYPTION_CLI_OVERRIDE_ENV, "perhaps");

    let prober = prober("unrecognized command 'load-key'", Some(true));
    assert!(prober.probe_supported(&QueryContext::background()).unwrap());

    let prober = prober_without_fallback();
    assert!(!prober.probe_supported(&QueryContext::background()).unwrap());
}

#[test]
fn unset_env_uses_detection() {
    let _lock = lock();
    let _guard = EnvGuard::remove(ENCRYPTION_CLI_OVERRIDE_ENV);

    let prober = prober("load-key keylocation", None);
    assert!(prober.probe_supported(&QueryContext::background()).unwrap());
    assert_eq!(prober.cached().unwrap().forced, None);
}

#[test]
fn env_is_read_once_per_prober() {
    let _lock = lock();
    let prober = {
        let _guard = EnvGuard::set(ENCRYPTION_CLI_OVERRIDE_ENV, "0");
        let prober = prober("load-key keylocation", None);
        assert!(!prober.probe_supported(&QueryContext::background()).unwrap());
        prober
    };
    // Changing the variable later has no effect on the cached answer
    let _guard = EnvGuard::set(ENCRYPTION_CLI_OVERRIDE_ENV, "1");
    assert!(!prober.probe_supported(&QueryContext::background()).unwrap());
}

fn prober_without_fallback() -> CapabilityProber {
    prober("unrecognized command 'load-key'", None)
}
