//! Scripted collaborators for tests.
//!
//! [`MockRunner`] answers zfs invocations by their first argument (the
//! subcommand) and records every call. [`MockQuery`] answers property
//! queries from a fixed table, so gate logic can be tested without the
//! `zfs get` parser in the loop.
//!
//! # Example
//!
//! ```ignore
//! use zenc_core::mock::{MockRunner, Reply};
//!
//! let runner = MockRunner::new()
//!     .on("load-key", Reply::exit(2).stderr("usage: load-key ... keylocation"))
//!     .on("get", Reply::exit(0).stdout("encryption\toff\tdefault\n"));
//! ```

use crate::context::QueryContext;
use crate::tool_runner::{CommandRunner, ToolError, ToolOutput, ToolSpec};
use crate::zfs::get::{PropertyQuery, QueryError};
use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use zenc_common::{DatasetName, PropertySet, PropertySource, PropertyValue, SourceAuthority};

// ============================================================================
// Command runner
// ============================================================================

#[derive(Debug, Clone)]
enum Outcome {
    Exited(i32),
    Killed,
    NotFound,
}

/// Scripted reply for one subcommand.
#[derive(Debug, Clone)]
pub struct Reply {
    outcome: Outcome,
    stdout: String,
    stderr: String,
    delay: Option<Duration>,
}

impl Reply {
    /// The process exits with `code`.
    pub fn exit(code: i32) -> Self {
        Self {
            outcome: Outcome::Exited(code),
            stdout: String::new(),
            stderr: String::new(),
            delay: None,
        }
    }

    /// The process is killed by a signal.
    pub fn killed() -> Self {
        Self {
            outcome: Outcome::Killed,
            ..Self::exit(0)
        }
    }

    /// The binary cannot be found.
    pub fn not_found() -> Self {
        Self {
            outcome: Outcome::NotFound,
            ..Self::exit(0)
        }
    }

    pub fn stdout(mut self, text: &str) -> Self {
        self.stdout = text.to_string();
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.stderr = text.to_string();
        self
    }

    /// Sleep before answering, to widen race windows.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub command: String,
    pub args: Vec<String>,
}

/// [`CommandRunner`] that answers from a script.
///
/// Unscripted subcommands get exit status 1 with an "unrecognized command"
/// message, which is what zfs prints for unknown subcommands.
#[derive(Debug, Default)]
pub struct MockRunner {
    replies: HashMap<String, Reply>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, subcommand: &str, reply: Reply) -> Self {
        self.replies.insert(subcommand.to_string(), reply);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Calls whose first argument is `subcommand`.
    pub fn calls_to(&self, subcommand: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.args.first().map(String::as_str) == Some(subcommand))
            .count()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, ctx: &QueryContext, spec: &ToolSpec) -> Result<ToolOutput, ToolError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                command: spec.command.clone(),
                args: spec.args.clone(),
            });
        }
        ctx.check()?;

        let subcommand = spec.args.first().cloned().unwrap_or_default();
        let reply = self.replies.get(&subcommand).cloned().unwrap_or_else(|| {
            Reply::exit(1).stderr(&format!("unrecognized command '{}'\n", subcommand))
        });

        if let Some(delay) = reply.delay {
            thread::sleep(delay);
        }

        let exit_code = match reply.outcome {
            Outcome::NotFound => return Err(ToolError::CommandNotFound(spec.command.clone())),
            Outcome::Killed => None,
            Outcome::Exited(code) => Some(code),
        };

        Ok(ToolOutput {
            command: spec.command.clone(),
            args: spec.args.clone(),
            stdout: reply.stdout.into_bytes(),
            stderr: reply.stderr.into_bytes(),
            exit_code,
            truncated: false,
            duration: reply.delay.unwrap_or_default(),
            timed_out: false,
            cancelled: false,
        })
    }
}

// ============================================================================
// Property query
// ============================================================================

/// [`PropertyQuery`] answering from a fixed table.
#[derive(Debug, Default)]
pub struct MockQuery {
    values: HashMap<String, String>,
    fail_with: Option<String>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `value` for `property` (source `local`).
    pub fn with(mut self, property: &str, value: &str) -> Self {
        self.values.insert(property.to_string(), value.to_string());
        self
    }

    /// Fail every query with a command failure carrying `stderr`.
    pub fn failing(mut self, stderr: &str) -> Self {
        self.fail_with = Some(stderr.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl PropertyQuery for MockQuery {
    fn get(
        &self,
        ctx: &QueryContext,
        dataset: &DatasetName,
        properties: &[&str],
        authority: SourceAuthority,
    ) -> Result<PropertySet, QueryError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((
                dataset.to_string(),
                properties.iter().map(|p| p.to_string()).collect(),
            ));
        }
        ctx.check().map_err(ToolError::from)?;

        if let Some(stderr) = &self.fail_with {
            return Err(QueryError::CommandFailed {
                termination: "exit status 1".to_string(),
                stderr: stderr.clone(),
            });
        }

        let source = PropertySource::Local;
        Ok(properties
            .iter()
            .filter(|_| authority.accepts(&source))
            .filter_map(|p| {
                self.values.get(*p).map(|v| {
                    (
                        p.to_string(),
                        PropertyValue {
                            value: v.clone(),
                            source: source.clone(),
                        },
                    )
                })
            })
            .collect())
    }
}
