//! `zfs get` property queries.
//!
//! Runs `zfs get -Hp -o property,value,source <props> <dataset>` and parses
//! the tab-separated result into a [`PropertySet`]. Rows whose source is not
//! accepted by the requested [`SourceAuthority`] are dropped, so the caller
//! sees them as absent (empty string).

use super::ZfsCli;
use crate::context::QueryContext;
use crate::tool_runner::ToolError;
use thiserror::Error;
use tracing::{debug, instrument, trace};
use zenc_common::{DatasetName, PropertySet, PropertySource, PropertyValue, SourceAuthority};

/// Errors from a property query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no properties requested")]
    NoProperties,

    #[error("invalid property name {0:?}")]
    InvalidPropertyName(String),

    #[error("cannot run zfs get: {0}")]
    Tool(#[from] ToolError),

    #[error("zfs get failed ({termination}): {stderr}")]
    CommandFailed { termination: String, stderr: String },

    #[error("dataset does not exist: {0}")]
    DatasetDoesNotExist(String),

    #[error("unexpected zfs get output: {0}")]
    Parse(#[from] ParseError),
}

impl QueryError {
    /// True when the failure came from the deadline or cancellation.
    pub fn is_timeout(&self) -> bool {
        match self {
            QueryError::Tool(ToolError::Context(_)) => true,
            QueryError::CommandFailed { termination, .. } => {
                termination.starts_with("timed out") || termination == "cancelled"
            }
            _ => false,
        }
    }
}

/// A malformed line in `zfs get -H` output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: expected 3 tab-separated fields, got {fields}")]
    FieldCount { line: usize, fields: usize },

    #[error("line {line}: unknown property source {source_text:?}")]
    UnknownSource { line: usize, source_text: String },

    #[error("line {line}: property {property:?} was not requested")]
    Unrequested { line: usize, property: String },

    #[error("expected {expected} property rows, got {actual}")]
    RowCount { expected: usize, actual: usize },
}

/// The property query collaborator.
pub trait PropertyQuery: Send + Sync {
    /// Fetch `properties` of `dataset`, keeping only rows whose source is
    /// accepted by `authority`.
    fn get(
        &self,
        ctx: &QueryContext,
        dataset: &DatasetName,
        properties: &[&str],
        authority: SourceAuthority,
    ) -> Result<PropertySet, QueryError>;
}

/// [`PropertyQuery`] backed by the zfs command line.
#[derive(Clone)]
pub struct ZfsGet {
    cli: ZfsCli,
}

impl ZfsGet {
    pub fn new(cli: ZfsCli) -> Self {
        Self { cli }
    }
}

impl PropertyQuery for ZfsGet {
    #[instrument(skip(self, ctx, dataset), fields(dataset = %dataset))]
    fn get(
        &self,
        ctx: &QueryContext,
        dataset: &DatasetName,
        properties: &[&str],
        authority: SourceAuthority,
    ) -> Result<PropertySet, QueryError> {
        if properties.is_empty() {
            return Err(QueryError::NoProperties);
        }
        if let Some(bad) = properties.iter().find(|p| !is_valid_property_name(p)) {
            return Err(QueryError::InvalidPropertyName(bad.to_string()));
        }

        let args = vec![
            "get".to_string(),
            "-Hp".to_string(),
            "-o".to_string(),
            "property,value,source".to_string(),
            properties.join(","),
            dataset.to_string(),
        ];
        let output = self.cli.run(ctx, args)?;

        if !output.success() {
            let stderr = output.stderr_str().trim().to_string();
            if stderr.contains("dataset does not exist") {
                return Err(QueryError::DatasetDoesNotExist(dataset.to_string()));
            }
            return Err(QueryError::CommandFailed {
                termination: output.termination(),
                stderr,
            });
        }

        let set = parse_get_output(&output.stdout_str(), properties, authority)?;
        debug!(returned = set.len(), %authority, "zfs get complete");
        Ok(set)
    }
}

/// Property names are lowercase identifiers; user properties contain a `:`.
fn is_valid_property_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

/// Parse `zfs get -H -o property,value,source` output.
///
/// Every requested property must produce exactly one row; zfs prints one
/// row per property even if the value is `-`.
pub fn parse_get_output(
    output: &str,
    requested: &[&str],
    authority: SourceAuthority,
) -> Result<PropertySet, ParseError> {
    let lines: Vec<&str> = output.lines().filter(|l| !l.is_empty()).collect();
    if lines.len() != requested.len() {
        return Err(ParseError::RowCount {
            expected: requested.len(),
            actual: lines.len(),
        });
    }

    let mut set = PropertySet::new();
    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        // Property names and sources never hold a tab; a value might, so it
        // takes everything between the first and last separator.
        let split = line
            .split_once('\t')
            .and_then(|(property, rest)| rest.rsplit_once('\t').map(|(v, s)| (property, v, s)));
        let (property, value, source_text) = match split {
            Some(fields) => fields,
            None => {
                return Err(ParseError::FieldCount {
                    line: line_no,
                    fields: line.split('\t').count(),
                })
            }
        };

        if !requested.contains(&property) {
            return Err(ParseError::Unrequested {
                line: line_no,
                property: property.to_string(),
            });
        }
        let source =
            PropertySource::parse(source_text).ok_or_else(|| ParseError::UnknownSource {
                line: line_no,
                source_text: source_text.to_string(),
            })?;

        if !authority.accepts(&source) {
            trace!(property, %source, "dropping row from unaccepted source");
            continue;
        }
        set.insert(
            property,
            PropertyValue {
                value: value.to_string(),
                source,
            },
        );
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRunner, Reply};
    use std::sync::Arc;

    #[test]
    fn test_parse_single_property() {
        let set = parse_get_output(
            "encryption\taes-256-gcm\tlocal\n",
            &["encryption"],
            SourceAuthority::ANY,
        )
        .unwrap();
        assert_eq!(set.get("encryption"), "aes-256-gcm");
        assert_eq!(
            set.entry("encryption").unwrap().source,
            PropertySource::Local
        );
    }

    #[test]
    fn test_parse_multiple_and_inherited() {
        let out = "encryption\taes-256-gcm\tinherited from tank/enc\nkeystatus\tavailable\t-\n";
        let set = parse_get_output(out, &["encryption", "keystatus"], SourceAuthority::ANY)
            .unwrap();
        assert_eq!(set.get("keystatus"), "available");
        assert_eq!(
            set.entry("encryption").unwrap().source,
            PropertySource::Inherited {
                from: "tank/enc".to_string()
            }
        );
    }

    #[test]
    fn test_authority_drops_rows() {
        let out = "encryption\toff\tdefault\n";
        let set = parse_get_output(out, &["encryption"], SourceAuthority::LOCAL).unwrap();
        assert_eq!(set.get("encryption"), "");
        assert!(set.is_empty());
    }

    #[test]
    fn test_value_with_spaces_is_kept() {
        let out = "org.example:note\thello world\tlocal\n";
        let set = parse_get_output(out, &["org.example:note"], SourceAuthority::ANY).unwrap();
        assert_eq!(set.get("org.example:note"), "hello world");
    }

    #[test]
    fn test_value_with_tab_keeps_source_column() {
        let out = "org.example:note\tleft\tright\tinherited from tank\n";
        let set = parse_get_output(out, &["org.example:note"], SourceAuthority::ANY).unwrap();
        let entry = set.entry("org.example:note").unwrap();
        assert_eq!(entry.value, "left\tright");
        assert_eq!(
            entry.source,
            PropertySource::Inherited {
                from: "tank".to_string()
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_get_output("", &["encryption"], SourceAuthority::ANY),
            Err(ParseError::RowCount {
                expected: 1,
                actual: 0
            })
        );
        assert_eq!(
            parse_get_output("encryption off local\n", &["encryption"], SourceAuthority::ANY),
            Err(ParseError::FieldCount { line: 1, fields: 1 })
        );
        assert_eq!(
            parse_get_output("encryption\toff\n", &["encryption"], SourceAuthority::ANY),
            Err(ParseError::FieldCount { line: 1, fields: 2 })
        );
        assert_eq!(
            parse_get_output("compression\tlz4\tlocal\n", &["encryption"], SourceAuthority::ANY),
            Err(ParseError::Unrequested {
                line: 1,
                property: "compression".to_string()
            })
        );
        assert!(matches!(
            parse_get_output("encryption\toff\tsomewhere\n", &["encryption"], SourceAuthority::ANY),
            Err(ParseError::UnknownSource { line: 1, .. })
        ));
    }

    fn zfs_get(runner: Arc<MockRunner>) -> ZfsGet {
        ZfsGet::new(ZfsCli::new(runner, "zfs"))
    }

    #[test]
    fn test_query_builds_expected_command() {
        let runner = Arc::new(MockRunner::new().on(
            "get",
            Reply::exit(0).stdout("keystatus\tunavailable\t-\n"),
        ));
        let query = zfs_get(Arc::clone(&runner));
        let name = DatasetName::parse("tank/secret").unwrap();

        let set = query
            .get(
                &QueryContext::background(),
                &name,
                &["keystatus"],
                SourceAuthority::ANY,
            )
            .unwrap();

        assert_eq!(set.get("keystatus"), "unavailable");
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command, "zfs");
        assert_eq!(
            calls[0].args,
            vec!["get", "-Hp", "-o", "property,value,source", "keystatus", "tank/secret"]
        );
    }

    #[test]
    fn test_query_dataset_missing() {
        let runner = Arc::new(MockRunner::new().on(
            "get",
            Reply::exit(1).stderr("cannot open 'tank/nope': dataset does not exist\n"),
        ));
        let name = DatasetName::parse("tank/nope").unwrap();
        let err = zfs_get(runner)
            .get(
                &QueryContext::background(),
                &name,
                &["encryption"],
                SourceAuthority::ANY,
            )
            .unwrap_err();
        assert!(matches!(err, QueryError::DatasetDoesNotExist(ref d) if d == "tank/nope"));
    }

    #[test]
    fn test_query_command_failure() {
        let runner = Arc::new(
            MockRunner::new().on("get", Reply::exit(2).stderr("bad property list\n")),
        );
        let name = DatasetName::parse("tank").unwrap();
        let err = zfs_get(runner)
            .get(
                &QueryContext::background(),
                &name,
                &["encryption"],
                SourceAuthority::ANY,
            )
            .unwrap_err();
        match err {
            QueryError::CommandFailed {
                termination,
                stderr,
            } => {
                assert_eq!(termination, "exit status 2");
                assert_eq!(stderr, "bad property list");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_query_rejects_bad_property_names() {
        let runner = Arc::new(MockRunner::new());
        let query = zfs_get(Arc::clone(&runner));
        let name = DatasetName::parse("tank").unwrap();
        let ctx = QueryContext::background();

        assert!(matches!(
            query.get(&ctx, &name, &[], SourceAuthority::ANY),
            Err(QueryError::NoProperties)
        ));
        assert!(matches!(
            query.get(&ctx, &name, &["a,b"], SourceAuthority::ANY),
            Err(QueryError::InvalidPropertyName(_))
        ));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_timeout_classification() {
        let err = QueryError::CommandFailed {
            termination: "timed out after 30s".to_string(),
            stderr: String::new(),
        };
        assert!(err.is_timeout());
        assert!(!QueryError::NoProperties.is_timeout());
    }
}
