//! Dataset name validation.
//!
//! A dataset is identified by `pool/child/grandchild`. Only filesystem and
//! volume names are accepted here: snapshot (`@`) and bookmark (`#`) names are
//! rejected because the encryption gates only make sense for datasets that
//! can hold a key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum dataset name length (ZFS_MAX_DATASET_NAME_LEN, including the NUL).
pub const MAX_DATASET_NAME_LEN: usize = 256;

/// Reasons a dataset name is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatasetNameError {
    #[error("dataset name is empty")]
    Empty,

    #[error("dataset name is too long ({len} bytes, limit {limit})")]
    TooLong { len: usize, limit: usize },

    #[error("dataset name must not start or end with '/'")]
    LeadingOrTrailingSlash,

    #[error("dataset name contains an empty component")]
    EmptyComponent,

    #[error("dataset name must not contain {0:?} (snapshots and bookmarks are not filesystems)")]
    SnapshotOrBookmark(char),

    #[error("dataset name contains invalid character {0:?}")]
    InvalidCharacter(char),

    #[error("dataset name contains reserved component {0:?}")]
    ReservedComponent(String),

    #[error("pool name must begin with a letter")]
    PoolNameStart,
}

/// A validated dataset name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetName(String);

impl DatasetName {
    /// Validate and wrap a dataset name.
    pub fn parse(s: &str) -> Result<Self, DatasetNameError> {
        validate(s)?;
        Ok(DatasetName(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The pool this dataset lives in.
    pub fn pool(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// Number of path components (the pool root has depth 1).
    pub fn depth(&self) -> usize {
        self.0.split('/').count()
    }

    /// Parent dataset, `None` for a pool root.
    pub fn parent(&self) -> Option<DatasetName> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| DatasetName(parent.to_string()))
    }
}

fn validate(s: &str) -> Result<(), DatasetNameError> {
    if s.is_empty() {
        return Err(DatasetNameError::Empty);
    }
    if s.len() >= MAX_DATASET_NAME_LEN {
        return Err(DatasetNameError::TooLong {
            len: s.len(),
            limit: MAX_DATASET_NAME_LEN - 1,
        });
    }
    if s.starts_with('/') || s.ends_with('/') {
        return Err(DatasetNameError::LeadingOrTrailingSlash);
    }

    for c in s.chars() {
        match c {
            '@' | '#' => return Err(DatasetNameError::SnapshotOrBookmark(c)),
            '/' => {}
            c if is_component_char(c) => {}
            c => return Err(DatasetNameError::InvalidCharacter(c)),
        }
    }

    for component in s.split('/') {
        if component.is_empty() {
            return Err(DatasetNameError::EmptyComponent);
        }
        if component == "." || component == ".." {
            return Err(DatasetNameError::ReservedComponent(component.to_string()));
        }
    }

    let starts_with_letter = s
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic())
        .unwrap_or(false);
    if !starts_with_letter {
        return Err(DatasetNameError::PoolNameStart);
    }

    Ok(())
}

fn is_component_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | ' ')
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DatasetName {
    type Err = DatasetNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DatasetName::parse(s)
    }
}

impl TryFrom<String> for DatasetName {
    type Error = DatasetNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate(&value)?;
        Ok(DatasetName(value))
    }
}

impl From<DatasetName> for String {
    fn from(name: DatasetName) -> Self {
        name.0
    }
}

impl AsRef<str> for DatasetName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in [
            "tank",
            "tank/data",
            "tank/home/alice",
            "rpool/ROOT/ubuntu_1",
            "pool-1/with.dots:and colons",
            "p/with space",
        ] {
            assert!(DatasetName::parse(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(DatasetName::parse(""), Err(DatasetNameError::Empty));
    }

    #[test]
    fn test_rejects_slashes() {
        assert_eq!(
            DatasetName::parse("/tank"),
            Err(DatasetNameError::LeadingOrTrailingSlash)
        );
        assert_eq!(
            DatasetName::parse("tank/"),
            Err(DatasetNameError::LeadingOrTrailingSlash)
        );
        assert_eq!(
            DatasetName::parse("tank//data"),
            Err(DatasetNameError::EmptyComponent)
        );
    }

    #[test]
    fn test_rejects_snapshots_and_bookmarks() {
        assert_eq!(
            DatasetName::parse("tank/data@snap"),
            Err(DatasetNameError::SnapshotOrBookmark('@'))
        );
        assert_eq!(
            DatasetName::parse("tank/data#mark"),
            Err(DatasetNameError::SnapshotOrBookmark('#'))
        );
    }

    #[test]
    fn test_rejects_invalid_characters() {
        assert_eq!(
            DatasetName::parse("tank/da$ta"),
            Err(DatasetNameError::InvalidCharacter('$'))
        );
        assert_eq!(
            DatasetName::parse("tank/%recv"),
            Err(DatasetNameError::InvalidCharacter('%'))
        );
        assert_eq!(
            DatasetName::parse("tank/da\nta"),
            Err(DatasetNameError::InvalidCharacter('\n'))
        );
    }

    #[test]
    fn test_rejects_reserved_components() {
        assert_eq!(
            DatasetName::parse("tank/../etc"),
            Err(DatasetNameError::ReservedComponent("..".to_string()))
        );
    }

    #[test]
    fn test_pool_must_start_with_letter() {
        assert_eq!(
            DatasetName::parse("1tank/data"),
            Err(DatasetNameError::PoolNameStart)
        );
    }

    #[test]
    fn test_length_limit() {
        let long = format!("tank/{}", "a".repeat(300));
        assert!(matches!(
            DatasetName::parse(&long),
            Err(DatasetNameError::TooLong { limit: 255, .. })
        ));
        let fits = format!("tank/{}", "a".repeat(250));
        assert!(DatasetName::parse(&fits).is_ok());
    }

    #[test]
    fn test_accessors() {
        let name = DatasetName::parse("tank/home/alice").unwrap();
        assert_eq!(name.pool(), "tank");
        assert_eq!(name.depth(), 3);
        assert_eq!(name.parent().unwrap().as_str(), "tank/home");
        assert!(DatasetName::parse("tank").unwrap().parent().is_none());
    }

    #[test]
    fn test_serde_validates() {
        let name: DatasetName = serde_json::from_str("\"tank/data\"").unwrap();
        assert_eq!(name.to_string(), "tank/data");
        assert!(serde_json::from_str::<DatasetName>("\"tank/data@snap\"").is_err());
    }
}
