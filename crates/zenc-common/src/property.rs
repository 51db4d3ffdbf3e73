//! Dataset property model.
//!
//! Mirrors the `property`, `value` and `source` columns of `zfs get`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

/// Where a property value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertySource {
    /// Set locally on the dataset.
    Local,
    /// Built-in default.
    Default,
    /// Inherited from an ancestor.
    Inherited { from: String },
    /// Not applicable (`-`), e.g. read-only properties such as `keystatus`.
    None,
    /// Temporary mount-time override.
    Temporary,
    /// Set by `zfs receive`.
    Received,
}

impl PropertySource {
    /// Parse the `source` column of `zfs get` output.
    ///
    /// Returns `None` for text that is not a known source.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(PropertySource::Local),
            "default" => Some(PropertySource::Default),
            "-" | "none" => Some(PropertySource::None),
            "temporary" => Some(PropertySource::Temporary),
            "received" => Some(PropertySource::Received),
            other => other
                .strip_prefix("inherited from ")
                .map(|from| PropertySource::Inherited {
                    from: from.to_string(),
                }),
        }
    }

    fn bit(&self) -> u8 {
        match self {
            PropertySource::Local => SourceAuthority::LOCAL.0,
            PropertySource::Default => SourceAuthority::DEFAULT.0,
            PropertySource::Inherited { .. } => SourceAuthority::INHERITED.0,
            PropertySource::None => SourceAuthority::NONE.0,
            PropertySource::Temporary => SourceAuthority::TEMPORARY.0,
            PropertySource::Received => SourceAuthority::RECEIVED.0,
        }
    }
}

impl fmt::Display for PropertySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertySource::Local => write!(f, "local"),
            PropertySource::Default => write!(f, "default"),
            PropertySource::Inherited { from } => write!(f, "inherited from {}", from),
            PropertySource::None => write!(f, "-"),
            PropertySource::Temporary => write!(f, "temporary"),
            PropertySource::Received => write!(f, "received"),
        }
    }
}

/// Set of property sources a query accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceAuthority(u8);

impl SourceAuthority {
    pub const LOCAL: SourceAuthority = SourceAuthority(1 << 0);
    pub const DEFAULT: SourceAuthority = SourceAuthority(1 << 1);
    pub const INHERITED: SourceAuthority = SourceAuthority(1 << 2);
    pub const NONE: SourceAuthority = SourceAuthority(1 << 3);
    pub const TEMPORARY: SourceAuthority = SourceAuthority(1 << 4);
    pub const RECEIVED: SourceAuthority = SourceAuthority(1 << 5);

    /// Accept every source.
    pub const ANY: SourceAuthority = SourceAuthority(0b11_1111);

    /// Build from raw bits; unknown bits are dropped.
    pub fn from_bits(bits: u8) -> Self {
        SourceAuthority(bits & Self::ANY.0)
    }

    pub fn accepts(self, source: &PropertySource) -> bool {
        self.0 & source.bit() != 0
    }

    pub fn is_any(self) -> bool {
        self == SourceAuthority::ANY
    }
}

impl BitOr for SourceAuthority {
    type Output = SourceAuthority;

    fn bitor(self, rhs: Self) -> Self::Output {
        SourceAuthority(self.0 | rhs.0)
    }
}

impl fmt::Display for SourceAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return write!(f, "any");
        }
        let names = [
            (SourceAuthority::LOCAL, "local"),
            (SourceAuthority::DEFAULT, "default"),
            (SourceAuthority::INHERITED, "inherited"),
            (SourceAuthority::NONE, "none"),
            (SourceAuthority::TEMPORARY, "temporary"),
            (SourceAuthority::RECEIVED, "received"),
        ];
        let selected: Vec<&str> = names
            .iter()
            .filter(|(bit, _)| self.0 & bit.0 != 0)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", selected.join(","))
    }
}

/// A single property value with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub value: String,
    pub source: PropertySource,
}

/// Properties returned for one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertySet {
    entries: BTreeMap<String, PropertyValue>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.entries.insert(name.into(), value);
    }

    /// Value of `name`, or the empty string when the property is absent.
    pub fn get(&self, name: &str) -> &str {
        self.entries
            .get(name)
            .map(|v| v.value.as_str())
            .unwrap_or("")
    }

    /// Full entry including the source, if present.
    pub fn entry(&self, name: &str) -> Option<&PropertyValue> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, PropertyValue)> for PropertySet {
    fn from_iter<T: IntoIterator<Item = (String, PropertyValue)>>(iter: T) -> Self {
        PropertySet {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sources() {
        assert_eq!(PropertySource::parse("local"), Some(PropertySource::Local));
        assert_eq!(PropertySource::parse("-"), Some(PropertySource::None));
        assert_eq!(
            PropertySource::parse("inherited from tank/enc"),
            Some(PropertySource::Inherited {
                from: "tank/enc".to_string()
            })
        );
        assert_eq!(PropertySource::parse("bogus"), None);
    }

    #[test]
    fn test_authority_filtering() {
        let local_only = SourceAuthority::LOCAL;
        assert!(local_only.accepts(&PropertySource::Local));
        assert!(!local_only.accepts(&PropertySource::Default));

        let mixed = SourceAuthority::LOCAL | SourceAuthority::RECEIVED;
        assert!(mixed.accepts(&PropertySource::Received));
        assert!(!mixed.accepts(&PropertySource::None));
        assert_eq!(mixed.to_string(), "local,received");

        for source in [
            PropertySource::Local,
            PropertySource::Default,
            PropertySource::Inherited {
                from: "tank".to_string(),
            },
            PropertySource::None,
            PropertySource::Temporary,
            PropertySource::Received,
        ] {
            assert!(SourceAuthority::ANY.accepts(&source), "{source}");
        }
        assert_eq!(SourceAuthority::ANY.to_string(), "any");
    }

    #[test]
    fn test_property_set_get_absent_is_empty() {
        let mut set = PropertySet::new();
        set.insert(
            "encryption",
            PropertyValue {
                value: "aes-256-gcm".to_string(),
                source: PropertySource::Default,
            },
        );
        assert_eq!(set.get("encryption"), "aes-256-gcm");
        assert_eq!(set.get("keystatus"), "");
        assert_eq!(set.len(), 1);
    }
}
