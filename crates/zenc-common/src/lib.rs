//! zenc common types and errors.
//!
//! This crate provides foundational types shared across zenc-core modules:
//! - Validated dataset names
//! - The dataset property model (values, sources, source authority)
//! - The unified error type with stable codes
//! - Output format specifications

pub mod dataset;
pub mod error;
pub mod output;
pub mod property;

pub use dataset::{DatasetName, DatasetNameError};
pub use error::{format_error_human, Error, ErrorCategory, Result, StructuredError, SuggestedAction};
pub use output::OutputFormat;
pub use property::{PropertySet, PropertySource, PropertyValue, SourceAuthority};

/// Version of the JSON documents the CLI prints.
pub const SCHEMA_VERSION: &str = "1.0.0";
