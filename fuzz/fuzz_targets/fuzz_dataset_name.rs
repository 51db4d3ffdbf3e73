//! Fuzz target for dataset name validation.
//!
//! Accepted names must never contain snapshot or bookmark separators and
//! must survive a display/parse cycle unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use zenc_common::DatasetName;

fuzz_target!(|data: &str| {
    if let Ok(name) = DatasetName::parse(data) {
        assert!(!name.as_str().contains(['@', '#']));
        assert_eq!(DatasetName::parse(&name.to_string()).ok(), Some(name));
    }
});
