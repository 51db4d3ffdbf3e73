//! Fuzz target for `zfs get -H -o property,value,source` parsing.
//!
//! Tests that `parse_get_output` handles arbitrary output without panicking
//! and never returns rows that were not requested.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use zenc_common::SourceAuthority;
use zenc_core::zfs::parse_get_output;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    output: &'a str,
    requested: Vec<&'a str>,
    authority: u8,
}

fuzz_target!(|input: Input<'_>| {
    let authority = SourceAuthority::from_bits(input.authority);
    if let Ok(set) = parse_get_output(input.output, &input.requested, authority) {
        for (name, _) in set.iter() {
            assert!(input.requested.contains(&name));
        }
    }
});
