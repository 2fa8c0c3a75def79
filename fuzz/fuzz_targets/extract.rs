#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tsundoku_isbn::{dedup, extract_with, GrammarConfig};

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    text: &'a str,
    prefixed_only: bool,
}

fuzz_target!(|input: Input<'_>| {
    let config = if input.prefixed_only {
        GrammarConfig::prefixed_only()
    } else {
        GrammarConfig::lenient()
    };

    let candidates: Vec<_> = extract_with(input.text, config).collect();
    for c in &candidates {
        assert_eq!(&input.text[c.offset..c.offset + c.raw.len()], c.raw);
    }

    let total = candidates.len();
    let batch = dedup(candidates);
    assert_eq!(
        batch.unique.len() + batch.rejected.len() + batch.duplicates.len(),
        total
    );
});
