#![no_main]

use libfuzzer_sys::fuzz_target;
use tsundoku_isbn::{canonicalize_str, is_valid_isbn13, Isbn};

fuzz_target!(|raw: &str| {
    if let Ok(resolved) = canonicalize_str(raw) {
        let long = resolved.isbn.long();
        assert!(is_valid_isbn13(long.as_bytes()), "{raw:?} -> {long}");
        assert_eq!(Isbn::from_long(long), Some(resolved.isbn));
        if let Some(short) = resolved.isbn.short() {
            assert_eq!(Isbn::from_short(&short), Some(resolved.isbn));
        }
        // A canonical long form needs no repair
        let again = canonicalize_str(long).expect("canonical form resolves");
        assert!(!again.was_repaired());
    }
});
