//! Canonicalization and self-repair
//!
//! Turns a raw candidate into a checksum-valid `Isbn`. Inputs that fail
//! their literal checksum go through an ordered repair list; the first rule
//! that produces a valid identifier wins and no further rule is tried.
//!
//! | rule | input   | fix                                                     |
//! |------|---------|---------------------------------------------------------|
//! | a    | 10 char | truncated long form: prepend `978`, then `979`          |
//! | b    | 10 char | recompute the ISBN-10 check character                   |
//! | c    | 13 char | `978` + ISBN-10: strip prefix, validate or recompute    |
//! | d    | 13 char | recompute the ISBN-13 check digit                       |
//!
//! 9- and 12-character inputs are completed by appending their check
//! character. Every accepted result is re-validated before it is returned.

use std::fmt;

use tsundoku_core::{TsundokuError, TsundokuResult};

use crate::checksum::{
    all_digits, has_bookland_prefix, is_valid_isbn10, is_valid_isbn13, isbn10_check_char,
    isbn13_check_digit, BOOKLAND_978, BOOKLAND_PREFIXES, LONG_LEN, SHORT_LEN,
};
use crate::grammar::{Candidate, SEPARATORS};
use crate::isbn::Isbn;

/// Correction applied while canonicalizing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Repair {
    /// 9 digits: ISBN-10 check character appended
    CompletedShort { check: char },
    /// 12 digits: ISBN-13 check digit appended
    CompletedLong { check: char },
    /// Rule a: 10 digits were the tail of a long form
    LongPrefixRestored { prefix: &'static str },
    /// Rule b: corrupted ISBN-10 check character
    ShortCheckCorrected { given: char, corrected: char },
    /// Rule c: `978` prepended to an ISBN-10 without adjusting the check
    PrefixedShortUnwrapped { recomputed: bool },
    /// Rule d: corrupted ISBN-13 check digit
    LongCheckCorrected { given: char, corrected: char },
}

impl Repair {
    /// Stable rule name for logs and replies
    pub fn rule(&self) -> &'static str {
        match self {
            Repair::CompletedShort { .. } => "complete-short",
            Repair::CompletedLong { .. } => "complete-long",
            Repair::LongPrefixRestored { .. } => "restore-long-prefix",
            Repair::ShortCheckCorrected { .. } => "correct-short-check",
            Repair::PrefixedShortUnwrapped { .. } => "unwrap-prefixed-short",
            Repair::LongCheckCorrected { .. } => "correct-long-check",
        }
    }
}

impl fmt::Display for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Repair::CompletedShort { check } | Repair::CompletedLong { check } => {
                write!(f, "{}: appended check '{}'", self.rule(), check)
            }
            Repair::LongPrefixRestored { prefix } => {
                write!(f, "{}: prepended {}", self.rule(), prefix)
            }
            Repair::ShortCheckCorrected { given, corrected }
            | Repair::LongCheckCorrected { given, corrected } => {
                write!(f, "{}: '{}' -> '{}'", self.rule(), given, corrected)
            }
            Repair::PrefixedShortUnwrapped { recomputed } => {
                if *recomputed {
                    write!(f, "{}: check recomputed", self.rule())
                } else {
                    f.write_str(self.rule())
                }
            }
        }
    }
}

/// Canonicalization result
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub isbn: Isbn,
    /// Repair applied, if the literal input did not validate
    pub repair: Option<Repair>,
}

impl Resolved {
    fn exact(isbn: Isbn) -> Self {
        Resolved { isbn, repair: None }
    }

    fn repaired(isbn: Isbn, repair: Repair) -> Self {
        Resolved {
            isbn,
            repair: Some(repair),
        }
    }

    #[inline]
    pub fn was_repaired(&self) -> bool {
        self.repair.is_some()
    }
}

/// Remove separators and uppercase a trailing `x`
pub fn normalize(raw: &str) -> String {
    let mut s: String = raw.chars().filter(|c| !SEPARATORS.contains(c)).collect();
    if s.ends_with('x') {
        s.pop();
        s.push('X');
    }
    s
}

/// Canonicalize a candidate
pub fn canonicalize(candidate: &Candidate) -> TsundokuResult<Resolved> {
    canonicalize_str(&candidate.raw)
}

/// Canonicalize raw identifier text
pub fn canonicalize_str(raw: &str) -> TsundokuResult<Resolved> {
    let s = normalize(raw);
    let bytes = s.as_bytes();
    let invalid = |reason: &str| TsundokuError::InvalidFormat(format!("{}: {}", raw, reason));

    let body_ok = match bytes.split_last() {
        Some((&last, head)) => all_digits(head) && (last.is_ascii_digit() || last == b'X'),
        None => false,
    };
    if !body_ok {
        return Err(invalid("unexpected character"));
    }

    let resolved = match bytes.len() {
        SHORT_LEN if is_valid_isbn10(bytes) => Isbn::from_short(&s).map(Resolved::exact),
        SHORT_LEN => repair_short(bytes),
        LONG_LEN if is_valid_isbn13(bytes) => {
            if !has_bookland_prefix(bytes) {
                return Err(invalid("long form must start with 978 or 979"));
            }
            Isbn::from_long(&s).map(Resolved::exact)
        }
        LONG_LEN => repair_long(bytes),
        9 => complete_short(bytes),
        12 => complete_long(bytes),
        n => return Err(invalid(&format!("{} significant characters", n))),
    };

    match resolved {
        Some(r) if is_valid_isbn13(r.isbn.long().as_bytes()) => Ok(r),
        _ => Err(invalid("checksum failed and no repair applies")),
    }
}

fn ascii(bytes: Vec<u8>) -> Option<String> {
    String::from_utf8(bytes).ok()
}

fn complete_short(bytes: &[u8]) -> Option<Resolved> {
    if !all_digits(bytes) {
        return None;
    }
    let check = isbn10_check_char(bytes)?;
    let mut short = bytes.to_vec();
    short.push(check);
    if !is_valid_isbn10(&short) {
        return None;
    }
    let isbn = Isbn::from_short(&ascii(short)?)?;
    Some(Resolved::repaired(
        isbn,
        Repair::CompletedShort {
            check: check as char,
        },
    ))
}

fn complete_long(bytes: &[u8]) -> Option<Resolved> {
    if !all_digits(bytes) || !has_bookland_prefix(bytes) {
        return None;
    }
    let check = isbn13_check_digit(bytes)?;
    let mut long = bytes.to_vec();
    long.push(check);
    let isbn = Isbn::from_long(&ascii(long)?)?;
    Some(Resolved::repaired(
        isbn,
        Repair::CompletedLong {
            check: check as char,
        },
    ))
}

fn repair_short(bytes: &[u8]) -> Option<Resolved> {
    restore_long_prefix(bytes).or_else(|| correct_short_check(bytes))
}

fn repair_long(bytes: &[u8]) -> Option<Resolved> {
    unwrap_prefixed_short(bytes).or_else(|| correct_long_check(bytes))
}

/// Rule a
fn restore_long_prefix(bytes: &[u8]) -> Option<Resolved> {
    if !all_digits(bytes) {
        return None;
    }
    BOOKLAND_PREFIXES.iter().copied().find_map(|prefix| {
        let mut long = prefix.as_bytes().to_vec();
        long.extend_from_slice(bytes);
        if !is_valid_isbn13(&long) {
            return None;
        }
        let isbn = Isbn::from_long(&ascii(long)?)?;
        Some(Resolved::repaired(
            isbn,
            Repair::LongPrefixRestored { prefix },
        ))
    })
}

/// Rule b
fn correct_short_check(bytes: &[u8]) -> Option<Resolved> {
    let corrected = isbn10_check_char(&bytes[..9])?;
    let given = bytes[9];
    if corrected == given {
        return None;
    }
    let mut short = bytes[..9].to_vec();
    short.push(corrected);
    if !is_valid_isbn10(&short) {
        return None;
    }
    let isbn = Isbn::from_short(&ascii(short)?)?;
    Some(Resolved::repaired(
        isbn,
        Repair::ShortCheckCorrected {
            given: given as char,
            corrected: corrected as char,
        },
    ))
}

/// Rule c
fn unwrap_prefixed_short(bytes: &[u8]) -> Option<Resolved> {
    let rest = bytes.strip_prefix(BOOKLAND_978.as_bytes())?;
    if is_valid_isbn10(rest) {
        let isbn = Isbn::from_short(&ascii(rest.to_vec())?)?;
        return Some(Resolved::repaired(
            isbn,
            Repair::PrefixedShortUnwrapped { recomputed: false },
        ));
    }
    let mut short = rest[..9].to_vec();
    short.push(isbn10_check_char(&short)?);
    if !is_valid_isbn10(&short) {
        return None;
    }
    let isbn = Isbn::from_short(&ascii(short)?)?;
    Some(Resolved::repaired(
        isbn,
        Repair::PrefixedShortUnwrapped { recomputed: true },
    ))
}

/// Rule d
fn correct_long_check(bytes: &[u8]) -> Option<Resolved> {
    if !has_bookland_prefix(bytes) {
        return None;
    }
    let corrected = isbn13_check_digit(&bytes[..12])?;
    let given = bytes[12];
    if corrected == given {
        return None;
    }
    let mut long = bytes[..12].to_vec();
    long.push(corrected);
    let isbn = Isbn::from_long(&ascii(long)?)?;
    Some(Resolved::repaired(
        isbn,
        Repair::LongCheckCorrected {
            given: given as char,
            corrected: corrected as char,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{to_long, to_short};
    use proptest::prelude::*;

    fn long_of(raw: &str) -> String {
        canonicalize_str(raw).unwrap().isbn.long().to_string()
    }

    #[test]
    fn test_valid_short_is_exact() {
        let r = canonicalize_str("0-306-40615-2").unwrap();
        assert_eq!(r.isbn.long(), "9780306406157");
        assert_eq!(r.isbn.short().as_deref(), Some("0306406152"));
        assert!(!r.was_repaired());
    }

    #[test]
    fn test_valid_long_is_exact() {
        let r = canonicalize_str("978-4-87311-001-1").unwrap();
        assert_eq!(r.isbn.long(), "9784873110011");
        assert_eq!(r.repair, None);
    }

    #[test]
    fn test_lowercase_x_is_accepted() {
        let r = canonicalize_str("0-8044-2957-x").unwrap();
        assert_eq!(r.isbn.short().as_deref(), Some("080442957X"));
        assert!(!r.was_repaired());
    }

    #[test]
    fn test_hyphenated_short_with_bad_sum_restores_long_prefix() {
        // Sum is 203, 203 mod 11 = 5: literal check fails.
        // 978 + 4873110011 validates as a long form, so rule a fires.
        let r = canonicalize_str("4-87311-001-1").unwrap();
        assert_eq!(r.isbn.long(), "9784873110011");
        assert_eq!(r.repair, Some(Repair::LongPrefixRestored { prefix: "978" }));
        assert_eq!(r.isbn.short().as_deref(), Some("4873110017"));
    }

    #[test]
    fn test_short_check_corrected() {
        // 0306406152 with the check fat-fingered to 3
        let r = canonicalize_str("0306406153").unwrap();
        assert_eq!(r.isbn.short().as_deref(), Some("0306406152"));
        assert_eq!(
            r.repair,
            Some(Repair::ShortCheckCorrected {
                given: '3',
                corrected: '2'
            })
        );
    }

    #[test]
    fn test_979_prefix_restored() {
        // Tail of 9791032300824; 978 + tail does not validate
        let r = canonicalize_str("1032300824").unwrap();
        assert_eq!(r.isbn.long(), "9791032300824");
        assert_eq!(r.repair, Some(Repair::LongPrefixRestored { prefix: "979" }));
        assert!(r.isbn.short().is_none());
    }

    #[test]
    fn test_corrupted_long_check_digit() {
        let r = canonicalize_str("9784873110010").unwrap();
        assert_eq!(r.isbn.long(), "9784873110011");
        assert!(r.was_repaired());
        let sum: u32 = r
            .isbn
            .long()
            .bytes()
            .enumerate()
            .map(|(i, b)| (b - b'0') as u32 * if i % 2 == 0 { 1 } else { 3 })
            .sum();
        assert_eq!(sum % 10, 0);
    }

    #[test]
    fn test_prefixed_short_unwrapped_directly() {
        // 978 + valid ISBN-10 0306406152, check left unadjusted
        let r = canonicalize_str("9780306406152").unwrap();
        assert_eq!(r.isbn.long(), "9780306406157");
        assert_eq!(
            r.repair,
            Some(Repair::PrefixedShortUnwrapped { recomputed: false })
        );
    }

    #[test]
    fn test_prefixed_short_with_x() {
        let r = canonicalize_str("978080442957X").unwrap();
        assert_eq!(r.isbn.long(), "9780804429573");
        assert_eq!(
            r.repair,
            Some(Repair::PrefixedShortUnwrapped { recomputed: false })
        );
    }

    #[test]
    fn test_979_long_check_corrected() {
        let r = canonicalize_str("9791032300825").unwrap();
        assert_eq!(r.isbn.long(), "9791032300824");
        assert_eq!(
            r.repair,
            Some(Repair::LongCheckCorrected {
                given: '5',
                corrected: '4'
            })
        );
    }

    #[test]
    fn test_completion() {
        let r = canonicalize_str("030640615").unwrap();
        assert_eq!(r.isbn.short().as_deref(), Some("0306406152"));
        assert_eq!(r.repair, Some(Repair::CompletedShort { check: '2' }));

        let r = canonicalize_str("978487311001").unwrap();
        assert_eq!(r.isbn.long(), "9784873110011");
        assert_eq!(r.repair, Some(Repair::CompletedLong { check: '1' }));
    }

    #[test]
    fn test_rejections() {
        for raw in ["", "12345678901", "1234567890128", "123456789012", "12X4567890", "97848731100X1"] {
            let err = canonicalize_str(raw).unwrap_err();
            assert!(
                matches!(err, TsundokuError::InvalidFormat(_)),
                "{raw} should be InvalidFormat"
            );
        }
    }

    #[test]
    fn test_candidate_entry_point() {
        let candidate = Candidate::new("ISBN-less 9784873110011", 0);
        assert!(canonicalize(&candidate).is_err());
        assert_eq!(long_of("9784873110011"), "9784873110011");
    }

    #[test]
    fn test_repair_display() {
        let r = canonicalize_str("0306406153").unwrap();
        assert_eq!(
            r.repair.unwrap().to_string(),
            "correct-short-check: '3' -> '2'"
        );
    }

    fn raw_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            "[0-9]{9}",
            "[0-9]{9}[0-9X]",
            "97[89][0-9]{9}",
            "97[89][0-9]{10}",
            "[0-9]{13}",
            "[0-9 -]{8,16}",
        ]
    }

    proptest! {
        #[test]
        fn prop_accepted_output_always_validates(raw in raw_strategy()) {
            if let Ok(r) = canonicalize_str(&raw) {
                prop_assert!(is_valid_isbn13(r.isbn.long().as_bytes()));
                if let Some(short) = r.isbn.short() {
                    prop_assert!(is_valid_isbn10(short.as_bytes()));
                }
            }
        }

        #[test]
        fn prop_valid_short_round_trips(digits in "[0-9]{9}") {
            let mut short = digits.into_bytes();
            short.push(isbn10_check_char(&short).unwrap());
            let short = String::from_utf8(short).unwrap();
            let r = canonicalize_str(&short).unwrap();
            prop_assert!(r.repair.is_none());
            prop_assert!(is_valid_isbn13(r.isbn.long().as_bytes()));
            prop_assert_eq!(r.isbn.short(), Some(short));
        }

        #[test]
        fn prop_canonical_long_form_is_stable(digits in "[0-9]{9}") {
            let mut long = format!("978{}", digits).into_bytes();
            long.push(isbn13_check_digit(&long).unwrap());
            let long = String::from_utf8(long).unwrap();
            let again = to_long(&to_short(&long).unwrap()).unwrap();
            prop_assert_eq!(&again, &long);
            prop_assert_eq!(long_of(&again), long);
        }
    }
}
