//! Validated book identifier
//!
//! An `Isbn` is always held in its long (ISBN-13) form; the short form is
//! derived on demand. Construction only succeeds for checksum-valid input
//! with a bookland prefix, so every value in circulation validates.

use std::fmt;
use std::str;

use crate::checksum::{
    has_bookland_prefix, is_valid_isbn10, is_valid_isbn13, to_long, to_short, BOOKLAND_978,
    LONG_LEN,
};

/// Bookland prefix of a long form
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Prefix {
    /// `978` - convertible to ISBN-10
    P978,
    /// `979` - long form only
    P979,
}

/// Immutable, checksum-valid ISBN
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Isbn {
    long: [u8; LONG_LEN],
}

impl Isbn {
    /// Build from a valid ISBN-13 string
    pub fn from_long(long: &str) -> Option<Self> {
        let bytes = long.as_bytes();
        if !is_valid_isbn13(bytes) || !has_bookland_prefix(bytes) {
            return None;
        }
        let mut buf = [0u8; LONG_LEN];
        buf.copy_from_slice(bytes);
        Some(Isbn { long: buf })
    }

    /// Build from a valid ISBN-10 string
    pub fn from_short(short: &str) -> Option<Self> {
        if !is_valid_isbn10(short.as_bytes()) {
            return None;
        }
        Self::from_long(&to_long(short)?)
    }

    /// Canonical long form (ISBN-13)
    pub fn long(&self) -> &str {
        // Only ASCII digits are ever stored
        str::from_utf8(&self.long).unwrap_or_default()
    }

    /// Short form (ISBN-10), only for `978` identifiers
    pub fn short(&self) -> Option<String> {
        to_short(self.long())
    }

    pub fn prefix(&self) -> Prefix {
        if self.long.starts_with(BOOKLAND_978.as_bytes()) {
            Prefix::P978
        } else {
            Prefix::P979
        }
    }

    /// Long form with the conventional group-free hyphenation `978-XXXXXXXXX-C`
    pub fn hyphenated(&self) -> String {
        let long = self.long();
        format!("{}-{}-{}", &long[..3], &long[3..12], &long[12..])
    }
}

impl fmt::Debug for Isbn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Isbn({})", self.long())
    }
}

impl fmt::Display for Isbn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.long())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_short_derives_long() {
        let isbn = Isbn::from_short("0306406152").unwrap();
        assert_eq!(isbn.long(), "9780306406157");
        assert_eq!(isbn.short().as_deref(), Some("0306406152"));
        assert_eq!(isbn.prefix(), Prefix::P978);
    }

    #[test]
    fn test_from_long_rejects_bad_input() {
        assert!(Isbn::from_long("9784873110010").is_none());
        assert!(Isbn::from_long("978487311001").is_none());
        // Checksum-valid but outside bookland
        assert!(Isbn::from_long("1234567890128").is_none());
    }

    #[test]
    fn test_979_identifier() {
        let isbn = Isbn::from_long("9791032300824").unwrap();
        assert_eq!(isbn.prefix(), Prefix::P979);
        assert!(isbn.short().is_none());
    }

    #[test]
    fn test_display_and_hyphenation() {
        let isbn = Isbn::from_long("9784873110011").unwrap();
        assert_eq!(isbn.to_string(), "9784873110011");
        assert_eq!(isbn.hyphenated(), "978-487311001-1");
        assert_eq!(format!("{:?}", isbn), "Isbn(9784873110011)");
    }
}
