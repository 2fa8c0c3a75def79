//! ISBN-10 and ISBN-13 checksum arithmetic
//!
//! All functions work on ASCII bytes. Nothing here allocates except the
//! `to_long` / `to_short` conversions.
//!
//! ISBN-10: Σ digit\[i\]·(10−i) ≡ 0 (mod 11), last character may be `X` = 10
//! ISBN-13: Σ digit\[i\]·(1 if i even else 3) ≡ 0 (mod 10)

/// Length of the short (ISBN-10) form
pub const SHORT_LEN: usize = 10;
/// Length of the long (ISBN-13) form
pub const LONG_LEN: usize = 13;
/// Prefix that makes a long form convertible to a short form
pub const BOOKLAND_978: &str = "978";
/// Second bookland prefix; long-only
pub const BOOKLAND_979: &str = "979";
/// Long-form prefixes in the order they are tried
pub const BOOKLAND_PREFIXES: [&str; 2] = [BOOKLAND_978, BOOKLAND_979];

#[inline]
fn digit(b: u8) -> Option<u32> {
    if b.is_ascii_digit() {
        Some((b - b'0') as u32)
    } else {
        None
    }
}

#[inline]
pub fn all_digits(s: &[u8]) -> bool {
    s.iter().all(u8::is_ascii_digit)
}

/// Weighted ISBN-10 sum over a full 10-character string
/// Returns None for wrong length or misplaced `X`
pub fn isbn10_sum(s: &[u8]) -> Option<u32> {
    if s.len() != SHORT_LEN {
        return None;
    }
    let mut sum = 0;
    for (i, &b) in s.iter().enumerate() {
        let value = match (digit(b), i) {
            (Some(d), _) => d,
            (None, 9) if b == b'X' || b == b'x' => 10,
            _ => return None,
        };
        sum += value * (10 - i as u32);
    }
    Some(sum)
}

pub fn is_valid_isbn10(s: &[u8]) -> bool {
    isbn10_sum(s).is_some_and(|sum| sum % 11 == 0)
}

/// Check character for the first nine digits of an ISBN-10
pub fn isbn10_check_char(first9: &[u8]) -> Option<u8> {
    if first9.len() != SHORT_LEN - 1 {
        return None;
    }
    let mut sum = 0;
    for (i, &b) in first9.iter().enumerate() {
        sum += digit(b)? * (10 - i as u32);
    }
    match (11 - sum % 11) % 11 {
        10 => Some(b'X'),
        d => Some(b'0' + d as u8),
    }
}

/// Weighted ISBN-13 sum over a full 13-digit string
pub fn isbn13_sum(s: &[u8]) -> Option<u32> {
    if s.len() != LONG_LEN {
        return None;
    }
    weighted13(s)
}

fn weighted13(s: &[u8]) -> Option<u32> {
    let mut sum = 0;
    for (i, &b) in s.iter().enumerate() {
        let weight = if i % 2 == 0 { 1 } else { 3 };
        sum += digit(b)? * weight;
    }
    Some(sum)
}

pub fn is_valid_isbn13(s: &[u8]) -> bool {
    isbn13_sum(s).is_some_and(|sum| sum % 10 == 0)
}

/// Check digit for the first twelve digits of an ISBN-13
pub fn isbn13_check_digit(first12: &[u8]) -> Option<u8> {
    if first12.len() != LONG_LEN - 1 {
        return None;
    }
    let sum = weighted13(first12)?;
    Some(b'0' + ((10 - sum % 10) % 10) as u8)
}

/// True if a 13-character string starts with a bookland prefix
pub fn has_bookland_prefix(s: &[u8]) -> bool {
    BOOKLAND_PREFIXES
        .iter()
        .any(|p| s.starts_with(p.as_bytes()))
}

/// Short → long: `978` + first nine digits + recomputed check
/// Input must be a valid ISBN-10
pub fn to_long(short: &str) -> Option<String> {
    let bytes = short.as_bytes();
    if !is_valid_isbn10(bytes) {
        return None;
    }
    let mut long = Vec::with_capacity(LONG_LEN);
    long.extend_from_slice(BOOKLAND_978.as_bytes());
    long.extend_from_slice(&bytes[..9]);
    long.push(isbn13_check_digit(&long)?);
    String::from_utf8(long).ok()
}

/// Long → short: digits 3..12 + recomputed ISBN-10 check
/// Only valid `978` long forms convert
pub fn to_short(long: &str) -> Option<String> {
    let bytes = long.as_bytes();
    if !is_valid_isbn13(bytes) || !bytes.starts_with(BOOKLAND_978.as_bytes()) {
        return None;
    }
    let mut short = bytes[3..12].to_vec();
    short.push(isbn10_check_char(&short)?);
    String::from_utf8(short).ok()
}
