//! Tsundoku Bench - workload generators for the criterion suites
//!
//! Produces seeded order messages that look like what people actually
//! type: mixed surface forms, `ISBN` tokens, chatter, typos and repeats.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tsundoku_isbn::{isbn13_check_digit, Isbn};

/// Chatter mixed between identifiers
const FILLER: [&str; 6] = [
    "please order",
    "and also",
    "thanks!",
    "for the reading group,",
    "x2 if possible",
    "call me at 090-1234-5678",
];

/// Workload shape
#[derive(Clone, Debug)]
pub struct CorpusConfig {
    pub messages: usize,
    pub ids_per_message: usize,
    /// Probability that an identifier has a corrupted check character
    pub corrupt_rate: f64,
    /// Probability that an identifier repeats the previous one
    pub duplicate_rate: f64,
    pub seed: u64,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        CorpusConfig {
            messages: 100,
            ids_per_message: 5,
            corrupt_rate: 0.1,
            duplicate_rate: 0.1,
            seed: 42,
        }
    }
}

/// Random valid identifier
pub fn random_isbn(rng: &mut StdRng) -> Option<Isbn> {
    let prefix = if rng.gen_bool(0.8) { "978" } else { "979" };
    let mut long = format!("{}{:09}", prefix, rng.gen_range(0..1_000_000_000u64));
    let check = isbn13_check_digit(long.as_bytes())?;
    long.push(check as char);
    Isbn::from_long(&long)
}

/// One surface form of `isbn`, as a person might type it
pub fn surface_form(isbn: &Isbn, rng: &mut StdRng) -> String {
    match (rng.gen_range(0..4), isbn.short()) {
        (0, _) => isbn.long().to_string(),
        (1, _) => isbn.hyphenated(),
        (2, Some(short)) => short,
        _ => format!("ISBN {}", isbn.long()),
    }
}

/// Replace the last digit with a different one
fn corrupt(form: &str, rng: &mut StdRng) -> String {
    let mut out = form.to_string();
    if let Some(last) = out.pop() {
        let mut digit = char::from(b'0' + rng.gen_range(0..10u8));
        if digit == last {
            digit = if last == '9' { '0' } else { '9' };
        }
        out.push(digit);
    }
    out
}

/// Seeded order messages
pub fn generate(config: &CorpusConfig) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    (0..config.messages)
        .map(|_| {
            let mut parts = Vec::with_capacity(config.ids_per_message * 2);
            let mut previous: Option<String> = None;
            for _ in 0..config.ids_per_message {
                parts.push(FILLER[rng.gen_range(0..FILLER.len())].to_string());
                let form = match previous.take() {
                    Some(prev) if rng.gen_bool(config.duplicate_rate) => prev,
                    _ => match random_isbn(&mut rng) {
                        Some(isbn) => surface_form(&isbn, &mut rng),
                        None => continue,
                    },
                };
                let form = if rng.gen_bool(config.corrupt_rate) {
                    corrupt(&form, &mut rng)
                } else {
                    form
                };
                parts.push(format!("{},", form));
                previous = Some(form);
            }
            parts.join(" ")
        })
        .collect()
}
