//! Candidate extraction grammar
//!
//! One grammar for every inbound message:
//!
//! ```text
//! match  := [token] run
//! token  := "ISBN" [("-" | " ")] ["10" | "13"] [":"]        (case-insensitive)
//! run    := group (sep group)*
//! group  := digit+ ["X"]
//! sep    := " " | "-" | ":"
//! ```
//!
//! Digits are ASCII only. A run glued to an ASCII letter or to any digit
//! (full-width included) on either side is discarded (unless the left
//! neighbour is the token). Hyphens and colons bind groups
//! tightly; spaces are weak: a run is cut at spaces into chunks and, left to
//! right, the longest chunk span whose significant length is 13, 12, 10 or 9
//! becomes a candidate. Only when a run yields no such span is an
//! 11-character span taken (it will fail canonicalization and be reported).
//! This keeps "4873110011 4873110011" as two candidates and drops a stray
//! quantity in "4873110011 2".
//!
//! In `Lenient` mode bare digit runs qualify; `PrefixedOnly` additionally
//! requires either the token or a `978`/`979` start.

use std::collections::VecDeque;
use std::sync::LazyLock;

use regex::{CaptureMatches, Regex};

use crate::checksum::{BOOKLAND_PREFIXES, LONG_LEN};

const CANDIDATE_PATTERN: &str =
    r"(?i)(?P<token>(?-u:\b)isbn(?:[- ]?1[03])?[ \t]*:?[ \t]*)?(?P<run>[0-9]+x?(?:[- :][0-9]+x?)*)";

static CANDIDATE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(CANDIDATE_PATTERN).expect("candidate grammar is a valid regex"));

/// Separator characters allowed inside a run
pub const SEPARATORS: [char; 3] = [' ', '-', ':'];

/// Shortest significant length that can become a candidate
pub const MIN_CANDIDATE_LEN: usize = 9;

/// Preferred span lengths: complete or one-short-of-complete identifiers
const PREFERRED_LENGTHS: [usize; 4] = [9, 10, 12, 13];

/// Raw identifier text found in a message
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Candidate {
    /// Text exactly as typed (separators included)
    pub raw: String,
    /// Byte offset of `raw` in the source text
    pub offset: usize,
    /// Whether an `ISBN` token preceded it
    pub prefixed: bool,
}

impl Candidate {
    pub fn new(raw: impl Into<String>, offset: usize) -> Self {
        Candidate {
            raw: raw.into(),
            offset,
            prefixed: false,
        }
    }

    /// Number of digit / check characters
    pub fn significant_len(&self) -> usize {
        significant_len(&self.raw)
    }
}

fn significant_len(s: &str) -> usize {
    s.chars().filter(|c| !SEPARATORS.contains(c)).count()
}

/// Extraction strictness
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExtractMode {
    /// Bare digit runs qualify
    #[default]
    Lenient,
    /// Require the `ISBN` token or a bookland prefix
    PrefixedOnly,
}

/// Grammar configuration
#[derive(Clone, Copy, Debug, Default)]
pub struct GrammarConfig {
    pub mode: ExtractMode,
}

impl GrammarConfig {
    pub fn lenient() -> Self {
        GrammarConfig {
            mode: ExtractMode::Lenient,
        }
    }

    pub fn prefixed_only() -> Self {
        GrammarConfig {
            mode: ExtractMode::PrefixedOnly,
        }
    }
}

/// Extract candidates with the default (lenient) grammar
pub fn extract(text: &str) -> Candidates<'_> {
    extract_with(text, GrammarConfig::default())
}

/// Extract candidates with an explicit grammar configuration
pub fn extract_with(text: &str, config: GrammarConfig) -> Candidates<'_> {
    Candidates {
        text,
        config,
        captures: CANDIDATE_REGEX.captures_iter(text),
        pending: VecDeque::new(),
    }
}

/// Lazy, left-to-right, single-pass candidate sequence
pub struct Candidates<'t> {
    text: &'t str,
    config: GrammarConfig,
    captures: CaptureMatches<'static, 't>,
    pending: VecDeque<Candidate>,
}

impl<'t> Candidates<'t> {
    fn glued(&self, start: usize, end: usize, prefixed: bool) -> bool {
        let before = self.text[..start].chars().next_back();
        let after = self.text[end..].chars().next();
        let sticky = |c: char| c.is_ascii_alphanumeric() || c.is_numeric();
        let glued_before = !prefixed && before.is_some_and(sticky);
        let glued_after = after.is_some_and(sticky);
        glued_before || glued_after
    }

    fn admitted(&self, candidate: &Candidate) -> bool {
        match self.config.mode {
            ExtractMode::Lenient => true,
            ExtractMode::PrefixedOnly => {
                candidate.prefixed
                    || BOOKLAND_PREFIXES
                        .iter()
                        .any(|p| candidate.raw.starts_with(p))
            }
        }
    }

    fn queue_run(&mut self, run: &str, run_offset: usize, prefixed: bool) {
        for (start, end) in select_spans(run) {
            let candidate = Candidate {
                raw: run[start..end].to_string(),
                offset: run_offset + start,
                prefixed: prefixed && start == 0,
            };
            if self.admitted(&candidate) {
                self.pending.push_back(candidate);
            }
        }
    }
}

impl<'t> Iterator for Candidates<'t> {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            if let Some(candidate) = self.pending.pop_front() {
                return Some(candidate);
            }
            let caps = self.captures.next()?;
            let Some(run) = caps.name("run") else {
                continue;
            };
            let prefixed = caps.name("token").is_some();
            if significant_len(run.as_str()) < MIN_CANDIDATE_LEN
                || self.glued(run.start(), run.end(), prefixed)
            {
                continue;
            }
            self.queue_run(run.as_str(), run.start(), prefixed);
        }
    }
}

/// Byte ranges of the space-delimited chunks of a run
fn space_chunks(run: &str) -> Vec<(usize, usize)> {
    let mut chunks = Vec::new();
    let mut start = 0;
    for (i, _) in run.match_indices(' ') {
        chunks.push((start, i));
        start = i + 1;
    }
    chunks.push((start, run.len()));
    chunks
}

/// Choose candidate spans within a run, left to right
///
/// First pass takes preferred lengths only; an 11-character span is taken
/// only when the whole run yields nothing preferred.
fn select_spans(run: &str) -> Vec<(usize, usize)> {
    let chunks = space_chunks(run);
    let lens: Vec<usize> = chunks
        .iter()
        .map(|&(s, e)| significant_len(&run[s..e]))
        .collect();

    let preferred = spans_with(&chunks, &lens, |len| PREFERRED_LENGTHS.contains(&len));
    if !preferred.is_empty() {
        return preferred;
    }
    spans_with(&chunks, &lens, |len| len >= MIN_CANDIDATE_LEN)
}

fn spans_with(
    chunks: &[(usize, usize)],
    lens: &[usize],
    accept: impl Fn(usize) -> bool,
) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i < chunks.len() {
        let mut longest = None;
        let mut total = 0;
        for (j, len) in lens.iter().enumerate().skip(i) {
            total += len;
            if total > LONG_LEN {
                break;
            }
            if accept(total) {
                longest = Some(j);
            }
        }
        match longest {
            Some(j) => {
                spans.push((chunks[i].0, chunks[j].1));
                i = j + 1;
            }
            None => i += 1,
        }
    }
    spans
}
