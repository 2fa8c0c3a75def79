//! Batch deduplication
//!
//! Collapses surface forms of the same identifier to their first
//! occurrence. Candidates that fail canonicalization are reported as
//! rejections and never count as duplicates.

use std::collections::HashSet;

use tsundoku_core::TsundokuError;

use crate::canonical::{canonicalize, Resolved};
use crate::grammar::Candidate;
use crate::isbn::Isbn;

/// A candidate that canonicalized successfully
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Accepted {
    pub candidate: Candidate,
    pub resolved: Resolved,
}

impl Accepted {
    #[inline]
    pub fn isbn(&self) -> Isbn {
        self.resolved.isbn
    }
}

/// A candidate that failed canonicalization
#[derive(Debug)]
pub struct Rejected {
    pub candidate: Candidate,
    pub reason: TsundokuError,
}

/// Outcome of deduplicating one batch
#[derive(Debug, Default)]
pub struct Deduplicated {
    /// First occurrence of each identifier, in input order
    pub unique: Vec<Accepted>,
    /// Format errors, in input order
    pub rejected: Vec<Rejected>,
    /// Later occurrences dropped in favour of an earlier one
    pub duplicates: Vec<Accepted>,
}

impl Deduplicated {
    /// Unique identifiers in first-seen order
    pub fn isbns(&self) -> impl Iterator<Item = Isbn> + '_ {
        self.unique.iter().map(Accepted::isbn)
    }

    /// Accepted candidates, reusable as input for another pass
    pub fn into_candidates(self) -> Vec<Candidate> {
        self.unique.into_iter().map(|a| a.candidate).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.unique.is_empty() && self.rejected.is_empty()
    }
}

/// Canonicalize and deduplicate candidates, first occurrence wins
pub fn dedup<I>(candidates: I) -> Deduplicated
where
    I: IntoIterator<Item = Candidate>,
{
    let mut seen = HashSet::new();
    let mut out = Deduplicated::default();

    for candidate in candidates {
        match canonicalize(&candidate) {
            Ok(resolved) => {
                let accepted = Accepted {
                    candidate,
                    resolved,
                };
                if seen.insert(resolved.isbn) {
                    out.unique.push(accepted);
                } else {
                    out.duplicates.push(accepted);
                }
            }
            Err(reason) => out.rejected.push(Rejected { candidate, reason }),
        }
    }

    tracing::debug!(
        unique = out.unique.len(),
        duplicates = out.duplicates.len(),
        rejected = out.rejected.len(),
        "deduplicated batch"
    );
    out
}
