//! Scripted collaborators
//!
//! Each collaborator answers from a fixed script: queued failures are
//! returned first, in order, then the happy path. Calls are recorded so
//! tests can assert on exactly what reached the outside world.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use tsundoku_core::CallOutcome;
use tsundoku_isbn::Isbn;
use tsundoku_runtime::{BookLookup, BookRecord, Chat, MessageHandle, Sheet};

/// Lookup backed by an in-memory catalog
#[derive(Debug, Default)]
pub struct ScriptedLookup {
    books: HashMap<Isbn, BookRecord>,
    failures: Mutex<VecDeque<CallOutcome>>,
    failures_for: Mutex<HashMap<Isbn, VecDeque<CallOutcome>>>,
    delay: Option<Duration>,
    calls: AtomicU32,
    seen: Mutex<Vec<Isbn>>,
}

impl ScriptedLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a catalog entry; `long` must be a valid long form
    pub fn with_book(mut self, long: &str, title: &str) -> Self {
        if let Some(isbn) = Isbn::from_long(long) {
            self.books.insert(
                isbn,
                BookRecord {
                    title: title.to_string(),
                    publisher: "Tsundoku Press".to_string(),
                    price: Some(1200),
                },
            );
        }
        self
    }

    /// Every call takes this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_next(&self, outcome: CallOutcome) {
        self.failures.lock().push_back(outcome);
    }

    /// Fail the next lookup of `long` only
    pub fn fail_for(&self, long: &str, outcome: CallOutcome) {
        if let Some(isbn) = Isbn::from_long(long) {
            self.failures_for
                .lock()
                .entry(isbn)
                .or_default()
                .push_back(outcome);
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_failure(&self, isbn: &Isbn) -> Option<CallOutcome> {
        let targeted = self
            .failures_for
            .lock()
            .get_mut(isbn)
            .and_then(VecDeque::pop_front);
        targeted.or_else(|| self.failures.lock().pop_front())
    }

    /// Identifiers looked up, in call order
    pub fn seen(&self) -> Vec<Isbn> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl BookLookup for ScriptedLookup {
    async fn lookup(&self, isbn: &Isbn) -> Result<Option<BookRecord>, CallOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(*isbn);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = self.next_failure(isbn) {
            return Err(failure);
        }
        Ok(self.books.get(isbn).cloned())
    }
}

/// Sheet that keeps appended rows in memory
#[derive(Debug, Default)]
pub struct RecordingSheet {
    rows: Mutex<Vec<Vec<String>>>,
    failures: Mutex<VecDeque<CallOutcome>>,
    calls: AtomicU32,
}

impl RecordingSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, outcome: CallOutcome) {
        self.failures.lock().push_back(outcome);
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.rows.lock().clone()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sheet for RecordingSheet {
    async fn append_row(&self, fields: &[String]) -> Result<(), CallOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.failures.lock().pop_front() {
            return Err(failure);
        }
        self.rows.lock().push(fields.to_vec());
        Ok(())
    }
}

/// Chat that records replies and can refuse connections
#[derive(Debug, Default)]
pub struct RecordingChat {
    replies: Mutex<Vec<(MessageHandle, String)>>,
    reply_failures: Mutex<VecDeque<CallOutcome>>,
    connect_failures: Mutex<VecDeque<CallOutcome>>,
    connects: AtomicU32,
}

impl RecordingChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_reply(&self, outcome: CallOutcome) {
        self.reply_failures.lock().push_back(outcome);
    }

    pub fn fail_next_connect(&self, outcome: CallOutcome) {
        self.connect_failures.lock().push_back(outcome);
    }

    pub fn replies(&self) -> Vec<(MessageHandle, String)> {
        self.replies.lock().clone()
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Chat for RecordingChat {
    async fn connect(&self) -> Result<(), CallOutcome> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.connect_failures.lock().pop_front() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    async fn reply(&self, to: &MessageHandle, text: &str) -> Result<(), CallOutcome> {
        if let Some(failure) = self.reply_failures.lock().pop_front() {
            return Err(failure);
        }
        self.replies.lock().push((to.clone(), text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_lookup_replays_failures_first() {
        let lookup = ScriptedLookup::new().with_book("9784873110011", "Perl");
        lookup.fail_next(CallOutcome::http(503));
        let isbn = Isbn::from_long("9784873110011").unwrap();

        assert_eq!(lookup.lookup(&isbn).await, Err(CallOutcome::http(503)));
        assert_eq!(lookup.lookup(&isbn).await.unwrap().unwrap().title, "Perl");
        assert_eq!(lookup.calls(), 2);
        assert_eq!(lookup.seen(), vec![isbn, isbn]);
    }

    #[tokio::test]
    async fn test_targeted_failure_only_hits_its_isbn() {
        let lookup = ScriptedLookup::new();
        lookup.fail_for("9780306406157", CallOutcome::http(429));
        let other = Isbn::from_long("9784873110011").unwrap();
        let target = Isbn::from_long("9780306406157").unwrap();

        assert_eq!(lookup.lookup(&other).await, Ok(None));
        assert_eq!(lookup.lookup(&target).await, Err(CallOutcome::http(429)));
        assert_eq!(lookup.lookup(&target).await, Ok(None));
    }

    #[tokio::test]
    async fn test_recording_sheet_keeps_only_successes() {
        let sheet = RecordingSheet::new();
        sheet.fail_next(CallOutcome::failure("boom"));
        let row = vec!["a".to_string()];
        assert!(sheet.append_row(&row).await.is_err());
        assert!(sheet.append_row(&row).await.is_ok());
        assert_eq!(sheet.rows(), vec![row]);
        assert_eq!(sheet.calls(), 2);
    }
}
