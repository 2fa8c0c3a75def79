//! Batch pipeline
//!
//! One inbound message is one batch:
//!
//! 1. extract candidates and deduplicate them
//! 2. per unique identifier, sequentially: check the gate, look it up,
//!    append a row, pause
//! 3. send one summary reply
//!
//! Once the gate is cooling, the remaining items are abandoned without
//! side effects. Rows already appended stay appended.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{sleep, timeout};

use tsundoku_core::CallOutcome;
use tsundoku_isbn::{dedup, extract_with, Accepted, Isbn, Repair};
use tsundoku_throttle::{DispatchOutcome, DispatchReport, Dispatcher};

use crate::collaborators::{BookLookup, BookRecord, Chat, InboundMessage, Sheet};
use crate::config::BatchConfig;

/// Spreadsheet column order
pub const SHEET_COLUMNS: [&str; 7] = [
    "ordered_at",
    "requester",
    "isbn",
    "title",
    "publisher",
    "price",
    "quantity",
];

/// Builds spreadsheet rows in `SHEET_COLUMNS` order
#[derive(Clone, Debug)]
pub struct RowBuilder {
    pub quantity: u32,
}

impl RowBuilder {
    pub fn build(
        &self,
        at: DateTime<Utc>,
        requester: &str,
        isbn: &Isbn,
        record: &BookRecord,
    ) -> Vec<String> {
        vec![
            at.format("%Y-%m-%d %H:%M:%S").to_string(),
            requester.to_string(),
            isbn.long().to_string(),
            record.title.clone(),
            record.publisher.clone(),
            record.price.map(|p| p.to_string()).unwrap_or_default(),
            self.quantity.to_string(),
        ]
    }
}

/// Identifier written to the sheet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registered {
    pub isbn: Isbn,
    pub title: String,
}

/// Identifier that needed a repair, with the text it was typed as
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepairNote {
    pub raw: String,
    pub isbn: Isbn,
    pub repair: Repair,
}

/// Outcome of one batch
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    pub registered: Vec<Registered>,
    pub not_found: Vec<Isbn>,
    /// Lookup or append exhausted its retries
    pub failed: Vec<Isbn>,
    /// Not attempted because the gate was cooling
    pub abandoned: Vec<Isbn>,
    pub repaired: Vec<RepairNote>,
    /// Raw text of candidates that failed canonicalization
    pub format_errors: Vec<String>,
    pub duplicates: usize,
    pub rate_limited: bool,
    /// Reply text, if anything was worth answering
    pub reply: Option<String>,
    pub reply_delivered: bool,
}

impl BatchReport {
    /// No candidates at all: the message was not an order
    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
            && self.not_found.is_empty()
            && self.failed.is_empty()
            && self.abandoned.is_empty()
            && self.format_errors.is_empty()
    }
}

enum ItemResult {
    Registered(Registered),
    NotFound,
    Failed,
    RateLimited,
}

/// Runs batches against the collaborators, sequentially
pub struct BatchProcessor {
    dispatcher: Arc<Dispatcher>,
    lookup: Arc<dyn BookLookup>,
    sheet: Arc<dyn Sheet>,
    chat: Arc<dyn Chat>,
    config: BatchConfig,
    rows: RowBuilder,
}

impl BatchProcessor {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        lookup: Arc<dyn BookLookup>,
        sheet: Arc<dyn Sheet>,
        chat: Arc<dyn Chat>,
        config: BatchConfig,
    ) -> Self {
        let rows = RowBuilder {
            quantity: config.default_quantity,
        };
        BatchProcessor {
            dispatcher,
            lookup,
            sheet,
            chat,
            config,
            rows,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Process one message end to end
    pub async fn process(&self, message: &InboundMessage) -> BatchReport {
        let batch = dedup(extract_with(&message.text, self.config.grammar));
        let mut report = BatchReport {
            duplicates: batch.duplicates.len(),
            format_errors: batch
                .rejected
                .iter()
                .map(|r| r.candidate.raw.clone())
                .collect(),
            ..Default::default()
        };

        let total = batch.unique.len();
        for (index, accepted) in batch.unique.iter().enumerate() {
            let isbn = accepted.isbn();
            if report.rate_limited || self.dispatcher.context().active_cooldown().is_some() {
                report.rate_limited = true;
                report.abandoned.push(isbn);
                continue;
            }

            note_repair(&mut report, accepted);
            match self.process_item(&message.author, &isbn).await {
                ItemResult::Registered(r) => report.registered.push(r),
                ItemResult::NotFound => report.not_found.push(isbn),
                ItemResult::Failed => report.failed.push(isbn),
                ItemResult::RateLimited => {
                    report.rate_limited = true;
                    report.abandoned.push(isbn);
                    continue;
                }
            }

            if index + 1 < total && !self.config.item_pause.is_zero() {
                sleep(self.config.item_pause).await;
            }
        }

        tracing::info!(
            message = %message.handle.0,
            registered = report.registered.len(),
            not_found = report.not_found.len(),
            failed = report.failed.len(),
            abandoned = report.abandoned.len(),
            format_errors = report.format_errors.len(),
            "batch processed"
        );

        report.reply = compose_reply(&report, self.config.max_error_examples);
        if let Some(text) = &report.reply {
            let chat = &self.chat;
            let handle = &message.handle;
            let sent = self
                .dispatcher
                .call("reply", || async move { chat.reply(handle, text).await })
                .await;
            report.reply_delivered = sent.succeeded();
            if sent.is_rate_limited() {
                report.rate_limited = true;
            }
        }
        report
    }

    async fn process_item(&self, requester: &str, isbn: &Isbn) -> ItemResult {
        let lookup = &self.lookup;
        let limit = self.config.lookup_timeout;
        let found = self
            .dispatcher
            .call("lookup", || async move {
                match timeout(limit, lookup.lookup(isbn)).await {
                    Ok(result) => result,
                    Err(_) => Err(CallOutcome::timeout(limit)),
                }
            })
            .await;
        note_undelivered("lookup", isbn, &found);

        let record = match found.outcome {
            DispatchOutcome::Delivered(Some(record)) => record,
            DispatchOutcome::Delivered(None) => {
                tracing::info!(isbn = %isbn, "not in catalog");
                return ItemResult::NotFound;
            }
            DispatchOutcome::RateLimited(_) => return ItemResult::RateLimited,
            DispatchOutcome::Exhausted(_) => return ItemResult::Failed,
        };

        let row = self
            .rows
            .build(self.dispatcher.context().now(), requester, isbn, &record);
        let sheet = &self.sheet;
        let row = &row;
        let appended = self
            .dispatcher
            .call("append", || async move { sheet.append_row(row).await })
            .await;
        note_undelivered("append", isbn, &appended);

        match appended.outcome {
            DispatchOutcome::Delivered(()) => {
                tracing::info!(isbn = %isbn, title = %record.title, "registered");
                ItemResult::Registered(Registered {
                    isbn: *isbn,
                    title: record.title,
                })
            }
            DispatchOutcome::RateLimited(_) => ItemResult::RateLimited,
            DispatchOutcome::Exhausted(_) => ItemResult::Failed,
        }
    }
}

fn note_undelivered<T>(step: &str, isbn: &Isbn, report: &DispatchReport<T>) {
    if let Some(err) = report.error() {
        tracing::warn!(
            step,
            isbn = %isbn,
            class = ?err.class(),
            error = %err,
            "item not completed"
        );
    }
}

fn note_repair(report: &mut BatchReport, accepted: &Accepted) {
    if let Some(repair) = accepted.resolved.repair {
        report.repaired.push(RepairNote {
            raw: accepted.candidate.raw.clone(),
            isbn: accepted.isbn(),
            repair,
        });
    }
}

fn join_isbns(isbns: &[Isbn]) -> String {
    isbns
        .iter()
        .map(|i| i.long().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Summary reply for a batch; `None` when the message held no candidates
pub fn compose_reply(report: &BatchReport, max_error_examples: usize) -> Option<String> {
    if report.is_empty() {
        return None;
    }

    let mut lines = Vec::new();
    if !report.registered.is_empty() {
        lines.push(format!("Registered {} book(s):", report.registered.len()));
        for r in &report.registered {
            lines.push(format!("- {} ({})", r.title, r.isbn));
        }
    }
    for note in &report.repaired {
        lines.push(format!(
            "Corrected {} to {} ({})",
            note.raw,
            note.isbn,
            note.repair.rule()
        ));
    }
    if !report.not_found.is_empty() {
        lines.push(format!("Not found: {}", join_isbns(&report.not_found)));
    }
    if !report.failed.is_empty() {
        lines.push(format!(
            "Could not register, please retry later: {}",
            join_isbns(&report.failed)
        ));
    }
    if !report.abandoned.is_empty() {
        lines.push(format!(
            "Paused by a rate limit, not processed: {}",
            join_isbns(&report.abandoned)
        ));
    }
    if !report.format_errors.is_empty() {
        let shown: Vec<&str> = report
            .format_errors
            .iter()
            .take(max_error_examples)
            .map(String::as_str)
            .collect();
        let more = report.format_errors.len() - shown.len();
        let mut line = format!("Invalid ISBN: {}", shown.join(", "));
        if more > 0 {
            line.push_str(&format!(" (and {} more)", more));
        }
        lines.push(line);
    }
    Some(lines.join("\n"))
}
