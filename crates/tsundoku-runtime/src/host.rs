//! Local host adapters
//!
//! File- and stdio-backed collaborators for running the pipeline without
//! any external service: a JSON catalog as the lookup, a CSV file as the
//! spreadsheet and stdout as the chat.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use tsundoku_core::{CallOutcome, TsundokuError, TsundokuResult};
use tsundoku_isbn::{canonicalize_str, Isbn};

use crate::batch::SHEET_COLUMNS;
use crate::collaborators::{BookLookup, BookRecord, Chat, MessageHandle, Sheet};

/// Catalog loaded from a JSON object keyed by ISBN (any accepted form)
#[derive(Debug, Default)]
pub struct CatalogLookup {
    books: HashMap<Isbn, BookRecord>,
}

impl CatalogLookup {
    pub fn from_records(records: impl IntoIterator<Item = (Isbn, BookRecord)>) -> Self {
        CatalogLookup {
            books: records.into_iter().collect(),
        }
    }

    /// Parse catalog JSON; keys that do not canonicalize are skipped
    pub fn from_json(bytes: &[u8]) -> TsundokuResult<Self> {
        let raw: HashMap<String, BookRecord> = serde_json::from_slice(bytes)
            .map_err(|e| TsundokuError::Config(format!("catalog: {}", e)))?;
        let mut books = HashMap::with_capacity(raw.len());
        for (key, record) in raw {
            match canonicalize_str(&key) {
                Ok(resolved) => {
                    books.insert(resolved.isbn, record);
                }
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping catalog entry"),
            }
        }
        Ok(CatalogLookup { books })
    }

    /// Load from a file; a missing file is an empty catalog
    pub async fn load(path: &Path) -> TsundokuResult<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Self::from_json(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "catalog not found, every lookup will miss");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

#[async_trait]
impl BookLookup for CatalogLookup {
    async fn lookup(&self, isbn: &Isbn) -> Result<Option<BookRecord>, CallOutcome> {
        Ok(self.books.get(isbn).cloned())
    }
}

/// Append-only CSV spreadsheet
#[derive(Debug)]
pub struct CsvSheet {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvSheet {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvSheet {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, fields: &[String]) -> std::io::Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut out = String::new();
        if file.metadata().await?.len() == 0 {
            out.push_str(&csv_line(SHEET_COLUMNS.iter().copied()));
        }
        out.push_str(&csv_line(fields.iter().map(String::as_str)));
        file.write_all(out.as_bytes()).await?;
        file.flush().await
    }
}

#[async_trait]
impl Sheet for CsvSheet {
    async fn append_row(&self, fields: &[String]) -> Result<(), CallOutcome> {
        self.append(fields)
            .await
            .map_err(|e| CallOutcome::failure(format!("sheet append: {}", e)))
    }
}

fn csv_field(field: &str) -> String {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn csv_line<'a>(fields: impl Iterator<Item = &'a str>) -> String {
    let mut line = fields.map(csv_field).collect::<Vec<_>>().join(",");
    line.push('\n');
    line
}

/// Chat that prints replies to stdout
#[derive(Debug, Default)]
pub struct StdoutChat;

#[async_trait]
impl Chat for StdoutChat {
    async fn reply(&self, to: &MessageHandle, text: &str) -> Result<(), CallOutcome> {
        let mut out = tokio::io::stdout();
        let message = format!("[reply to {}]\n{}\n", to.0, text);
        out.write_all(message.as_bytes())
            .await
            .map_err(|e| CallOutcome::failure(format!("stdout: {}", e)))?;
        out.flush()
            .await
            .map_err(|e| CallOutcome::failure(format!("stdout: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_catalog_keys_are_canonicalized() {
        let json = br#"{
            "4-87311-001-7": {"title": "Programming Perl", "publisher": "O'Reilly Japan", "price": 4800},
            "9780306406157": {"title": "Reference"},
            "not-an-isbn": {"title": "Skipped"}
        }"#;
        let catalog = CatalogLookup::from_json(json).unwrap();
        assert_eq!(catalog.len(), 2);

        let isbn = Isbn::from_long("9784873110011").unwrap();
        let found = catalog.lookup(&isbn).await.unwrap().unwrap();
        assert_eq!(found.price, Some(4800));
    }

    #[test]
    fn test_bad_catalog_json_is_config_error() {
        assert!(matches!(
            CatalogLookup::from_json(b"[1,2,3]"),
            Err(TsundokuError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_catalog_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = CatalogLookup::load(&dir.path().join("none.json")).await.unwrap();
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_csv_sheet_writes_header_once_and_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let sheet = CsvSheet::new(dir.path().join("orders.csv"));

        let row: Vec<String> = ["a", "b,c", "say \"hi\""].iter().map(|s| s.to_string()).collect();
        sheet.append_row(&row).await.unwrap();
        sheet.append_row(&row).await.unwrap();

        let text = std::fs::read_to_string(sheet.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], SHEET_COLUMNS.join(","));
        assert_eq!(lines[1], r#"a,"b,c","say ""hi""""#);
    }

    #[tokio::test]
    async fn test_csv_sheet_failure_is_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let sheet = CsvSheet::new(dir.path().join("missing").join("orders.csv"));
        let err = sheet.append_row(&["x".to_string()]).await.unwrap_err();
        assert!(!err.succeeded);
        assert!(err.describe().starts_with("sheet append"));
    }
}
