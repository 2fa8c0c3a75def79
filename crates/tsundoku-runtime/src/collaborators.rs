//! External collaborators
//!
//! The runtime talks to three services it does not own. Each reports
//! failures as a `CallOutcome` so the dispatcher can classify them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tsundoku_core::CallOutcome;
use tsundoku_isbn::Isbn;

/// Bibliographic data for one identifier
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    pub title: String,
    #[serde(default)]
    pub publisher: String,
    /// Price in the smallest currency unit
    #[serde(default)]
    pub price: Option<u32>,
}

/// Opaque reference to the message being answered
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageHandle(pub String);

/// Inbound chat message
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub handle: MessageHandle,
    pub author: String,
    pub text: String,
}

/// Bibliographic lookup; `Ok(None)` is "not found", not a failure
#[async_trait]
pub trait BookLookup: Send + Sync {
    async fn lookup(&self, isbn: &Isbn) -> Result<Option<BookRecord>, CallOutcome>;
}

/// Spreadsheet backend
#[async_trait]
pub trait Sheet: Send + Sync {
    async fn append_row(&self, fields: &[String]) -> Result<(), CallOutcome>;
}

/// Chat platform
#[async_trait]
pub trait Chat: Send + Sync {
    /// Open the platform session
    async fn connect(&self) -> Result<(), CallOutcome> {
        Ok(())
    }

    async fn reply(&self, to: &MessageHandle, text: &str) -> Result<(), CallOutcome>;
}
