//! Core data models.
//!
//! These types represent the spaces, items, and queries that flow through
//! the ingestion and retrieval pipeline. The content lifecycle is:
//!
//! ```text
//! save → Item(pending) → extract → embed → index → Item(ready, vector_ref)
//!                                                        ↓
//!                                   ask() → retrieval → Query{answer, sources}
//! ```
//!
//! # Type Relationships
//!
//! - A **[`Space`]** is a user-owned, named container grouping items.
//! - An **[`Item`]** is a single unit of content (message or file) inside a
//!   space, with a processing [`ItemStatus`] and, once indexed, a
//!   `vector_ref` pointing at its entry in the vector index.
//! - Per-kind fields live in the tagged **[`ItemDetails`]** variant; anything
//!   a future version needs goes into the `extra` overflow map instead of a
//!   schema change.
//! - A **[`Query`]** is an append-only record of one answered question with
//!   its ordered **[`QuerySource`]** list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user-owned, named container grouping items by topic or context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Space {
    /// UUID v4 primary key.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Human name, 1–50 characters.
    pub name: String,
    /// Optional description, up to 500 characters.
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of live items; derived from the item table, never stored.
    pub item_count: i64,
}

/// Item kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Message,
    File,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Message => "message",
            ItemKind::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "message" => Some(ItemKind::Message),
            "file" => Some(ItemKind::File),
            _ => None,
        }
    }
}

/// Processing status of an item.
///
/// `Ready` items always carry a live `vector_ref`; `Failed` items never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Ready,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Ready => "ready",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ItemStatus::Pending),
            "ready" => Some(ItemStatus::Ready),
            "failed" => Some(ItemStatus::Failed),
            _ => None,
        }
    }
}

/// Closed set of extractor input families.
///
/// Derived once from the declared MIME type (or filename extension) at save
/// time; the rest of the pipeline never re-inspects content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MimeFamily {
    Plain,
    Pdf,
    Docx,
    Image,
    Unknown,
}

impl MimeFamily {
    /// Classify a declared MIME type, falling back to the filename extension.
    pub fn classify(mime: &str, filename: &str) -> Self {
        match mime {
            "text/plain" | "text/markdown" => return MimeFamily::Plain,
            "application/pdf" => return MimeFamily::Pdf,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                return MimeFamily::Docx
            }
            m if m.starts_with("image/") => return MimeFamily::Image,
            _ => {}
        }
        match filename.rsplit('.').next().map(|e| e.to_ascii_lowercase()) {
            Some(ext) if ext == "txt" || ext == "md" || ext == "text" => MimeFamily::Plain,
            Some(ext) if ext == "pdf" => MimeFamily::Pdf,
            Some(ext) if ext == "docx" => MimeFamily::Docx,
            Some(ext) if ext == "png" || ext == "jpg" || ext == "jpeg" => MimeFamily::Image,
            _ => MimeFamily::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MimeFamily::Plain => "plain",
            MimeFamily::Pdf => "pdf",
            MimeFamily::Docx => "docx",
            MimeFamily::Image => "image",
            MimeFamily::Unknown => "unknown",
        }
    }
}

/// Per-kind item fields, tagged by kind.
///
/// Known fields are typed; the `extra` map is the forward-compatibility
/// overflow so new metadata never turns into stringly-typed tags scattered
/// through call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemDetails {
    Message {
        #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
        extra: Map<String, Value>,
    },
    File {
        original_name: String,
        size_bytes: u64,
        mime: MimeFamily,
        /// True when the text came out of OCR rather than native extraction.
        ocr: bool,
        #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
        extra: Map<String, Value>,
    },
}

impl ItemDetails {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemDetails::Message { .. } => ItemKind::Message,
            ItemDetails::File { .. } => ItemKind::File,
        }
    }
}

/// A single unit of content within a space.
///
/// For messages, `content` is the text itself; for files it is the storage
/// reference (path relative to the user's files root) of the canonical
/// bytes, and `extracted_text` holds what the extractor produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// UUID v4 primary key.
    pub id: String,
    pub space_id: String,
    pub kind: ItemKind,
    pub content: String,
    pub details: ItemDetails,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: ItemStatus,
    /// Set when `status == Failed`; one of the extraction kinds plus detail.
    pub failure_reason: Option<String>,
    /// Internal id inside the vector index; null until indexed.
    pub vector_ref: Option<i64>,
    /// Extracted text for files (messages answer from `content` directly).
    pub extracted_text: Option<String>,
}

impl Item {
    /// The text retrieval and context assembly read from.
    pub fn body_text(&self) -> &str {
        match self.kind {
            ItemKind::Message => &self.content,
            ItemKind::File => self.extracted_text.as_deref().unwrap_or(""),
        }
    }
}

/// One source reference attached to a persisted query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySource {
    pub item_id: String,
    pub kind: ItemKind,
    /// Content preview, truncated to 240 characters for display.
    pub snippet: String,
    /// Inner-product similarity in `[-1, 1]`.
    pub score: f32,
}

/// An answered question, persisted append-only per space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// UUID v4 primary key.
    pub id: String,
    pub space_id: String,
    pub question: String,
    pub answer: String,
    /// Retrieval-ordered sources actually used in the prompt.
    pub sources: Vec<QuerySource>,
    pub created_at: DateTime<Utc>,
}

/// A scored item returned by scoped or global search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub item: Item,
    pub score: f32,
}
