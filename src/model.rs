//! Data model shared by the extractors, the orchestrator and the EPUB assembler.
//!
//! `BookRecord` is built once from the metadata page and never changed afterwards.
//! `ChapterRef` is one entry of the chapter list; `ChapterContent` is a chapter
//! after normalization, ready for assembly.

use serde::{Deserialize, Serialize};

/// Title used when no metadata rule yields a value.
pub const UNKNOWN_TITLE: &str = "Unknown Title";
/// Author used when no metadata rule yields a value.
pub const UNKNOWN_AUTHOR: &str = "Unknown Author";

/// Book-level metadata extracted from one fetched document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookRecord {
    pub title: String,
    pub author: String,
    /// Synopsis with any `简介：` label removed. Empty when the page has none.
    pub description: String,
    /// Serialization status (e.g. 连载 / 完本) when the site exposes it.
    pub status: Option<String>,
    /// Absolute cover image URL; `None` when absent or not resolvable.
    pub cover_url: Option<String>,
    /// Page the metadata was extracted from.
    pub source_url: String,
}

/// One chapter link from the chapter list. Position in the list is the chapter order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterRef {
    pub title: String,
    /// Absolute URL, unique within one book's list.
    pub url: String,
}

impl ChapterRef {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

/// Cleaned chapter text: title carried over from the `ChapterRef`, paragraphs in source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterContent {
    pub title: String,
    /// Never contains empty strings.
    pub paragraphs: Vec<String>,
}
