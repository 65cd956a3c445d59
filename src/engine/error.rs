//! Error types for fetching and extraction.
//!
//! `FetchError` is a per-request failure: the caller decides whether it skips a
//! chapter or ends the run. `ScraperError` is what a whole run returns.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single logical retrieval (after retries are exhausted).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: could not reach {url} after {attempts} attempt(s): {source}")]
    Network {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The response arrived but is not the structured data that was expected.
    #[error("Invalid JSON from {url}: {reason}")]
    InvalidJson { url: String, reason: String },

    #[error("Timed out after {waited_secs}s waiting for content at {url}{}", snapshot_note(.snapshot))]
    BrowserTimeout {
        url: String,
        waited_secs: u64,
        snapshot: Option<PathBuf>,
    },

    #[error("Browser error at {url}: {reason}{}", snapshot_note(.snapshot))]
    Browser {
        url: String,
        reason: String,
        snapshot: Option<PathBuf>,
    },

    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

fn snapshot_note(snapshot: &Option<PathBuf>) -> String {
    match snapshot {
        Some(path) => format!(" (snapshot: {})", path.display()),
        None => String::new(),
    }
}

/// Run-level scraper error.
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Unsupported site: no profile matches host '{host}'.")]
    UnsupportedSite { host: String },

    #[error("Invalid pattern {pattern:?} in site profile: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Could not find a book id in {url}.")]
    MissingBookId { url: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("No chapters found at {url} (link selector {selector:?}).")]
    NoChaptersFound { url: String, selector: String },

    #[error("Chapter range {start}-{end} selects nothing from {total} chapter(s).")]
    EmptyRange {
        start: usize,
        end: usize,
        total: usize,
    },

    #[error("No chapter content collected ({attempted} chapter(s) attempted).")]
    NoContentCollected { attempted: usize },

    /// A chapter failed while a browser session was in use; the session is no longer trusted.
    #[error("Chapter '{title}' failed at {url}; aborting run: {source}")]
    ChapterAborted {
        title: String,
        url: String,
        #[source]
        source: Box<ScraperError>,
    },

    #[error("Could not find content container at {url} (tried {selectors}).")]
    MissingContent { url: String, selectors: String },

    #[error("Chapter at {url} has no text after cleaning.")]
    EmptyChapter { url: String },

    #[error("Site '{host}' requires a browser session; rebuild with `--features browser`.")]
    BrowserRequired { host: String },

    #[error("Checkpoint {path}: {reason}")]
    Checkpoint { path: PathBuf, reason: String },
}
