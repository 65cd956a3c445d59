//! Extraction engine: fetcher, site registry, extractors, normalizer and the
//! orchestrator that ties them together for one book.

pub mod chapters;
pub mod checkpoint;
pub mod client;
pub mod content;
mod error;
pub mod metadata;
pub mod orchestrator;
pub mod profile;
pub mod render;

#[cfg(feature = "browser")]
pub mod browser;

pub use checkpoint::Checkpoint;
pub use client::{PoliteClient, PoliteClientBuilder};
pub use error::{FetchError, ScraperError};
pub use orchestrator::{BookScraper, ChapterRange, ScrapeOptions, ScrapedBook};
pub use profile::{resolve, SiteProfile, PROFILES};
pub use render::Renderer;
