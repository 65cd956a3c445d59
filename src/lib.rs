//! novelscrape: CLI scraper for serialized web novels on Chinese reading sites, outputting EPUB.

pub mod cli;
pub mod config;
pub mod engine;
pub mod epub;
pub mod logging;
pub mod model;

#[cfg(test)]
mod test_support;

// Re-exports for CLI and consumers.
pub use engine::{
    resolve, BookScraper, ChapterRange, Checkpoint, FetchError, PoliteClient, PoliteClientBuilder,
    Renderer, ScrapeOptions, ScrapedBook, ScraperError, SiteProfile,
};
pub use epub::{assemble, CoverImage, EpubError};
pub use model::{BookRecord, ChapterContent, ChapterRef};
