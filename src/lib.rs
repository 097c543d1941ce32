//! wdscrape: scraper for wikidich novels, with text export, chapter rewriting, and Drive upload.

pub mod cli;
pub mod config;
pub mod enhance;
pub mod export;
pub mod logging;
pub mod model;
pub mod scraper;
pub mod upload;

// Re-exports for CLI and consumers.
pub use export::{ExportError, SiteNavCleaner, TextCleaner};
pub use model::{ChapterRecord, ChapterRef, NovelInfo};
pub use scraper::{
    ChapterSelection, Extractor, Markers, NovelScraper, PoliteClient, PoliteClientBuilder,
    ScraperError, SiteConfig, Walker,
};
