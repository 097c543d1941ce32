//! Shared error type for scraping: landing page, chapter list API, and chapter pages.

use std::path::PathBuf;
use thiserror::Error;

/// Scraper error for URLs, HTTP, payload parsing, and chapter file I/O.
///
/// Transport and payload errors are fatal only on the landing page; during
/// pagination they end the walk and are reported through the walk outcome.
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    // Transport
    #[error("Network error: could not reach {url}: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus {
        status: u16,
        url: String,
        /// Optional context (e.g. "novel page", "chapter list page 3").
        context: Option<String>,
    },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead { url: String, source: reqwest::Error },

    // Parsing
    #[error("Unexpected chapter list payload for page {page}: {reason}")]
    Payload { page: u32, reason: String },

    #[error("Invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },

    // Chapter files
    #[error("Cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid chapter file {path}: {source}")]
    ChapterFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ScraperError {
    /// True for errors raised while talking to the site (as opposed to local I/O).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ScraperError::Network { .. }
                | ScraperError::HttpStatus { .. }
                | ScraperError::BodyRead { .. }
        )
    }
}
