//! Novel scraping: landing page, chapter index walk, and per-chapter download.

mod client;
mod error;

pub mod content;
pub mod extract;
pub mod metadata;
pub mod walker;

pub use client::{PoliteClient, PoliteClientBuilder};
pub use error::ScraperError;
pub use extract::{Extractor, Markers};
pub use walker::{ChapterListSource, ChapterSet, ListchapApi, StopReason, WalkOutcome, Walker};

use crate::model::{ChapterRecord, NovelInfo};
use content::ContentParser;
use metadata::MetadataParser;
use reqwest::Url;
use scraper::Html;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_BASE_URL: &str = "https://wikidich.vn";
pub const DEFAULT_MAX_PAGES: u32 = 19;

/// Site settings shared by the extractor and walker. Built once from config and CLI.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// Origin of the listing API and base for site-relative chapter urls.
    pub base_url: Url,
    pub markers: Markers,
    /// Highest chapter-list page index to request (inclusive, 1-based).
    pub max_pages: u32,
}

impl SiteConfig {
    pub fn new(base_url: &str, markers: Markers, max_pages: u32) -> Result<Self, ScraperError> {
        let base_url = Url::parse(base_url).map_err(|e| ScraperError::InvalidUrl {
            input: base_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            base_url,
            markers,
            max_pages,
        })
    }

    /// Resolve a site-relative chapter url. Absolute urls pass through unchanged.
    pub fn resolve(&self, url: &str) -> Result<String, ScraperError> {
        self.base_url
            .join(url.trim())
            .map(|u| u.to_string())
            .map_err(|e| ScraperError::InvalidUrl {
                input: url.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Fetches one HTML page as text. Implemented by [PoliteClient]; tests use fakes.
pub trait PageFetcher {
    fn fetch_page(&mut self, url: &str, context: &str) -> Result<String, ScraperError>;
}

impl PageFetcher for PoliteClient {
    fn fetch_page(&mut self, url: &str, context: &str) -> Result<String, ScraperError> {
        self.fetch_text(url, context)
    }
}

/// Which chapters to download content for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterSelection {
    None,
    /// The first N chapters of the index.
    First(usize),
    All,
}

impl ChapterSelection {
    /// CLI convention: negative = all, 0 = none, N = first N.
    pub fn from_count(n: i64) -> Self {
        match n {
            n if n < 0 => ChapterSelection::All,
            0 => ChapterSelection::None,
            n => ChapterSelection::First(n as usize),
        }
    }

    fn take(self, total: usize) -> usize {
        match self {
            ChapterSelection::None => 0,
            ChapterSelection::First(n) => n.min(total),
            ChapterSelection::All => total,
        }
    }
}

/// Novel metadata and chapter index, plus how the index walk ended.
#[derive(Debug)]
pub struct IndexScrape {
    pub novel: NovelInfo,
    pub pages_fetched: u32,
    pub stop: StopReason,
}

/// Counts from [NovelScraper::download_chapters].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub downloaded: u32,
    /// Chapter files already on disk and loaded instead of fetched.
    pub reused: u32,
    pub failed: u32,
}

/// File name for the chapter at 0-based `index` in the full chapter list.
pub fn chapter_file_name(index: usize) -> String {
    format!("chapter_{:04}.json", index + 1)
}

/// Scraper for one site: parsers are compiled once and reused for every page.
pub struct NovelScraper {
    site: SiteConfig,
    extractor: Extractor,
    metadata: MetadataParser,
    content: ContentParser,
}

impl NovelScraper {
    pub fn new(site: SiteConfig) -> Result<Self, ScraperError> {
        Ok(Self {
            extractor: Extractor::new(site.markers.clone())?,
            metadata: MetadataParser::new()?,
            content: ContentParser::new()?,
            site,
        })
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    /// Fetch the landing page and walk the chapter index.
    ///
    /// Only the landing page fetch can fail; pagination problems end up in
    /// [IndexScrape::stop].
    pub fn scrape_index(
        &self,
        client: &mut PoliteClient,
        url: &str,
    ) -> Result<IndexScrape, ScraperError> {
        let url = self.site.resolve(url)?;
        info!(%url, "fetching novel page");
        let html = client.fetch_page(&url, "novel page")?;
        let api = ListchapApi::new(client, self.site.base_url.as_str());
        self.index_from_landing(&html, &url, api)
    }

    /// Parse an already-fetched landing page and paginate through `source`.
    pub fn index_from_landing<S: ChapterListSource>(
        &self,
        landing_html: &str,
        url: &str,
        source: S,
    ) -> Result<IndexScrape, ScraperError> {
        let doc = Html::parse_document(landing_html);
        let meta = self.metadata.parse(&doc)?;
        let novel_id = self.metadata.find_novel_id(&doc);
        match &novel_id {
            Some(id) => info!(novel_id = %id, "found novel id"),
            None => warn!("no novel id on landing page; chapter list limited to page 1"),
        }

        let outcome = Walker::new(source, &self.extractor, &self.metadata)
            .with_base(self.site.base_url.clone())
            .walk(&doc, novel_id.as_deref(), self.site.max_pages);

        let novel = NovelInfo {
            title: meta.title,
            author: meta.author,
            genres: meta.genres,
            chapter_count: meta.chapter_count,
            views: meta.views,
            status: meta.status,
            source_url: Some(url.to_string()),
            chapters: outcome.chapters.into_iter().map(ChapterRecord::from).collect(),
        };
        Ok(IndexScrape {
            novel,
            pages_fetched: outcome.pages_fetched,
            stop: outcome.stop,
        })
    }

    /// Download content for the selected chapters into `chapters_dir` as `chapter_NNNN.json`.
    ///
    /// Chapters whose file already exists are loaded instead of fetched. A
    /// chapter that fails to fetch is logged and skipped; only local I/O
    /// errors abort. Downloaded content is merged into `novel.chapters`.
    pub fn download_chapters<F: PageFetcher>(
        &self,
        fetcher: &mut F,
        novel: &mut NovelInfo,
        selection: ChapterSelection,
        chapters_dir: &Path,
        progress: Option<&dyn Fn(u32, u32)>,
    ) -> Result<DownloadSummary, ScraperError> {
        let count = selection.take(novel.chapters.len());
        let mut summary = DownloadSummary::default();
        if count == 0 {
            return Ok(summary);
        }
        std::fs::create_dir_all(chapters_dir).map_err(|e| ScraperError::Io {
            path: chapters_dir.to_path_buf(),
            source: e,
        })?;
        info!(count, dir = %chapters_dir.display(), "downloading chapters");

        for (i, chapter) in novel.chapters.iter_mut().take(count).enumerate() {
            let path = chapters_dir.join(chapter_file_name(i));
            if path.exists() {
                match read_chapter_file(&path) {
                    Ok(saved) => {
                        chapter.merge_content(&saved);
                        summary.reused += 1;
                        report(progress, &summary, count);
                        continue;
                    }
                    Err(e) => warn!(error = %e, "unreadable chapter file; fetching again"),
                }
            }

            let url = match self.site.resolve(&chapter.url) {
                Ok(u) => u,
                Err(e) => {
                    warn!(title = %chapter.title, error = %e, "skipping chapter");
                    summary.failed += 1;
                    continue;
                }
            };
            let html = match fetcher.fetch_page(&url, &format!("chapter {}", i + 1)) {
                Ok(h) => h,
                Err(e) => {
                    warn!(title = %chapter.title, error = %e, "chapter fetch failed; skipped");
                    summary.failed += 1;
                    continue;
                }
            };
            let parsed = self.content.parse(&html);
            if parsed.content_text.is_empty() {
                warn!(title = %chapter.title, %url, "no content found on chapter page");
            }
            let record = ChapterRecord {
                title: chapter.title.clone(),
                url: chapter.url.clone(),
                heading: Some(parsed.heading),
                content_html: Some(parsed.content_html),
                content_text: Some(parsed.content_text),
            };
            write_chapter_file(&path, &record)?;
            chapter.merge_content(&record);
            summary.downloaded += 1;
            report(progress, &summary, count);
        }

        info!(
            downloaded = summary.downloaded,
            reused = summary.reused,
            failed = summary.failed,
            "chapter download finished"
        );
        Ok(summary)
    }
}

fn report(progress: Option<&dyn Fn(u32, u32)>, summary: &DownloadSummary, total: usize) {
    if let Some(p) = progress {
        p(summary.downloaded + summary.reused, total as u32);
    }
}

fn read_chapter_file(path: &Path) -> Result<ChapterRecord, ScraperError> {
    let file = std::fs::File::open(path).map_err(|e| ScraperError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| ScraperError::ChapterFile {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_chapter_file(path: &Path, record: &ChapterRecord) -> Result<(), ScraperError> {
    let json = serde_json::to_string_pretty(record).map_err(|e| ScraperError::ChapterFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    std::fs::write(path, json).map_err(|e| ScraperError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Directory holding `chapter_NNNN.json` files for a novel.
pub fn chapters_dir(output_dir: &Path, slug: &str) -> PathBuf {
    output_dir.join(format!("{}_chapters", slug))
}
