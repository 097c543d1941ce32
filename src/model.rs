//! Data model for a scraped novel.
//!
//! The chapter index produced by the walker is a list of [ChapterRef]; once
//! content has been downloaded each entry becomes a [ChapterRecord]. Both
//! serialize to the same `{"title", "url", ...}` shape so that `_info.json`
//! and `_complete.json` share one schema.

use serde::{Deserialize, Serialize};

/// One entry of the chapter index, in discovery order. Identity is `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRef {
    /// Link text; always starts with a chapter marker such as "Chương".
    pub title: String,
    /// Absolute or site-relative link. Never a `javascript:` pseudo-URL.
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

/// Content scraped from a single chapter page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterContent {
    /// Heading found on the chapter page (may differ from the index title).
    pub heading: String,
    pub content_html: String,
    /// Text blocks joined by blank lines.
    pub content_text: String,
}

/// A chapter index entry plus whatever content has been downloaded for it.
///
/// Written per chapter as `chapter_NNNN.json` and embedded in the novel JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_text: Option<String>,
}

impl ChapterRecord {
    pub fn with_content(chapter: &ChapterRef, content: ChapterContent) -> Self {
        Self {
            title: chapter.title.clone(),
            url: chapter.url.clone(),
            heading: Some(content.heading),
            content_html: Some(content.content_html),
            content_text: Some(content.content_text),
        }
    }

    pub fn has_content(&self) -> bool {
        self.content_text.is_some()
    }

    /// Copy downloaded fields from `other` without touching the index title or url.
    pub fn merge_content(&mut self, other: &ChapterRecord) {
        if other.heading.is_some() {
            self.heading = other.heading.clone();
        }
        if other.content_html.is_some() {
            self.content_html = other.content_html.clone();
        }
        if other.content_text.is_some() {
            self.content_text = other.content_text.clone();
        }
    }
}

impl From<ChapterRef> for ChapterRecord {
    fn from(c: ChapterRef) -> Self {
        Self {
            title: c.title,
            url: c.url,
            heading: None,
            content_html: None,
            content_text: None,
        }
    }
}

/// Novel metadata and chapter list, as written to `<slug>_info.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NovelInfo {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    /// Chapter count as displayed by the site (not verified against `chapters`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_count: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub chapters: Vec<ChapterRecord>,
}

impl NovelInfo {
    /// File-name stem derived from the title (see [slugify]).
    pub fn slug(&self) -> String {
        slugify(&self.title)
    }
}

/// Lowercase the title and replace spaces and path separators with `_`.
///
/// Letters outside ASCII are kept, so "Mục Thần Ký" becomes "mục_thần_ký".
pub fn slugify(title: &str) -> String {
    let slug: String = title
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            c => c,
        })
        .collect();
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    }
}
