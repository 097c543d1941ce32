//! Chapter-list extraction from an HTML document or fragment.
//!
//! The site's chapter index markup changes from release to release, so the
//! extractor tries an ordered list of strategies (structural signals first,
//! text patterns last) and keeps the first one that yields a valid chapter.
//! Every strategy may over-collect; [Extractor::extract] runs the result
//! through one validity filter so callers only ever see marker-prefixed
//! titles with real urls.

use super::error::ScraperError;
use crate::model::ChapterRef;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::debug;

/// Class substrings that identify a chapter listing container.
const CONTAINER_CLASS_HINTS: [&str; 3] = ["list-chapter", "chapter", "list"];

/// Prefix used by client-side no-op links (`javascript:void(0)` and friends).
const NOOP_SCHEME: &str = "javascript";

/// Parse a CSS selector or return a selector error (avoids panics from Selector::parse).
pub(crate) fn parse_selector(sel: &str) -> Result<Selector, ScraperError> {
    Selector::parse(sel).map_err(|e| ScraperError::Selector {
        selector: sel.to_string(),
        message: e.to_string(),
    })
}

/// Chapter-marker tokens: literal prefixes that mark link text as a chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    tokens: Vec<String>,
}

impl Markers {
    /// Build from a token list. Blank tokens are ignored.
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens = tokens
            .into_iter()
            .map(Into::into)
            .filter(|t: &String| !t.trim().is_empty())
            .collect();
        Self { tokens }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// True if the trimmed text begins with any marker.
    pub fn is_prefix_of(&self, text: &str) -> bool {
        let text = text.trim();
        self.tokens.iter().any(|t| text.starts_with(t.as_str()))
    }

    /// True if any marker occurs anywhere in the text.
    pub fn occurs_in(&self, text: &str) -> bool {
        self.tokens.iter().any(|t| text.contains(t.as_str()))
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self::new(["Chương", "chương", "Chapter"])
    }
}

/// One extraction strategy: fragment in, (unfiltered) candidates out.
type Strategy = fn(&Extractor, &Html) -> Vec<ChapterRef>;

/// Strategies in the order they are tried.
const STRATEGIES: [(&str, Strategy); 5] = [
    ("chapter-list id", Extractor::by_container_id),
    ("container class", Extractor::by_container_class),
    ("link text prefix", Extractor::by_link_prefix),
    ("link text contains", Extractor::by_link_contains),
    ("list item", Extractor::by_list_item),
];

/// Extracts ordered [ChapterRef]s from a parsed page or fragment.
#[derive(Debug, Clone)]
pub struct Extractor {
    markers: Markers,
    chapter_list_links: Selector,
    containers: Selector,
    links: Selector,
    list_items: Selector,
}

impl Extractor {
    pub fn new(markers: Markers) -> Result<Self, ScraperError> {
        Ok(Self {
            markers,
            chapter_list_links: parse_selector("#chapter-list a[href]")?,
            containers: parse_selector("ul[class], div[class]")?,
            links: parse_selector("a[href]")?,
            list_items: parse_selector("li")?,
        })
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    /// Extract chapter entries. Never fails: an unrecognised page yields an empty list.
    ///
    /// Output is deduplicated by url and in document order; every title starts
    /// with a marker and no url uses the no-op `javascript` scheme.
    pub fn extract(&self, fragment: &Html) -> Vec<ChapterRef> {
        for (name, strategy) in STRATEGIES {
            let found = self.retain_valid(strategy(self, fragment));
            if !found.is_empty() {
                debug!(strategy = name, count = found.len(), "chapter list extracted");
                return found;
            }
        }
        debug!("no chapter links found");
        Vec::new()
    }

    /// Validity filter plus per-fragment dedup by url.
    fn retain_valid(&self, candidates: Vec<ChapterRef>) -> Vec<ChapterRef> {
        let mut seen = HashSet::new();
        candidates
            .into_iter()
            .filter(|c| self.markers.is_prefix_of(&c.title))
            .filter(|c| !c.url.is_empty() && !c.url.trim_start().starts_with(NOOP_SCHEME))
            .filter(|c| seen.insert(c.url.clone()))
            .collect()
    }

    fn by_container_id(&self, fragment: &Html) -> Vec<ChapterRef> {
        fragment
            .select(&self.chapter_list_links)
            .filter_map(link_to_ref)
            .collect()
    }

    fn by_container_class(&self, fragment: &Html) -> Vec<ChapterRef> {
        fragment
            .select(&self.containers)
            .filter(|el| {
                el.value()
                    .attr("class")
                    .map(|class| CONTAINER_CLASS_HINTS.iter().any(|h| class.contains(h)))
                    .unwrap_or(false)
            })
            .flat_map(|container| container.select(&self.links))
            .filter_map(link_to_ref)
            .filter(|c| self.markers.occurs_in(&c.title))
            .collect()
    }

    fn by_link_prefix(&self, fragment: &Html) -> Vec<ChapterRef> {
        fragment
            .select(&self.links)
            .filter_map(link_to_ref)
            .filter(|c| self.markers.is_prefix_of(&c.title))
            .collect()
    }

    fn by_link_contains(&self, fragment: &Html) -> Vec<ChapterRef> {
        fragment
            .select(&self.links)
            .filter_map(link_to_ref)
            .filter(|c| self.markers.occurs_in(&c.title))
            .collect()
    }

    fn by_list_item(&self, fragment: &Html) -> Vec<ChapterRef> {
        fragment
            .select(&self.list_items)
            .filter_map(|li| {
                let text = element_text(li);
                if !self.markers.is_prefix_of(&text) {
                    return None;
                }
                let href = li.select(&self.links).next()?.value().attr("href")?;
                Some(ChapterRef::new(text, href))
            })
            .collect()
    }
}

/// Link with non-empty text and an href attribute.
fn link_to_ref(a: ElementRef<'_>) -> Option<ChapterRef> {
    let href = a.value().attr("href")?;
    let title = element_text(a);
    if title.is_empty() {
        return None;
    }
    Some(ChapterRef::new(title, href))
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}
