//! Chapter page parsing: heading plus body text, with a fallback chain of content containers.

use super::error::ScraperError;
use super::extract::parse_selector;
use crate::model::ChapterContent;
use scraper::{ElementRef, Html, Selector};

/// Elements dropped before any text is read.
const NOISE: &str = "script, style, ins, iframe, noscript";

/// A container must carry more than this many characters of trimmed text.
const MIN_CONTENT_CHARS: usize = 100;

/// Fallback keeps lines from this fraction of the page to `1 - FALLBACK_EDGE`.
const FALLBACK_EDGE: f64 = 0.2;
const FALLBACK_MIN_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct ContentParser {
    noise: Selector,
    headings: Vec<Selector>,
    containers: Vec<Selector>,
}

impl ContentParser {
    pub fn new() -> Result<Self, ScraperError> {
        let compile = |list: &[&str]| -> Result<Vec<Selector>, ScraperError> {
            list.iter().map(|s| parse_selector(s)).collect()
        };
        Ok(Self {
            noise: parse_selector(NOISE)?,
            headings: compile(&["h1.chapter-title", "h1", "h2.chapter-title", "h2"])?,
            containers: compile(&[
                "div.chapter-content",
                "div.entry-content",
                "div.content",
                "div.truyen",
                "article",
                "main",
            ])?,
        })
    }

    /// Parse a chapter page. Never fails; content is empty when nothing usable is found.
    pub fn parse(&self, html: &str) -> ChapterContent {
        let mut doc = Html::parse_document(html);
        let noise: Vec<_> = doc.select(&self.noise).map(|el| el.id()).collect();
        for id in noise {
            if let Some(mut node) = doc.tree.get_mut(id) {
                node.detach();
            }
        }

        let heading = self
            .headings
            .iter()
            .filter_map(|sel| doc.select(sel).next())
            .map(|el| el.text().collect::<String>().trim().to_string())
            .find(|s| !s.is_empty())
            .unwrap_or_else(|| "Unknown Chapter".to_string());

        let container = self
            .containers
            .iter()
            .filter_map(|sel| doc.select(sel).next())
            .find(|el| stripped_len(*el) > MIN_CONTENT_CHARS);

        match container {
            Some(el) => ChapterContent {
                heading,
                content_html: el.inner_html().trim().to_string(),
                content_text: text_blocks(el),
            },
            None => {
                let text = middle_of_page(&text_blocks(doc.root_element()));
                let content_html = if text.is_empty() {
                    String::new()
                } else {
                    format!("<div>{}</div>", text)
                };
                ChapterContent {
                    heading,
                    content_html,
                    content_text: text,
                }
            }
        }
    }
}

/// Trimmed, non-empty text nodes joined by blank lines.
fn text_blocks(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn stripped_len(el: ElementRef<'_>) -> usize {
    el.text().map(|t| t.trim().chars().count()).sum()
}

/// Middle 60% of the lines when the page is long enough; navigation lives at the edges.
fn middle_of_page(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    if lines.len() <= FALLBACK_MIN_LINES {
        return String::new();
    }
    let n = lines.len() as f64;
    let start = (n * FALLBACK_EDGE) as usize;
    let end = (n * (1.0 - FALLBACK_EDGE)) as usize;
    lines[start..end].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ContentParser {
        ContentParser::new().expect("static selectors parse")
    }

    fn long_paragraph(n: usize) -> String {
        format!("<p>{}</p>", "Tần Mục đứng dậy. ".repeat(n))
    }

    #[test]
    fn chapter_content_container_is_preferred() {
        let html = format!(
            r#"<html><body><h1 class="chapter-title">Chương 1: Tàn Lão Thôn</h1>
               <div class="content">short</div>
               <div class="chapter-content">{}<script>var ad = 1;</script><ins>ad</ins>{}</div>
               </body></html>"#,
            long_paragraph(8),
            "<p>Đoạn hai.</p>"
        );
        let content = parser().parse(&html);
        assert_eq!(content.heading, "Chương 1: Tàn Lão Thôn");
        assert!(content.content_text.starts_with("Tần Mục đứng dậy."));
        assert!(content.content_text.ends_with("\n\nĐoạn hai."));
        assert!(!content.content_text.contains("var ad"));
        assert!(!content.content_html.contains("<script"));
        assert!(!content.content_html.contains("<ins"));
        assert!(content.content_html.contains("<p>Đoạn hai.</p>"));
    }

    #[test]
    fn short_containers_are_skipped() {
        let html = format!(
            r#"<html><body><h2>Chương 2</h2><div class="chapter-content">tiny</div>
               <article>{}</article></body></html>"#,
            long_paragraph(8)
        );
        let content = parser().parse(&html);
        assert_eq!(content.heading, "Chương 2");
        assert!(content.content_text.contains("Tần Mục"));
        assert!(!content.content_text.contains("tiny"));
    }

    #[test]
    fn fallback_keeps_middle_of_long_pages() {
        let body: String = (1..=30).map(|i| format!("<p>line {}</p>", i)).collect();
        let html = format!("<html><body>{}</body></html>", body);
        let content = parser().parse(&html);
        assert_eq!(content.heading, "Unknown Chapter");
        assert!(!content.content_text.is_empty());
        assert!(!content.content_text.contains("line 1\n"));
        assert!(!content.content_text.contains("line 30"));
        assert!(content.content_text.contains("line 15"));
        assert!(content.content_html.starts_with("<div>"));
    }

    #[test]
    fn fallback_on_short_page_is_empty() {
        let content = parser().parse("<html><body><h1>Lỗi</h1><p>Không tìm thấy</p></body></html>");
        assert_eq!(content.heading, "Lỗi");
        assert!(content.content_text.is_empty());
        assert!(content.content_html.is_empty());
    }

    #[test]
    fn middle_of_page_bounds() {
        let text: String = (0..25).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let mid = middle_of_page(&text);
        assert_eq!(mid.lines().next(), Some("5"));
        assert_eq!(mid.lines().last(), Some("19"));
        assert!(middle_of_page("a\nb").is_empty());
    }
}
