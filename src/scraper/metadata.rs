//! Novel landing page: title, labeled info fields, and pagination controls.

use super::error::ScraperError;
use super::extract::parse_selector;
use regex::Regex;
use scraper::Html;

/// Text of the pagination control that jumps to the last page.
const LAST_PAGE_LABEL: &str = "Cuối";

const AUTHOR_LABEL: &str = "Tác giả:";
const GENRES_LABEL: &str = "Thể loại:";
const CHAPTERS_LABEL: &str = "Số chương:";
const VIEWS_LABEL: &str = "Lượt xem:";
const STATUS_LABEL: &str = "Trạng thái:";
const INFO_LABELS: [&str; 5] = [AUTHOR_LABEL, GENRES_LABEL, CHAPTERS_LABEL, VIEWS_LABEL, STATUS_LABEL];

/// Fields read from the landing page. Missing labels stay `None`/empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NovelMetadata {
    pub title: String,
    pub author: Option<String>,
    pub genres: Vec<String>,
    pub chapter_count: Option<String>,
    pub views: Option<String>,
    pub status: Option<String>,
}

/// Reads metadata and pagination hints. Regexes and selectors are compiled once.
#[derive(Debug, Clone)]
pub struct MetadataParser {
    /// `page(<novel id>,<page>)` in an onclick handler.
    novel_id_re: Regex,
    /// `page(<novel id>,<total pages>)` on the last-page control.
    total_pages_re: Regex,
}

impl MetadataParser {
    pub fn new() -> Result<Self, ScraperError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| ScraperError::Selector {
                selector: pattern.to_string(),
                message: e.to_string(),
            })
        };
        Ok(Self {
            novel_id_re: compile(r"page\((\d+),\d+\)")?,
            total_pages_re: compile(r"page\(\d+,(\d+)\)")?,
        })
    }

    pub fn parse(&self, doc: &Html) -> Result<NovelMetadata, ScraperError> {
        let mut title = None;
        for sel in ["h1.post-title", "h1", "h2", "title"] {
            let sel = parse_selector(sel)?;
            title = doc
                .select(&sel)
                .map(|e| e.text().collect::<String>().trim().to_string())
                .find(|s| !s.is_empty());
            if title.is_some() {
                break;
            }
        }

        let text = document_text(doc);
        let genres = labeled_value(&text, GENRES_LABEL)
            .map(|g| {
                g.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(NovelMetadata {
            title: title.unwrap_or_else(|| "Unknown".to_string()),
            author: labeled_value(&text, AUTHOR_LABEL),
            genres,
            chapter_count: labeled_value(&text, CHAPTERS_LABEL),
            views: labeled_value(&text, VIEWS_LABEL),
            status: labeled_value(&text, STATUS_LABEL),
        })
    }

    /// NovelId from the first link whose onclick calls `page(<id>,<n>)`.
    pub fn find_novel_id(&self, doc: &Html) -> Option<String> {
        let sel = parse_selector("a[onclick]").ok()?;
        doc.select(&sel)
            .filter_map(|a| a.value().attr("onclick"))
            .find_map(|onclick| {
                self.novel_id_re
                    .captures(onclick)
                    .map(|c| c[1].to_string())
            })
    }

    /// Total page count from the "Cuối" control inside `div.paging`, if present.
    pub fn last_page_total(&self, doc: &Html) -> Option<u32> {
        let sel = parse_selector("div.paging a[onclick]").ok()?;
        doc.select(&sel)
            .filter(|a| a.text().collect::<String>().trim() == LAST_PAGE_LABEL)
            .filter_map(|a| a.value().attr("onclick"))
            .find_map(|onclick| {
                self.total_pages_re
                    .captures(onclick)
                    .and_then(|c| c[1].parse().ok())
            })
    }
}

/// Whole-document text with block boundaries kept as newlines.
fn document_text(doc: &Html) -> String {
    doc.root_element()
        .text()
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rest of the line after `label`, trimmed. Handles the value sitting in the next text node,
/// but an empty value never borrows the following label's line.
fn labeled_value(text: &str, label: &str) -> Option<String> {
    let (_, rest) = text.split_once(label)?;
    let line = rest
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())?;
    if INFO_LABELS.iter().any(|l| line.starts_with(l)) {
        return None;
    }
    Some(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LANDING: &str = r#"<html><head><title>Mục Thần Ký - Wikidich</title></head><body>
        <h1 class="post-title">Mục Thần Ký</h1>
        <div class="info">
          <p>Tác giả: <a href="/tac-gia/trach-tru">Trạch Trư</a></p>
          <p>Thể loại: Huyền huyễn, Tiên hiệp ,</p>
          <p>Số chương: 1508</p>
          <p>Lượt xem: 1.234.567</p>
          <p>Trạng thái: Hoàn thành</p>
        </div>
        <div id="chapter-list"><a href="/c1">Chương 1</a>
          <div class="paging">
            <a href="javascript:void(0)" onclick="page(555,2)">2</a>
            <a href="javascript:void(0)" onclick="page(555,19)">Cuối</a>
          </div>
        </div></body></html>"#;

    fn parser() -> MetadataParser {
        MetadataParser::new().expect("static patterns compile")
    }

    #[test]
    fn parses_title_and_labeled_fields() -> Result<(), ScraperError> {
        let meta = parser().parse(&Html::parse_document(LANDING))?;
        assert_eq!(meta.title, "Mục Thần Ký");
        assert_eq!(meta.author.as_deref(), Some("Trạch Trư"));
        assert_eq!(meta.genres, vec!["Huyền huyễn", "Tiên hiệp"]);
        assert_eq!(meta.chapter_count.as_deref(), Some("1508"));
        assert_eq!(meta.views.as_deref(), Some("1.234.567"));
        assert_eq!(meta.status.as_deref(), Some("Hoàn thành"));
        Ok(())
    }

    #[test]
    fn title_falls_back_to_head_title_then_unknown() -> Result<(), ScraperError> {
        let p = parser();
        let doc = Html::parse_document("<html><head><title>Only Title</title></head><body></body></html>");
        assert_eq!(p.parse(&doc)?.title, "Only Title");
        let doc = Html::parse_document("<html><body><p>nothing</p></body></html>");
        let meta = p.parse(&doc)?;
        assert_eq!(meta.title, "Unknown");
        assert!(meta.author.is_none());
        assert!(meta.genres.is_empty());
        Ok(())
    }

    #[test]
    fn empty_label_does_not_take_next_field() -> Result<(), ScraperError> {
        let doc = Html::parse_document(
            r#"<html><body><h1>X</h1><div class="info">
                 <p>Tác giả: </p>
                 <p>Thể loại: Huyền huyễn</p>
                 <p>Trạng thái:</p>
               </div></body></html>"#,
        );
        let meta = parser().parse(&doc)?;
        assert!(meta.author.is_none());
        assert_eq!(meta.genres, vec!["Huyền huyễn"]);
        assert!(meta.status.is_none());
        Ok(())
    }

    #[test]
    fn novel_id_from_onclick() {
        let p = parser();
        assert_eq!(
            p.find_novel_id(&Html::parse_document(LANDING)).as_deref(),
            Some("555")
        );
        let none = Html::parse_document(r#"<a href="/c2" onclick="track()">Chương 2</a>"#);
        assert!(p.find_novel_id(&none).is_none());
    }

    #[test]
    fn last_page_total_only_from_last_control() {
        let p = parser();
        assert_eq!(p.last_page_total(&Html::parse_document(LANDING)), Some(19));
        let no_last = Html::parse_fragment(
            r#"<div class="paging"><a onclick="page(555,4)">4</a></div>"#,
        );
        assert_eq!(p.last_page_total(&no_last), None);
        let outside = Html::parse_fragment(r#"<a onclick="page(555,9)">Cuối</a>"#);
        assert_eq!(p.last_page_total(&outside), None);
    }
}
