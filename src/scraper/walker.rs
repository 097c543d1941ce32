//! Chapter index pagination.
//!
//! Page 1 is the server-rendered landing page; later pages come from the
//! site's listing API as `{"data": "<html fragment>"}`. The walk is serial:
//! each page goes through the [Extractor], new entries are appended to a
//! url-keyed [ChapterSet], and the walk stops on the first failure, the
//! first empty page, the last page announced by the pager, or `max_pages`.
//! Failures never escape: they end the walk and are reported in
//! [WalkOutcome::stop].

use super::client::PoliteClient;
use super::error::ScraperError;
use super::extract::Extractor;
use super::metadata::MetadataParser;
use crate::model::ChapterRef;
use reqwest::Url;
use scraper::Html;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Fetches raw listing API responses. One call per page, pages 2 and up.
pub trait ChapterListSource {
    fn fetch_list_page(&mut self, novel_id: &str, page: u32) -> Result<String, ScraperError>;
}

/// Listing API `GET {base}/get/listchap/{novel_id}?page={n}` over the polite client.
/// Each page is requested once; a failure ends the walk instead of being retried.
pub struct ListchapApi<'a> {
    client: &'a mut PoliteClient,
    base_url: &'a str,
}

impl<'a> ListchapApi<'a> {
    pub fn new(client: &'a mut PoliteClient, base_url: &'a str) -> Self {
        Self { client, base_url }
    }

    pub fn page_url(base_url: &str, novel_id: &str, page: u32) -> String {
        format!(
            "{}/get/listchap/{}?page={}",
            base_url.trim_end_matches('/'),
            novel_id,
            page
        )
    }
}

impl ChapterListSource for ListchapApi<'_> {
    fn fetch_list_page(&mut self, novel_id: &str, page: u32) -> Result<String, ScraperError> {
        let url = Self::page_url(self.base_url, novel_id, page);
        self.client
            .fetch_text_once(&url, &format!("chapter list page {}", page))
    }
}

/// Insertion-ordered chapter list with no two entries sharing a url.
///
/// Urls are keyed after resolving against the site base (when one is set),
/// so `/c1` and `https://site/c1` are the same chapter. The stored entry keeps
/// the url as first seen.
#[derive(Debug, Clone, Default)]
pub struct ChapterSet {
    base: Option<Url>,
    seen: HashSet<String>,
    chapters: Vec<ChapterRef>,
}

impl ChapterSet {
    pub fn new(base: Option<Url>) -> Self {
        Self {
            base,
            seen: HashSet::new(),
            chapters: Vec::new(),
        }
    }

    fn key(&self, url: &str) -> String {
        let url = url.trim();
        self.base
            .as_ref()
            .and_then(|b| b.join(url).ok())
            .map(|u| u.to_string())
            .unwrap_or_else(|| url.to_string())
    }

    /// Add a chapter unless its url is already present. Returns true if added.
    pub fn insert(&mut self, chapter: ChapterRef) -> bool {
        let key = self.key(&chapter.url);
        if !self.seen.insert(key) {
            return false;
        }
        self.chapters.push(chapter);
        true
    }

    /// Add every chapter in order; returns how many were new.
    pub fn extend(&mut self, chapters: impl IntoIterator<Item = ChapterRef>) -> usize {
        chapters.into_iter().filter(|c| self.insert(c.clone())).count()
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn into_vec(self) -> Vec<ChapterRef> {
        self.chapters
    }
}

/// Why the walk ended.
#[derive(Debug)]
pub enum StopReason {
    /// Landing page had no NovelId; only page 1 was used.
    NoNovelId,
    /// Reached `max_pages` (or `max_pages` <= 1, so no API pages were requested).
    PageLimit,
    /// Page yielded no chapters: end of list.
    EmptyPage { page: u32 },
    /// Pager on this page says it is the last one.
    LastPage { page: u32, total: u32 },
    /// Transport or payload error on this page; chapters gathered so far are kept.
    Failed { page: u32, error: ScraperError },
}

impl StopReason {
    /// True if the list may be truncated because of an error.
    pub fn is_failure(&self) -> bool {
        matches!(self, StopReason::Failed { .. })
    }
}

/// Result of a walk: deduplicated chapters in first-seen order plus a diagnostic.
#[derive(Debug)]
pub struct WalkOutcome {
    pub chapters: Vec<ChapterRef>,
    /// Number of API pages fetched successfully (page 1 not counted).
    pub pages_fetched: u32,
    pub stop: StopReason,
}

/// Drives the listing API and accumulates chapters.
pub struct Walker<'p, S> {
    source: S,
    extractor: &'p Extractor,
    metadata: &'p MetadataParser,
    base: Option<Url>,
}

impl<'p, S: ChapterListSource> Walker<'p, S> {
    pub fn new(source: S, extractor: &'p Extractor, metadata: &'p MetadataParser) -> Self {
        Self {
            source,
            extractor,
            metadata,
            base: None,
        }
    }

    /// Resolve relative urls against `base` when keying chapters for dedup.
    pub fn with_base(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    /// Walk the index: seed from `landing`, then API pages `2..=max_pages`.
    pub fn walk(&mut self, landing: &Html, novel_id: Option<&str>, max_pages: u32) -> WalkOutcome {
        let mut set = ChapterSet::new(self.base.clone());
        let seeded = set.extend(self.extractor.extract(landing));
        info!(count = seeded, "chapters found on page 1");

        let mut pages_fetched = 0;
        let stop = match novel_id {
            None => {
                info!("no novel id on landing page; skipping pagination");
                StopReason::NoNovelId
            }
            Some(id) => self.paginate(id, max_pages, &mut set, &mut pages_fetched),
        };

        info!(total = set.len(), pages_fetched, ?stop, "chapter list complete");
        WalkOutcome {
            chapters: set.into_vec(),
            pages_fetched,
            stop,
        }
    }

    fn paginate(
        &mut self,
        novel_id: &str,
        max_pages: u32,
        set: &mut ChapterSet,
        pages_fetched: &mut u32,
    ) -> StopReason {
        for page in 2..=max_pages {
            debug!(novel_id, page, "fetching chapter list page");
            let body = match self.source.fetch_list_page(novel_id, page) {
                Ok(body) => body,
                Err(error) => {
                    warn!(page, %error, "chapter list fetch failed; keeping chapters so far");
                    return StopReason::Failed { page, error };
                }
            };
            let fragment = match payload_fragment(&body, page) {
                Ok(f) => f,
                Err(error) => {
                    warn!(page, %error, "chapter list payload unusable; keeping chapters so far");
                    return StopReason::Failed { page, error };
                }
            };
            *pages_fetched += 1;

            let html = Html::parse_fragment(&fragment);
            let entries = self.extractor.extract(&html);
            if entries.is_empty() {
                info!(page, "no chapters on page; end of list");
                return StopReason::EmptyPage { page };
            }
            let found = entries.len();
            let added = set.extend(entries);
            debug!(page, found, added, "chapter list page merged");

            if let Some(total) = self.metadata.last_page_total(&html) {
                if page >= total {
                    info!(page, total, "reached last page");
                    return StopReason::LastPage { page, total };
                }
            }
        }
        StopReason::PageLimit
    }
}

/// HTML fragment from the API's `{"data": "..."}` envelope.
fn payload_fragment(body: &str, page: u32) -> Result<String, ScraperError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| ScraperError::Payload {
            page,
            reason: format!("not JSON: {}", e),
        })?;
    match value.get("data") {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ScraperError::Payload {
            page,
            reason: format!("`data` is not a string: {}", other),
        }),
        None => {
            let keys = value
                .as_object()
                .map(|o| o.keys().cloned().collect::<Vec<_>>().join(", "))
                .unwrap_or_default();
            Err(ScraperError::Payload {
                page,
                reason: format!("missing `data` field (keys: {})", keys),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::client::MIN_DELAY_MS;
    use crate::scraper::extract::Markers;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    /// Scripted listing API that records every request.
    #[derive(Default)]
    struct FakeApi {
        pages: HashMap<u32, String>,
        fail_on: Option<u32>,
        requests: Vec<(String, u32)>,
    }

    impl FakeApi {
        fn page(mut self, page: u32, fragment: &str) -> Self {
            let body = serde_json::json!({ "data": fragment }).to_string();
            self.pages.insert(page, body);
            self
        }

        fn raw(mut self, page: u32, body: &str) -> Self {
            self.pages.insert(page, body.to_string());
            self
        }
    }

    impl ChapterListSource for &mut FakeApi {
        fn fetch_list_page(&mut self, novel_id: &str, page: u32) -> Result<String, ScraperError> {
            self.requests.push((novel_id.to_string(), page));
            if self.fail_on == Some(page) {
                return Err(ScraperError::HttpStatus {
                    status: 503,
                    url: ListchapApi::page_url("https://wikidich.vn", novel_id, page),
                    context: None,
                });
            }
            Ok(self
                .pages
                .get(&page)
                .cloned()
                .unwrap_or_else(|| r#"{"data": ""}"#.to_string()))
        }
    }

    type Hits = Arc<Mutex<Vec<(String, Instant)>>>;

    /// Local HTTP server answering every request via `respond(path)`; records path and arrival time.
    fn serve(respond: fn(&str) -> (u16, String)) -> (String, Hits) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind local port");
        let base = format!("http://{}", listener.local_addr().expect("local addr"));
        let hits: Hits = Arc::default();
        let log = Arc::clone(&hits);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
                let mut request_line = String::new();
                if reader.read_line(&mut request_line).is_err() {
                    continue;
                }
                let mut header = String::new();
                while reader.read_line(&mut header).map(|n| n > 2).unwrap_or(false) {
                    header.clear();
                }
                let path = request_line.split_whitespace().nth(1).unwrap_or("").to_string();
                log.lock().expect("hits lock").push((path.clone(), Instant::now()));
                let (status, body) = respond(&path);
                let _ = write!(
                    stream,
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
            }
        });
        (base, hits)
    }

    fn retrying_client() -> PoliteClient {
        PoliteClient::builder()
            .delay_secs(0)
            .retry_count(3)
            .retry_backoff_secs(vec![0, 0])
            .build()
            .expect("client builds")
    }

    struct Parsers {
        extractor: Extractor,
        metadata: MetadataParser,
    }

    fn parsers() -> Parsers {
        Parsers {
            extractor: Extractor::new(Markers::default()).expect("static selectors parse"),
            metadata: MetadataParser::new().expect("static patterns compile"),
        }
    }

    fn landing(with_pager: bool) -> Html {
        let pager = if with_pager {
            r#"<div class="paging"><a href="javascript:void(0)" onclick="page(555,2)">2</a></div>"#
        } else {
            ""
        };
        Html::parse_document(&format!(
            r#"<html><body><div id="chapter-list">
                 <a href="/url1">Chương 1: A</a>
                 <a href="/url2">Chương 2: B</a>{}
               </div></body></html>"#,
            pager
        ))
    }

    fn urls(chapters: &[ChapterRef]) -> Vec<&str> {
        chapters.iter().map(|c| c.url.as_str()).collect()
    }

    #[test]
    fn walks_until_empty_page_and_not_beyond() {
        let p = parsers();
        let doc = landing(true);
        let novel_id = p.metadata.find_novel_id(&doc);
        assert_eq!(novel_id.as_deref(), Some("555"));

        let mut api = FakeApi::default()
            .page(2, r#"<ul><li><a href="/url3">Chương 3: C</a></li></ul>"#)
            .page(3, r#"<p>Không có chương</p>"#);
        let outcome = Walker::new(&mut api, &p.extractor, &p.metadata).walk(
            &doc,
            novel_id.as_deref(),
            20,
        );

        assert_eq!(
            outcome.chapters,
            vec![
                ChapterRef::new("Chương 1: A", "/url1"),
                ChapterRef::new("Chương 2: B", "/url2"),
                ChapterRef::new("Chương 3: C", "/url3"),
            ]
        );
        assert!(matches!(outcome.stop, StopReason::EmptyPage { page: 3 }));
        assert_eq!(outcome.pages_fetched, 2);
        assert_eq!(
            api.requests,
            vec![("555".to_string(), 2), ("555".to_string(), 3)]
        );
    }

    #[test]
    fn no_novel_id_means_no_requests() {
        let p = parsers();
        let doc = landing(false);
        let novel_id = p.metadata.find_novel_id(&doc);
        assert!(novel_id.is_none());

        let mut api = FakeApi::default().page(2, r#"<a href="/url3">Chương 3</a>"#);
        let outcome = Walker::new(&mut api, &p.extractor, &p.metadata).walk(
            &doc,
            novel_id.as_deref(),
            20,
        );
        assert_eq!(urls(&outcome.chapters), vec!["/url1", "/url2"]);
        assert!(matches!(outcome.stop, StopReason::NoNovelId));
        assert!(api.requests.is_empty());
    }

    #[test]
    fn max_pages_one_returns_seed_only() {
        let p = parsers();
        let doc = landing(true);
        let mut api = FakeApi::default().page(2, r#"<a href="/url3">Chương 3</a>"#);
        for max_pages in [0, 1] {
            let outcome =
                Walker::new(&mut api, &p.extractor, &p.metadata).walk(&doc, Some("555"), max_pages);
            assert_eq!(urls(&outcome.chapters), vec!["/url1", "/url2"]);
            assert!(matches!(outcome.stop, StopReason::PageLimit));
            assert_eq!(outcome.pages_fetched, 0);
        }
        assert!(api.requests.is_empty());
    }

    #[test]
    fn last_page_control_stops_after_merging() {
        let p = parsers();
        let mut api = FakeApi::default()
            .page(2, r#"<a href="/url3">Chương 3</a>
                <div class="paging"><a onclick="page(555,3)">Cuối</a></div>"#)
            .page(3, r#"<a href="/url4">Chương 4</a>
                <div class="paging"><a onclick="page(555,3)">Cuối</a></div>"#)
            .page(4, r#"<a href="/url5">Chương 5</a>"#);
        let outcome =
            Walker::new(&mut api, &p.extractor, &p.metadata).walk(&landing(true), Some("555"), 10);
        assert_eq!(urls(&outcome.chapters), vec!["/url1", "/url2", "/url3", "/url4"]);
        assert!(matches!(outcome.stop, StopReason::LastPage { page: 3, total: 3 }));
        assert_eq!(api.requests.len(), 2);
    }

    #[test]
    fn page_limit_bounds_requests_inclusively() {
        let p = parsers();
        let mut api = FakeApi::default()
            .page(2, r#"<a href="/url3">Chương 3</a>"#)
            .page(3, r#"<a href="/url4">Chương 4</a>"#)
            .page(4, r#"<a href="/url5">Chương 5</a>"#);
        let outcome =
            Walker::new(&mut api, &p.extractor, &p.metadata).walk(&landing(true), Some("555"), 3);
        assert_eq!(urls(&outcome.chapters), vec!["/url1", "/url2", "/url3", "/url4"]);
        assert!(matches!(outcome.stop, StopReason::PageLimit));
        assert_eq!(
            api.requests.iter().map(|(_, p)| *p).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn transport_failure_keeps_partial_list() {
        let p = parsers();
        let mut api = FakeApi {
            fail_on: Some(3),
            ..FakeApi::default()
        }
        .page(2, r#"<a href="/url3">Chương 3</a>"#);
        let outcome =
            Walker::new(&mut api, &p.extractor, &p.metadata).walk(&landing(true), Some("555"), 10);
        assert_eq!(urls(&outcome.chapters), vec!["/url1", "/url2", "/url3"]);
        assert!(outcome.stop.is_failure());
        match outcome.stop {
            StopReason::Failed { page, error } => {
                assert_eq!(page, 3);
                assert!(error.is_transport());
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(api.requests.len(), 2);
    }

    #[test]
    fn missing_data_field_is_a_payload_failure() {
        let p = parsers();
        let mut api = FakeApi::default().raw(2, r#"{"status": "error"}"#);
        let outcome =
            Walker::new(&mut api, &p.extractor, &p.metadata).walk(&landing(true), Some("555"), 10);
        assert_eq!(outcome.chapters.len(), 2);
        match outcome.stop {
            StopReason::Failed {
                page: 2,
                error: ScraperError::Payload { reason, .. },
            } => assert!(reason.contains("status")),
            other => panic!("expected payload failure, got {:?}", other),
        }
    }

    #[test]
    fn non_json_body_is_a_payload_failure() {
        let p = parsers();
        let mut api = FakeApi::default().raw(2, "<html>rate limited</html>");
        let outcome =
            Walker::new(&mut api, &p.extractor, &p.metadata).walk(&landing(true), Some("555"), 10);
        assert!(matches!(
            outcome.stop,
            StopReason::Failed {
                error: ScraperError::Payload { .. },
                ..
            }
        ));
        assert_eq!(outcome.pages_fetched, 0);
    }

    #[test]
    fn repeated_urls_keep_first_occurrence() -> Result<(), Box<dyn std::error::Error>> {
        let p = parsers();
        let mut api = FakeApi::default()
            .page(2, r#"<a href="/url2">Chương 2: B (dup)</a><a href="/url3">Chương 3</a>"#)
            .page(3, r#"<a href="https://wikidich.vn/url1">Chương 1: A (abs)</a>"#);
        let base = Url::parse("https://wikidich.vn/muc-than-ky-convert")?;
        let outcome = Walker::new(&mut api, &p.extractor, &p.metadata)
            .with_base(base)
            .walk(&landing(true), Some("555"), 3);
        assert_eq!(
            outcome.chapters,
            vec![
                ChapterRef::new("Chương 1: A", "/url1"),
                ChapterRef::new("Chương 2: B", "/url2"),
                ChapterRef::new("Chương 3", "/url3"),
            ]
        );
        let unique: HashSet<_> = outcome.chapters.iter().map(|c| &c.url).collect();
        assert_eq!(unique.len(), outcome.chapters.len());
        Ok(())
    }

    #[test]
    fn chapter_set_without_base_keys_raw_url() {
        let mut set = ChapterSet::new(None);
        assert!(set.insert(ChapterRef::new("Chương 1", "/c1")));
        assert!(!set.insert(ChapterRef::new("Chương 1 again", " /c1 ")));
        assert!(set.insert(ChapterRef::new("Chương 1 abs", "https://x/c1")));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn list_api_pages_are_requested_once_even_on_server_error() {
        let p = parsers();
        let (base, hits) = serve(|_| (503, "unavailable".to_string()));
        let mut client = retrying_client();
        let outcome = Walker::new(ListchapApi::new(&mut client, &base), &p.extractor, &p.metadata)
            .walk(&landing(true), Some("555"), 5);

        match outcome.stop {
            StopReason::Failed {
                page: 2,
                error: ScraperError::HttpStatus { status: 503, .. },
            } => {}
            other => panic!("expected 503 failure on page 2, got {:?}", other),
        }
        assert_eq!(urls(&outcome.chapters), vec!["/url1", "/url2"]);
        let hits = hits.lock().expect("hits lock");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "/get/listchap/555?page=2");
    }

    #[test]
    fn list_api_pages_are_spaced_by_the_politeness_delay() {
        let p = parsers();
        let (base, hits) = serve(|path| {
            let fragment = if path.ends_with("page=2") {
                r#"<a href="/url3">Chương 3</a>"#
            } else {
                ""
            };
            (200, serde_json::json!({ "data": fragment }).to_string())
        });
        let mut client = retrying_client();
        let outcome = Walker::new(ListchapApi::new(&mut client, &base), &p.extractor, &p.metadata)
            .walk(&landing(true), Some("555"), 5);

        assert!(matches!(outcome.stop, StopReason::EmptyPage { page: 3 }));
        assert_eq!(urls(&outcome.chapters), vec!["/url1", "/url2", "/url3"]);
        let hits = hits.lock().expect("hits lock");
        assert_eq!(hits.len(), 2);
        let gap = hits[1].1.duration_since(hits[0].1);
        assert!(gap >= Duration::from_millis(MIN_DELAY_MS), "gap was {:?}", gap);
    }

    #[test]
    fn list_api_url_shape() {
        assert_eq!(
            ListchapApi::page_url("https://wikidich.vn/", "555", 4),
            "https://wikidich.vn/get/listchap/555?page=4"
        );
    }
}
