//! Output writers: novel JSON, chapter CSV, and plain-text export of downloaded chapters.
//!
//! Text cleanup goes through the [TextCleaner] trait so the site-specific
//! navigation stripping can be swapped without touching the writers.

use crate::model::{slugify, ChapterRecord, NovelInfo};
use regex::Regex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from the export writers.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to write output: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write CSV {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Invalid cleanup pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("No chapter files (chapter_*.json) found in {0}")]
    NoChapters(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Cleans scraped chapter text before it is exported.
pub trait TextCleaner {
    fn clean(&self, text: &str) -> String;
}

/// Strips the reader site's header, prev/next navigation, and recommendation block.
#[derive(Debug, Clone)]
pub struct SiteNavCleaner {
    /// Applied in order; each match is removed.
    removals: Vec<Regex>,
    blank_runs: Regex,
}

impl SiteNavCleaner {
    pub fn new() -> Result<Self, ExportError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| ExportError::Pattern {
                pattern: pattern.to_string(),
                source,
            })
        };
        Ok(Self {
            removals: vec![
                compile(r"(?s)Wikidich.*?Chương \d+:")?,
                compile(r"(?s)《 Chương trước.*?Chương tiếp 》")?,
                compile(r"(?s)《 Chương trước.*$")?,
                compile(r"(?s)Truyện Hot Mới.*$")?,
            ],
            blank_runs: compile(r"\n{3,}")?,
        })
    }
}

impl TextCleaner for SiteNavCleaner {
    fn clean(&self, text: &str) -> String {
        let mut out = text.to_string();
        for re in &self.removals {
            out = re.replace_all(&out, "").into_owned();
        }
        self.blank_runs
            .replace_all(&out, "\n\n")
            .trim()
            .to_string()
    }
}

/// Write the novel as pretty-printed JSON (used for both `_info.json` and `_complete.json`).
pub fn write_novel_json(novel: &NovelInfo, path: &Path) -> Result<(), ExportError> {
    let file = File::create(path).map_err(io_err(path))?;
    let mut w = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut w, novel).map_err(|source| ExportError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    w.flush().map_err(io_err(path))?;
    info!(path = %path.display(), "wrote novel json");
    Ok(())
}

/// Write the chapter index as CSV with a `title,url` header.
pub fn write_chapters_csv(novel: &NovelInfo, path: &Path) -> Result<(), ExportError> {
    let csv_err = |source| ExportError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut w = csv::Writer::from_path(path).map_err(csv_err)?;
    w.write_record(["title", "url"]).map_err(csv_err)?;
    for ch in &novel.chapters {
        w.write_record([ch.title.as_str(), ch.url.as_str()])
            .map_err(csv_err)?;
    }
    w.flush().map_err(io_err(path))?;
    info!(path = %path.display(), chapters = novel.chapters.len(), "wrote chapter csv");
    Ok(())
}

/// `chapter_*.json` files in `chapters_dir`, sorted by file name.
pub fn chapter_files(chapters_dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(chapters_dir)
        .map_err(io_err(chapters_dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("chapter_") && n.ends_with(".json"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

fn read_record(path: &Path) -> Result<ChapterRecord, ExportError> {
    let file = File::open(path).map_err(io_err(path))?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(|source| ExportError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Cleaned chapter body; empty if the chapter has no downloaded text.
fn clean_body(record: &ChapterRecord, cleaner: &dyn TextCleaner) -> String {
    record
        .content_text
        .as_deref()
        .map(|t| cleaner.clean(t))
        .unwrap_or_default()
}

/// Export each `chapter_NNNN.json` to `chapter_NNNN.txt` as `# <title>` plus cleaned text.
///
/// The heading uses the chapter index title, not the page heading. Returns the number of files written.
pub fn export_chapters_to_txt(
    chapters_dir: &Path,
    out_dir: &Path,
    cleaner: &dyn TextCleaner,
) -> Result<usize, ExportError> {
    let files = chapter_files(chapters_dir)?;
    if files.is_empty() {
        return Err(ExportError::NoChapters(chapters_dir.to_path_buf()));
    }
    std::fs::create_dir_all(out_dir).map_err(io_err(out_dir))?;

    for src in &files {
        let record = read_record(src)?;
        let text = format!("# {}\n\n{}", record.title, clean_body(&record, cleaner));
        let dest = out_dir.join(src.with_extension("txt").file_name().unwrap_or_default());
        std::fs::write(&dest, text).map_err(io_err(&dest))?;
        debug!(path = %dest.display(), "exported chapter");
    }
    info!(count = files.len(), dir = %out_dir.display(), "exported chapters to txt");
    Ok(files.len())
}

/// Export all chapters into one `<slug>_full.txt` and return its path.
pub fn export_novel_to_single_file(
    novel_title: &str,
    chapters_dir: &Path,
    out_dir: &Path,
    cleaner: &dyn TextCleaner,
) -> Result<PathBuf, ExportError> {
    let files = chapter_files(chapters_dir)?;
    if files.is_empty() {
        return Err(ExportError::NoChapters(chapters_dir.to_path_buf()));
    }
    std::fs::create_dir_all(out_dir).map_err(io_err(out_dir))?;

    let path = out_dir.join(format!("{}_full.txt", slugify(novel_title)));
    let mut f = BufWriter::new(File::create(&path).map_err(io_err(&path))?);
    write!(f, "# {}\n\n", novel_title).map_err(io_err(&path))?;
    for src in &files {
        let record = read_record(src)?;
        write!(
            f,
            "## {}\n\n{}\n\n{}\n\n",
            record.title,
            clean_body(&record, cleaner),
            "-".repeat(50)
        )
        .map_err(io_err(&path))?;
    }
    f.flush().map_err(io_err(&path))?;
    info!(path = %path.display(), chapters = files.len(), "exported full novel");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChapterRef;

    fn cleaner() -> SiteNavCleaner {
        SiteNavCleaner::new().expect("static patterns compile")
    }

    fn write_record(dir: &Path, name: &str, title: &str, text: &str) {
        let mut record: ChapterRecord = ChapterRef::new(title, "/c").into();
        record.heading = Some("Mục Thần Ký".to_string());
        record.content_text = Some(text.to_string());
        std::fs::write(dir.join(name), serde_json::to_string(&record).unwrap()).unwrap();
    }

    #[test]
    fn cleaner_strips_site_navigation() {
        let raw = "Wikidich - Mục Thần Ký\n\nChương 1: Tàn Lão Thôn\n\nThân thể.\n\n\n\n\nĐoạn hai.\n\n《 Chương trước\n\nMục lục\n\nChương tiếp 》\n\nTruyện Hot Mới\n\nTruyện khác";
        let cleaned = cleaner().clean(raw);
        assert_eq!(cleaned, "Tàn Lão Thôn\n\nThân thể.\n\nĐoạn hai.");
    }

    #[test]
    fn cleaner_leaves_plain_text_alone() {
        assert_eq!(cleaner().clean("  Một.\n\nHai.  "), "Một.\n\nHai.");
    }

    #[test]
    fn csv_has_header_and_rows() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("chapters.csv");
        let novel = NovelInfo {
            title: "T".to_string(),
            chapters: vec![
                ChapterRef::new("Chương 1: A, B", "/c1").into(),
                ChapterRef::new("Chương 2", "/c2").into(),
            ],
            ..NovelInfo::default()
        };
        write_chapters_csv(&novel, &path)?;
        let out = std::fs::read_to_string(&path)?;
        assert_eq!(out, "title,url\n\"Chương 1: A, B\",/c1\nChương 2,/c2\n");
        Ok(())
    }

    #[test]
    fn novel_json_is_pretty_and_readable() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("info.json");
        let novel = NovelInfo {
            title: "Mục Thần Ký".to_string(),
            chapters: vec![ChapterRef::new("Chương 1", "/c1").into()],
            ..NovelInfo::default()
        };
        write_novel_json(&novel, &path)?;
        let out = std::fs::read_to_string(&path)?;
        assert!(out.contains("\n  \"title\": \"Mục Thần Ký\""));
        let back: NovelInfo = serde_json::from_str(&out)?;
        assert_eq!(back.chapters.len(), 1);
        Ok(())
    }

    #[test]
    fn per_chapter_txt_uses_index_title() -> Result<(), Box<dyn std::error::Error>> {
        let src = tempfile::tempdir()?;
        let out = tempfile::tempdir()?;
        write_record(src.path(), "chapter_0002.json", "Chương 2: Hai", "Hai.\n\n\n\nHết.");
        write_record(src.path(), "chapter_0001.json", "Chương 1: Một", "Một.");
        std::fs::write(src.path().join("notes.json"), "{}")?;

        let count = export_chapters_to_txt(src.path(), out.path(), &cleaner())?;
        assert_eq!(count, 2);
        let first = std::fs::read_to_string(out.path().join("chapter_0001.txt"))?;
        assert_eq!(first, "# Chương 1: Một\n\nMột.");
        let second = std::fs::read_to_string(out.path().join("chapter_0002.txt"))?;
        assert_eq!(second, "# Chương 2: Hai\n\nHai.\n\nHết.");
        Ok(())
    }

    #[test]
    fn single_file_in_chapter_order() -> Result<(), Box<dyn std::error::Error>> {
        let src = tempfile::tempdir()?;
        let out = tempfile::tempdir()?;
        write_record(src.path(), "chapter_0010.json", "Chương 10", "Mười.");
        write_record(src.path(), "chapter_0002.json", "Chương 2", "Hai.");

        let path = export_novel_to_single_file("Mục Thần Ký", src.path(), out.path(), &cleaner())?;
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("mục_thần_ký_full.txt"));
        let text = std::fs::read_to_string(&path)?;
        assert!(text.starts_with("# Mục Thần Ký\n\n## Chương 2\n\nHai.\n\n-----"));
        let two = text.find("## Chương 2").unwrap_or(usize::MAX);
        let ten = text.find("## Chương 10").unwrap_or(0);
        assert!(two < ten);
        Ok(())
    }

    #[test]
    fn empty_chapter_dir_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let src = tempfile::tempdir()?;
        let out = tempfile::tempdir()?;
        assert!(matches!(
            export_chapters_to_txt(src.path(), out.path(), &cleaner()),
            Err(ExportError::NoChapters(_))
        ));
        Ok(())
    }
}
