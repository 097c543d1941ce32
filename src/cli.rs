//! CLI parsing and orchestration. Subcommands: scrape, export, enhance, upload. Maps errors to exit codes.

use crate::config::{self, Config};
use crate::enhance::{self, EnhanceError, EnhanceJob, EnhanceSettings, GeminiRewriter, Pricing, Selection};
use crate::export::{self, ExportError, SiteNavCleaner};
use crate::model::{slugify, NovelInfo};
use crate::scraper::{
    chapters_dir, ChapterSelection, Markers, NovelScraper, PoliteClient, ScraperError, SiteConfig,
    DEFAULT_BASE_URL, DEFAULT_MAX_PAGES,
};
use crate::upload::{self, Authenticator, ClientSecrets, DriveClient, UploadError};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_NOVEL_URL: &str = "https://wikidich.vn/muc-than-ky-convert";
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_ENHANCE_OUTPUT_DIR: &str = "enhance_output";

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Scraper(#[from] ScraperError),

    #[error("{0}")]
    Export(#[from] ExportError),

    #[error("{0}")]
    Enhance(#[from] EnhanceError),

    #[error("{0}")]
    Upload(#[from] UploadError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Enhance(
                EnhanceError::MissingApiKey(_) | EnhanceError::MissingPlaceholder { .. },
            ) => 1,
            CliRunError::Scraper(ScraperError::Io { .. } | ScraperError::ChapterFile { .. }) => 3,
            CliRunError::Scraper(_) => 2,
            CliRunError::Export(_) | CliRunError::Enhance(_) | CliRunError::Upload(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "wdscrape")]
#[command(about = "Scrape a wikidich novel, export it to text, rewrite chapters, and upload the results")]
#[command(
    after_help = "Config file keys (base_url, output_dir, user_agent, request_delay_secs, timeout_secs, retry_count, retry_backoff_secs, max_pages, markers, [enhance]) are read from ./wdscrape.toml or the user config dir. CLI flags override config."
)]
pub struct Args {
    /// Suppress progress output (warnings and errors only).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print verbose error chain.
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scrape novel info, the chapter list, and chapter content.
    Scrape(ScrapeArgs),
    /// Export downloaded chapters to plain text.
    Export(ExportArgs),
    /// Rewrite exported chapters through the Gemini API.
    Enhance(EnhanceArgs),
    /// Upload text and JSON output to Google Drive.
    Upload(UploadArgs),
}

#[derive(ClapArgs, Debug)]
pub struct ScrapeArgs {
    /// Novel landing page URL.
    #[arg(default_value = DEFAULT_NOVEL_URL)]
    pub url: String,

    /// Highest chapter-list page to request (default 19).
    #[arg(long)]
    pub max_pages: Option<u32>,

    /// Chapters to download content for: N for the first N, -1 for all, 0 for none.
    #[arg(long, default_value_t = 3, allow_negative_numbers = true)]
    pub chapters: i64,

    /// Only scrape novel info and the chapter list.
    #[arg(long)]
    pub info_only: bool,

    /// Output directory (default: output).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Delay between requests in seconds (overrides config; default 1). 0 still keeps a 200 ms gap.
    #[arg(long)]
    pub delay: Option<u64>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct ExportArgs {
    /// Novel title. Default: read from the single *_info.json in the output directory.
    #[arg(long)]
    pub title: Option<String>,

    /// Output directory holding the scrape results (default: output).
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct EnhanceArgs {
    /// Directory of chapter .txt files. Default: <output>/<slug>_txt.
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Directory for rewritten chapters.
    #[arg(long, default_value = DEFAULT_ENHANCE_OUTPUT_DIR)]
    pub output: PathBuf,

    /// Prompt template file (overrides config).
    #[arg(long)]
    pub prompt: Option<PathBuf>,

    /// Process only this chapter file, e.g. chapter_0012.txt.
    #[arg(short, long, conflicts_with = "start_chapter")]
    pub chapter: Option<String>,

    /// Start from this chapter file.
    #[arg(short, long)]
    pub start_chapter: Option<String>,

    /// Number of chapters to process from --start-chapter.
    #[arg(short = 'o', long, requires = "start_chapter", value_parser = clap::value_parser!(u32).range(1..))]
    pub offset: Option<u32>,

    /// Maximum concurrent API calls (overrides config; default 10).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub limit: Option<u32>,

    /// Novel title used to locate the default input directory.
    #[arg(long)]
    pub title: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct UploadArgs {
    /// Drive folder name. Default: read from the single *_info.json in the output directory.
    #[arg(long)]
    pub title: Option<String>,

    /// Output directory holding the scrape results (default: output).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// OAuth client secrets file.
    #[arg(long, default_value = upload::DEFAULT_CREDENTIALS_FILE)]
    pub credentials: PathBuf,

    /// Cached token file.
    #[arg(long, default_value = upload::DEFAULT_TOKEN_FILE)]
    pub token: PathBuf,
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config()
        .map_err(CliRunError::InvalidInput)?
        .unwrap_or_default();
    match &args.command {
        Command::Scrape(a) => run_scrape(a, &config, args.quiet),
        Command::Export(a) => run_export(a, &config, args.quiet),
        Command::Enhance(a) => run_enhance(a, &config),
        Command::Upload(a) => run_upload(a, &config, args.quiet),
    }
}

fn output_dir(flag: &Option<PathBuf>, config: &Config) -> PathBuf {
    flag.clone()
        .or_else(|| config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
}

fn create_dir(path: &Path) -> Result<(), CliRunError> {
    std::fs::create_dir_all(path).map_err(|e| {
        CliRunError::InvalidInput(format!(
            "Cannot create output directory {}: {}",
            path.display(),
            e
        ))
    })
}

fn site_config(args: &ScrapeArgs, config: &Config) -> Result<SiteConfig, CliRunError> {
    let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let markers = match &config.markers {
        Some(tokens) => Markers::new(tokens),
        None => Markers::default(),
    };
    if markers.tokens().is_empty() {
        return Err(CliRunError::InvalidInput(
            "Config key markers must contain at least one non-empty token.".to_string(),
        ));
    }
    let max_pages = args
        .max_pages
        .or(config.max_pages)
        .unwrap_or(DEFAULT_MAX_PAGES);
    SiteConfig::new(base_url, markers, max_pages).map_err(|e| {
        CliRunError::InvalidInput(format!("Invalid base_url in config: {}", e))
    })
}

fn build_client(args: &ScrapeArgs, config: &Config) -> Result<PoliteClient, CliRunError> {
    const DEFAULT_DELAY_SECS: u64 = 1;
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_RETRY_COUNT: u32 = 3;
    let delay_secs = args
        .delay
        .or(config.request_delay_secs)
        .unwrap_or(DEFAULT_DELAY_SECS);
    let timeout_secs = args
        .timeout
        .or(config.timeout_secs)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let retry_count = config.retry_count.unwrap_or(DEFAULT_RETRY_COUNT).max(1);
    let retry_backoff_secs = config
        .retry_backoff_secs
        .clone()
        .unwrap_or_else(|| vec![1, 2]);
    let user_agent = args.user_agent.clone().or_else(|| config.user_agent.clone());

    let mut builder = PoliteClient::builder()
        .delay_secs(delay_secs)
        .timeout_secs(timeout_secs)
        .retry_count(retry_count)
        .retry_backoff_secs(retry_backoff_secs);
    if let Some(ua) = user_agent {
        builder = builder.user_agent(ua);
    }
    builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))
}

fn run_scrape(args: &ScrapeArgs, config: &Config, quiet: bool) -> Result<(), CliRunError> {
    let site = site_config(args, config)?;
    let scraper = NovelScraper::new(site)?;
    let mut client = build_client(args, config)?;

    let index = scraper.scrape_index(&mut client, &args.url)?;
    if index.stop.is_failure() {
        warn!(stop = ?index.stop, "chapter list may be incomplete");
    } else {
        info!(stop = ?index.stop, pages = index.pages_fetched, "chapter list complete");
    }
    let mut novel = index.novel;
    if novel.chapters.is_empty() {
        warn!("no chapters found");
    }

    let out_dir = output_dir(&args.output, config);
    create_dir(&out_dir)?;
    let slug = novel.slug();
    export::write_novel_json(&novel, &out_dir.join(format!("{}_info.json", slug)))?;
    export::write_chapters_csv(&novel, &out_dir.join(format!("{}_chapters.csv", slug)))?;

    let selection = ChapterSelection::from_count(args.chapters);
    if !args.info_only && selection != ChapterSelection::None {
        let progress_state: RefCell<Option<indicatif::ProgressBar>> = RefCell::new(None);
        let progress_cb = |n: u32, total: u32| {
            if total == 0 {
                return;
            }
            let mut state = progress_state.borrow_mut();
            let pb = state.get_or_insert_with(|| new_progress_bar(total));
            pb.set_position(n as u64);
            pb.set_message(format!("Fetching chapter {}/{}", n, total));
        };
        let progress: Option<&dyn Fn(u32, u32)> = if quiet { None } else { Some(&progress_cb) };

        let summary = scraper.download_chapters(
            &mut client,
            &mut novel,
            selection,
            &chapters_dir(&out_dir, &slug),
            progress,
        )?;
        if let Some(pb) = progress_state.borrow_mut().take() {
            pb.disable_steady_tick();
            pb.finish_and_clear();
        }
        if summary.failed > 0 {
            warn!(failed = summary.failed, "some chapters could not be downloaded");
        }
        export::write_novel_json(&novel, &out_dir.join(format!("{}_complete.json", slug)))?;
    }

    if !quiet {
        eprintln!(
            "Scraped {} ({} chapters). Output: {}",
            novel.title,
            novel.chapters.len(),
            out_dir.display()
        );
    }
    Ok(())
}

fn new_progress_bar(total: u32) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new(total as u64);
    let style = indicatif::ProgressStyle::default_bar()
        .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
        .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .progress_chars("█▉▊▋▌▍▎▏ ");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Title from `--title`, else from the only `*_info.json` in `out_dir`.
fn resolve_title(flag: &Option<String>, out_dir: &Path) -> Result<String, CliRunError> {
    if let Some(t) = flag {
        return Ok(t.clone());
    }
    let entries = std::fs::read_dir(out_dir).map_err(|e| {
        CliRunError::InvalidInput(format!(
            "Cannot read output directory {}: {}. Run scrape first or pass --title.",
            out_dir.display(),
            e
        ))
    })?;
    let infos: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with("_info.json"))
                .unwrap_or(false)
        })
        .collect();
    let [info] = infos.as_slice() else {
        return Err(CliRunError::InvalidInput(format!(
            "Found {} *_info.json files in {}; pass --title to pick a novel.",
            infos.len(),
            out_dir.display()
        )));
    };
    let text = std::fs::read_to_string(info).map_err(|e| {
        CliRunError::InvalidInput(format!("Cannot read {}: {}", info.display(), e))
    })?;
    let novel: NovelInfo = serde_json::from_str(&text).map_err(|e| {
        CliRunError::InvalidInput(format!("Invalid novel file {}: {}", info.display(), e))
    })?;
    Ok(novel.title)
}

fn txt_dir(out_dir: &Path, title: &str) -> PathBuf {
    out_dir.join(format!("{}_txt", slugify(title)))
}

fn run_export(args: &ExportArgs, config: &Config, quiet: bool) -> Result<(), CliRunError> {
    let out_dir = output_dir(&args.output, config);
    let title = resolve_title(&args.title, &out_dir)?;
    let source = chapters_dir(&out_dir, &slugify(&title));
    let dest = txt_dir(&out_dir, &title);
    let cleaner = SiteNavCleaner::new()?;

    let count = export::export_chapters_to_txt(&source, &dest, &cleaner)?;
    let full = export::export_novel_to_single_file(&title, &source, &dest, &cleaner)?;
    if !quiet {
        eprintln!("Exported {} chapters to {}", count, dest.display());
        eprintln!("Wrote {}", full.display());
    }
    Ok(())
}

fn enhance_selection(args: &EnhanceArgs) -> Selection {
    match (&args.chapter, &args.start_chapter) {
        (Some(c), _) => Selection::Single(c.clone()),
        (None, Some(s)) => Selection::From {
            start: s.clone(),
            count: args.offset.map(|n| n as usize),
        },
        (None, None) => Selection::All,
    }
}

fn enhance_settings(args: &EnhanceArgs, config: &Config) -> EnhanceSettings {
    let c = &config.enhance;
    let defaults = EnhanceSettings::default();
    EnhanceSettings {
        concurrency: args
            .limit
            .map(|n| n as usize)
            .or(c.concurrency)
            .unwrap_or(defaults.concurrency)
            .max(1),
        retry_count: c.retry_count.unwrap_or(defaults.retry_count).max(1),
        retry_delay: c
            .retry_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.retry_delay),
        pricing: Pricing {
            input_per_1k: c.input_price_per_1k.unwrap_or(defaults.pricing.input_per_1k),
            output_per_1k: c.output_price_per_1k.unwrap_or(defaults.pricing.output_per_1k),
        },
        max_cost_usd: c.max_cost_usd.unwrap_or(defaults.max_cost_usd),
    }
}

fn run_enhance(args: &EnhanceArgs, config: &Config) -> Result<(), CliRunError> {
    let endpoint = config
        .enhance
        .endpoint
        .as_deref()
        .unwrap_or(enhance::DEFAULT_ENDPOINT);
    let model = config
        .enhance
        .model
        .as_deref()
        .unwrap_or(enhance::DEFAULT_MODEL);
    let rewriter = GeminiRewriter::from_env(endpoint, model)?;

    let input_dir = match &args.input {
        Some(dir) => dir.clone(),
        None => {
            let out_dir = output_dir(&None, config);
            txt_dir(&out_dir, &resolve_title(&args.title, &out_dir)?)
        }
    };
    let job = EnhanceJob {
        input_dir,
        output_dir: args.output.clone(),
        prompt_file: args
            .prompt
            .clone()
            .or_else(|| config.enhance.prompt_file.clone())
            .unwrap_or_else(|| PathBuf::from(enhance::DEFAULT_PROMPT_FILE)),
        selection: enhance_selection(args),
    };
    let settings = enhance_settings(args, config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to start async runtime: {}", e)))?;
    let report = runtime.block_on(enhance::run(&job, Arc::new(rewriter), &settings))?;
    eprintln!(
        "Processed {} chapters, skipped {}. Estimated cost: ${:.6}",
        report.processed, report.skipped, report.total_cost_usd
    );
    Ok(())
}

fn run_upload(args: &UploadArgs, config: &Config, quiet: bool) -> Result<(), CliRunError> {
    let out_dir = output_dir(&args.output, config);
    let title = resolve_title(&args.title, &out_dir)?;
    let secrets = ClientSecrets::load(&args.credentials)?;
    let token = Authenticator::new(secrets, args.token.clone())?.access_token()?;
    let mut drive = DriveClient::new(token)?;

    let summary = upload::upload_novel(&mut drive, &title, &txt_dir(&out_dir, &title), &out_dir)?;
    if !quiet {
        eprintln!(
            "Uploaded {} text and {} JSON files to Drive folder {:?}",
            summary.txt_files, summary.json_files, title
        );
    }
    Ok(())
}
