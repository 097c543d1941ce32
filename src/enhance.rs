//! Chapter rewrite fan-out through a language-model API.
//!
//! Each selected `.txt` chapter is pasted into a prompt template and sent to a
//! [Rewriter]. Calls run concurrently, bounded by a semaphore; a chapter whose
//! call still fails after its retries is skipped and the rest carry on.

use async_trait::async_trait;
use serde::Deserialize;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Marker in the prompt template replaced by the chapter text.
pub const PROMPT_PLACEHOLDER: &str = "[Dán đoạn văn cần biên tập ở đây]";
pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";
pub const DEFAULT_MODEL: &str = "gemini-2.5-pro-exp-03-25";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_PROMPT_FILE: &str = "prompt/translate.prompt.txt";
pub const DEFAULT_CONCURRENCY: usize = 10;

const REQUEST_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Error)]
pub enum EnhanceError {
    #[error("{0} is not set; export it or add it to your environment")]
    MissingApiKey(&'static str),

    #[error("Cannot read prompt file {path}: {source}")]
    PromptRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Prompt placeholder {placeholder:?} not found in {path}")]
    MissingPlaceholder {
        path: PathBuf,
        placeholder: &'static str,
    },

    #[error("Cannot read input directory {path}: {source}")]
    InputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No .txt files found in {0}")]
    NoInputFiles(PathBuf),

    #[error("Chapter file {name} not found in {dir}")]
    ChapterNotFound { name: String, dir: PathBuf },

    #[error("No chapters selected: {0}")]
    EmptySelection(String),

    #[error("Cannot create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Rewrite request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Rewrite API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Rewrite API returned no text (blocked or empty response)")]
    EmptyResponse,

    #[error("Rewrite task panicked: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Rewritten text plus token usage for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteResult {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One rewrite call. Implementations must be shareable across tasks.
#[async_trait]
pub trait Rewriter: Send + Sync {
    async fn rewrite(&self, prompt: &str) -> Result<RewriteResult, EnhanceError>;
}

/// Gemini `generateContent` over REST.
pub struct GeminiRewriter {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiRewriter {
    pub fn new(endpoint: &str, model: &str, api_key: String) -> Result<Self, EnhanceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(EnhanceError::Client)?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    /// Read the API key from `GOOGLE_API_KEY`. Fails before any request is made.
    pub fn from_env(endpoint: &str, model: &str) -> Result<Self, EnhanceError> {
        let key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(EnhanceError::MissingApiKey(API_KEY_ENV))?;
        Self::new(endpoint, model, key)
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        )
    }
}

#[async_trait]
impl Rewriter for GeminiRewriter {
    async fn rewrite(&self, prompt: &str) -> Result<RewriteResult, EnhanceError> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });
        let resp = self
            .client
            .post(self.url())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(EnhanceError::Request)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EnhanceError::Api {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        let parsed: GenerateResponse = resp.json().await.map_err(EnhanceError::Request)?;
        parsed.into_result()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UsageMetadata {
    prompt_token_count: u64,
    candidates_token_count: u64,
}

impl GenerateResponse {
    fn into_result(self) -> Result<RewriteResult, EnhanceError> {
        let usage = self.usage_metadata.unwrap_or_default();
        let text: String = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(EnhanceError::EmptyResponse);
        }
        Ok(RewriteResult {
            text,
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        })
    }
}

/// Prompt template; the first placeholder takes the chapter text.
#[derive(Debug, Clone)]
pub struct Prompt {
    template: String,
}

impl Prompt {
    pub fn load(path: &Path) -> Result<Self, EnhanceError> {
        let template = std::fs::read_to_string(path).map_err(|source| EnhanceError::PromptRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_template(template, path)
    }

    pub fn from_template(template: String, origin: &Path) -> Result<Self, EnhanceError> {
        if !template.contains(PROMPT_PLACEHOLDER) {
            return Err(EnhanceError::MissingPlaceholder {
                path: origin.to_path_buf(),
                placeholder: PROMPT_PLACEHOLDER,
            });
        }
        Ok(Self { template })
    }

    /// Template with the first placeholder replaced by `chapter`.
    pub fn render(&self, chapter: &str) -> String {
        self.template.replacen(PROMPT_PLACEHOLDER, chapter, 1)
    }
}

/// Pieces of a file name for natural ordering: digit runs compare as numbers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NaturalPart {
    Number(u64),
    Text(String),
}

pub fn natural_sort_key(name: &str) -> Vec<NaturalPart> {
    let mut parts = Vec::new();
    let mut digits = String::new();
    let mut text = String::new();
    for c in name.chars() {
        if c.is_ascii_digit() {
            if !text.is_empty() {
                parts.push(NaturalPart::Text(std::mem::take(&mut text).to_lowercase()));
            }
            digits.push(c);
        } else {
            if !digits.is_empty() {
                parts.push(NaturalPart::Number(
                    std::mem::take(&mut digits).parse().unwrap_or(u64::MAX),
                ));
            }
            text.push(c);
        }
    }
    if !digits.is_empty() {
        parts.push(NaturalPart::Number(digits.parse().unwrap_or(u64::MAX)));
    }
    if !text.is_empty() {
        parts.push(NaturalPart::Text(text.to_lowercase()));
    }
    parts
}

fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_sort_key(a).cmp(&natural_sort_key(b))
}

/// `.txt` file names in `dir`, naturally sorted (`chapter_2` before `chapter_10`).
pub fn list_chapter_files(dir: &Path) -> Result<Vec<String>, EnhanceError> {
    let entries = std::fs::read_dir(dir).map_err(|source| EnhanceError::InputDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|n| n.ends_with(".txt"))
        .collect();
    if names.is_empty() {
        return Err(EnhanceError::NoInputFiles(dir.to_path_buf()));
    }
    names.sort_by(|a, b| natural_cmp(a, b));
    Ok(names)
}

/// Which chapter files to rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Single(String),
    /// From `start` (inclusive) for `count` files, or to the end.
    From { start: String, count: Option<usize> },
}

impl Selection {
    pub fn apply(&self, files: &[String], dir: &Path) -> Result<Vec<String>, EnhanceError> {
        let position = |name: &str| {
            files
                .iter()
                .position(|f| f == name)
                .ok_or_else(|| EnhanceError::ChapterNotFound {
                    name: name.to_string(),
                    dir: dir.to_path_buf(),
                })
        };
        let picked: Vec<String> = match self {
            Selection::All => files.to_vec(),
            Selection::Single(name) => vec![files[position(name)?].clone()],
            Selection::From { start, count } => {
                let from = position(start)?;
                let end = count.map_or(files.len(), |n| (from + n).min(files.len()));
                files[from..end].to_vec()
            }
        };
        if picked.is_empty() {
            return Err(EnhanceError::EmptySelection(format!("{:?}", self)));
        }
        Ok(picked)
    }
}

/// Token pricing in USD per 1,000 tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_per_1k: 0.0035,
            output_per_1k: 0.0105,
        }
    }
}

impl Pricing {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 / 1000.0 * self.input_per_1k
            + output_tokens as f64 / 1000.0 * self.output_per_1k
    }
}

#[derive(Debug, Clone)]
pub struct EnhanceSettings {
    /// Maximum rewrite calls in flight.
    pub concurrency: usize,
    /// Attempts per chapter (at least 1).
    pub retry_count: u32,
    /// Fixed wait between attempts.
    pub retry_delay: Duration,
    pub pricing: Pricing,
    pub max_cost_usd: f64,
}

impl Default for EnhanceSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_count: 3,
            retry_delay: Duration::from_secs(5),
            pricing: Pricing::default(),
            max_cost_usd: 5.0,
        }
    }
}

/// What happened to one chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterOutcome {
    pub file: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub written: bool,
}

impl ChapterOutcome {
    fn skipped(file: String) -> Self {
        Self {
            file,
            input_tokens: 0,
            output_tokens: 0,
            written: false,
        }
    }
}

/// Rewrite `files` from `input_dir` into `output_dir` with at most `settings.concurrency` calls in flight.
///
/// Outcomes come back in natural file order regardless of completion order.
pub async fn run_fan_out(
    rewriter: Arc<dyn Rewriter>,
    prompt: Arc<Prompt>,
    files: Vec<String>,
    input_dir: &Path,
    output_dir: &Path,
    settings: &EnhanceSettings,
) -> Result<Vec<ChapterOutcome>, EnhanceError> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|source| EnhanceError::OutputDir {
            path: output_dir.to_path_buf(),
            source,
        })?;

    let permits = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    info!(
        chapters = files.len(),
        limit = settings.concurrency.max(1),
        "starting rewrite fan-out"
    );

    let mut tasks = JoinSet::new();
    for file in files {
        let permits = Arc::clone(&permits);
        let rewriter = Arc::clone(&rewriter);
        let prompt = Arc::clone(&prompt);
        let input = input_dir.join(&file);
        let output = output_dir.join(&file);
        let attempts = settings.retry_count.max(1);
        let delay = settings.retry_delay;
        tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return ChapterOutcome::skipped(file);
            };
            rewrite_chapter(rewriter.as_ref(), &prompt, file, &input, &output, attempts, delay)
                .await
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined?);
    }
    outcomes.sort_by(|a, b| natural_cmp(&a.file, &b.file));
    Ok(outcomes)
}

async fn rewrite_chapter(
    rewriter: &dyn Rewriter,
    prompt: &Prompt,
    file: String,
    input: &Path,
    output: &Path,
    attempts: u32,
    delay: Duration,
) -> ChapterOutcome {
    let chapter = match tokio::fs::read_to_string(input).await {
        Ok(text) => text,
        Err(e) => {
            warn!(file = %file, error = %e, "cannot read chapter; skipped");
            return ChapterOutcome::skipped(file);
        }
    };
    let full_prompt = prompt.render(&chapter);
    debug!(file = %file, chars = full_prompt.chars().count(), "calling rewrite api");

    let mut attempt = 1;
    let result = loop {
        match rewriter.rewrite(&full_prompt).await {
            Ok(r) => break Some(r),
            Err(e) if attempt < attempts => {
                warn!(file = %file, attempt, error = %e, "rewrite failed; retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(file = %file, attempts, error = %e, "rewrite failed; chapter skipped");
                break None;
            }
        }
    };
    let Some(result) = result else {
        return ChapterOutcome::skipped(file);
    };

    let written = match tokio::fs::write(output, &result.text).await {
        Ok(()) => {
            info!(file = %file, "wrote rewritten chapter");
            true
        }
        Err(e) => {
            warn!(file = %file, error = %e, "cannot write rewritten chapter");
            false
        }
    };
    ChapterOutcome {
        file,
        input_tokens: result.input_tokens,
        output_tokens: result.output_tokens,
        written,
    }
}

/// Cost totals for a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct EnhanceReport {
    pub processed: usize,
    pub skipped: usize,
    pub total_cost_usd: f64,
    pub over_budget: bool,
}

/// Log per-chapter tokens and cost, warning once when the running total passes the budget.
pub fn summarize(outcomes: &[ChapterOutcome], settings: &EnhanceSettings) -> EnhanceReport {
    let mut total = 0.0;
    let mut over_budget = false;
    for o in outcomes {
        let cost = settings.pricing.cost(o.input_tokens, o.output_tokens);
        total += cost;
        info!(
            file = %o.file,
            input_tokens = o.input_tokens,
            output_tokens = o.output_tokens,
            cost = %format!("${:.6}", cost),
            cumulative = %format!("${:.6}", total),
            written = o.written,
            "chapter result"
        );
        if !over_budget && total >= settings.max_cost_usd {
            over_budget = true;
            warn!(
                limit = %format!("${:.2}", settings.max_cost_usd),
                "cumulative cost limit exceeded"
            );
        }
    }
    let processed = outcomes.iter().filter(|o| o.written).count();
    EnhanceReport {
        processed,
        skipped: outcomes.len() - processed,
        total_cost_usd: total,
        over_budget,
    }
}

/// Inputs for one enhance run.
#[derive(Debug, Clone)]
pub struct EnhanceJob {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub prompt_file: PathBuf,
    pub selection: Selection,
}

/// Load the prompt, pick files, fan out, and summarize.
pub async fn run(
    job: &EnhanceJob,
    rewriter: Arc<dyn Rewriter>,
    settings: &EnhanceSettings,
) -> Result<EnhanceReport, EnhanceError> {
    let prompt = Arc::new(Prompt::load(&job.prompt_file)?);
    let all = list_chapter_files(&job.input_dir)?;
    let files = job.selection.apply(&all, &job.input_dir)?;
    info!(selected = files.len(), available = all.len(), "chapters selected");

    let outcomes = run_fan_out(
        rewriter,
        prompt,
        files,
        &job.input_dir,
        &job.output_dir,
        settings,
    )
    .await?;
    let report = summarize(&outcomes, settings);
    info!(
        processed = report.processed,
        skipped = report.skipped,
        total = %format!("${:.6}", report.total_cost_usd),
        "enhance finished"
    );
    Ok(report)
}
