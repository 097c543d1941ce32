//! Upload scraped output to Google Drive.
//!
//! Authorization uses the OAuth installed-app flow: client secrets come from a
//! `credentials.json` downloaded from the cloud console, and the resulting
//! token is cached on disk so later runs skip the consent step.

use reqwest::blocking::Client;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
pub const DEFAULT_CREDENTIALS_FILE: &str = "credentials.json";
pub const DEFAULT_TOKEN_FILE: &str = "token.json";

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files?uploadType=multipart";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const REDIRECT_URI: &str = "http://localhost";
/// Tokens this close to expiry are treated as expired.
const EXPIRY_MARGIN_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid client secrets in {path}: {reason}")]
    Secrets { path: PathBuf, reason: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{context} failed with HTTP {status}: {body}")]
    Api {
        context: String,
        status: u16,
        body: String,
    },

    #[error("Authorization failed: {0}")]
    Auth(String),
}

/// The `installed` (or `web`) block of a client secrets file.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Deserialize)]
struct SecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn load(path: &Path) -> Result<Self, UploadError> {
        let text = std::fs::read_to_string(path).map_err(|source| UploadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, UploadError> {
        let file: SecretsFile = serde_json::from_str(text).map_err(|e| UploadError::Secrets {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        file.installed
            .or(file.web)
            .ok_or_else(|| UploadError::Secrets {
                path: path.to_path_buf(),
                reason: "expected an \"installed\" or \"web\" object".to_string(),
            })
    }

    /// URL the user opens to grant Drive access.
    pub fn consent_url(&self) -> Result<Url, UploadError> {
        Url::parse_with_params(
            &self.auth_uri,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", REDIRECT_URI),
                ("response_type", "code"),
                ("scope", DRIVE_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| UploadError::Auth(format!("invalid auth_uri {}: {}", self.auth_uri, e)))
    }
}

/// Cached credentials, stored as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCache {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    pub expires_at: u64,
}

impl TokenCache {
    pub fn is_valid_at(&self, now: u64) -> bool {
        !self.access_token.is_empty() && now + EXPIRY_MARGIN_SECS < self.expires_at
    }

    pub fn load(path: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&text) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "ignoring unreadable token cache");
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), UploadError> {
        let write_err = |source| UploadError::Write {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        std::fs::write(path, json).map_err(write_err)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
    refresh_token: Option<String>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Pull the authorization code out of either a bare code or the pasted redirect URL.
pub fn extract_auth_code(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    match Url::parse(input) {
        Ok(url) => url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned()),
        Err(_) => Some(input.to_string()),
    }
}

/// OAuth installed-app flow with an on-disk token cache.
pub struct Authenticator {
    http: Client,
    secrets: ClientSecrets,
    token_path: PathBuf,
}

impl Authenticator {
    pub fn new(secrets: ClientSecrets, token_path: PathBuf) -> Result<Self, UploadError> {
        let http = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            http,
            secrets,
            token_path,
        })
    }

    /// Cached token if still valid; refreshed if it has a refresh token; otherwise ask the user.
    pub fn access_token(&self) -> Result<String, UploadError> {
        let cached = TokenCache::load(&self.token_path);
        if let Some(token) = &cached {
            if token.is_valid_at(now_secs()) {
                debug!("using cached drive token");
                return Ok(token.access_token.clone());
            }
        }
        let token = match cached.and_then(|t| t.refresh_token) {
            Some(refresh) => {
                info!("refreshing drive token");
                self.refresh(refresh)?
            }
            None => self.authorize_interactively()?,
        };
        token.save(&self.token_path)?;
        Ok(token.access_token)
    }

    fn refresh(&self, refresh_token: String) -> Result<TokenCache, UploadError> {
        let resp = self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ])?;
        Ok(TokenCache {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token.or(Some(refresh_token)),
            expires_at: now_secs() + resp.expires_in,
        })
    }

    fn authorize_interactively(&self) -> Result<TokenCache, UploadError> {
        let url = self.secrets.consent_url()?;
        let mut stderr = std::io::stderr();
        let _ = writeln!(
            stderr,
            "Open this URL in a browser and grant access:\n\n  {}\n\nThen paste the code (or the full redirected URL) here:",
            url
        );
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| UploadError::Auth(format!("cannot read authorization code: {}", e)))?;
        let code = extract_auth_code(&line)
            .ok_or_else(|| UploadError::Auth("no authorization code entered".to_string()))?;

        let resp = self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
        ])?;
        Ok(TokenCache {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            expires_at: now_secs() + resp.expires_in,
        })
    }

    fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, UploadError> {
        let mut form = vec![
            ("client_id", self.secrets.client_id.as_str()),
            ("client_secret", self.secrets.client_secret.as_str()),
        ];
        form.extend_from_slice(params);
        let resp = self.http.post(&self.secrets.token_uri).form(&form).send()?;
        let resp = check(resp, "token request")?;
        Ok(resp.json()?)
    }
}

fn check(
    resp: reqwest::blocking::Response,
    context: &str,
) -> Result<reqwest::blocking::Response, UploadError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(UploadError::Api {
        context: context.to_string(),
        status: status.as_u16(),
        body: body.chars().take(500).collect(),
    })
}

/// Folder and file creation on a remote drive. Returns the new item's id.
pub trait DriveApi {
    fn create_folder(&mut self, name: &str, parent: Option<&str>) -> Result<String, UploadError>;
    fn upload_file(&mut self, path: &Path, folder_id: &str) -> Result<String, UploadError>;
}

#[derive(Deserialize)]
struct CreatedFile {
    id: String,
}

/// Drive v3 REST client authorized with a bearer token.
pub struct DriveClient {
    http: Client,
    access_token: String,
}

impl DriveClient {
    pub fn new(access_token: String) -> Result<Self, UploadError> {
        let http = Client::builder().timeout(Duration::from_secs(300)).build()?;
        Ok(Self { http, access_token })
    }
}

impl DriveApi for DriveClient {
    fn create_folder(&mut self, name: &str, parent: Option<&str>) -> Result<String, UploadError> {
        let mut meta = serde_json::json!({ "name": name, "mimeType": FOLDER_MIME });
        if let Some(p) = parent {
            meta["parents"] = serde_json::json!([p]);
        }
        let resp = self
            .http
            .post(FILES_URL)
            .query(&[("fields", "id")])
            .bearer_auth(&self.access_token)
            .json(&meta)
            .send()?;
        let created: CreatedFile = check(resp, &format!("create folder {:?}", name))?.json()?;
        info!(folder = name, id = %created.id, "created drive folder");
        Ok(created.id)
    }

    fn upload_file(&mut self, path: &Path, folder_id: &str) -> Result<String, UploadError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        let data = std::fs::read(path).map_err(|source| UploadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let boundary = format!("wdscrape-{}", now_secs());
        let body = multipart_related(&boundary, &name, folder_id, mime_for(path), &data);
        let resp = self
            .http
            .post(UPLOAD_URL)
            .query(&[("fields", "id")])
            .bearer_auth(&self.access_token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()?;
        let created: CreatedFile = check(resp, &format!("upload {}", name))?.json()?;
        info!(file = %name, "uploaded");
        Ok(created.id)
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=UTF-8",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}

/// Body for a Drive multipart upload: JSON metadata part, then the file bytes.
fn multipart_related(
    boundary: &str,
    name: &str,
    folder_id: &str,
    mime: &str,
    data: &[u8],
) -> Vec<u8> {
    let meta = serde_json::json!({ "name": name, "parents": [folder_id] });
    let mut body = Vec::with_capacity(data.len() + 512);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{b}\r\nContent-Type: {mime}\r\n\r\n",
            b = boundary,
            meta = meta,
            mime = mime
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

/// Files directly in `dir` with the given extension, sorted by name.
fn files_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, UploadError> {
    let entries = std::fs::read_dir(dir).map_err(|source| UploadError::Read {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(ext))
        .collect();
    files.sort();
    Ok(files)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub txt_files: usize,
    pub json_files: usize,
}

/// Create `<title>/txt_files` and `<title>/json_files`, then upload every
/// `.txt` from `txt_dir` and every `.json` from `json_dir`.
pub fn upload_novel<D: DriveApi>(
    drive: &mut D,
    title: &str,
    txt_dir: &Path,
    json_dir: &Path,
) -> Result<UploadSummary, UploadError> {
    let txt = files_with_extension(txt_dir, "txt")?;
    let json = files_with_extension(json_dir, "json")?;

    let root = drive.create_folder(title, None)?;
    let txt_folder = drive.create_folder("txt_files", Some(&root))?;
    let json_folder = drive.create_folder("json_files", Some(&root))?;

    for path in &txt {
        drive.upload_file(path, &txt_folder)?;
    }
    for path in &json {
        drive.upload_file(path, &json_folder)?;
    }
    info!(txt = txt.len(), json = json.len(), "upload complete");
    Ok(UploadSummary {
        txt_files: txt.len(),
        json_files: json.len(),
    })
}
