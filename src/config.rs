//! Optional config file loading. Search order: ./wdscrape.toml, then
//! $XDG_CONFIG_HOME/wdscrape/config.toml (or ~/.config/wdscrape/config.toml).

use serde::Deserialize;
use std::path::PathBuf;

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Site origin used for the chapter-list API and relative chapter links.
    pub base_url: Option<String>,
    /// Default output directory when -o is not set. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Delay in seconds between requests.
    pub request_delay_secs: Option<u64>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Number of HTTP attempts for transient failures (default 3).
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry (e.g. [1, 2]). Length should be retry_count - 1.
    pub retry_backoff_secs: Option<Vec<u64>>,
    /// Highest chapter-list page to request (default 19).
    pub max_pages: Option<u32>,
    /// Chapter title markers, e.g. ["Chương", "Chapter"].
    pub markers: Option<Vec<String>>,
    pub enhance: EnhanceConfig,
}

/// `[enhance]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct EnhanceConfig {
    pub model: Option<String>,
    /// API origin, e.g. https://generativelanguage.googleapis.com
    pub endpoint: Option<String>,
    /// Maximum concurrent rewrite requests.
    pub concurrency: Option<usize>,
    pub retry_count: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    /// USD per 1,000 prompt tokens.
    pub input_price_per_1k: Option<f64>,
    /// USD per 1,000 response tokens.
    pub output_price_per_1k: Option<f64>,
    /// Warn once the estimated total cost passes this.
    pub max_cost_usd: Option<f64>,
    pub prompt_file: Option<PathBuf>,
}

/// Search order: (1) ./wdscrape.toml, (2) $XDG_CONFIG_HOME/wdscrape/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("wdscrape.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("wdscrape").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            let s = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
            let config: Config = toml::from_str(&s)
                .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
            tracing::debug!(path = %path.display(), "loaded config");
            return Ok(Some(config));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let c: Config = toml::from_str("").unwrap();
        assert!(c.base_url.is_none());
        assert!(c.output_dir.is_none());
        assert!(c.max_pages.is_none());
        assert!(c.markers.is_none());
        assert!(c.enhance.model.is_none());
        assert!(c.enhance.concurrency.is_none());
    }

    #[test]
    fn parse_full_config() {
        let s = r#"
            base_url = "https://example.org"
            output_dir = "out"
            user_agent = "Custom/1.0"
            request_delay_secs = 3
            timeout_secs = 60
            retry_count = 5
            retry_backoff_secs = [1, 2, 4, 8]
            max_pages = 40
            markers = ["Chương", "Chapter"]

            [enhance]
            model = "gemini-2.0-flash"
            endpoint = "http://localhost:8080"
            concurrency = 4
            retry_count = 2
            retry_delay_secs = 5
            input_price_per_1k = 0.001
            output_price_per_1k = 0.002
            max_cost_usd = 1.5
            prompt_file = "prompt/translate.prompt.txt"
        "#;
        let c: Config = toml::from_str(s).unwrap();
        assert_eq!(c.base_url.as_deref(), Some("https://example.org"));
        assert_eq!(c.output_dir.as_deref(), Some(std::path::Path::new("out")));
        assert_eq!(c.user_agent.as_deref(), Some("Custom/1.0"));
        assert_eq!(c.request_delay_secs, Some(3));
        assert_eq!(c.timeout_secs, Some(60));
        assert_eq!(c.retry_count, Some(5));
        assert_eq!(
            c.retry_backoff_secs.as_deref(),
            Some([1, 2, 4, 8].as_slice())
        );
        assert_eq!(c.max_pages, Some(40));
        assert_eq!(
            c.markers,
            Some(vec!["Chương".to_string(), "Chapter".to_string()])
        );
        assert_eq!(c.enhance.model.as_deref(), Some("gemini-2.0-flash"));
        assert_eq!(c.enhance.concurrency, Some(4));
        assert_eq!(c.enhance.retry_delay_secs, Some(5));
        assert_eq!(c.enhance.max_cost_usd, Some(1.5));
        assert_eq!(
            c.enhance.prompt_file.as_deref(),
            Some(std::path::Path::new("prompt/translate.prompt.txt"))
        );
    }

    #[test]
    fn parse_partial_enhance_table() {
        let s = r#"
            [enhance]
            concurrency = 2
        "#;
        let c: Config = toml::from_str(s).unwrap();
        assert!(c.request_delay_secs.is_none());
        assert_eq!(c.enhance.concurrency, Some(2));
        assert!(c.enhance.model.is_none());
    }

    #[test]
    fn invalid_toml_errors() {
        assert!(toml::from_str::<Config>("output_dir = [").is_err());
        assert!(toml::from_str::<Config>("max_pages = \"many\"").is_err());
    }
}
