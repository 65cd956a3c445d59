//! Optional config file loading. Search order: ./novelscrape.toml, then
//! $XDG_CONFIG_HOME/novelscrape/config.toml (or ~/.config/novelscrape/config.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};

const LOCAL_FILE: &str = "novelscrape.toml";
const APP_DIR: &str = "novelscrape";

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Default output directory when -o is not set. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// HTTP User-Agent header (also used by the browser session).
    pub user_agent: Option<String>,
    /// Delay in milliseconds after every successful request.
    pub request_delay_ms: Option<u64>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Attempts per request for transient failures.
    pub retry_count: Option<u32>,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_base_delay_secs: Option<u64>,
    /// Where browser failure screenshots go.
    pub snapshot_dir: Option<PathBuf>,
    /// Run the browser without a window.
    pub headless: Option<bool>,
    /// Include toc.ncx for legacy readers.
    pub include_ncx: Option<bool>,
}

/// Search order: (1) ./novelscrape.toml, (2) $XDG_CONFIG_HOME/novelscrape/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join(LOCAL_FILE)];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join(APP_DIR).join("config.toml"));
    }
    load_first(&paths)
}

fn load_first(paths: &[PathBuf]) -> Result<Option<Config>, String> {
    for path in paths {
        if path.exists() {
            return load_file(path).map(Some);
        }
    }
    Ok(None)
}

fn load_file(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    toml::from_str(&s).map_err(|e| format!("Invalid config {}: {}", path.display(), e))
}
