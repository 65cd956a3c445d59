//! CLI parsing and orchestration. Parses args, runs scrape -> EPUB. Maps errors to exit codes.

use crate::config::{self, Config};
use crate::engine::{
    resolve, BookScraper, ChapterRange, Checkpoint, PoliteClient, Renderer, ScrapeOptions,
    ScraperError, SiteProfile,
};
use crate::epub::{self, EpubError};
use clap::Parser;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_DELAY_MS: u64 = 500;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_RETRY_BASE_SECS: u64 = 2;
const UNTITLED: &str = "Untitled_Book";

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Scraper(#[from] ScraperError),

    #[error("{0}")]
    Epub(#[from] EpubError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Scraper(_) => 2,
            CliRunError::Epub(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "novelscrape")]
#[command(about = "Scrape a serialized web novel from a supported reading site and write EPUB")]
#[command(
    after_help = "Config file keys (output_dir, user_agent, request_delay_ms, timeout_secs, retry_count, retry_base_delay_secs, snapshot_dir, headless, include_ncx) are read from ./novelscrape.toml or the user config dir. CLI flags override config."
)]
pub struct Args {
    /// Book index URL on a supported site.
    pub url: String,

    /// First chapter to fetch (1-based, inclusive).
    #[arg(short, long)]
    pub start: Option<usize>,

    /// Last chapter to fetch (1-based, inclusive). Default: last chapter.
    #[arg(short, long)]
    pub end: Option<usize>,

    /// Output directory. The file is named after the book title.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Checkpoint file (JSON). Progress is saved after each chapter and resumed from on restart.
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Resolve the site, read metadata and the chapter list, print counts and the output path without writing.
    #[arg(long)]
    pub dry_run: bool,

    /// Show the browser window for challenge-protected sites.
    #[arg(long)]
    pub headed: bool,

    /// Warnings and errors only; no progress bar.
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug logging and the full error chain.
    #[arg(short, long)]
    pub verbose: bool,

    /// Include toc.ncx for legacy readers.
    #[arg(long)]
    pub ncx: bool,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Delay after each successful request in milliseconds (overrides config; default 500).
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Values resolved from flags, then config, then defaults.
#[derive(Debug, Clone, PartialEq)]
struct Settings {
    output_dir: PathBuf,
    user_agent: Option<String>,
    delay_ms: u64,
    timeout_secs: u64,
    retry_count: u32,
    retry_base_secs: u64,
    snapshot_dir: PathBuf,
    headless: bool,
    include_ncx: bool,
}

impl Settings {
    fn resolve(args: &Args, config: Option<&Config>) -> Self {
        Self {
            output_dir: args
                .output_dir
                .clone()
                .or_else(|| config.and_then(|c| c.output_dir.clone()))
                .unwrap_or_else(|| PathBuf::from(".")),
            user_agent: args
                .user_agent
                .clone()
                .or_else(|| config.and_then(|c| c.user_agent.clone())),
            delay_ms: args
                .delay_ms
                .or_else(|| config.and_then(|c| c.request_delay_ms))
                .unwrap_or(DEFAULT_DELAY_MS),
            timeout_secs: args
                .timeout
                .or_else(|| config.and_then(|c| c.timeout_secs))
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            retry_count: config
                .and_then(|c| c.retry_count)
                .unwrap_or(DEFAULT_RETRY_COUNT)
                .max(1),
            retry_base_secs: config
                .and_then(|c| c.retry_base_delay_secs)
                .unwrap_or(DEFAULT_RETRY_BASE_SECS),
            snapshot_dir: config
                .and_then(|c| c.snapshot_dir.clone())
                .unwrap_or_else(|| PathBuf::from(".")),
            headless: !args.headed && config.and_then(|c| c.headless).unwrap_or(true),
            include_ncx: args.ncx || config.and_then(|c| c.include_ncx).unwrap_or(false),
        }
    }

    fn client(&self) -> Result<PoliteClient, CliRunError> {
        let mut builder = PoliteClient::builder()
            .delay_ms(self.delay_ms)
            .timeout_secs(self.timeout_secs)
            .retry_count(self.retry_count)
            .retry_base_secs(self.retry_base_secs);
        if let Some(ua) = &self.user_agent {
            builder = builder.user_agent(ua.clone());
        }
        builder
            .build()
            .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))
    }
}

/// Book title to a file stem: drops `\/*?:"<>|`, turns whitespace runs into `_`.
fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .collect();
    let stem = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    if stem.is_empty() {
        UNTITLED.to_string()
    } else {
        stem
    }
}

fn output_path(output_dir: &Path, title: &str) -> PathBuf {
    output_dir.join(format!("{}.epub", sanitize_title(title)))
}

/// Ensure the output directory exists.
fn prepare_output_dir(dir: &Path) -> Result<(), CliRunError> {
    if dir.as_os_str().is_empty() || dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|e| {
        CliRunError::Epub(EpubError::WriteFile {
            path: dir.to_path_buf(),
            source: e,
        })
    })
}

fn load_resume(path: &Path, url: &str) -> Result<Option<Checkpoint>, CliRunError> {
    let checkpoint = Checkpoint::load(path).map_err(|e| CliRunError::InvalidInput(e.to_string()))?;
    match checkpoint {
        Some(cp) if !cp.matches(url) => Err(CliRunError::InvalidInput(format!(
            "Resume file {} is for a different URL ({}). Use the same URL as the original run ({}).",
            path.display(),
            cp.source_url,
            url
        ))),
        other => Ok(other),
    }
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let profile = resolve(&args.url).map_err(|e| match &e {
        ScraperError::InvalidUrl { input, reason } => CliRunError::InvalidInput(format!(
            "Expected a book index URL, e.g. https://www.bqg5.com/0_521/. Invalid: {}: {}",
            input, reason
        )),
        ScraperError::UnsupportedSite { host } => CliRunError::InvalidInput(format!(
            "Unsupported site: {}. Supported hosts: {}.",
            host,
            crate::engine::PROFILES
                .iter()
                .map(|p| p.host)
                .collect::<Vec<_>>()
                .join(", ")
        )),
        _ => CliRunError::Scraper(e),
    })?;
    info!(site = profile.host, "detected site");

    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let settings = Settings::resolve(args, config.as_ref());
    let client = settings.client()?;

    if profile.challenge.is_some() {
        return run_with_browser(args, &settings, profile, &client);
    }
    run_with(args, &settings, profile, &client, &client)
}

#[cfg(feature = "browser")]
fn run_with_browser(
    args: &Args,
    settings: &Settings,
    profile: &SiteProfile,
    client: &PoliteClient,
) -> Result<(), CliRunError> {
    use crate::engine::browser::{BrowserOptions, BrowserSession};

    let options = BrowserOptions {
        headless: settings.headless,
        user_agent: settings
            .user_agent
            .clone()
            .unwrap_or_else(|| crate::engine::client::DEFAULT_USER_AGENT.to_string()),
        snapshot_dir: settings.snapshot_dir.clone(),
    };
    let session = BrowserSession::launch(&options).map_err(ScraperError::from)?;
    let result = run_with(args, settings, profile, client, &session);
    session.close();
    result
}

#[cfg(not(feature = "browser"))]
fn run_with_browser(
    _args: &Args,
    _settings: &Settings,
    profile: &SiteProfile,
    _client: &PoliteClient,
) -> Result<(), CliRunError> {
    Err(CliRunError::Scraper(ScraperError::BrowserRequired {
        host: profile.host.to_string(),
    }))
}

fn run_with(
    args: &Args,
    settings: &Settings,
    profile: &SiteProfile,
    client: &PoliteClient,
    renderer: &dyn Renderer,
) -> Result<(), CliRunError> {
    let scraper = BookScraper::new(client, renderer);
    let range = ChapterRange::new(args.start, args.end);

    if args.dry_run {
        let options = ScrapeOptions {
            range,
            toc_only: true,
            ..ScrapeOptions::default()
        };
        let scraped = scraper.scrape_with_profile(&args.url, profile, &options)?;
        eprintln!("Title: {}", scraped.book.title);
        eprintln!("Author: {}", scraped.book.author);
        eprintln!(
            "Chapters: {} selected of {}",
            scraped.chapter_refs.len(),
            scraped.total_chapters
        );
        eprintln!(
            "Output: {}",
            output_path(&settings.output_dir, &scraped.book.title).display()
        );
        return Ok(());
    }

    let resume = match &args.resume {
        Some(path) => load_resume(path, &args.url)?,
        None => None,
    };

    let progress_state: RefCell<Option<indicatif::ProgressBar>> = RefCell::new(None);
    let progress_cb = |n: usize, total: usize| {
        if total == 0 {
            return;
        }
        let mut state = progress_state.borrow_mut();
        let pb = state.get_or_insert_with(|| {
            let bar = indicatif::ProgressBar::new(total as u64);
            if let Ok(style) = indicatif::ProgressStyle::with_template(
                "{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})",
            ) {
                bar.set_style(
                    style
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                        .progress_chars("█▉▊▋▌▍▎▏ "),
                );
            }
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        pb.set_position(n as u64);
        pb.set_message(format!("Fetching chapter {}/{}", n, total));
    };
    let progress: Option<&dyn Fn(usize, usize)> = if args.quiet { None } else { Some(&progress_cb) };

    let checkpoint_cb = |cp: &Checkpoint| {
        if let Some(path) = &args.resume {
            if let Err(e) = cp.save(path) {
                warn!(error = %e, "could not write resume file");
            }
        }
    };
    let on_checkpoint: Option<&dyn Fn(&Checkpoint)> = if args.resume.is_some() {
        Some(&checkpoint_cb)
    } else {
        None
    };

    let options = ScrapeOptions {
        progress,
        range,
        resume: resume.as_ref(),
        on_checkpoint,
        toc_only: false,
    };
    let result = scraper.scrape_with_profile(&args.url, profile, &options);
    if let Some(pb) = progress_state.borrow_mut().take() {
        pb.disable_steady_tick();
        pb.finish_and_clear();
    }
    let scraped = result?;

    let cover = scraped
        .book
        .cover_url
        .as_deref()
        .and_then(|url| epub::fetch_cover(client, url));
    let bytes = epub::assemble(
        &scraped.book,
        &scraped.chapters,
        cover.as_ref(),
        settings.include_ncx,
    )?;

    prepare_output_dir(&settings.output_dir)?;
    let path = output_path(&settings.output_dir, &scraped.book.title);
    epub::write_file(&path, &bytes)?;

    if let Some(resume_path) = &args.resume {
        if let Err(e) = Checkpoint::remove(resume_path) {
            warn!(error = %e, "could not remove resume file");
        }
    }
    info!(
        path = %path.display(),
        chapters = scraped.chapters.len(),
        "wrote EPUB"
    );
    if !args.quiet {
        eprintln!("Wrote {}", path.display());
    }
    Ok(())
}
