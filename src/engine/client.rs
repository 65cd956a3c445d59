//! Blocking HTTP client with retries, a fixed post-success delay, and encoding recovery.
//!
//! Every public fetch returns a `FetchError` instead of propagating transport
//! errors directly, so callers can skip a chapter or end the run.

use crate::engine::error::FetchError;
use encoding_rs::{Encoding, GB18030, UTF_8};
use reqwest::blocking::{RequestBuilder, Response};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DELAY_MS: u64 = 500;
const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_RETRY_BASE_SECS: u64 = 2;
const MAX_REDIRECTS: usize = 10;

/// Characters inspected for U+FFFD when deciding whether to re-decode.
const GARBLE_WINDOW: usize = 2000;

/// Blocking HTTP client that sleeps after every successful request.
#[derive(Debug)]
pub struct PoliteClient {
    inner: reqwest::blocking::Client,
    delay: Duration,
    retry_count: u32,
    retry_base: Duration,
}

impl PoliteClient {
    /// Build a polite client with default User-Agent, timeout, delay and retries.
    pub fn new() -> Result<Self, FetchError> {
        Self::builder().build()
    }

    pub fn builder() -> PoliteClientBuilder {
        PoliteClientBuilder::default()
    }

    /// GET a page and decode it. `encoding_hint` is used when the declared
    /// encoding yields replacement characters.
    pub fn get_text(&self, url: &str, encoding_hint: &str) -> Result<String, FetchError> {
        let (bytes, declared) = self.fetch_with_retry(
            url,
            || self.inner.get(url),
            |response| {
                let declared = declared_charset(&response);
                response.bytes().map(|b| (b, declared))
            },
        )?;
        let (text, encoding) = decode_body(&bytes, declared.as_deref(), encoding_hint);
        debug!(url, encoding = encoding.name(), bytes = bytes.len(), "fetched page");
        self.pause();
        Ok(text)
    }

    /// POST a form and parse the response as JSON.
    pub fn post_form_json(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<serde_json::Value, FetchError> {
        let body = self.fetch_with_retry(url, || self.inner.post(url).form(form), Response::text)?;
        self.pause();
        serde_json::from_str(&body).map_err(|e| FetchError::InvalidJson {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// GET raw bytes plus the response content type (used for cover images).
    pub fn get_bytes(&self, url: &str) -> Result<(Vec<u8>, Option<String>), FetchError> {
        let (bytes, content_type) = self.fetch_with_retry(
            url,
            || self.inner.get(url),
            |response| {
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                response.bytes().map(|b| (b, content_type))
            },
        )?;
        self.pause();
        Ok((bytes.to_vec(), content_type))
    }

    /// Send a request and read its body, retrying transport errors (including
    /// a stalled or reset body), HTTP 5xx and 429 with doubling backoff.
    /// Other HTTP errors are returned immediately.
    fn fetch_with_retry<T>(
        &self,
        url: &str,
        build: impl Fn() -> RequestBuilder,
        read: impl Fn(Response) -> reqwest::Result<T>,
    ) -> Result<T, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let last = attempt >= self.retry_count;
            match build().send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match read(response) {
                            Ok(body) => return Ok(body),
                            Err(e) if last => {
                                return Err(FetchError::BodyRead {
                                    url: url.to_string(),
                                    source: e,
                                })
                            }
                            Err(e) => {
                                warn!(url, attempt, error = %e, "retrying after body read error")
                            }
                        }
                    } else {
                        let retryable = status.is_server_error() || status.as_u16() == 429;
                        if !retryable || last {
                            return Err(FetchError::HttpStatus {
                                url: url.to_string(),
                                status: status.as_u16(),
                            });
                        }
                        warn!(url, status = status.as_u16(), attempt, "retrying after HTTP error");
                    }
                }
                Err(e) => {
                    if last {
                        return Err(FetchError::Network {
                            url: url.to_string(),
                            attempts: attempt,
                            source: e,
                        });
                    }
                    warn!(url, attempt, error = %e, "retrying after network error");
                }
            }
            std::thread::sleep(self.backoff(attempt));
        }
    }

    /// Backoff after the given (1-based) failed attempt: base, 2*base, 4*base, ...
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base * 2u32.saturating_pow(attempt.saturating_sub(1).min(16))
    }

    fn pause(&self) {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
    }
}

/// Builder for PoliteClient.
#[derive(Debug)]
pub struct PoliteClientBuilder {
    user_agent: Option<String>,
    delay_ms: u64,
    timeout_secs: u64,
    retry_count: u32,
    retry_base_secs: u64,
}

impl Default for PoliteClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay_ms: DEFAULT_DELAY_MS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_base_secs: DEFAULT_RETRY_BASE_SECS,
        }
    }
}

impl PoliteClientBuilder {
    /// Set a custom User-Agent. If not set, a desktop Chrome string is used.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Delay after each successful request, in milliseconds. Default 500.
    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Per-attempt timeout in seconds. Default 30.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Total attempts per request (default 3, minimum 1).
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n.max(1);
        self
    }

    /// Delay before the first retry, doubled for each further retry. Default 2.
    pub fn retry_base_secs(mut self, secs: u64) -> Self {
        self.retry_base_secs = secs;
        self
    }

    pub fn build(self) -> Result<PoliteClient, FetchError> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(FetchError::ClientBuild)?;
        Ok(PoliteClient {
            inner,
            delay: Duration::from_millis(self.delay_ms),
            retry_count: self.retry_count,
            retry_base: Duration::from_secs(self.retry_base_secs),
        })
    }
}

fn declared_charset(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(charset_param)
}

/// `charset` parameter of a Content-Type value.
fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Charset declared in a `<meta>` tag within the first KiB of the document.
fn sniff_meta_charset(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(1024)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    let start = head.find("charset=")? + "charset=".len();
    let value: String = head[start..]
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    (!value.is_empty()).then_some(value)
}

/// Decode a response body.
///
/// Uses the declared charset (header, then `<meta>`, then UTF-8). When the first
/// 2000 decoded characters contain U+FFFD, decodes again with `hint` (GB18030 if
/// the hint is not a known label) and uses that instead.
pub fn decode_body(
    bytes: &[u8],
    declared: Option<&str>,
    hint: &str,
) -> (String, &'static Encoding) {
    let primary = declared
        .map(String::from)
        .or_else(|| sniff_meta_charset(bytes))
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _, _) = primary.decode(bytes);
    if !text.chars().take(GARBLE_WINDOW).any(|c| c == '\u{FFFD}') {
        return (text.into_owned(), primary);
    }
    let fallback = Encoding::for_label(hint.as_bytes()).unwrap_or(GB18030);
    if fallback == primary {
        return (text.into_owned(), primary);
    }
    warn!(
        declared = primary.name(),
        fallback = fallback.name(),
        "garbled text under declared encoding; re-decoding"
    );
    let (text, _, _) = fallback.decode(bytes);
    (text.into_owned(), fallback)
}
