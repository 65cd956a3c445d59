//! Site profiles and the registry that maps a URL host to one.
//!
//! A profile is plain `'static` data: selectors, patterns and URL templates.
//! The extractors interpret it; supporting another site means adding an entry
//! to [`PROFILES`], not touching extraction code.

use crate::engine::error::ScraperError;
use regex::Regex;
use reqwest::Url;

/// One way of reading a metadata field. Rules are tried in order; the first
/// non-empty value wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// `content` of `<meta property="...">`.
    Meta(&'static str),
    /// Text of the first element matching a CSS selector.
    Text(&'static str),
    /// Attribute of the first element matching a CSS selector.
    Attr(&'static str, &'static str),
    /// Label search (e.g. `作者：`) inside the first element matching `region`.
    Label {
        region: &'static str,
        label: &'static str,
    },
}

/// Where the chapter list comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterListRule {
    /// Links parsed out of an HTML page.
    Html {
        /// Container selector; `None` searches the whole document.
        container: Option<&'static str>,
        /// Link selector, relative to the container.
        link: &'static str,
        /// When the container holds more than one of these headings, only links
        /// after the second one are used (skips "latest chapters" blocks).
        section_heading: Option<&'static str>,
        /// The page lists newest chapters first.
        newest_first: bool,
    },
    /// JSON list returned by a form POST carrying the book id.
    JsonPost {
        /// Endpoint template (`{base}`, `{id}`).
        endpoint: &'static str,
        /// Form field that carries the book id.
        id_field: &'static str,
        /// Key of the entry array in the response object.
        list_field: &'static str,
        title_field: &'static str,
        order_field: &'static str,
        type_field: &'static str,
        /// Value of `type_field` marking a chapter (other values are volume headers).
        chapter_type: &'static str,
        /// Chapter URL template (`{base}`, `{id}`, `{order}`).
        chapter_url: &'static str,
    },
}

/// Interactive challenge handling for the browser strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChallengeSpec {
    /// Selector that is present once real content has loaded.
    pub ready_selector: &'static str,
    /// Viewport coordinate of the challenge checkbox.
    pub click_at: (f64, f64),
    /// Wait before assuming a challenge is shown.
    pub short_wait_secs: u64,
    /// Wait for content after clicking the challenge.
    pub long_wait_secs: u64,
}

/// Declarative description of one source site.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteProfile {
    /// Host substring used for matching.
    pub host: &'static str,
    pub base_url: &'static str,
    /// Encoding label used when the transport's encoding produces garbage.
    pub encoding: &'static str,
    /// Regex with one capture group extracting the book id from the input URL.
    pub book_id_pattern: Option<&'static str>,
    /// Metadata page template (`{base}`, `{id}`); `None` uses the input URL.
    pub metadata_url: Option<&'static str>,
    /// Chapter list page template (`{base}`, `{id}`); `None` uses the input URL.
    pub chapter_list_url: Option<&'static str>,
    pub title: &'static [FieldRule],
    pub author: &'static [FieldRule],
    pub status: &'static [FieldRule],
    pub description: &'static [FieldRule],
    pub cover: &'static [FieldRule],
    pub chapter_list: ChapterListRule,
    /// Patterns matched against link text and href; a match rejects the link.
    pub link_exclusions: &'static [&'static str],
    /// Chapter body containers, tried in order.
    pub content: &'static [&'static str],
    /// Elements removed from the chapter body before text extraction.
    pub strip: &'static [&'static str],
    /// Literal indentation padding removed from every line.
    pub indent_padding: &'static [&'static str],
    /// Boilerplate patterns removed from every line (case-insensitive).
    pub boilerplate: &'static [&'static str],
    pub challenge: Option<ChallengeSpec>,
}

impl SiteProfile {
    /// Metadata is read from a different page than the chapter list.
    pub fn separate_metadata_page(&self) -> bool {
        self.metadata_url != self.chapter_list_url
    }

    /// Extract the book id from `url` with `book_id_pattern`.
    pub fn book_id(&self, url: &str) -> Result<String, ScraperError> {
        let pattern = self
            .book_id_pattern
            .ok_or_else(|| ScraperError::MissingBookId {
                url: url.to_string(),
            })?;
        let re = compile(pattern)?;
        re.captures(url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ScraperError::MissingBookId {
                url: url.to_string(),
            })
    }

    /// Metadata and chapter list page URLs for a book index URL.
    pub fn page_urls(&self, url: &str) -> Result<(String, String), ScraperError> {
        if self.metadata_url.is_none() && self.chapter_list_url.is_none() {
            return Ok((url.to_string(), url.to_string()));
        }
        let id = self.book_id(url)?;
        let metadata = self
            .metadata_url
            .map(|t| self.expand(t, &id))
            .unwrap_or_else(|| url.to_string());
        let list = self
            .chapter_list_url
            .map(|t| self.expand(t, &id))
            .unwrap_or_else(|| url.to_string());
        Ok((metadata, list))
    }

    /// Fill `{base}` and `{id}` in a URL template.
    pub fn expand(&self, template: &str, id: &str) -> String {
        template
            .replace("{base}", self.base_url.trim_end_matches('/'))
            .replace("{id}", id)
    }
}

pub(crate) fn compile(pattern: &str) -> Result<Regex, ScraperError> {
    Regex::new(pattern).map_err(|e| ScraperError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Resolve a URL to its site profile. Matching looks at the host only; first match wins.
pub fn resolve(url: &str) -> Result<&'static SiteProfile, ScraperError> {
    resolve_in(PROFILES, url)
}

/// [`resolve`] against an explicit table.
pub fn resolve_in<'p>(profiles: &'p [SiteProfile], url: &str) -> Result<&'p SiteProfile, ScraperError> {
    let parsed = Url::parse(url.trim()).map_err(|e| ScraperError::InvalidUrl {
        input: url.to_string(),
        reason: e.to_string(),
    })?;
    let host = parsed.host_str().ok_or_else(|| ScraperError::InvalidUrl {
        input: url.to_string(),
        reason: "URL has no host".to_string(),
    })?;
    profiles
        .iter()
        .find(|p| host.contains(p.host))
        .ok_or_else(|| ScraperError::UnsupportedSite {
            host: host.to_string(),
        })
}

const BIQUGE_LINK_EXCLUSIONS: &[&str] = &[
    r"最新章节",
    r"(?i)/(login|register|reg)\b",
    r"(?i)/(review|pinglun)\b",
    r"登录|注册|书评",
];

/// Built-in site profiles.
pub static PROFILES: &[SiteProfile] = &[
    SiteProfile {
        host: "bqg5.com",
        base_url: "https://www.bqg5.com",
        encoding: "gb18030",
        book_id_pattern: Some(r"/(\d+_\d+)/"),
        metadata_url: None,
        chapter_list_url: None,
        title: &[FieldRule::Meta("og:title"), FieldRule::Text("#info h1"), FieldRule::Text("h1")],
        author: &[
            FieldRule::Meta("og:novel:author"),
            FieldRule::Label {
                region: "#info",
                label: "作    者：",
            },
        ],
        status: &[FieldRule::Meta("og:novel:status")],
        description: &[FieldRule::Meta("og:description"), FieldRule::Text("#intro")],
        cover: &[FieldRule::Attr("#fmimg img", "src"), FieldRule::Meta("og:image")],
        chapter_list: ChapterListRule::Html {
            container: Some("div#list"),
            link: "dd a",
            section_heading: Some("dt"),
            newest_first: false,
        },
        link_exclusions: BIQUGE_LINK_EXCLUSIONS,
        content: &["div#content", "div.content", "div#booktxt"],
        strip: &["div", "p.bottem", "p.content_detail"],
        indent_padding: &["\u{3000}\u{3000}", "\u{a0}\u{a0}\u{a0}\u{a0}"],
        boilerplate: &[
            r"天才一秒记住本站地址.*",
            r"手机版阅读网址.*",
            r"bqg\d*\.(com|cc|net)",
            r"请记住本书首发域名.*",
            r"最新网址.*",
            r"\(.*?\)",
        ],
        challenge: None,
    },
    SiteProfile {
        host: "69shuba.com",
        base_url: "https://www.69shuba.com",
        encoding: "gbk",
        book_id_pattern: Some(r"/book/(\d+)"),
        metadata_url: Some("{base}/book/{id}.htm"),
        chapter_list_url: Some("{base}/book/{id}/"),
        title: &[FieldRule::Meta("og:title"), FieldRule::Text(".booknav2 h1 a")],
        author: &[
            FieldRule::Meta("og:novel:author"),
            FieldRule::Label {
                region: "div.booknav2",
                label: "作者：",
            },
        ],
        status: &[
            FieldRule::Meta("og:novel:status"),
            FieldRule::Label {
                region: "div.booknav2",
                label: "状态：",
            },
        ],
        description: &[FieldRule::Meta("og:description"), FieldRule::Text("div.navtxt")],
        cover: &[FieldRule::Meta("og:image"), FieldRule::Attr("div.bookimg2 img", "src")],
        chapter_list: ChapterListRule::Html {
            container: Some("div#catalog"),
            link: "li a",
            section_heading: None,
            newest_first: true,
        },
        link_exclusions: &[r"最新章节", r"(?i)/(login|register)\b", r"章节错误"],
        content: &["div.txtnav"],
        strip: &["h1", "div.txtinfo", "#txtright", "div.bottom-ad", "div.contentadv"],
        indent_padding: &["\u{3000}\u{3000}"],
        boilerplate: &[
            r"Copyright \d+ 69书吧",
            r"https://www\.69shuba\.com",
            r"www\.69shuba\.com",
            r"69书吧",
            r"小提示：.*",
            r"章节错误？点此举报",
        ],
        challenge: Some(ChallengeSpec {
            ready_selector: "div.bookbox, div#catalog, div.txtnav",
            click_at: (216.0, 284.0),
            short_wait_secs: 5,
            long_wait_secs: 30,
        }),
    },
    SiteProfile {
        host: "ixdzs8.com",
        base_url: "https://ixdzs8.com",
        encoding: "utf-8",
        book_id_pattern: Some(r"/read/(\d+)"),
        metadata_url: None,
        chapter_list_url: None,
        title: &[FieldRule::Meta("og:novel:book_name"), FieldRule::Meta("og:title"), FieldRule::Text("div.n-text h1")],
        author: &[
            FieldRule::Meta("og:novel:author"),
            FieldRule::Label {
                region: "div.n-text",
                label: "作者:",
            },
        ],
        status: &[FieldRule::Meta("og:novel:status")],
        description: &[FieldRule::Meta("og:description"), FieldRule::Text("p#intro")],
        cover: &[FieldRule::Meta("og:image"), FieldRule::Attr("div.n-img img", "src")],
        chapter_list: ChapterListRule::JsonPost {
            endpoint: "{base}/novel/clist/",
            id_field: "bid",
            list_field: "data",
            title_field: "title",
            order_field: "ordernum",
            type_field: "ctype",
            chapter_type: "0",
            chapter_url: "{base}/read/{id}/p{order}.html",
        },
        link_exclusions: &[],
        content: &["article.page-content section", "article.page-content"],
        strip: &["h3", "div.abg"],
        indent_padding: &["\u{3000}\u{3000}"],
        boilerplate: &[r"爱下电子书.*", r"ixdzs8?\.(com|tw)", r"本章未完，点击下一页继续阅读"],
        challenge: None,
    },
    SiteProfile {
        host: "biquge.com",
        base_url: "http://www.biquge.com",
        encoding: "gbk",
        book_id_pattern: Some(r"/(\d{1,2}_\d{1,9})/"),
        metadata_url: None,
        chapter_list_url: None,
        title: &[FieldRule::Meta("og:title"), FieldRule::Text("#info h1")],
        author: &[
            FieldRule::Meta("og:novel:author"),
            FieldRule::Label {
                region: "#info",
                label: "作    者：",
            },
        ],
        status: &[FieldRule::Meta("og:novel:status")],
        description: &[FieldRule::Meta("og:description"), FieldRule::Text("#intro p")],
        cover: &[FieldRule::Attr("#fmimg img", "src"), FieldRule::Meta("og:image")],
        chapter_list: ChapterListRule::Html {
            container: Some("div#list"),
            link: "dd a",
            section_heading: Some("dt"),
            newest_first: false,
        },
        link_exclusions: BIQUGE_LINK_EXCLUSIONS,
        content: &["div#content"],
        strip: &["div", "script"],
        indent_padding: &["\u{a0}\u{a0}\u{a0}\u{a0}"],
        boilerplate: &[r"笔趣阁.*?www\.biquge\.com", r"(\(|（).*?(\)|）)", r"biquge\.com"],
        challenge: None,
    },
];
