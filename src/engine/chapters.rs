//! Chapter list extraction: HTML link lists and structured (JSON) lists.

use std::collections::HashSet;

use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::engine::client::PoliteClient;
use crate::engine::error::ScraperError;
use crate::engine::profile::{compile, ChapterListRule, SiteProfile};
use crate::model::ChapterRef;

/// Path shapes of a chapter page on the supported sites. A link whose resolved
/// path matches none of these is navigation, not a chapter.
const CHAPTER_PATH_PATTERNS: &[&str] = &[
    r"^/\d+_\d+/\d+\.html$",
    r"^/(?:book|txt|read|html)/\d+/\d+(?:\.html?)?/?$",
    r"^/\d+/\d+(?:\.html)?$",
    r"^/\d+/\d+/\d+\.html$",
    r"^/read/\d+/p\d+\.html$",
];

/// Link filter built once per profile.
struct LinkFilter {
    exclusions: Vec<Regex>,
    chapter_paths: Vec<Regex>,
}

impl LinkFilter {
    fn new(profile: &SiteProfile) -> Result<Self, ScraperError> {
        Ok(Self {
            exclusions: profile
                .link_exclusions
                .iter()
                .map(|p| compile(p))
                .collect::<Result<_, _>>()?,
            chapter_paths: CHAPTER_PATH_PATTERNS
                .iter()
                .map(|p| compile(p))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Resolved chapter URL for a link, or `None` if the link is rejected.
    fn accept(&self, base: &Url, title: &str, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href == "#" || href.to_ascii_lowercase().starts_with("javascript:") {
            return None;
        }
        if title.is_empty() {
            return None;
        }
        if self
            .exclusions
            .iter()
            .any(|re| re.is_match(title) || re.is_match(href))
        {
            debug!(title, href, "link excluded");
            return None;
        }
        let url = base.join(href).ok()?;
        if !self.chapter_paths.iter().any(|re| re.is_match(url.path())) {
            debug!(title, href, "link path is not a chapter");
            return None;
        }
        Some(url.to_string())
    }
}

/// Extract the ordered, de-duplicated chapter list from a list page.
///
/// Only valid for profiles with an HTML chapter list rule.
pub fn extract_chapter_list(
    doc: &Html,
    list_url: &str,
    profile: &SiteProfile,
) -> Result<Vec<ChapterRef>, ScraperError> {
    let ChapterListRule::Html {
        container,
        link,
        section_heading,
        newest_first,
    } = profile.chapter_list
    else {
        return Err(ScraperError::InvalidPattern {
            pattern: format!("{:?}", profile.chapter_list),
            reason: "not an HTML chapter list rule".to_string(),
        });
    };

    let base = Url::parse(list_url).map_err(|e| ScraperError::InvalidUrl {
        input: list_url.to_string(),
        reason: e.to_string(),
    })?;
    let link_sel = parse_selector(link)?;
    let filter = LinkFilter::new(profile)?;

    let scope = match container {
        Some(sel) => {
            let container_sel = parse_selector(sel)?;
            let found = doc.select(&container_sel).next();
            match found {
                Some(el) => el,
                None => {
                    warn!(container = sel, url = list_url, "chapter container not found; scanning whole page");
                    doc.root_element()
                }
            }
        }
        None => doc.root_element(),
    };

    let links = match section_heading {
        Some(heading) => links_after_second_heading(scope, &parse_selector(heading)?, &link_sel),
        None => scope.select(&link_sel).collect(),
    };

    let mut seen = HashSet::new();
    let mut chapters = Vec::new();
    for a in links {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let title = collapse_whitespace(&a.text().collect::<String>());
        if let Some(url) = filter.accept(&base, &title, href) {
            if seen.insert(url.clone()) {
                chapters.push(ChapterRef::new(title, url));
            }
        }
    }

    if newest_first {
        chapters.reverse();
    }
    if chapters.is_empty() {
        return Err(ScraperError::NoChaptersFound {
            url: list_url.to_string(),
            selector: link.to_string(),
        });
    }
    info!(count = chapters.len(), "found chapters");
    Ok(chapters)
}

/// Links matching `link_sel` in document order. When `scope` holds more than
/// one heading, links before the second heading are dropped.
fn links_after_second_heading<'a>(
    scope: ElementRef<'a>,
    heading_sel: &Selector,
    link_sel: &Selector,
) -> Vec<ElementRef<'a>> {
    let heading_count = scope.select(heading_sel).count();
    if heading_count <= 1 {
        return scope.select(link_sel).collect();
    }
    let mut headings_seen = 0;
    let mut links = Vec::new();
    for node in scope.descendants() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        if heading_sel.matches(&el) {
            headings_seen += 1;
        } else if headings_seen >= 2 && link_sel.matches(&el) {
            links.push(el);
        }
    }
    links
}

/// Fetch a structured chapter list by POSTing the book id.
pub fn fetch_structured_list(
    client: &PoliteClient,
    book_id: &str,
    profile: &SiteProfile,
) -> Result<Vec<ChapterRef>, ScraperError> {
    let ChapterListRule::JsonPost {
        endpoint, id_field, ..
    } = profile.chapter_list
    else {
        return Err(ScraperError::InvalidPattern {
            pattern: format!("{:?}", profile.chapter_list),
            reason: "not a structured chapter list rule".to_string(),
        });
    };
    let endpoint = profile.expand(endpoint, book_id);
    info!(url = %endpoint, book_id, "requesting chapter list");
    let value = client.post_form_json(&endpoint, &[(id_field, book_id)])?;
    let chapters = parse_structured_list(&value, book_id, profile)?;
    if chapters.is_empty() {
        return Err(ScraperError::NoChaptersFound {
            url: endpoint,
            selector: id_field.to_string(),
        });
    }
    info!(count = chapters.len(), "found chapters");
    Ok(chapters)
}

/// Turn a structured list response into chapter references, in response order.
/// Entries whose type is not the chapter type (volume headers) are dropped.
pub fn parse_structured_list(
    value: &Value,
    book_id: &str,
    profile: &SiteProfile,
) -> Result<Vec<ChapterRef>, ScraperError> {
    let ChapterListRule::JsonPost {
        list_field,
        title_field,
        order_field,
        type_field,
        chapter_type,
        chapter_url,
        ..
    } = profile.chapter_list
    else {
        return Err(ScraperError::InvalidPattern {
            pattern: format!("{:?}", profile.chapter_list),
            reason: "not a structured chapter list rule".to_string(),
        });
    };
    let Some(entries) = value.get(list_field).and_then(Value::as_array) else {
        warn!(field = list_field, "structured chapter list has no entry array");
        return Ok(Vec::new());
    };

    let url_template = profile.expand(chapter_url, book_id);
    let mut seen = HashSet::new();
    let mut chapters = Vec::new();
    for entry in entries {
        if scalar_string(entry.get(type_field)).as_deref() != Some(chapter_type) {
            continue;
        }
        let (Some(title), Some(order)) = (
            scalar_string(entry.get(title_field)),
            scalar_string(entry.get(order_field)),
        ) else {
            debug!(?entry, "skipping incomplete chapter entry");
            continue;
        };
        let title = collapse_whitespace(&title);
        if title.is_empty() {
            continue;
        }
        let url = url_template.replace("{order}", &order);
        if seen.insert(url.clone()) {
            chapters.push(ChapterRef::new(title, url));
        }
    }
    Ok(chapters)
}

/// String or number JSON value as a string.
fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_selector(sel: &str) -> Result<Selector, ScraperError> {
    Selector::parse(sel).map_err(|e| ScraperError::InvalidPattern {
        pattern: sel.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::profile::resolve;
    use crate::test_support::{quick_client, spawn_server};
    use serde_json::json;
    use std::io::Read;

    fn bqg5() -> &'static SiteProfile {
        resolve("https://www.bqg5.com/0_521/").expect("bqg5 profile")
    }

    #[test]
    fn single_heading_keeps_all_links() {
        let html = r#"<div id="list"><dl><dt>正文</dt>
<dd><a href="/1/1.html">Ch1</a></dd><dd><a href="/1/2.html">Ch2</a></dd></dl></div>"#;
        let doc = Html::parse_document(html);
        let chapters = extract_chapter_list(&doc, "https://www.bqg5.com/1/", bqg5()).expect("chapters");
        assert_eq!(
            chapters,
            vec![
                ChapterRef::new("Ch1", "https://www.bqg5.com/1/1.html"),
                ChapterRef::new("Ch2", "https://www.bqg5.com/1/2.html"),
            ]
        );
    }

    #[test]
    fn links_before_second_heading_are_skipped() {
        let html = r#"<div id="list"><dl>
<dt>《凡人修仙传》最新章节</dt>
<dd><a href="/0_521/9999.html">第两千章 终</a></dd>
<dd><a href="/0_521/9998.html">第一千九百九十九章</a></dd>
<dt>《凡人修仙传》正文卷</dt>
<dd><a href="/0_521/1.html">第一章 山边小村</a></dd>
<dd><a href="/0_521/2.html">第二章 青牛镇</a></dd>
</dl></div>"#;
        let doc = Html::parse_document(html);
        let chapters = extract_chapter_list(&doc, "https://www.bqg5.com/0_521/", bqg5()).expect("chapters");
        let titles: Vec<_> = chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["第一章 山边小村", "第二章 青牛镇"]);
        assert_eq!(chapters[0].url, "https://www.bqg5.com/0_521/1.html");
    }

    #[test]
    fn duplicates_and_invalid_links_are_dropped() {
        // 3 distinct chapters, 2 duplicates, 5 rejects.
        let html = r##"<div id="list"><dl><dt>正文</dt>
<dd><a href="/0_521/1.html">第一章</a></dd>
<dd><a href="/0_521/1.html">第一章 (重复)</a></dd>
<dd><a href="#">目录</a></dd>
<dd><a href="javascript:void(0)">加入书架</a></dd>
<dd><a href="/0_521/2.html">第二章</a></dd>
<dd><a href="/0_521/3.html">   </a></dd>
<dd><a href="/login.php">登录</a></dd>
<dd><a href="/sort/1/">玄幻小说</a></dd>
<dd><a href="/0_521/2.html">第二章</a></dd>
<dd><a href="/0_521/4.html">第四章</a></dd>
</dl></div>"##;
        let doc = Html::parse_document(html);
        let chapters = extract_chapter_list(&doc, "https://www.bqg5.com/0_521/", bqg5()).expect("chapters");
        let urls: Vec<_> = chapters.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://www.bqg5.com/0_521/1.html",
                "https://www.bqg5.com/0_521/2.html",
                "https://www.bqg5.com/0_521/4.html",
            ]
        );
        assert_eq!(chapters[0].title, "第一章");
    }

    #[test]
    fn missing_container_falls_back_to_whole_page() {
        let html = r#"<ul><li><dd><a href="/0_521/7.html">第七章</a></dd></li></ul>"#;
        let doc = Html::parse_document(html);
        let chapters = extract_chapter_list(&doc, "https://www.bqg5.com/0_521/", bqg5()).expect("chapters");
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].url, "https://www.bqg5.com/0_521/7.html");
    }

    #[test]
    fn newest_first_lists_are_reversed() {
        let profile = resolve("https://www.69shuba.com/book/88724/").expect("profile");
        let html = r#"<div id="catalog"><ul>
<li><a href="https://www.69shuba.com/txt/88724/3">第三章</a></li>
<li><a href="https://www.69shuba.com/txt/88724/2">第二章</a></li>
<li><a href="https://www.69shuba.com/txt/88724/1">第一章</a></li>
</ul></div>"#;
        let doc = Html::parse_document(html);
        let chapters = extract_chapter_list(&doc, "https://www.69shuba.com/book/88724/", profile).expect("chapters");
        let titles: Vec<_> = chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["第一章", "第二章", "第三章"]);
    }

    #[test]
    fn no_chapter_links_is_an_error() {
        let doc = Html::parse_document(r#"<div id="list"><a href="/about.html">关于</a></div>"#);
        let result = extract_chapter_list(&doc, "https://www.bqg5.com/0_521/", bqg5());
        assert!(matches!(result, Err(ScraperError::NoChaptersFound { .. })));
    }

    #[test]
    fn structured_list_filters_volume_headers() {
        let profile = resolve("https://ixdzs8.com/read/12345/").expect("profile");
        let value = json!({
            "rs": 200,
            "data": [
                {"ordernum": "0", "title": "第一卷", "ctype": "1"},
                {"ordernum": "1", "title": "第一章 开端", "ctype": "0"},
                {"ordernum": 2, "title": " 第二章  重逢 ", "ctype": 0},
                {"ordernum": "2", "title": "第二章 重逢", "ctype": "0"},
                {"title": "无序号", "ctype": "0"}
            ]
        });
        let chapters = parse_structured_list(&value, "12345", profile).expect("chapters");
        assert_eq!(
            chapters,
            vec![
                ChapterRef::new("第一章 开端", "https://ixdzs8.com/read/12345/p1.html"),
                ChapterRef::new("第二章 重逢", "https://ixdzs8.com/read/12345/p2.html"),
            ]
        );
    }

    #[test]
    fn structured_list_without_entries_is_empty() {
        let profile = resolve("https://ixdzs8.com/read/12345/").expect("profile");
        let chapters = parse_structured_list(&json!({"rs": 404}), "12345", profile).expect("ok");
        assert!(chapters.is_empty());
    }

    #[test]
    fn structured_list_is_fetched_with_book_id_form() {
        let (base, shutdown, handle) = spawn_server(|request| {
            let mut body = String::new();
            let _ = request.as_reader().read_to_string(&mut body);
            let reply = if request.url() == "/novel/clist/" && body == "bid=777" {
                r#"{"data":[{"ordernum":"1","title":"第一章","ctype":"0"}]}"#
            } else {
                r#"{"data":[]}"#
            };
            tiny_http::Response::from_string(reply).boxed()
        });
        let mut profile = resolve("https://ixdzs8.com/read/777/").expect("profile").clone();
        let leaked: &'static str = Box::leak(base.clone().into_boxed_str());
        profile.base_url = leaked;
        let result = fetch_structured_list(&quick_client(), "777", &profile);
        let _ = shutdown.send(());
        let _ = handle.join();
        let chapters = result.expect("chapters");
        assert_eq!(chapters, vec![ChapterRef::new("第一章", format!("{}/read/777/p1.html", base))]);
    }
}
