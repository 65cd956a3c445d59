//! Chapter body normalization: HTML fragment in, clean paragraphs out.

use regex::{Regex, RegexBuilder};
use scraper::{ElementRef, Html, Node, Selector};

use crate::engine::error::ScraperError;
use crate::engine::profile::SiteProfile;

/// Elements whose text never belongs to the chapter body.
const ALWAYS_SKIPPED: &[&str] = &["script", "style", "a", "ins", "iframe", "noscript"];

/// Elements that end a line.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "h1", "h2", "h3", "h4", "h5", "h6", "li", "dd", "dt",
    "blockquote", "pre", "tr",
];

const AUTHOR_MARKER: &str = "作者";
const HEADING_MARKERS: &[char] = &['章', '节', '回', '卷'];

/// Profile-specific cleanup rules, compiled once per run.
#[derive(Debug)]
pub struct ContentNormalizer {
    strip: Vec<Selector>,
    indent_padding: Vec<&'static str>,
    boilerplate: Vec<Regex>,
}

impl ContentNormalizer {
    pub fn new(profile: &SiteProfile) -> Result<Self, ScraperError> {
        let strip = profile
            .strip
            .iter()
            .map(|s| {
                Selector::parse(s).map_err(|e| ScraperError::InvalidPattern {
                    pattern: s.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<_, _>>()?;
        let boilerplate = profile
            .boilerplate
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| ScraperError::InvalidPattern {
                        pattern: p.to_string(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            strip,
            indent_padding: profile.indent_padding.to_vec(),
            boilerplate,
        })
    }

    /// Paragraphs of a chapter body container. The container itself is never stripped.
    pub fn normalize(&self, container: ElementRef<'_>) -> Vec<String> {
        self.normalize_html(&container.inner_html())
    }

    /// Paragraphs of an HTML fragment.
    pub fn normalize_html(&self, fragment: &str) -> Vec<String> {
        let doc = Html::parse_fragment(fragment);
        let mut raw = String::new();
        flatten(doc.root_element(), &self.strip, &mut raw);
        self.clean_lines(&raw)
    }

    fn clean_lines(&self, raw: &str) -> Vec<String> {
        let mut paragraphs: Vec<String> = Vec::new();
        for line in raw.lines() {
            let Some(line) = self.clean_line(line) else {
                continue;
            };
            // A byline after the text has started is page furniture.
            if !paragraphs.is_empty() && line.contains(AUTHOR_MARKER) {
                continue;
            }
            paragraphs.push(line);
        }
        // The chapter title is rendered separately; drop it when repeated in the body.
        if paragraphs.first().is_some_and(|p| is_heading(p)) {
            paragraphs.remove(0);
        }
        paragraphs
    }

    fn clean_line(&self, line: &str) -> Option<String> {
        let mut line = line.trim().to_string();
        for pad in &self.indent_padding {
            line = line.replace(pad, "");
        }
        line = line.replace(['\u{a0}', '\u{3000}'], " ");
        for re in &self.boilerplate {
            line = re.replace_all(&line, "").into_owned();
        }
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        (!line.is_empty()).then_some(line)
    }
}

/// Chapter heading such as `第十二章 重逢`.
fn is_heading(line: &str) -> bool {
    line.starts_with('第') && line.contains(HEADING_MARKERS)
}

/// Append the text under `el` to `out`, one line per block and `<br>`.
fn flatten(el: ElementRef<'_>, strip: &[Selector], out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(e) => {
                let name = e.name();
                if ALWAYS_SKIPPED.contains(&name) {
                    continue;
                }
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                if strip.iter().any(|sel| sel.matches(&child_el)) {
                    continue;
                }
                let block = BLOCK_TAGS.contains(&name);
                if block {
                    out.push('\n');
                }
                flatten(child_el, strip, out);
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::profile::{resolve, PROFILES};

    fn normalizer(url: &str) -> ContentNormalizer {
        ContentNormalizer::new(resolve(url).expect("profile")).expect("normalizer")
    }

    #[test]
    fn br_separated_text_becomes_paragraphs() {
        let n = normalizer("https://www.bqg5.com/0_521/");
        let paras = n.normalize_html(
            "&nbsp;&nbsp;&nbsp;&nbsp;二愣子睁大着双眼。<br/><br/>&nbsp;&nbsp;&nbsp;&nbsp;直直望着茅草和烂泥糊成的屋顶。<br/>",
        );
        assert_eq!(paras, ["二愣子睁大着双眼。", "直直望着茅草和烂泥糊成的屋顶。"]);
    }

    #[test]
    fn container_div_survives_div_strip_rule() {
        let profile = resolve("https://www.bqg5.com/0_521/").expect("profile");
        let n = ContentNormalizer::new(profile).expect("normalizer");
        let doc = Html::parse_document(
            r#"<div id="content">第一段。<br/>第二段。<div class="ad">广告</div><script>x()</script></div>"#,
        );
        let sel = Selector::parse("div#content").expect("selector");
        let container = doc.select(&sel).next().expect("container");
        assert_eq!(n.normalize(container), ["第一段。", "第二段。"]);
    }

    #[test]
    fn repeated_heading_and_late_byline_are_dropped() {
        let n = normalizer("https://www.69shuba.com/book/88724/");
        let paras = n.normalize_html(
            "<p>第一章 山边小村</p><p>作者：忘语</p><p>正文开始。</p><p>作者有话说：求票</p><p>正文继续。</p>",
        );
        assert_eq!(paras, ["正文开始。", "正文继续。"]);
    }

    #[test]
    fn leading_byline_is_kept() {
        let n = normalizer("https://www.69shuba.com/book/88724/");
        let paras = n.normalize_html("<p>作者：忘语</p><p>正文开始。</p><p>作者按：完</p>");
        assert_eq!(paras, ["作者：忘语", "正文开始。"]);
    }

    #[test]
    fn heading_detection() {
        assert!(is_heading("第十二章 重逢"));
        assert!(is_heading("第三卷"));
        assert!(is_heading("第一百回"));
        assert!(!is_heading("第一次见面的时候"));
        assert!(!is_heading("他说第一章写得好"));
    }

    #[test]
    fn anchors_and_stripped_elements_leave_no_text() {
        let n = normalizer("https://www.69shuba.com/book/88724/");
        let paras = n.normalize_html(
            r#"<h1>第一章</h1><div class="txtinfo">更新时间</div>韩立走了。<br><a href="/next">下一章</a><br>他回头。"#,
        );
        assert_eq!(paras, ["韩立走了。", "他回头。"]);
    }

    #[test]
    fn boilerplate_lines_are_removed_per_profile() {
        let samples: &[(&str, &str, usize)] = &[
            (
                "https://www.bqg5.com/0_521/",
                "正文一。<br>天才一秒记住本站地址：www.bqg5.com<br>手机版阅读网址：m.bqg5.com<br>请记住本书首发域名：bqg5.com<br>最新网址：BQG5.COM<br>正文二。(本章完)",
                2,
            ),
            (
                "https://www.69shuba.com/book/88724/",
                "正文一。<br>小提示：按回车返回目录<br>69书吧 https://www.69shuba.com<br>章节错误？点此举报<br>Copyright 2024 69书吧<br>正文二。",
                2,
            ),
            (
                "https://ixdzs8.com/read/12345/",
                "<p>正文一。</p><p>爱下电子书 ixdzs8.com</p><p>本章未完，点击下一页继续阅读</p><p>IXDZS.TW</p><p>正文二。</p>",
                2,
            ),
            (
                "http://www.biquge.com/1_1234/",
                "正文一。<br>笔趣阁 www.biquge.com<br>（求月票）<br>正文二。",
                2,
            ),
        ];
        for (url, html, expected) in samples {
            let paras = normalizer(url).normalize_html(html);
            assert_eq!(paras.len(), *expected, "{}: {:?}", url, paras);
            assert_eq!(paras[0], "正文一。");
            assert_eq!(paras[paras.len() - 1], "正文二。");
        }
    }

    /// One line per boilerplate pattern, made of nothing but text that pattern matches.
    const SOLE_BOILERPLATE_LINES: &[(&str, &[(&str, &str)])] = &[
        (
            "bqg5.com",
            &[
                (r"天才一秒记住本站地址.*", "天才一秒记住本站地址：www.bqg5.com"),
                (r"手机版阅读网址.*", "手机版阅读网址：m.bqg5.com"),
                (r"bqg\d*\.(com|cc|net)", "bqg5.cc"),
                (r"请记住本书首发域名.*", "请记住本书首发域名：bqg5.com"),
                (r"最新网址.*", "最新网址：bqg5.net"),
                (r"\(.*?\)", "(本章完)"),
            ],
        ),
        (
            "69shuba.com",
            &[
                (r"Copyright \d+ 69书吧", "Copyright 2024 69书吧"),
                (r"https://www\.69shuba\.com", "https://www.69shuba.com"),
                (r"www\.69shuba\.com", "www.69shuba.com"),
                (r"69书吧", "69书吧"),
                (r"小提示：.*", "小提示：按回车返回目录"),
                (r"章节错误？点此举报", "章节错误？点此举报"),
            ],
        ),
        (
            "ixdzs8.com",
            &[
                (r"爱下电子书.*", "爱下电子书 ixdzs8.com"),
                (r"ixdzs8?\.(com|tw)", "ixdzs.tw"),
                (r"本章未完，点击下一页继续阅读", "本章未完，点击下一页继续阅读"),
            ],
        ),
        (
            "biquge.com",
            &[
                (r"笔趣阁.*?www\.biquge\.com", "笔趣阁 www.biquge.com"),
                (r"(\(|（).*?(\)|）)", "（求月票）"),
                (r"biquge\.com", "biquge.com"),
            ],
        ),
    ];

    #[test]
    fn line_of_only_boilerplate_is_dropped_for_every_pattern() {
        for profile in PROFILES {
            let (_, samples) = SOLE_BOILERPLATE_LINES
                .iter()
                .find(|(host, _)| *host == profile.host)
                .unwrap_or_else(|| panic!("no samples for {}", profile.host));
            for pattern in profile.boilerplate {
                assert!(
                    samples.iter().any(|(p, _)| p == pattern),
                    "{}: no sample for {:?}",
                    profile.host,
                    pattern
                );
            }
            let n = ContentNormalizer::new(profile).expect("normalizer");
            for (pattern, line) in *samples {
                let re = regex::Regex::new(pattern).expect("pattern");
                let m = re.find(line).expect("sample matches its pattern");
                assert_eq!(m.as_str(), *line, "{}: {:?} is not a whole match", profile.host, line);
                let paras = n.normalize_html(&format!("<p>正文。</p><p>{}</p><p>续文。</p>", line));
                assert_eq!(paras, ["正文。", "续文。"], "{}: {:?}", profile.host, line);
            }
        }
    }

    #[test]
    fn normalization_is_idempotent_on_its_output() {
        for profile in PROFILES {
            let n = ContentNormalizer::new(profile).expect("normalizer");
            let first = n.normalize_html(
                "&nbsp;&nbsp;&nbsp;&nbsp;　　他抬起头。<br><br>　　天色  渐暗。<p>风起。</p>",
            );
            let rejoined = first
                .iter()
                .map(|p| format!("<p>{}</p>", p))
                .collect::<String>();
            assert_eq!(n.normalize_html(&rejoined), first, "{}", profile.host);
        }
    }

    #[test]
    fn empty_fragment_gives_no_paragraphs() {
        let n = normalizer("https://www.bqg5.com/0_521/");
        assert!(n.normalize_html("").is_empty());
        assert!(n.normalize_html("<br><br>&nbsp;").is_empty());
    }
}
