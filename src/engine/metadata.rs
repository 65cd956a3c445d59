//! Metadata extraction: applies a profile's field rules to one document.

use crate::engine::profile::{FieldRule, SiteProfile};
use crate::model::{BookRecord, UNKNOWN_AUTHOR, UNKNOWN_TITLE};
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

const SYNOPSIS_LABEL: &str = "简介：";

/// Tags scanned for a label during the second label-search strategy, in priority order.
const LABEL_TAGS: &[&str] = &["p", "span", "dd", "li", "div"];

/// Build a `BookRecord` from `doc`, fetched from `source_url`.
///
/// Missing title or author fall back to sentinels; a missing or unresolvable
/// cover is `None`. Never fails.
pub fn extract_metadata(doc: &Html, source_url: &str, profile: &SiteProfile) -> BookRecord {
    let title = first_value(doc, profile.title).unwrap_or_else(|| UNKNOWN_TITLE.to_string());
    let author = first_value(doc, profile.author).unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());
    let status = first_value(doc, profile.status);
    let description = first_value(doc, profile.description)
        .map(|d| strip_synopsis_label(&d))
        .unwrap_or_default();
    let cover_url = first_value(doc, profile.cover)
        .and_then(|raw| resolve_cover_url(&raw, source_url, profile.base_url));

    info!(%title, %author, "extracted metadata");
    debug!(
        status = status.as_deref().unwrap_or("-"),
        cover = cover_url.as_deref().unwrap_or("-"),
        description = %description.chars().take(100).collect::<String>(),
        "metadata details"
    );

    BookRecord {
        title,
        author,
        description,
        status,
        cover_url,
        source_url: source_url.to_string(),
    }
}

/// First non-empty value produced by `rules`, tried in order.
fn first_value(doc: &Html, rules: &[FieldRule]) -> Option<String> {
    rules.iter().find_map(|rule| apply_rule(doc, rule))
}

fn apply_rule(doc: &Html, rule: &FieldRule) -> Option<String> {
    let root = doc.root_element();
    let value = match *rule {
        FieldRule::Meta(property) => {
            let sel = format!("meta[property=\"{}\"]", property);
            select_first(root, &sel)?
                .value()
                .attr("content")
                .map(String::from)
        }
        FieldRule::Text(sel) => select_first(root, sel).map(element_text),
        FieldRule::Attr(sel, attr) => select_first(root, sel)?
            .value()
            .attr(attr)
            .map(String::from),
        FieldRule::Label { region, label } => {
            let region = select_first(root, region)?;
            label_search(region, label)
        }
    };
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn select_first<'a>(scope: ElementRef<'a>, sel: &str) -> Option<ElementRef<'a>> {
    let selector = match Selector::parse(sel) {
        Ok(s) => s,
        Err(e) => {
            debug!(selector = sel, error = %e, "invalid selector in profile");
            return None;
        }
    };
    let found = scope.select(&selector).next();
    found
}

/// Element text with whitespace runs collapsed.
fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Regex for `label` that tolerates any whitespace between its characters
/// (`作    者：` and `作者：` both match).
fn label_regex(label: &str) -> Option<Regex> {
    let parts: Vec<String> = label
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| regex::escape(&c.to_string()))
        .collect();
    if parts.is_empty() {
        return None;
    }
    Regex::new(&parts.join(r"\s*")).ok()
}

/// Find the value following `label` inside `region`.
///
/// 1. A link right after the label; its text.
/// 2. A content tag containing the label; the rest of its text, or a nested link's text.
/// 3. The region's flattened text: the label followed by a non-whitespace run.
fn label_search(region: ElementRef<'_>, label: &str) -> Option<String> {
    let re = label_regex(label)?;
    link_after_label(region, &re)
        .or_else(|| tag_containing_label(region, &re))
        .or_else(|| flattened_label_match(region, &re))
}

fn link_after_label(region: ElementRef<'_>, re: &Regex) -> Option<String> {
    let links = Selector::parse("a").ok()?;
    for link in region.select(&links) {
        let mut prev = link.prev_sibling();
        while let Some(node) = prev {
            let text = match ElementRef::wrap(node) {
                Some(el) => el.text().collect::<String>(),
                None => node
                    .value()
                    .as_text()
                    .map(|t| t.text.to_string())
                    .unwrap_or_default(),
            };
            if text.trim().is_empty() {
                prev = node.prev_sibling();
                continue;
            }
            let squashed: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            let ends_with_label = re
                .find_iter(&squashed)
                .last()
                .map(|m| m.end() == squashed.len())
                .unwrap_or(false);
            if ends_with_label {
                let value = element_text(link);
                if !value.is_empty() {
                    return Some(value);
                }
            }
            break;
        }
    }
    None
}

fn tag_containing_label(region: ElementRef<'_>, re: &Regex) -> Option<String> {
    for tag in LABEL_TAGS {
        let Ok(sel) = Selector::parse(tag) else {
            continue;
        };
        for el in region.select(&sel) {
            let text = el.text().collect::<String>();
            let Some(m) = re.find(&text) else {
                continue;
            };
            let rest = text[m.end()..].trim();
            if !rest.is_empty() {
                return Some(rest.to_string());
            }
            if let Some(link) = select_first(el, "a") {
                let value = element_text(link);
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
    }
    None
}

fn flattened_label_match(region: ElementRef<'_>, re: &Regex) -> Option<String> {
    let text = region.text().collect::<Vec<_>>().join(" ");
    let m = re.find(&text)?;
    text[m.end()..]
        .split_whitespace()
        .next()
        .map(String::from)
}

/// Remove a leading `简介：` label.
fn strip_synopsis_label(description: &str) -> String {
    let trimmed = description.trim();
    trimmed
        .strip_prefix(SYNOPSIS_LABEL)
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// Resolve a cover URL against the source page, then against the site origin.
/// Returns `None` when neither yields an absolute http(s) URL.
pub fn resolve_cover_url(raw: &str, source_url: &str, base_url: &str) -> Option<String> {
    let raw = raw.trim();
    let join = |base: &str| -> Option<Url> {
        Url::parse(base)
            .and_then(|b| b.join(raw))
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
    };
    join(source_url)
        .or_else(|| join(base_url))
        .map(|u| u.to_string())
}
