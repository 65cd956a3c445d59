//! Runs one book end to end: profile, metadata, chapter list, range, chapters.
//!
//! Execution is strictly sequential. The fetcher's post-success delay is the
//! only rate limit, so chapters are never fetched concurrently.

use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::engine::chapters::{extract_chapter_list, fetch_structured_list};
use crate::engine::checkpoint::Checkpoint;
use crate::engine::client::PoliteClient;
use crate::engine::content::ContentNormalizer;
use crate::engine::error::ScraperError;
use crate::engine::metadata::extract_metadata;
use crate::engine::profile::{resolve, ChapterListRule, SiteProfile};
use crate::engine::render::Renderer;
use crate::model::{BookRecord, ChapterContent, ChapterRef};

/// Inclusive 1-based chapter range. Both ends are clamped to the list length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChapterRange {
    pub start: Option<usize>,
    pub end: Option<usize>,
}

impl ChapterRange {
    pub fn new(start: Option<usize>, end: Option<usize>) -> Self {
        Self { start, end }
    }

    /// Select the range from `items`.
    ///
    /// A start of 0 counts as 1, a start past the end selects the last item,
    /// and a missing end means the last item.
    pub fn apply<'a, T>(&self, items: &'a [T]) -> Result<&'a [T], ScraperError> {
        let len = items.len();
        let start = self.start.unwrap_or(1).max(1).min(len.max(1));
        let end = self.end.unwrap_or(len).min(len);
        if len == 0 || end < start {
            return Err(ScraperError::EmptyRange {
                start: self.start.unwrap_or(1),
                end: self.end.unwrap_or(len),
                total: len,
            });
        }
        Ok(&items[start - 1..end])
    }
}

/// Options for one run.
#[derive(Default)]
pub struct ScrapeOptions<'a> {
    /// Called before each chapter fetch with (position, count) in the selected range.
    pub progress: Option<&'a dyn Fn(usize, usize)>,
    pub range: ChapterRange,
    /// Progress from an earlier run of the same book.
    pub resume: Option<&'a Checkpoint>,
    /// Called after every processed chapter.
    pub on_checkpoint: Option<&'a dyn Fn(&Checkpoint)>,
    /// Stop after metadata and the chapter list.
    pub toc_only: bool,
}

/// Result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedBook {
    pub book: BookRecord,
    /// Full chapter list length, before range filtering.
    pub total_chapters: usize,
    /// Range-filtered chapter list.
    pub chapter_refs: Vec<ChapterRef>,
    /// Content of every chapter that succeeded, in list order.
    pub chapters: Vec<ChapterContent>,
}

/// Drives one book through the pipeline.
///
/// `client` serves structured (POST) requests; `renderer` serves every HTML
/// page and may be the same client or a browser session.
pub struct BookScraper<'a> {
    client: &'a PoliteClient,
    renderer: &'a dyn Renderer,
}

impl<'a> BookScraper<'a> {
    pub fn new(client: &'a PoliteClient, renderer: &'a dyn Renderer) -> Self {
        Self { client, renderer }
    }

    /// Resolve the profile for `url` and scrape the book.
    pub fn scrape_book(
        &self,
        url: &str,
        options: &ScrapeOptions<'_>,
    ) -> Result<ScrapedBook, ScraperError> {
        let profile = resolve(url)?;
        info!(site = profile.host, url, "detected site");
        self.scrape_with_profile(url, profile, options)
    }

    pub fn scrape_with_profile(
        &self,
        url: &str,
        profile: &SiteProfile,
        options: &ScrapeOptions<'_>,
    ) -> Result<ScrapedBook, ScraperError> {
        let (metadata_url, list_url) = profile.page_urls(url)?;
        let metadata_doc = Html::parse_document(&self.renderer.render(&metadata_url, profile)?);
        let book = extract_metadata(&metadata_doc, &metadata_url, profile);

        let refs = match profile.chapter_list {
            ChapterListRule::Html { .. } => {
                let list_doc = if profile.separate_metadata_page() {
                    Html::parse_document(&self.renderer.render(&list_url, profile)?)
                } else {
                    metadata_doc
                };
                extract_chapter_list(&list_doc, &list_url, profile)?
            }
            ChapterListRule::JsonPost { .. } => {
                let book_id = profile.book_id(url)?;
                fetch_structured_list(self.client, &book_id, profile)?
            }
        };

        let total_chapters = refs.len();
        let selected = options.range.apply(&refs)?.to_vec();
        info!(selected = selected.len(), total = total_chapters, "chapter range applied");

        if options.toc_only {
            return Ok(ScrapedBook {
                book,
                total_chapters,
                chapter_refs: selected,
                chapters: Vec::new(),
            });
        }

        let normalizer = ContentNormalizer::new(profile)?;
        let mut checkpoint = match options.resume {
            Some(cp) => {
                let mut cp = cp.clone();
                cp.completed = cp.completed.min(selected.len());
                info!(completed = cp.completed, stored = cp.chapters.len(), "resuming");
                cp
            }
            None => Checkpoint::new(url),
        };

        let count = selected.len();
        let mut attempted = 0;
        for (i, chapter) in selected.iter().enumerate().skip(checkpoint.completed) {
            if let Some(progress) = options.progress {
                progress(i + 1, count);
            }
            attempted += 1;
            match self.fetch_chapter(chapter, profile, &normalizer) {
                Ok(content) => {
                    debug!(title = %chapter.title, paragraphs = content.paragraphs.len(), "chapter done");
                    checkpoint.chapters.push(content);
                }
                Err(e) if self.renderer.aborts_on_failure() => {
                    return Err(ScraperError::ChapterAborted {
                        title: chapter.title.clone(),
                        url: chapter.url.clone(),
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(title = %chapter.title, url = %chapter.url, error = %e, "chapter skipped");
                }
            }
            checkpoint.completed = i + 1;
            if let Some(on_checkpoint) = options.on_checkpoint {
                on_checkpoint(&checkpoint);
            }
        }

        if checkpoint.chapters.is_empty() {
            return Err(ScraperError::NoContentCollected { attempted });
        }
        info!(chapters = checkpoint.chapters.len(), "collected chapter content");
        Ok(ScrapedBook {
            book,
            total_chapters,
            chapter_refs: selected,
            chapters: checkpoint.chapters,
        })
    }

    fn fetch_chapter(
        &self,
        chapter: &ChapterRef,
        profile: &SiteProfile,
        normalizer: &ContentNormalizer,
    ) -> Result<ChapterContent, ScraperError> {
        let html = self.renderer.render(&chapter.url, profile)?;
        let doc = Html::parse_document(&html);
        let container = profile
            .content
            .iter()
            .filter_map(|sel| Selector::parse(sel).ok())
            .find_map(|sel| doc.select(&sel).next())
            .ok_or_else(|| ScraperError::MissingContent {
                url: chapter.url.clone(),
                selectors: profile.content.join(", "),
            })?;
        let paragraphs = normalizer.normalize(container);
        if paragraphs.is_empty() {
            return Err(ScraperError::EmptyChapter {
                url: chapter.url.clone(),
            });
        }
        Ok(ChapterContent {
            title: chapter.title.clone(),
            paragraphs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::FetchError;
    use crate::engine::profile::PROFILES;
    use crate::test_support::{html, quick_client, spawn_server};
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// bqg5 profile pointed at a local server.
    fn local_profile(base: &str) -> SiteProfile {
        let mut profile = PROFILES[0].clone();
        profile.host = "127.0.0.1";
        profile.base_url = Box::leak(base.to_string().into_boxed_str());
        profile
    }

    const INDEX: &str = r#"<html><head><meta property="og:title" content="测试之书"/></head><body>
<div id="info"><h1>测试之书</h1><p>作者：某人</p></div>
<div id="list"><dl><dt>正文</dt>
<dd><a href="/1/1.html">Ch1</a></dd>
<dd><a href="/1/2.html">Ch2</a></dd>
<dd><a href="/1/3.html">Ch3</a></dd>
</dl></div></body></html>"#;

    fn chapter_page(text: &str) -> String {
        format!("<html><body><div id=\"content\">{}<br/>第二段。</div></body></html>", text)
    }

    fn site_server() -> (String, std::sync::mpsc::Sender<()>, std::thread::JoinHandle<()>) {
        spawn_server(|request| match request.url() {
            "/1/" => html(INDEX),
            "/1/1.html" => html(&chapter_page("开篇正文。")),
            "/1/2.html" => tiny_http::Response::from_string("gone").with_status_code(404).boxed(),
            "/1/3.html" => html(&chapter_page("终局正文。")),
            _ => tiny_http::Response::from_string("").with_status_code(404).boxed(),
        })
    }

    #[test]
    fn range_selects_inclusive_slice() -> Result<(), ScraperError> {
        let items: Vec<usize> = (1..=10).collect();
        assert_eq!(ChapterRange::new(Some(3), Some(7)).apply(&items)?, &[3, 4, 5, 6, 7]);
        assert_eq!(ChapterRange::new(Some(12), None).apply(&items)?, &[10]);
        assert_eq!(ChapterRange::new(Some(8), None).apply(&items)?, &[8, 9, 10]);
        assert_eq!(ChapterRange::new(Some(0), Some(2)).apply(&items)?, &[1, 2]);
        assert_eq!(ChapterRange::new(None, Some(99)).apply(&items)?.len(), 10);
        assert_eq!(ChapterRange::default().apply(&items)?.len(), 10);
        Ok(())
    }

    #[test]
    fn inverted_range_is_an_error() {
        let items = [1, 2, 3];
        assert!(matches!(
            ChapterRange::new(Some(3), Some(2)).apply(&items),
            Err(ScraperError::EmptyRange { start: 3, end: 2, total: 3 })
        ));
        let empty: [u8; 0] = [];
        assert!(ChapterRange::default().apply(&empty).is_err());
    }

    #[test]
    fn end_to_end_skips_failed_chapter() -> Result<(), ScraperError> {
        let (base, shutdown, handle) = site_server();
        let client = quick_client();
        let profile = local_profile(&base);
        let scraper = BookScraper::new(&client, &client);
        let result = scraper.scrape_with_profile(&format!("{}/1/", base), &profile, &ScrapeOptions::default());
        let _ = shutdown.send(());
        let _ = handle.join();
        let scraped = result?;

        assert_eq!(scraped.book.title, "测试之书");
        assert_eq!(scraped.book.author, "某人");
        assert_eq!(scraped.total_chapters, 3);
        assert_eq!(
            scraped.chapter_refs[..2],
            [
                ChapterRef::new("Ch1", format!("{}/1/1.html", base)),
                ChapterRef::new("Ch2", format!("{}/1/2.html", base)),
            ]
        );
        let titles: Vec<_> = scraped.chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["Ch1", "Ch3"]);
        assert_eq!(scraped.chapters[0].paragraphs, ["开篇正文。", "第二段。"]);
        Ok(())
    }

    #[test]
    fn toc_only_fetches_no_chapters() -> Result<(), ScraperError> {
        let (base, shutdown, handle) = site_server();
        let client = quick_client();
        let profile = local_profile(&base);
        let options = ScrapeOptions {
            toc_only: true,
            range: ChapterRange::new(Some(2), None),
            ..ScrapeOptions::default()
        };
        let result = BookScraper::new(&client, &client).scrape_with_profile(&format!("{}/1/", base), &profile, &options);
        let _ = shutdown.send(());
        let _ = handle.join();
        let scraped = result?;
        assert_eq!(scraped.chapter_refs.len(), 2);
        assert!(scraped.chapters.is_empty());
        Ok(())
    }

    #[test]
    fn resume_skips_completed_and_reports_progress() -> Result<(), ScraperError> {
        let (base, shutdown, handle) = site_server();
        let client = quick_client();
        let profile = local_profile(&base);
        let url = format!("{}/1/", base);
        let mut stored = Checkpoint::new(url.clone());
        stored.completed = 2;
        stored.chapters.push(ChapterContent {
            title: "Ch1".to_string(),
            paragraphs: vec!["已保存。".to_string()],
        });
        let seen = RefCell::new(Vec::new());
        let saved = RefCell::new(Vec::new());
        let progress = |n: usize, total: usize| seen.borrow_mut().push((n, total));
        let on_checkpoint = |cp: &Checkpoint| saved.borrow_mut().push(cp.completed);
        let options = ScrapeOptions {
            progress: Some(&progress),
            resume: Some(&stored),
            on_checkpoint: Some(&on_checkpoint),
            ..ScrapeOptions::default()
        };
        let result = BookScraper::new(&client, &client).scrape_with_profile(&url, &profile, &options);
        let _ = shutdown.send(());
        let _ = handle.join();
        let scraped = result?;

        let titles: Vec<_> = scraped.chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["Ch1", "Ch3"]);
        assert_eq!(scraped.chapters[0].paragraphs, ["已保存。"]);
        assert_eq!(*seen.borrow(), [(3, 3)]);
        assert_eq!(*saved.borrow(), [3]);
        Ok(())
    }

    /// Serves fixed pages from memory; optionally aborts on failure like a browser session.
    struct FakeRenderer {
        pages: HashMap<String, String>,
        aborts: bool,
    }

    impl Renderer for FakeRenderer {
        fn render(&self, url: &str, _profile: &SiteProfile) -> Result<String, FetchError> {
            self.pages.get(url).cloned().ok_or_else(|| FetchError::HttpStatus {
                url: url.to_string(),
                status: 404,
            })
        }

        fn aborts_on_failure(&self) -> bool {
            self.aborts
        }
    }

    fn fake_site(aborts: bool) -> FakeRenderer {
        let base = "https://www.bqg5.com";
        let mut pages = HashMap::new();
        pages.insert(
            format!("{}/1/", base),
            INDEX.to_string(),
        );
        pages.insert(format!("{}/1/1.html", base), chapter_page("一。"));
        pages.insert(format!("{}/1/3.html", base), "<html><body><p>no container</p></body></html>".to_string());
        FakeRenderer { pages, aborts }
    }

    #[test]
    fn aborting_renderer_stops_on_first_failed_chapter() -> Result<(), String> {
        let client = quick_client();
        let renderer = fake_site(true);
        let result = BookScraper::new(&client, &renderer)
            .scrape_book("https://www.bqg5.com/1/", &ScrapeOptions::default());
        match result {
            Err(ScraperError::ChapterAborted { title, .. }) if title == "Ch2" => Ok(()),
            other => Err(format!("expected ChapterAborted, got {:?}", other)),
        }
    }

    #[test]
    fn all_chapters_failing_is_no_content() -> Result<(), String> {
        let client = quick_client();
        let mut renderer = fake_site(false);
        renderer.pages.remove("https://www.bqg5.com/1/1.html");
        let result = BookScraper::new(&client, &renderer)
            .scrape_book("https://www.bqg5.com/1/", &ScrapeOptions::default());
        match result {
            Err(ScraperError::NoContentCollected { attempted: 3 }) => Ok(()),
            other => Err(format!("expected NoContentCollected, got {:?}", other)),
        }
    }

    #[test]
    fn unsupported_site_stops_before_fetching() {
        let client = quick_client();
        let renderer = fake_site(false);
        let result = BookScraper::new(&client, &renderer)
            .scrape_book("https://example.com/1/", &ScrapeOptions::default());
        assert!(matches!(result, Err(ScraperError::UnsupportedSite { .. })));
    }
}
