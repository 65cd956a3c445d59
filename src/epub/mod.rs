//! EPUB 3 assembler. Turns a `BookRecord` and cleaned chapters into an
//! in-memory EPUB (mimetype, container, OPF, nav, optional NCX, title page,
//! chapters, stylesheet, optional cover).

use crate::engine::PoliteClient;
use crate::model::{BookRecord, ChapterContent};
use std::io::{Cursor, Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";
const LANGUAGE: &str = "zh";

const STYLESHEET: &str = r#"body { font-family: serif; line-height: 1.6; margin: 0 0.5em; }
h1 { font-size: 1.4em; text-align: center; margin: 1em 0; }
p { text-indent: 2em; margin: 0.4em 0; }
.title-page { text-align: center; margin-top: 3em; }
.title-page .author { margin-top: 1em; }
.title-page .description { text-align: left; margin-top: 2em; }
.cover { text-align: center; }
.cover img { max-width: 100%; height: auto; }
"#;

/// Errors from the EPUB assembler.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: book title is empty.")]
    EmptyTitle,

    #[error("Cannot write EPUB: book has no chapters.")]
    NoChapters,

    #[error("Failed to write EPUB file: {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

/// Cover image bytes with the file extension used inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    pub data: Vec<u8>,
    pub ext: &'static str,
}

impl CoverImage {
    fn media_type(&self) -> &'static str {
        match self.ext {
            "jpg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            _ => "image/png",
        }
    }
}

/// Fetch a cover image. Any failure is logged and yields `None`.
pub fn fetch_cover(client: &PoliteClient, url: &str) -> Option<CoverImage> {
    let (data, content_type) = match client.get_bytes(url) {
        Ok(r) => r,
        Err(e) => {
            warn!(url, error = %e, "cover image could not be fetched; continuing without cover");
            return None;
        }
    };
    if data.is_empty() {
        warn!(url, "cover image is empty; continuing without cover");
        return None;
    }
    let ext = image_ext(content_type.as_deref(), &data, url);
    debug!(url, ext, bytes = data.len(), "fetched cover");
    Some(CoverImage { data, ext })
}

/// Image extension from the content type, then magic bytes, then the URL.
fn image_ext(content_type: Option<&str>, data: &[u8], url: &str) -> &'static str {
    if let Some(ct) = content_type.map(str::to_ascii_lowercase) {
        if ct.contains("jpeg") || ct.contains("jpg") {
            return "jpg";
        }
        if ct.contains("png") {
            return "png";
        }
        if ct.contains("gif") {
            return "gif";
        }
        if ct.contains("webp") {
            return "webp";
        }
    }
    match data {
        [0xFF, 0xD8, 0xFF, ..] => return "jpg",
        [0x89, b'P', b'N', b'G', ..] => return "png",
        [b'G', b'I', b'F', b'8', ..] => return "gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => return "webp",
        _ => {}
    }
    let lower = url.to_ascii_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "jpg"
    } else if lower.ends_with(".gif") {
        "gif"
    } else if lower.ends_with(".webp") {
        "webp"
    } else {
        "png"
    }
}

/// Assemble an EPUB 3 document in memory.
///
/// Set `include_ncx` to add toc.ncx for legacy readers.
pub fn assemble(
    book: &BookRecord,
    chapters: &[ChapterContent],
    cover: Option<&CoverImage>,
    include_ncx: bool,
) -> Result<Vec<u8>, EpubError> {
    if book.title.trim().is_empty() {
        return Err(EpubError::EmptyTitle);
    }
    if chapters.is_empty() {
        return Err(EpubError::NoChapters);
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options_stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    let options_deflate = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    // Mimetype first, uncompressed.
    zip.start_file("mimetype", options_stored)?;
    zip.write_all(MIMETYPE)?;

    zip.start_file("META-INF/container.xml", options_deflate)?;
    zip.write_all(CONTAINER_XML)?;

    write_opf(book, chapters, cover, include_ncx, &mut zip, options_deflate)?;
    write_nav(chapters, &mut zip, options_deflate)?;
    if include_ncx {
        write_ncx(book, chapters, &mut zip, options_deflate)?;
    }
    write_entry(&mut zip, "style.css", STYLESHEET, options_deflate)?;
    if let Some(cover) = cover {
        let page = xhtml_page(
            "Cover",
            &format!(
                "  <div class=\"cover\"><img src=\"images/cover.{}\" alt=\"{}\"/></div>",
                cover.ext,
                escape(&book.title)
            ),
        );
        write_entry(&mut zip, "cover.xhtml", &page, options_deflate)?;
        zip.start_file(format!("{}images/cover.{}", OEBPS_PREFIX, cover.ext), options_deflate)?;
        zip.write_all(&cover.data)?;
    }
    write_entry(&mut zip, "title.xhtml", &title_page(book), options_deflate)?;
    for (i, ch) in chapters.iter().enumerate() {
        let name = format!("chapter-{}.xhtml", i + 1);
        write_entry(&mut zip, &name, &chapter_page(ch), options_deflate)?;
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

/// Write assembled bytes to `path`.
pub fn write_file(path: &Path, bytes: &[u8]) -> Result<(), EpubError> {
    std::fs::write(path, bytes).map_err(|e| EpubError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

fn identifier(book: &BookRecord) -> String {
    if book.source_url.is_empty() {
        "urn:novelscrape:book".to_string()
    } else {
        book.source_url.clone()
    }
}

fn write_entry(
    zip: &mut ZipWriter<impl Write + Seek>,
    name: &str,
    content: &str,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    zip.start_file(format!("{}{}", OEBPS_PREFIX, name), options)?;
    zip.write_all(content.as_bytes())?;
    Ok(())
}

fn write_opf(
    book: &BookRecord,
    chapters: &[ChapterContent],
    cover: Option<&CoverImage>,
    include_ncx: bool,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut manifest = String::from(
        r#"    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="css" href="style.css" media-type="text/css"/>
    <item id="title-page" href="title.xhtml" media-type="application/xhtml+xml"/>
"#,
    );
    if include_ncx {
        manifest.push_str(
            r#"    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
"#,
        );
    }
    let mut spine = String::new();
    let mut cover_meta = String::new();
    if let Some(cover) = cover {
        manifest.push_str(&format!(
            r#"    <item id="cover-img" href="images/cover.{}" media-type="{}" properties="cover-image"/>
    <item id="cover" href="cover.xhtml" media-type="application/xhtml+xml"/>
"#,
            cover.ext,
            cover.media_type()
        ));
        spine.push_str("    <itemref idref=\"cover\"/>\n");
        cover_meta.push_str("\n    <meta name=\"cover\" content=\"cover-img\"/>");
    }
    spine.push_str("    <itemref idref=\"title-page\"/>\n");
    for i in 1..=chapters.len() {
        manifest.push_str(&format!(
            "    <item id=\"chapter-{i}\" href=\"chapter-{i}.xhtml\" media-type=\"application/xhtml+xml\"/>\n"
        ));
        spine.push_str(&format!("    <itemref idref=\"chapter-{i}\"/>\n"));
    }

    let description_el = if book.description.trim().is_empty() {
        String::new()
    } else {
        format!(
            "\n    <dc:description>{}</dc:description>",
            escape(&book.description)
        )
    };
    let spine_attr = if include_ncx { " toc=\"ncx\"" } else { "" };

    let opf = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator>{creator}</dc:creator>
    <dc:language>{lang}</dc:language>
    <dc:source>{source}</dc:source>{description_el}{cover_meta}
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine{spine_attr}>
{spine}  </spine>
</package>
"#,
        id = escape(&identifier(book)),
        title = escape(&book.title),
        creator = escape(&book.author),
        lang = LANGUAGE,
        source = escape(&book.source_url),
    );
    write_entry(zip, "content.opf", &opf, options)
}

fn write_nav(
    chapters: &[ChapterContent],
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut links = String::new();
    for (i, ch) in chapters.iter().enumerate() {
        links.push_str(&format!(
            "      <li><a href=\"chapter-{}.xhtml\">{}</a></li>\n",
            i + 1,
            escape(&ch.title)
        ));
    }
    let nav = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{LANGUAGE}" lang="{LANGUAGE}">
<head>
  <meta charset="UTF-8"/>
  <title>目录</title>
</head>
<body>
  <nav epub:type="toc">
    <h1>目录</h1>
    <ol>
{links}    </ol>
  </nav>
</body>
</html>
"#
    );
    write_entry(zip, "nav.xhtml", &nav, options)
}

fn write_ncx(
    book: &BookRecord,
    chapters: &[ChapterContent],
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut nav_points = String::new();
    for (i, ch) in chapters.iter().enumerate() {
        nav_points.push_str(&format!(
            r#"    <navPoint id="navpoint-{n}" playOrder="{n}">
      <navLabel><text>{label}</text></navLabel>
      <content src="chapter-{n}.xhtml"/>
    </navPoint>
"#,
            n = i + 1,
            label = escape(&ch.title),
        ));
    }
    let ncx = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{}"/>
  </head>
  <docTitle>
    <text>{}</text>
  </docTitle>
  <navMap>
{}  </navMap>
</ncx>
"#,
        escape(&identifier(book)),
        escape(&book.title),
        nav_points
    );
    write_entry(zip, "toc.ncx", &ncx, options)
}

fn title_page(book: &BookRecord) -> String {
    let mut body = format!(
        "  <div class=\"title-page\">\n    <h1>{}</h1>\n    <p class=\"author\">{}</p>\n",
        escape(&book.title),
        escape(&book.author)
    );
    if let Some(status) = &book.status {
        body.push_str(&format!("    <p class=\"status\">{}</p>\n", escape(status)));
    }
    if !book.description.trim().is_empty() {
        body.push_str("    <div class=\"description\">\n");
        for line in book.description.lines().map(str::trim).filter(|l| !l.is_empty()) {
            body.push_str(&format!("      <p>{}</p>\n", escape(line)));
        }
        body.push_str("    </div>\n");
    }
    body.push_str("  </div>");
    xhtml_page(&book.title, &body)
}

fn chapter_page(chapter: &ChapterContent) -> String {
    let mut body = format!("  <h1>{}</h1>\n", escape(&chapter.title));
    for p in &chapter.paragraphs {
        body.push_str(&format!("  <p>{}</p>\n", escape(p)));
    }
    xhtml_page(&chapter.title, body.trim_end())
}

fn xhtml_page(title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="{lang}" lang="{lang}">
<head>
  <meta charset="UTF-8"/>
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="style.css"/>
</head>
<body>
{body}
</body>
</html>
"#,
        lang = LANGUAGE,
        title = escape(title),
        body = body
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
