//! arXiv Atom feed parser.
//!
//! Event-driven over `quick-xml`; namespaces are matched by local name so
//! `arxiv:doi` and `doi` are the same element. A broken document fails the
//! whole page, a broken entry is only skipped.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use crate::models::{Paper, PaperLinks, PaperSource};
use crate::sources::{FeedError, FeedPage};

/// Parser output for one Atom document.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub papers: Vec<Paper>,
    /// `<entry>` elements seen, parsed or not.
    pub raw_entries: usize,
    pub skipped: usize,
    /// `opensearch:totalResults`, when present.
    pub total_results: Option<usize>,
}

impl From<ParsedFeed> for FeedPage {
    fn from(feed: ParsedFeed) -> Self {
        FeedPage {
            papers: feed.papers,
            raw_count: feed.raw_entries,
            skipped: feed.skipped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Id,
    Title,
    Summary,
    Published,
    Updated,
    AuthorName,
    Doi,
    TotalResults,
}

#[derive(Debug, Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    published: String,
    updated: String,
    authors: Vec<String>,
    links: PaperLinks,
    primary_category: Option<String>,
    categories: Vec<String>,
    doi: String,
}

impl EntryBuilder {
    fn buffer(&mut self, capture: Capture) -> Option<&mut String> {
        match capture {
            Capture::Id => Some(&mut self.id),
            Capture::Title => Some(&mut self.title),
            Capture::Summary => Some(&mut self.summary),
            Capture::Published => Some(&mut self.published),
            Capture::Updated => Some(&mut self.updated),
            Capture::Doi => Some(&mut self.doi),
            Capture::AuthorName | Capture::TotalResults => None,
        }
    }

    fn apply_attributes(&mut self, e: &BytesStart<'_>) {
        match e.local_name().as_ref() {
            b"link" => {
                let (mut href, mut rel, mut title, mut kind) = (None, None, None, None);
                for attr in e.attributes().flatten() {
                    let value = attr.unescape_value().ok().map(|v| v.into_owned());
                    match attr.key.local_name().as_ref() {
                        b"href" => href = value,
                        b"rel" => rel = value,
                        b"title" => title = value,
                        b"type" => kind = value,
                        _ => {}
                    }
                }
                let Some(href) = href else { return };
                if rel.as_deref() == Some("alternate") {
                    self.links.abstract_url = Some(href.clone());
                }
                let is_pdf = title.as_deref().map_or(false, |t| t.eq_ignore_ascii_case("pdf"))
                    || kind.as_deref() == Some("application/pdf");
                if is_pdf {
                    self.links.pdf_url = Some(href);
                }
            }
            b"primary_category" => {
                self.primary_category = term_attribute(e);
            }
            b"category" => {
                if let Some(term) = term_attribute(e) {
                    if !self.categories.contains(&term) {
                        self.categories.push(term);
                    }
                }
            }
            _ => {}
        }
    }

    fn finish(self, keep_version: bool) -> Option<Paper> {
        let id_url = self.id.trim();
        if id_url.is_empty() || id_url.contains("/api/errors") {
            return None;
        }
        let source_id = arxiv_id_from_url(id_url, keep_version)?;

        let mut paper = Paper::new(PaperSource::Arxiv, source_id);
        paper.title = collapse_whitespace(&self.title);
        paper.abstract_text = collapse_whitespace(&self.summary);
        paper.authors = self.authors;
        paper.published = parse_timestamp(&self.published);
        paper.updated = parse_timestamp(&self.updated);
        paper.primary_category = self.primary_category;
        paper.categories = self.categories;
        paper.links = self.links;
        let doi = self.doi.trim();
        paper.doi = (!doi.is_empty()).then(|| doi.to_string());
        Some(paper)
    }
}

fn term_attribute(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == b"term")
        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
        .filter(|t| !t.is_empty())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            debug!(value = s, error = %e, "Unparseable timestamp");
            None
        }
    }
}

/// Bare arXiv id from an entry id such as `http://arxiv.org/abs/2401.01234v2`.
/// The trailing `vN` is dropped unless `keep_version`.
pub fn arxiv_id_from_url(url: &str, keep_version: bool) -> Option<String> {
    let url = url.trim();
    let id = match url.find("/abs/") {
        Some(pos) => &url[pos + "/abs/".len()..],
        None => url,
    };
    let id = id.trim_matches('/');
    if id.is_empty() {
        return None;
    }
    if keep_version {
        return Some(id.to_string());
    }
    let stripped = match id.rfind('v') {
        Some(pos)
            if pos > 0
                && pos + 1 < id.len()
                && id[pos + 1..].bytes().all(|b| b.is_ascii_digit()) =>
        {
            &id[..pos]
        }
        _ => id,
    };
    Some(stripped.to_string())
}

/// Parse an arXiv Atom document.
pub fn parse_arxiv_feed(xml: &str, keep_version: bool) -> Result<ParsedFeed, FeedError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut out = ParsedFeed::default();
    let mut current: Option<EntryBuilder> = None;
    let mut capture: Option<Capture> = None;
    let mut in_author = false;
    let mut author_name = String::new();
    let mut total = String::new();

    loop {
        let event = reader.read_event().map_err(|e| {
            FeedError::Malformed(format!(
                "XML error at byte {}: {e}",
                reader.buffer_position()
            ))
        })?;

        match event {
            Event::Start(ref e) => {
                let name = e.local_name();
                match (name.as_ref(), current.is_some()) {
                    (b"entry", _) => {
                        out.raw_entries += 1;
                        current = Some(EntryBuilder::default());
                    }
                    (b"totalResults", false) => capture = Some(Capture::TotalResults),
                    (b"id", true) => capture = Some(Capture::Id),
                    (b"title", true) => capture = Some(Capture::Title),
                    (b"summary", true) => capture = Some(Capture::Summary),
                    (b"published", true) => capture = Some(Capture::Published),
                    (b"updated", true) => capture = Some(Capture::Updated),
                    (b"doi", true) => capture = Some(Capture::Doi),
                    (b"author", true) => {
                        in_author = true;
                        author_name.clear();
                    }
                    (b"name", true) if in_author => capture = Some(Capture::AuthorName),
                    (_, true) => {
                        if let Some(entry) = current.as_mut() {
                            entry.apply_attributes(e);
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(ref e) => {
                if let Some(entry) = current.as_mut() {
                    entry.apply_attributes(e);
                }
            }
            Event::Text(ref e) => {
                if let Some(target) = capture {
                    let text = e.unescape().map_err(|err| {
                        FeedError::Malformed(format!("bad text content: {err}"))
                    })?;
                    push_text(target, &text, current.as_mut(), &mut author_name, &mut total);
                }
            }
            Event::CData(ref e) => {
                if let Some(target) = capture {
                    let text = String::from_utf8_lossy(e).into_owned();
                    push_text(target, &text, current.as_mut(), &mut author_name, &mut total);
                }
            }
            Event::End(ref e) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"entry" => {
                        capture = None;
                        in_author = false;
                        if let Some(entry) = current.take() {
                            let entry_id = entry.id.trim().to_string();
                            match entry.finish(keep_version) {
                                Some(paper) => out.papers.push(paper),
                                None => {
                                    out.skipped += 1;
                                    debug!(id = %entry_id, "Skipping entry without usable id");
                                }
                            }
                        }
                    }
                    b"author" => {
                        in_author = false;
                        let name = collapse_whitespace(&author_name);
                        if let (Some(entry), false) = (current.as_mut(), name.is_empty()) {
                            entry.authors.push(name);
                        }
                    }
                    b"totalResults" => {
                        capture = None;
                        out.total_results = total.trim().parse().ok();
                    }
                    _ => capture = None,
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if current.is_some() {
        warn!("Feed ended inside an <entry>");
        out.skipped += 1;
    }
    Ok(out)
}

fn push_text(
    target: Capture,
    text: &str,
    entry: Option<&mut EntryBuilder>,
    author_name: &mut String,
    total: &mut String,
) {
    match target {
        Capture::AuthorName => append(author_name, text),
        Capture::TotalResults => append(total, text),
        other => {
            if let Some(buf) = entry.and_then(|e| e.buffer(other)) {
                append(buf, text);
            }
        }
    }
}

fn append(buf: &mut String, text: &str) {
    if !buf.is_empty() {
        buf.push(' ');
    }
    buf.push_str(text);
}
