//! Crossref `/works` JSON → [`Paper`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

use crate::models::{Paper, PaperLinks, PaperSource};
use crate::sources::{FeedError, FeedPage};

/// Date sections tried for `published`, in order.
const PUBLISHED_KEYS: [&str; 4] = ["published-print", "published-online", "issued", "created"];
/// Date sections tried for `updated`, in order.
const UPDATED_KEYS: [&str; 4] = ["updated", "indexed", "created", "issued"];
const YEAR_KEYS: [&str; 4] = ["issued", "published-print", "published-online", "created"];

#[derive(Debug, Clone, Default)]
pub struct ParsedWorks {
    pub papers: Vec<Paper>,
    /// Items in `message.items`, parsed or not.
    pub raw_items: usize,
    pub skipped: usize,
    /// `message.total-results`, when present.
    pub total_results: Option<usize>,
}

impl From<ParsedWorks> for FeedPage {
    fn from(works: ParsedWorks) -> Self {
        FeedPage {
            papers: works.papers,
            raw_count: works.raw_items,
            skipped: works.skipped,
        }
    }
}

/// Parse a `/works` response body. Items that are not JSON objects are
/// counted as skipped; a body without `message.items` is malformed.
pub fn parse_crossref_works(body: &str) -> Result<ParsedWorks, FeedError> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| FeedError::Malformed(format!("Crossref JSON: {e}")))?;
    let message = &json["message"];
    let items = message["items"]
        .as_array()
        .ok_or_else(|| FeedError::Malformed("Crossref response has no message.items".to_string()))?;

    let mut works = ParsedWorks {
        raw_items: items.len(),
        total_results: message["total-results"].as_u64().and_then(|n| usize::try_from(n).ok()),
        ..ParsedWorks::default()
    };
    for item in items {
        match parse_work(item) {
            Some(paper) => works.papers.push(paper),
            None => works.skipped += 1,
        }
    }
    Ok(works)
}

/// One work item; `None` when it is not an object.
pub fn parse_work(item: &Value) -> Option<Paper> {
    item.as_object()?;

    let title = first_text(&item["title"]).unwrap_or_else(|| "Untitled".to_string());
    let doi = text(&item["DOI"]);
    let url = text(&item["URL"]);
    let subjects: Vec<String> = item["subject"]
        .as_array()
        .map(|subjects| subjects.iter().filter_map(text).collect())
        .unwrap_or_default();

    let mut paper = Paper::new(PaperSource::Crossref, source_id(item, &title));
    paper.authors = authors(&item["author"]);
    paper.abstract_text = text(&item["abstract"]).map(|a| clean_abstract(&a)).unwrap_or_default();
    paper.published = first_date(item, &PUBLISHED_KEYS);
    paper.updated = first_date(item, &UPDATED_KEYS);
    paper.primary_category = subjects.first().cloned();
    paper.categories = subjects;
    paper.links = PaperLinks { abstract_url: url, pdf_url: None };
    paper.doi = doi;
    paper.title = title;
    Some(paper)
}

fn text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_text(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => items.iter().find_map(text),
        other => text(other),
    }
}

/// Lowercased DOI, else the canonical URL, else a hash of title, year and
/// first author.
fn source_id(item: &Value, title: &str) -> String {
    if let Some(doi) = text(&item["DOI"]) {
        return doi.to_lowercase();
    }
    if let Some(url) = text(&item["URL"]) {
        return url;
    }

    let year = YEAR_KEYS
        .iter()
        .find_map(|key| item[*key]["date-parts"][0][0].as_i64())
        .map(|y| y.to_string())
        .unwrap_or_default();
    let first_author = &item["author"][0];
    let author = text(&first_author["family"])
        .or_else(|| text(&first_author["name"]))
        .unwrap_or_default();

    let signature = format!("{}|{}|{}", title.to_lowercase(), year, author.to_lowercase());
    let digest = Sha256::digest(signature.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("crossref:{hex}")
}

/// "given family", else `name`.
fn authors(value: &Value) -> Vec<String> {
    let Some(list) = value.as_array() else {
        return Vec::new();
    };
    list.iter()
        .filter(|a| a.is_object())
        .filter_map(|a| {
            let full = [text(&a["given"]), text(&a["family"])]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            if full.is_empty() {
                text(&a["name"])
            } else {
                Some(full)
            }
        })
        .collect()
}

fn first_date(item: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter().find_map(|key| {
        let section = &item[*key];
        text(&section["date-time"])
            .and_then(|s| parse_iso(&s))
            .or_else(|| parse_date_parts(&section["date-parts"]))
    })
}

fn parse_iso(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// `[[year, month?, day?]]`; missing parts default to 1.
fn parse_date_parts(value: &Value) -> Option<DateTime<Utc>> {
    let parts = value.get(0)?.as_array()?;
    if parts.is_empty() {
        return None;
    }
    let mut numbers = Vec::with_capacity(3);
    for part in parts.iter().take(3) {
        numbers.push(part.as_i64()?);
    }

    let year = i32::try_from(numbers[0]).ok()?;
    let month = numbers.get(1).copied().unwrap_or(1);
    let day = numbers.get(2).copied().unwrap_or(1);
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, u32::try_from(day).ok()?)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn tag_pattern() -> Option<&'static Regex> {
    static TAGS: OnceLock<Option<Regex>> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"<[^>]+>").ok()).as_ref()
}

/// Strip JATS/XML tags and collapse whitespace.
fn clean_abstract(raw: &str) -> String {
    let stripped = match tag_pattern() {
        Some(re) => re.replace_all(raw, " ").into_owned(),
        None => raw.to_string(),
    };
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
