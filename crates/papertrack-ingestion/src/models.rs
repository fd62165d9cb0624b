//! Data models for the tracking pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::dedup::normalize_doi;

/// A paper as reported by a feed, normalised across sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub source: PaperSource,
    /// Stable within `source`; the primary identity key.
    pub source_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub abstract_text: String,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub primary_category: Option<String>,
    pub categories: Vec<String>,
    pub links: PaperLinks,
    pub doi: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperLinks {
    pub abstract_url: Option<String>,
    pub pdf_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperSource {
    Arxiv,
    Crossref,
}

impl PaperSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaperSource::Arxiv => "arxiv",
            PaperSource::Crossref => "crossref",
        }
    }
}

impl FromStr for PaperSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arxiv" => Ok(PaperSource::Arxiv),
            "crossref" => Ok(PaperSource::Crossref),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

impl fmt::Display for PaperSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Paper {
    /// Minimal record; the remaining fields default to empty.
    pub fn new(source: PaperSource, source_id: impl Into<String>) -> Self {
        Self {
            source,
            source_id: source_id.into(),
            title: String::new(),
            authors: Vec::new(),
            abstract_text: String::new(),
            published: None,
            updated: None,
            primary_category: None,
            categories: Vec::new(),
            links: PaperLinks::default(),
            doi: None,
        }
    }

    /// Time the window policy judges: `updated`, else `published`.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.updated.or(self.published)
    }

    /// Secondary dedup key, if the paper carries a usable DOI.
    pub fn doi_norm(&self) -> Option<String> {
        normalize_doi(self.doi.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_falls_back_to_published() {
        let published = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let updated = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();

        let mut paper = Paper::new(PaperSource::Arxiv, "2401.00001");
        assert_eq!(paper.timestamp(), None);

        paper.published = Some(published);
        assert_eq!(paper.timestamp(), Some(published));

        paper.updated = Some(updated);
        assert_eq!(paper.timestamp(), Some(updated));
    }

    #[test]
    fn test_source_serializes_lowercase() {
        let json = serde_json::to_string(&PaperSource::Arxiv).unwrap();
        assert_eq!(json, "\"arxiv\"");
        let json = serde_json::to_string(&PaperSource::Crossref).unwrap();
        assert_eq!(json, "\"crossref\"");
    }

    #[test]
    fn test_source_round_trips_through_config_name() {
        for name in papertrack_common::config::KNOWN_SOURCES {
            let source: PaperSource = name.parse().unwrap();
            assert_eq!(source.as_str(), *name);
        }
        assert!("openalex".parse::<PaperSource>().is_err());
    }
}
