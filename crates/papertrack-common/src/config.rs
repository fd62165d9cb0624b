//! Application configuration.
//!
//! Users describe what to track in a YAML file. The file is deep-merged over
//! the built-in defaults (`config/default.yml`), then validated in one pass
//! into [`AppConfig`]. Nothing past this module sees raw YAML: queries come
//! out as strict [`SearchQuery`] values and fetch limits as [`FetchWindow`].

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::Path;
use std::time::Duration;

use crate::error::{PapertrackError, Result};
use crate::query::{Field, FieldQuery, SearchQuery};

/// Built-in defaults every user config is merged over.
pub const DEFAULT_CONFIG_YAML: &str = include_str!("../config/default.yml");

/// Feed sources this build knows how to query.
pub const KNOWN_SOURCES: &[&str] = &["arxiv", "crossref"];

/// Longest strict or lookback window, in days (about a century).
pub const MAX_WINDOW_DAYS: u32 = 36_500;

/// Largest page any feed accepts in one request.
pub const MAX_FETCH_BATCH_SIZE: usize = 1_000;

const OPERATORS: [&str; 3] = ["AND", "OR", "NOT"];
const LOG_LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

/// Complete validated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log: LogConfig,
    pub search: SearchSettings,
    pub storage: StorageConfig,
    /// Global filter ANDed with every query.
    pub scope: Option<SearchQuery>,
    pub queries: Vec<SearchQuery>,
}

// ── Logging ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// DEBUG, INFO, WARNING, ERROR or CRITICAL
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String { "INFO".to_string() }

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl LogConfig {
    /// Level as a `tracing` filter directive.
    pub fn filter_directive(&self) -> &'static str {
        match self.level.as_str() {
            "DEBUG" => "debug",
            "WARNING" => "warn",
            "ERROR" | "CRITICAL" => "error",
            _ => "info",
        }
    }
}

// ── Search ───────────────────────────────────────────────────────────────────

/// Fetch policy as written in the config. `-1` means unbounded where noted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,

    /// New papers wanted per query.
    #[serde(default = "default_max_results")]
    pub max_results: i64,

    /// Strict recency window, in days.
    #[serde(default = "default_pull_every")]
    pub pull_every: i64,

    /// Admit older papers once the strict window runs dry.
    #[serde(default)]
    pub fill_enabled: bool,

    /// Fill-mode lookback in days, or -1.
    #[serde(default = "default_max_lookback_days")]
    pub max_lookback_days: i64,

    /// Raw items fetched per query before giving up, or -1.
    #[serde(default = "default_max_fetch_items")]
    pub max_fetch_items: i64,

    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: i64,

    /// Wall-clock budget per query.
    #[serde(default)]
    pub max_run_seconds: Option<u64>,

    /// Queries in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_sources() -> Vec<String> { vec!["arxiv".to_string()] }
fn default_max_results() -> i64 { 5 }
fn default_pull_every() -> i64 { 7 }
fn default_max_lookback_days() -> i64 { 30 }
fn default_max_fetch_items() -> i64 { 125 }
fn default_fetch_batch_size() -> i64 { 25 }
fn default_concurrency() -> usize { 1 }

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            max_results: default_max_results(),
            pull_every: default_pull_every(),
            fill_enabled: false,
            max_lookback_days: default_max_lookback_days(),
            max_fetch_items: default_max_fetch_items(),
            fetch_batch_size: default_fetch_batch_size(),
            max_run_seconds: None,
            concurrency: default_concurrency(),
        }
    }
}

impl SearchSettings {
    /// Check numeric ranges and cross-field constraints, normalising `sources`.
    pub fn validate(&mut self) -> Result<()> {
        if self.max_results <= 0 {
            return Err(PapertrackError::config("search.max_results must be positive"));
        }
        usize::try_from(self.max_results)
            .map_err(|_| PapertrackError::config("search.max_results is out of range"))?;
        window_days("search.pull_every", self.pull_every)?;
        if self.max_lookback_days != -1 {
            window_days("search.max_lookback_days", self.max_lookback_days)
                .map_err(|_| {
                    PapertrackError::config(format!(
                        "search.max_lookback_days must be -1 or between 1 and {MAX_WINDOW_DAYS}"
                    ))
                })?;
        }
        if self.fill_enabled
            && self.max_lookback_days != -1
            && self.max_lookback_days < self.pull_every
        {
            return Err(PapertrackError::config(
                "search.max_lookback_days must be -1 or >= search.pull_every when search.fill_enabled=true",
            ));
        }
        if self.max_fetch_items == 0 || self.max_fetch_items < -1 {
            return Err(PapertrackError::config("search.max_fetch_items must be -1 or positive"));
        }
        if self.max_fetch_items != -1 {
            usize::try_from(self.max_fetch_items)
                .map_err(|_| PapertrackError::config("search.max_fetch_items is out of range"))?;
        }
        match usize::try_from(self.fetch_batch_size) {
            Ok(n) if (1..=MAX_FETCH_BATCH_SIZE).contains(&n) => {}
            _ => {
                return Err(PapertrackError::config(format!(
                    "search.fetch_batch_size must be between 1 and {MAX_FETCH_BATCH_SIZE}"
                )))
            }
        }
        if self.max_run_seconds == Some(0) {
            return Err(PapertrackError::config("search.max_run_seconds must be positive when set"));
        }
        if self.concurrency == 0 {
            return Err(PapertrackError::config("search.concurrency must be at least 1"));
        }

        let mut sources: Vec<String> = Vec::new();
        for (idx, raw) in self.sources.iter().enumerate() {
            let source = raw.trim().to_lowercase();
            if source.is_empty() {
                continue;
            }
            if !KNOWN_SOURCES.contains(&source.as_str()) {
                return Err(PapertrackError::config(format!(
                    "search.sources[{idx}] is an unknown source: {source}"
                )));
            }
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        if sources.is_empty() {
            return Err(PapertrackError::config("search.sources must include at least one source"));
        }
        self.sources = sources;
        Ok(())
    }

    /// Engine parameters for one query run. Call after [`Self::validate`];
    /// out-of-range values that slipped past it clamp to the nearest bound.
    pub fn fetch_window(&self) -> FetchWindow {
        FetchWindow {
            pull_every_days: u32::try_from(self.pull_every)
                .unwrap_or(MAX_WINDOW_DAYS)
                .clamp(1, MAX_WINDOW_DAYS),
            fill_enabled: self.fill_enabled,
            max_lookback_days: u32::try_from(self.max_lookback_days)
                .ok()
                .filter(|d| *d > 0)
                .map(|d| d.min(MAX_WINDOW_DAYS)),
            max_fetch_items: usize::try_from(self.max_fetch_items).ok().filter(|n| *n > 0),
            fetch_batch_size: usize::try_from(self.fetch_batch_size)
                .unwrap_or(MAX_FETCH_BATCH_SIZE)
                .clamp(1, MAX_FETCH_BATCH_SIZE),
            target_new_count: usize::try_from(self.max_results).unwrap_or(1).max(1),
            max_duration: self.max_run_seconds.map(Duration::from_secs),
        }
    }
}

/// A day count in `1..=MAX_WINDOW_DAYS`.
fn window_days(key: &str, value: i64) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|d| (1..=MAX_WINDOW_DAYS).contains(d))
        .ok_or_else(|| {
            PapertrackError::config(format!("{key} must be between 1 and {MAX_WINDOW_DAYS}"))
        })
}

/// Policy parameters for one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    /// Strict window: accept papers updated within this many days.
    pub pull_every_days: u32,
    pub fill_enabled: bool,
    /// Fill-mode bound; `None` is unbounded.
    pub max_lookback_days: Option<u32>,
    /// Raw-item cap; `None` is unbounded.
    pub max_fetch_items: Option<usize>,
    pub fetch_batch_size: usize,
    pub target_new_count: usize,
    /// Optional wall-clock budget, checked between pages.
    pub max_duration: Option<Duration>,
}

impl Default for FetchWindow {
    fn default() -> Self {
        Self {
            pull_every_days: 7,
            fill_enabled: false,
            max_lookback_days: None,
            max_fetch_items: None,
            fetch_batch_size: 25,
            target_new_count: 5,
            max_duration: None,
        }
    }
}

impl FetchWindow {
    /// Reject windows the engine cannot make progress with.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.pull_every_days == 0 || self.pull_every_days > MAX_WINDOW_DAYS {
            return Err(format!("pull_every_days must be between 1 and {MAX_WINDOW_DAYS}"));
        }
        if self.max_lookback_days.map_or(false, |d| d == 0 || d > MAX_WINDOW_DAYS) {
            return Err(format!("max_lookback_days must be between 1 and {MAX_WINDOW_DAYS}"));
        }
        if self.fetch_batch_size == 0 {
            return Err("fetch_batch_size must be positive".to_string());
        }
        if self.target_new_count == 0 {
            return Err("target_new_count must be positive".to_string());
        }
        if self.max_fetch_items == Some(0) {
            return Err("max_fetch_items must be positive when bounded".to_string());
        }
        if let Some(lookback) = self.max_lookback_days {
            if self.fill_enabled && lookback < self.pull_every_days {
                return Err("max_lookback_days must be >= pull_every_days in fill mode".to_string());
            }
        }
        Ok(())
    }
}

// ── Storage ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Persist the seen-paper ledger between runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Keep the `vN` suffix on arXiv ids (treat each version as a new paper).
    #[serde(default)]
    pub keep_arxiv_version: bool,
}

fn default_true() -> bool { true }
fn default_db_path() -> String { "database/papers.db".to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: default_db_path(),
            keep_arxiv_version: false,
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    log: LogConfig,
    #[serde(default)]
    search: SearchSettings,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    scope: Option<Value>,
    #[serde(default)]
    queries: Option<Value>,
}

impl AppConfig {
    /// Load the defaults, overlaid with the YAML file at `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                Self::from_yaml_str(&content)
            }
            None => Self::from_yaml_str(""),
        }
    }

    /// Parse a user YAML document merged over the built-in defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let mut merged: Value = serde_yaml::from_str(DEFAULT_CONFIG_YAML)?;
        let overlay: Value = serde_yaml::from_str(content)?;
        match overlay {
            Value::Null => {}
            Value::Mapping(_) => merge_yaml(&mut merged, overlay),
            _ => return Err(PapertrackError::config("config root must be a mapping")),
        }
        Self::from_value(merged)
    }

    fn from_value(value: Value) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_value(value)?;

        let level = raw.log.level.trim().to_uppercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(PapertrackError::config(format!(
                "log.level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }
        let log = LogConfig { level };

        let mut search = raw.search;
        search.validate()?;

        if raw.storage.db_path.trim().is_empty() {
            return Err(PapertrackError::config("storage.db_path must not be empty"));
        }

        let scope = match raw.scope {
            None | Some(Value::Null) => None,
            Some(v) => Some(parse_search_query(&v, "scope")?),
        };

        let queries = match raw.queries {
            None | Some(Value::Null) => {
                return Err(PapertrackError::config("missing required config: queries"))
            }
            Some(Value::Sequence(items)) => items
                .iter()
                .enumerate()
                .map(|(idx, item)| parse_search_query(item, &format!("queries[{idx}]")))
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(PapertrackError::config("queries must be a list")),
        };
        if queries.is_empty() {
            return Err(PapertrackError::config("queries must include at least one query"));
        }

        Ok(Self { log, search, storage: raw.storage, scope, queries })
    }
}

/// Deep-merge `overlay` into `base`: mappings merge, everything else replaces.
pub fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                let both_maps = value.is_mapping()
                    && base_map.get(&key).map_or(false, Value::is_mapping);
                if both_maps {
                    if let Some(existing) = base_map.get_mut(&key) {
                        merge_yaml(existing, value);
                    }
                } else {
                    base_map.insert(key, value);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

// ── Query parsing ────────────────────────────────────────────────────────────

/// Validate one query mapping into a [`SearchQuery`].
///
/// Top-level `AND`/`OR`/`NOT` keys become the `TEXT` field. Field and
/// operator keys must be uppercase.
pub fn parse_search_query(value: &Value, key: &str) -> Result<SearchQuery> {
    let map = value
        .as_mapping()
        .ok_or_else(|| PapertrackError::config(format!("{key} must be a mapping")))?;

    let mut query = SearchQuery::new(None);
    let mut shorthand = Mapping::new();

    for (k, v) in map {
        let name = k
            .as_str()
            .ok_or_else(|| PapertrackError::config(format!("{key} field names must be strings")))?;

        if name == "NAME" {
            let display = v
                .as_str()
                .ok_or_else(|| PapertrackError::config(format!("{key}.NAME must be a string")))?
                .trim();
            query.name = (!display.is_empty()).then(|| display.to_string());
            continue;
        }
        if OPERATORS.contains(&name) {
            shorthand.insert(k.clone(), v.clone());
            continue;
        }
        if name != name.to_uppercase() {
            return Err(PapertrackError::config(format!(
                "{key} field keys must be uppercase: {name}"
            )));
        }
        let field: Field = name
            .parse()
            .map_err(|e| PapertrackError::config(format!("{key} has {e}")))?;
        let field_query = parse_field_query(v, &format!("{key}.{name}"))?;
        query.fields.insert(field, field_query);
    }

    if !shorthand.is_empty() {
        if query.fields.contains_key(&Field::Text) {
            return Err(PapertrackError::config(format!(
                "{key} mixes top-level AND/OR/NOT with an explicit TEXT field"
            )));
        }
        let text = parse_field_query(&Value::Mapping(shorthand), key)?;
        query.fields.insert(Field::Text, text);
    }

    if query.fields.is_empty() {
        return Err(PapertrackError::config(format!("{key} must include at least one field")));
    }
    if query.is_empty() {
        return Err(PapertrackError::config(format!(
            "{key} must include at least one non-empty term"
        )));
    }
    Ok(query)
}

fn parse_field_query(value: &Value, key: &str) -> Result<FieldQuery> {
    let map = match value {
        Value::Null => return Ok(FieldQuery::default()),
        Value::Mapping(map) => map,
        _ => {
            return Err(PapertrackError::config(format!(
                "{key} must be a mapping with AND/OR/NOT"
            )))
        }
    };

    let mut out = FieldQuery::default();
    for (k, v) in map {
        let op = k.as_str().unwrap_or_default();
        let terms = parse_terms(v, &format!("{key}.{op}"))?;
        match op {
            "AND" => out.and = terms,
            "OR" => out.or = terms,
            "NOT" => out.not = terms,
            other => {
                return Err(PapertrackError::config(format!(
                    "{key} has unknown operator: {other:?} (expected AND, OR or NOT)"
                )))
            }
        }
    }
    Ok(out)
}

/// A single string or a list of strings; trimmed, blanks dropped.
fn parse_terms(value: &Value, key: &str) -> Result<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(Some(s.trim())
            .filter(|t| !t.is_empty())
            .map(|t| vec![t.to_string()])
            .unwrap_or_default()),
        Value::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                let term = item.as_str().ok_or_else(|| {
                    PapertrackError::config(format!("{key}[{idx}] must be a string"))
                })?;
                let term = term.trim();
                if !term.is_empty() {
                    out.push(term.to_string());
                }
            }
            Ok(out)
        }
        _ => Err(PapertrackError::config(format!(
            "{key} must be a string or a list of strings"
        ))),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BASIC: &str = r#"
queries:
  - NAME: basic
    OR: [machine learning, deep learning]
    AND: neural network
    NOT: [survey]
"#;

    #[test]
    fn test_defaults_are_valid_apart_from_queries() {
        let err = AppConfig::from_yaml_str("").unwrap_err();
        assert!(err.to_string().contains("queries"), "{err}");
    }

    #[test]
    fn test_shorthand_becomes_text_field() {
        let config = AppConfig::from_yaml_str(BASIC).unwrap();
        assert_eq!(config.queries.len(), 1);
        let query = &config.queries[0];
        assert_eq!(query.name.as_deref(), Some("basic"));
        let text = &query.fields[&Field::Text];
        assert_eq!(text.or, vec!["machine learning", "deep learning"]);
        assert_eq!(text.and, vec!["neural network"]);
        assert_eq!(text.not, vec!["survey"]);
    }

    #[test]
    fn test_shorthand_equals_explicit_text() {
        let shorthand = AppConfig::from_yaml_str("queries: [{OR: [llm]}]").unwrap();
        let explicit = AppConfig::from_yaml_str("queries: [{TEXT: {OR: [llm]}}]").unwrap();
        assert_eq!(shorthand.queries, explicit.queries);
    }

    #[test]
    fn test_defaults_merge_with_override() {
        let yaml = r#"
search:
  pull_every: 3
  fill_enabled: true
  max_lookback_days: -1
queries: [{TITLE: {OR: [diffusion]}}]
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.search.pull_every, 3);
        assert_eq!(config.search.fetch_batch_size, 25);
        assert_eq!(config.log.level, "INFO");

        let window = config.search.fetch_window();
        assert_eq!(window.pull_every_days, 3);
        assert!(window.fill_enabled);
        assert_eq!(window.max_lookback_days, None);
        assert_eq!(window.max_fetch_items, Some(125));
        assert_eq!(window.target_new_count, 5);
        assert_eq!(window.max_duration, Some(Duration::from_secs(120)));
        assert!(window.validate().is_ok());
    }

    #[test]
    fn test_scope_parsed() {
        let yaml = r#"
scope: {CATEGORY: {OR: [cs.LG, cs.CV]}}
queries: [{TITLE: {OR: [diffusion]}}]
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        let scope = config.scope.unwrap();
        assert_eq!(scope.fields[&Field::Category].or, vec!["cs.LG", "cs.CV"]);
    }

    #[test]
    fn test_rejects_lowercase_field() {
        let err = AppConfig::from_yaml_str("queries: [{title: {OR: [x]}}]").unwrap_err();
        assert!(err.to_string().contains("uppercase"), "{err}");
    }

    #[test]
    fn test_rejects_unknown_field_and_operator() {
        let err = AppConfig::from_yaml_str("queries: [{VENUE: {OR: [x]}}]").unwrap_err();
        assert!(err.to_string().contains("unknown field"), "{err}");

        let err = AppConfig::from_yaml_str("queries: [{TITLE: {or: [x]}}]").unwrap_err();
        assert!(err.to_string().contains("unknown operator"), "{err}");
    }

    #[test]
    fn test_rejects_query_without_terms() {
        let err = AppConfig::from_yaml_str("queries: [{NAME: empty}]").unwrap_err();
        assert!(err.to_string().contains("at least one field"), "{err}");

        let err = AppConfig::from_yaml_str("queries: [{TITLE: {OR: ['  ']}}]").unwrap_err();
        assert!(err.to_string().contains("non-empty term"), "{err}");
    }

    #[test]
    fn test_rejects_shorthand_mixed_with_text() {
        let err = AppConfig::from_yaml_str("queries: [{OR: [a], TEXT: {OR: [b]}}]").unwrap_err();
        assert!(err.to_string().contains("explicit TEXT"), "{err}");
    }

    #[test]
    fn test_rejects_lookback_below_pull_every_in_fill_mode() {
        let yaml = r#"
search: {pull_every: 7, fill_enabled: true, max_lookback_days: 3}
queries: [{OR: [x]}]
"#;
        let err = AppConfig::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("max_lookback_days"), "{err}");

        // Same numbers are fine in strict mode.
        let yaml = r#"
search: {pull_every: 7, fill_enabled: false, max_lookback_days: 3}
queries: [{OR: [x]}]
"#;
        assert!(AppConfig::from_yaml_str(yaml).is_ok());
    }

    #[test]
    fn test_rejects_bad_numeric_ranges() {
        for search in [
            "{max_results: 0}",
            "{pull_every: -1}",
            "{max_fetch_items: 0}",
            "{max_fetch_items: -2}",
            "{max_lookback_days: 0}",
            "{fetch_batch_size: 0}",
            "{concurrency: 0}",
        ] {
            let yaml = format!("search: {search}\nqueries: [{{OR: [x]}}]");
            assert!(AppConfig::from_yaml_str(&yaml).is_err(), "{search} should be rejected");
        }
    }

    #[test]
    fn test_rejects_values_that_do_not_fit_the_window() {
        for (search, key) in [
            ("{pull_every: 4294967297}", "search.pull_every"),
            ("{pull_every: 200000000}", "search.pull_every"),
            ("{max_lookback_days: 4294967297}", "search.max_lookback_days"),
            ("{fetch_batch_size: 4294967297}", "search.fetch_batch_size"),
            ("{fetch_batch_size: 5000}", "search.fetch_batch_size"),
        ] {
            let yaml = format!("search: {search}\nqueries: [{{OR: [x]}}]");
            let err = AppConfig::from_yaml_str(&yaml).unwrap_err();
            assert!(err.to_string().contains(key), "{search}: {err}");
        }

        let yaml = format!("search: {{pull_every: {MAX_WINDOW_DAYS}}}\nqueries: [{{OR: [x]}}]");
        let config = AppConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.search.fetch_window().pull_every_days, MAX_WINDOW_DAYS);
    }

    #[test]
    fn test_fetch_window_rejects_oversized_days() {
        let window = FetchWindow { pull_every_days: 200_000_000, ..FetchWindow::default() };
        assert!(window.validate().is_err());

        let window = FetchWindow {
            fill_enabled: true,
            max_lookback_days: Some(MAX_WINDOW_DAYS + 1),
            ..FetchWindow::default()
        };
        assert!(window.validate().is_err());
        assert!(FetchWindow::default().validate().is_ok());
    }

    #[test]
    fn test_sources_normalised() {
        let yaml = "search: {sources: [ArXiv, arxiv, '']}\nqueries: [{OR: [x]}]";
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.search.sources, vec!["arxiv"]);

        let yaml = "search: {sources: [crossref, ARXIV]}\nqueries: [{OR: [x]}]";
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.search.sources, vec!["crossref", "arxiv"]);

        let yaml = "search: {sources: [openalex]}\nqueries: [{OR: [x]}]";
        assert!(AppConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_log_level_mapping() {
        let config = AppConfig::from_yaml_str("log: {level: warning}\nqueries: [{OR: [x]}]").unwrap();
        assert_eq!(config.log.level, "WARNING");
        assert_eq!(config.log.filter_directive(), "warn");

        assert!(AppConfig::from_yaml_str("log: {level: LOUD}\nqueries: [{OR: [x]}]").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("papertrack.yml");
        std::fs::write(&path, BASIC).unwrap();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.queries[0].display_name(), "basic");
    }

    #[test]
    fn test_merge_yaml_replaces_lists() {
        let mut base: Value = serde_yaml::from_str("a: {b: 1, c: [1, 2]}").unwrap();
        let overlay: Value = serde_yaml::from_str("a: {c: [3]}").unwrap();
        merge_yaml(&mut base, overlay);
        let expected: Value = serde_yaml::from_str("a: {b: 1, c: [3]}").unwrap();
        assert_eq!(base, expected);
    }
}
