//! Validated search-query model.
//!
//! Raw YAML is turned into these types exactly once, in [`crate::config`].
//! Everything downstream (query compilers, the fetch engine) only ever sees
//! this strict shape: a fixed set of fields, each carrying `AND`/`OR`/`NOT`
//! term lists.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Searchable field of a query.
///
/// `Text` is synthetic: it stands for "title or abstract" and is what bare
/// top-level `AND`/`OR`/`NOT` keys in a query resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Field {
    Text,
    Title,
    Abstract,
    Author,
    Journal,
    Category,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Text,
        Field::Title,
        Field::Abstract,
        Field::Author,
        Field::Journal,
        Field::Category,
    ];

    /// Configuration key for this field.
    pub fn as_key(&self) -> &'static str {
        match self {
            Field::Text     => "TEXT",
            Field::Title    => "TITLE",
            Field::Abstract => "ABSTRACT",
            Field::Author   => "AUTHOR",
            Field::Journal  => "JOURNAL",
            Field::Category => "CATEGORY",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

impl FromStr for Field {
    type Err = String;

    /// Exact, case-sensitive match on the uppercase key.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.as_key() == s)
            .ok_or_else(|| format!("unknown field: {s}"))
    }
}

/// Per-field term sets.
///
/// - `and`: every term must match
/// - `or`: at least one term matches
/// - `not`: no term may match
///
/// When both `and` and `or` are present they are enforced together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldQuery {
    pub and: Vec<String>,
    pub or: Vec<String>,
    pub not: Vec<String>,
}

impl FieldQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.and.extend(terms.into_iter().map(Into::into));
        self
    }

    pub fn or<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.or.extend(terms.into_iter().map(Into::into));
        self
    }

    pub fn not<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.not.extend(terms.into_iter().map(Into::into));
        self
    }

    /// True when no operator carries a non-blank term.
    pub fn is_empty(&self) -> bool {
        [&self.and, &self.or, &self.not]
            .iter()
            .all(|terms| terms.iter().all(|t| t.trim().is_empty()))
    }
}

/// A named query: a mapping from field to its term sets.
///
/// Fields are kept in a `BTreeMap` so iteration order, and therefore
/// compiled output, never depends on configuration key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    pub name: Option<String>,
    pub fields: BTreeMap<Field, FieldQuery>,
}

impl SearchQuery {
    pub fn new(name: Option<String>) -> Self {
        Self { name, fields: BTreeMap::new() }
    }

    pub fn named(name: &str) -> Self {
        Self::new(Some(name.to_string()))
    }

    /// Adds (or replaces) the term sets for `field`.
    pub fn with_field(mut self, field: Field, query: FieldQuery) -> Self {
        self.fields.insert(field, query);
        self
    }

    /// Top-level terms without a field key are `TEXT` terms.
    pub fn with_text(self, query: FieldQuery) -> Self {
        self.with_field(Field::Text, query)
    }

    /// True when every field is empty.
    pub fn is_empty(&self) -> bool {
        self.fields.values().all(FieldQuery::is_empty)
    }

    /// Name for log lines and reports.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_from_str_is_case_sensitive() {
        assert_eq!("TITLE".parse::<Field>(), Ok(Field::Title));
        assert_eq!("CATEGORY".parse::<Field>(), Ok(Field::Category));
        assert!("title".parse::<Field>().is_err());
        assert!("VENUE".parse::<Field>().is_err());
    }

    #[test]
    fn test_field_query_blank_terms_are_empty() {
        assert!(FieldQuery::new().is_empty());
        assert!(FieldQuery::new().or(["  ", ""]).is_empty());
        assert!(!FieldQuery::new().not(["survey"]).is_empty());
    }

    #[test]
    fn test_fields_iterate_in_declaration_order() {
        let q = SearchQuery::named("q")
            .with_field(Field::Category, FieldQuery::new().or(["cs.LG"]))
            .with_field(Field::Title, FieldQuery::new().or(["diffusion"]))
            .with_text(FieldQuery::new().and(["graph"]));
        let order: Vec<Field> = q.fields.keys().copied().collect();
        assert_eq!(order, vec![Field::Text, Field::Title, Field::Category]);
    }

    #[test]
    fn test_display_name_defaults() {
        assert_eq!(SearchQuery::new(None).display_name(), "unnamed");
        assert_eq!(SearchQuery::named("llm").display_name(), "llm");
    }
}
