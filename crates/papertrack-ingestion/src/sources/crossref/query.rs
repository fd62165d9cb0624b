//! Crossref query compiler.
//!
//! Crossref has no boolean syntax; each searchable field becomes one free-text
//! `query.*` parameter. The compiled expression is those parameters,
//! form-urlencoded in key order, so it can travel through [`PageRequest`]
//! like any other feed expression.
//!
//! | Field                       | Crossref                |
//! |-----------------------------|-------------------------|
//! | `TEXT`, `TITLE`, `ABSTRACT` | `query.bibliographic`   |
//! | `AUTHOR`                    | `query.author`          |
//! | `JOURNAL`                   | `query.container-title` |
//! | `CATEGORY`                  | not searchable, ignored |
//!
//! AND and OR terms are both plain words (Crossref ranks, it does not
//! filter). NOT terms render as `-term`, or `-"multi word"`, and are also
//! enforced after the fetch by [`apply_not_filter`].
//!
//! [`PageRequest`]: crate::sources::PageRequest

use std::collections::BTreeMap;

use papertrack_common::{Field, SearchQuery};
use url::form_urlencoded;

use crate::models::Paper;

pub const BIBLIOGRAPHIC: &str = "query.bibliographic";
pub const AUTHOR: &str = "query.author";
pub const CONTAINER_TITLE: &str = "query.container-title";

pub fn field_param(field: Field) -> Option<&'static str> {
    match field {
        Field::Text | Field::Title | Field::Abstract => Some(BIBLIOGRAPHIC),
        Field::Author => Some(AUTHOR),
        Field::Journal => Some(CONTAINER_TITLE),
        Field::Category => None,
    }
}

#[derive(Default)]
struct ParamTerms {
    positive: Vec<String>,
    negative: Vec<String>,
}

fn clean(terms: &[String]) -> impl Iterator<Item = String> + '_ {
    terms
        .iter()
        .map(|t| t.trim().trim_matches('"').trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Case-insensitive dedup, first spelling wins.
fn dedup(terms: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    terms
        .into_iter()
        .filter(|t| seen.insert(t.to_lowercase()))
        .collect()
}

fn negate(term: &str) -> String {
    if term.chars().any(char::is_whitespace) {
        format!("-\"{term}\"")
    } else {
        format!("-{term}")
    }
}

/// `query.*` parameters for `query`, with `scope` terms first.
pub fn compile_params(query: &SearchQuery, scope: Option<&SearchQuery>) -> BTreeMap<&'static str, String> {
    let mut by_param: BTreeMap<&'static str, ParamTerms> = BTreeMap::new();
    for source in scope.into_iter().chain(std::iter::once(query)) {
        for (field, fq) in &source.fields {
            let Some(param) = field_param(*field) else {
                continue;
            };
            let entry = by_param.entry(param).or_default();
            entry.positive.extend(clean(&fq.and).chain(clean(&fq.or)));
            entry.negative.extend(clean(&fq.not));
        }
    }

    by_param
        .into_iter()
        .filter_map(|(param, terms)| {
            let words: Vec<String> = dedup(terms.positive)
                .into_iter()
                .chain(dedup(terms.negative).iter().map(|t| negate(t)))
                .collect();
            let text = words.join(" ");
            (!text.is_empty()).then_some((param, text))
        })
        .collect()
}

/// Compile to a form-urlencoded parameter string. A query with no
/// searchable field compiles to an empty string.
pub fn compile(query: &SearchQuery, scope: Option<&SearchQuery>) -> String {
    let params = compile_params(query, scope);
    if params.is_empty() {
        return String::new();
    }
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish()
}

/// Parameters back out of a compiled expression.
pub fn decode(expression: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(expression.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Lowercased NOT terms carried by a compiled expression.
pub fn not_terms(expression: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for (_, text) in decode(expression) {
        let mut rest = text.as_str();
        while let Some(pos) = rest.find('-') {
            let at_word_start = rest[..pos].chars().last().map_or(true, char::is_whitespace);
            let after = &rest[pos + 1..];
            if !at_word_start {
                rest = after;
                continue;
            }
            let (term, tail) = match after.strip_prefix('"') {
                Some(quoted) => match quoted.find('"') {
                    Some(end) => (&quoted[..end], &quoted[end + 1..]),
                    None => (quoted, ""),
                },
                None => {
                    let end = after.find(char::is_whitespace).unwrap_or(after.len());
                    (&after[..end], &after[end..])
                }
            };
            let term = term.trim().to_lowercase();
            if !term.is_empty() && !terms.contains(&term) {
                terms.push(term);
            }
            rest = tail;
        }
    }
    terms
}

/// Drop papers whose title or abstract mentions any NOT term,
/// case-insensitively. Returns the kept papers and the number dropped.
pub fn apply_not_filter(papers: Vec<Paper>, not_terms: &[String]) -> (Vec<Paper>, usize) {
    if not_terms.is_empty() {
        return (papers, 0);
    }
    let before = papers.len();
    let kept: Vec<Paper> = papers
        .into_iter()
        .filter(|p| {
            let haystack = format!("{} {}", p.title, p.abstract_text).to_lowercase();
            !not_terms.iter().any(|t| haystack.contains(t.as_str()))
        })
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaperSource;
    use papertrack_common::FieldQuery;
    use pretty_assertions::assert_eq;

    fn params(query: &SearchQuery, scope: Option<&SearchQuery>) -> Vec<(String, String)> {
        decode(&compile(query, scope))
    }

    #[test]
    fn test_text_fields_share_bibliographic() {
        let q = SearchQuery::named("q")
            .with_field(Field::Title, FieldQuery::new().or(["diffusion"]))
            .with_field(Field::Abstract, FieldQuery::new().and(["robotics"]))
            .with_field(Field::Author, FieldQuery::new().or(["Hinton"]));
        assert_eq!(
            params(&q, None),
            vec![
                ("query.author".to_string(), "Hinton".to_string()),
                ("query.bibliographic".to_string(), "diffusion robotics".to_string()),
            ]
        );
    }

    #[test]
    fn test_negatives_trail_positives() {
        let q = SearchQuery::named("q").with_text(
            FieldQuery::new()
                .or(["diffusion"])
                .not(["survey", "deep learning"]),
        );
        assert_eq!(
            params(&q, None),
            vec![(
                "query.bibliographic".to_string(),
                "diffusion -survey -\"deep learning\"".to_string()
            )]
        );
    }

    #[test]
    fn test_scope_first_and_case_insensitive_dedup() {
        let scope = SearchQuery::new(None).with_text(FieldQuery::new().or(["Diffusion"]));
        let q = SearchQuery::named("q")
            .with_field(Field::Title, FieldQuery::new().or(["diffusion", "policy"]))
            .with_field(Field::Journal, FieldQuery::new().or(["Nature"]));
        assert_eq!(
            params(&q, Some(&scope)),
            vec![
                ("query.bibliographic".to_string(), "Diffusion policy".to_string()),
                ("query.container-title".to_string(), "Nature".to_string()),
            ]
        );
    }

    #[test]
    fn test_category_only_compiles_to_nothing() {
        let q = SearchQuery::named("q").with_field(Field::Category, FieldQuery::new().or(["cs.LG"]));
        assert_eq!(compile(&q, None), "");

        let blank = SearchQuery::named("q").with_text(FieldQuery::new().or(["  ", "\""]));
        assert_eq!(compile(&blank, None), "");
    }

    #[test]
    fn test_compile_is_form_encoded() {
        let q = SearchQuery::named("q").with_text(FieldQuery::new().or(["a&b"]).not(["x y"]));
        assert_eq!(compile(&q, None), "query.bibliographic=a%26b+-%22x+y%22");
    }

    #[test]
    fn test_not_terms_read_back_from_expression() {
        let q = SearchQuery::named("q")
            .with_text(FieldQuery::new().or(["self-supervised"]).not(["Survey", "deep learning"]))
            .with_field(Field::Author, FieldQuery::new().or(["LeCun"]).not(["Smith"]));
        assert_eq!(
            not_terms(&compile(&q, None)),
            vec!["smith".to_string(), "survey".to_string(), "deep learning".to_string()]
        );

        let plain = SearchQuery::named("q").with_text(FieldQuery::new().or(["diffusion"]));
        assert!(not_terms(&compile(&plain, None)).is_empty());
    }

    #[test]
    fn test_not_filter_checks_title_and_abstract() {
        let mut a = Paper::new(PaperSource::Crossref, "10.1/a");
        a.title = "A Survey of Diffusion".to_string();
        let mut b = Paper::new(PaperSource::Crossref, "10.1/b");
        b.title = "Diffusion Policies".to_string();
        b.abstract_text = "Uses Deep Learning heavily.".to_string();
        let mut c = Paper::new(PaperSource::Crossref, "10.1/c");
        c.title = "Diffusion for control".to_string();

        let terms = vec!["survey".to_string(), "deep learning".to_string()];
        let (kept, dropped) = apply_not_filter(vec![a, b, c], &terms);
        assert_eq!(dropped, 2);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].source_id, "10.1/c");
    }
}
