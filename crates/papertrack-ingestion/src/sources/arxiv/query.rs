//! arXiv query compiler.
//!
//! Turns a validated [`SearchQuery`] into the `search_query` parameter of the
//! arXiv Atom API. Compilation happens in two steps: the query is first
//! lowered to a small boolean [`Expr`] tree, which is then rendered to text.
//!
//! Field mapping:
//!
//! | Field      | arXiv            |
//! |------------|------------------|
//! | `TEXT`     | `ti` OR `abs`    |
//! | `TITLE`    | `ti`             |
//! | `ABSTRACT` | `abs`            |
//! | `AUTHOR`   | `au`             |
//! | `CATEGORY` | `cat`            |
//! | `JOURNAL`  | `jr` OR `co` (arXiv has no single journal field) |
//!
//! Rendering rules:
//! - a compound with one child renders as that child;
//! - a compound with two or more children is wrapped in parentheses;
//! - nested compounds of the same operator are flattened;
//! - `NOT` terms attach as `(<positive> AND NOT <negatives>)`, with `all:*`
//!   standing in for an empty positive side.

use std::fmt;

use papertrack_common::{Field, FieldQuery, SearchQuery};

/// Boolean expression over arXiv field prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// `prefix:term`, term already quoted if needed.
    Term { prefix: &'static str, term: String },
    /// `all:*`, matches everything.
    All,
    And(Vec<Expr>),
    Or(Vec<Expr>),
    AndNot(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Conjunction of `children`; `None` when there are none.
    pub fn and(children: Vec<Expr>) -> Option<Expr> {
        Self::compound(children, true)
    }

    /// Disjunction of `children`; `None` when there are none.
    pub fn or(children: Vec<Expr>) -> Option<Expr> {
        Self::compound(children, false)
    }

    fn compound(children: Vec<Expr>, is_and: bool) -> Option<Expr> {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match (child, is_and) {
                (Expr::And(inner), true) | (Expr::Or(inner), false) => flat.extend(inner),
                (other, _) => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ if is_and => Some(Expr::And(flat)),
            _ => Some(Expr::Or(flat)),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Term { prefix, term } => write!(f, "{prefix}:{term}"),
            Expr::All => f.write_str("all:*"),
            Expr::And(children) => write_joined(f, children, " AND "),
            Expr::Or(children) => write_joined(f, children, " OR "),
            Expr::AndNot(positive, negative) => write!(f, "({positive} AND NOT {negative})"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[Expr], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{child}")?;
    }
    f.write_str(")")
}

/// arXiv field prefixes a query field searches.
pub fn field_prefixes(field: Field) -> &'static [&'static str] {
    match field {
        Field::Text => &["ti", "abs"],
        Field::Title => &["ti"],
        Field::Abstract => &["abs"],
        Field::Author => &["au"],
        Field::Category => &["cat"],
        Field::Journal => &["jr", "co"],
    }
}

/// Quote `term` as a phrase when it contains whitespace, a hyphen or
/// characters that would otherwise break the expression. Terms already in
/// single or double quotes are kept as they are.
pub fn quote(term: &str) -> String {
    let t = term.trim();
    let already_quoted = t.len() >= 2
        && ((t.starts_with('"') && t.ends_with('"')) || (t.starts_with('\'') && t.ends_with('\'')));
    if already_quoted {
        return t.to_string();
    }
    if t.chars().any(|c| c.is_whitespace() || matches!(c, '-' | '(' | ')' | ':' | '"')) {
        return format!("\"{}\"", t.replace('"', ""));
    }
    t.to_string()
}

/// Spelling variants of a keyword: the term itself, then its hyphenated and
/// spaced forms when they differ.
pub fn expand_variants(keyword: &str) -> Vec<String> {
    let k = keyword.trim();
    let mut out = vec![k.to_string()];
    for variant in [k.replace(' ', "-"), k.replace('-', " ")] {
        if !out.contains(&variant) {
            out.push(variant);
        }
    }
    out
}

/// One keyword across every prefix of a field, with spelling variants.
fn term_expr(prefixes: &[&'static str], keyword: &str) -> Option<Expr> {
    let leaves = expand_variants(keyword)
        .into_iter()
        .map(|variant| quote(&variant))
        .filter(|q| !is_blank(q))
        .flat_map(|q| {
            prefixes
                .iter()
                .map(move |prefix| Expr::Term { prefix: *prefix, term: q.clone() })
        })
        .collect();
    Expr::or(leaves)
}

/// Blank once surrounding whitespace and quote marks are gone.
fn is_blank(term: &str) -> bool {
    term.trim_matches(|c: char| c.is_whitespace() || c == '"' || c == '\'').is_empty()
}

fn terms_expr(prefixes: &[&'static str], terms: &[String]) -> Vec<Expr> {
    terms
        .iter()
        .filter(|t| !is_blank(t))
        .filter_map(|t| term_expr(prefixes, t))
        .collect()
}

/// Lower one field's term sets. Empty field queries produce nothing.
pub fn field_expr(field: Field, query: &FieldQuery) -> Option<Expr> {
    let prefixes = field_prefixes(field);

    let mut positive = terms_expr(prefixes, &query.and);
    if let Some(any) = Expr::or(terms_expr(prefixes, &query.or)) {
        positive.push(any);
    }
    let positive = Expr::and(positive);

    match Expr::or(terms_expr(prefixes, &query.not)) {
        Some(negative) => Some(Expr::AndNot(
            Box::new(positive.unwrap_or(Expr::All)),
            Box::new(negative),
        )),
        None => positive,
    }
}

/// Lower a whole query: every non-empty field, ANDed.
pub fn query_expr(query: &SearchQuery) -> Option<Expr> {
    Expr::and(
        query
            .fields
            .iter()
            .filter_map(|(field, fq)| field_expr(*field, fq))
            .collect(),
    )
}

/// Compile `query`, ANDed with `scope` when given, to an arXiv
/// `search_query` string. Empty input compiles to an empty string.
pub fn compile(query: &SearchQuery, scope: Option<&SearchQuery>) -> String {
    let parts: Vec<Expr> = scope
        .and_then(query_expr)
        .into_iter()
        .chain(query_expr(query))
        .collect();
    Expr::and(parts).map(|e| e.to_string()).unwrap_or_default()
}
