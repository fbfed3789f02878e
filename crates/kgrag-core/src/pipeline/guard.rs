//! Lexical check that a generated query only names known identifiers.
//!
//! Comments and string literals are blanked out first so labels such as
//! `"Q42"` do not count. Every prefixed name is then expanded through the
//! query's own `PREFIX` declarations (on top of the prefixes WDQS predefines)
//! and every relative IRI is resolved against its `BASE`, so an aliased
//! namespace such as `PREFIX ent: <http://www.wikidata.org/entity/>` is
//! scanned like `wd:`. Item (`Q`), property (`P`) and lexeme (`L`) ids found
//! in the expanded IRIs under `wikidata.org` are reported.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::properties::PropertyAllowList;

const WIKIDATA: &str = "http://www.wikidata.org/";

/// Prefixes the Wikidata Query Service declares for every query
const PREDEFINED_PREFIXES: &[(&str, &str)] = &[
    ("wd", "entity/"),
    ("wds", "entity/statement/"),
    ("wdv", "value/"),
    ("wdref", "reference/"),
    ("wdt", "prop/direct/"),
    ("wdtn", "prop/direct-normalized/"),
    ("p", "prop/"),
    ("ps", "prop/statement/"),
    ("psv", "prop/statement/value/"),
    ("psn", "prop/statement/value-normalized/"),
    ("pq", "prop/qualifier/"),
    ("pqv", "prop/qualifier/value/"),
    ("pqn", "prop/qualifier/value-normalized/"),
    ("pr", "prop/reference/"),
    ("prv", "prop/reference/value/"),
    ("prn", "prop/reference/value-normalized/"),
    ("wdno", "prop/novalue/"),
    ("wdata", "wiki/Special:EntityData/"),
];

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:PREFIX\s+([A-Za-z][\w\-.]*)?:|(BASE))\s*<([^<>\s]*)>")
        .expect("valid declaration pattern")
});

static PREFIXED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z][\w\-.]*)?:([\w\-.]+)").expect("valid prefixed name pattern")
});

static IRI_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i:wikidata\.org)/(?:[^\s<>/]*/)*(?:Property:|Lexeme:)?([PQL]\d+)\b")
        .expect("valid IRI id pattern")
});

/// The identifiers a query may reference: resolved entities plus allowed properties
#[derive(Debug, Clone)]
pub struct QueryGuard {
    allowed: HashSet<String>,
}

impl QueryGuard {
    pub fn new<I, S>(entity_ids: I, properties: &PropertyAllowList) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut allowed: HashSet<String> = entity_ids.into_iter().map(Into::into).collect();
        allowed.extend(properties.ids().map(str::to_string));
        Self { allowed }
    }

    pub fn is_allowed(&self, id: &str) -> bool {
        self.allowed.contains(id)
    }

    /// Identifiers in `query` outside the allowed set, in order of first use
    pub fn disallowed(&self, query: &str) -> Vec<String> {
        referenced_ids(query)
            .into_iter()
            .filter(|id| !self.is_allowed(id))
            .collect()
    }

    pub fn check(&self, query: &str) -> Result<(), Vec<String>> {
        let disallowed = self.disallowed(query);
        if disallowed.is_empty() {
            Ok(())
        } else {
            Err(disallowed)
        }
    }
}

/// Namespaces in scope for a query body
struct Prologue {
    prefixes: HashMap<String, String>,
    base: Option<Url>,
}

impl Prologue {
    fn read(code: &str) -> Self {
        let mut prefixes: HashMap<String, String> = PREDEFINED_PREFIXES
            .iter()
            .map(|(name, path)| ((*name).to_string(), format!("{WIKIDATA}{path}")))
            .collect();
        let mut base: Option<Url> = None;

        for decl in DECLARATION.captures_iter(code) {
            let iri = decl.get(3).map_or("", |m| m.as_str());
            let resolved = resolve(base.as_ref(), iri);
            if decl.get(2).is_some() {
                base = Url::parse(&resolved).ok();
            } else {
                let name = decl.get(1).map_or("", |m| m.as_str());
                prefixes.insert(name.to_string(), resolved);
            }
        }

        Self { prefixes, base }
    }
}

/// `iri` made absolute against `base` when it is relative
fn resolve(base: Option<&Url>, iri: &str) -> String {
    if Url::parse(iri).is_ok() {
        return iri.to_string();
    }
    base.and_then(|b| b.join(iri).ok())
        .map_or_else(|| iri.to_string(), String::from)
}

/// Every entity, property or lexeme id the query references, deduplicated in order
pub fn referenced_ids(query: &str) -> Vec<String> {
    let code = strip_comments_and_literals(query);
    let prologue = Prologue::read(&code);

    let mut hits: Vec<(usize, String)> = Vec::new();
    let mut collect = |pos: usize, iri: &str| {
        for id in IRI_ID.captures_iter(iri).filter_map(|c| c.get(1)) {
            hits.push((pos, id.as_str().to_string()));
        }
    };

    // IRIs are blanked in `names` so prefixed-name matching never looks inside them
    let mut names = String::with_capacity(code.len());
    let mut rest = code.as_str();
    let mut pos = 0;
    while let Some(c) = rest.chars().next() {
        let iri = if c == '<' { iri_len(rest) } else { None };
        let len = if let Some(len) = iri {
            collect(pos, &resolve(prologue.base.as_ref(), &rest[1..len - 1]));
            names.push_str(&" ".repeat(len));
            len
        } else {
            names.push(c);
            c.len_utf8()
        };
        pos += len;
        rest = &rest[len..];
    }

    for name in PREFIXED_NAME.captures_iter(&names) {
        let Some(whole) = name.get(0) else { continue };
        let preceding = names[..whole.start()].chars().next_back();
        if preceding.is_some_and(|p| p.is_alphanumeric() || matches!(p, '_' | ':' | '?' | '$' | '-' | '.')) {
            continue;
        }
        let prefix = name.get(1).map_or("", |m| m.as_str());
        let local = name.get(2).map_or("", |m| m.as_str());
        if let Some(namespace) = prologue.prefixes.get(prefix) {
            collect(whole.start(), &format!("{namespace}{local}"));
        }
    }

    hits.sort_by_key(|(pos, _)| *pos);
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|(_, id)| seen.insert(id.clone()))
        .map(|(_, id)| id)
        .collect()
}

/// Replace `#` comments and string literals with a space, keep IRIs intact
///
/// `<` opens an IRI only when a `>` follows before any whitespace; otherwise it
/// is the less-than operator.
fn strip_comments_and_literals(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut rest = query;

    while let Some(c) = rest.chars().next() {
        let consumed = match c {
            '#' => {
                out.push(' ');
                rest.find('\n').unwrap_or(rest.len())
            }
            '"' | '\'' => {
                out.push(' ');
                literal_len(rest, c)
            }
            '<' => {
                let len = iri_len(rest).unwrap_or(1);
                out.push_str(&rest[..len]);
                len
            }
            _ => {
                out.push(c);
                c.len_utf8()
            }
        };
        rest = &rest[consumed..];
    }

    out
}

fn iri_len(text: &str) -> Option<usize> {
    for (i, c) in text.char_indices().skip(1) {
        if c == '>' {
            return Some(i + 1);
        }
        if c.is_whitespace() {
            return None;
        }
    }
    None
}

/// Byte length of the string literal at the start of `text`
fn literal_len(text: &str, quote: char) -> usize {
    let long = quote.to_string().repeat(3);
    if let Some(body) = text.strip_prefix(long.as_str()) {
        return body.find(long.as_str()).map_or(text.len(), |end| 3 + end + 3);
    }

    let mut escaped = false;
    for (i, c) in text.char_indices().skip(1) {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return i + 1;
        } else if c == '\n' {
            return i;
        }
    }
    text.len()
}
