//! Helpers for pulling structured data out of free-form completions.
//!
//! Models do not reliably honour output formats. These functions look for
//! fenced blocks first, then for the first balanced JSON value, and finally
//! retry JSON parsing with Python-style single quotes swapped for double quotes.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*json[ \t]*\n?(.*?)(?:```|\z)").expect("valid json fence pattern")
});

static SPARQL_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*sparql[ \t]*\n?(.*?)(?:```|\z)").expect("valid sparql fence pattern")
});

static ANY_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*\n?(.*?)(?:```|\z)").expect("valid fence pattern")
});

/// Language tag of a fenced block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fence {
    Json,
    Sparql,
    /// Any fence; a tag, if present, stays part of the contents
    Untagged,
}

impl Fence {
    fn pattern(self) -> &'static Regex {
        match self {
            Self::Json => &JSON_FENCE,
            Self::Sparql => &SPARQL_FENCE,
            Self::Untagged => &ANY_FENCE,
        }
    }
}

/// Contents of every fenced block of kind `fence`, in order of appearance
///
/// A block cut off by the token limit (no closing fence) is still returned.
pub fn fenced_blocks(text: &str, fence: Fence) -> Vec<&str> {
    fence
        .pattern()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .collect()
}

/// Text after the last occurrence of `marker`, or all of `text`
pub fn after_marker<'a>(text: &'a str, marker: &str) -> &'a str {
    text.rfind(marker)
        .map_or(text, |idx| &text[idx + marker.len()..])
}

/// The first balanced `{...}` or `[...]` span, skipping brackets inside strings
pub fn json_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                in_string = None;
            }
            continue;
        }

        match ch {
            '"' | '\'' => in_string = Some(ch),
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Parse a JSON value out of a completion, tolerating common model mistakes
pub fn parse_json_lenient<T: DeserializeOwned>(text: &str) -> Option<T> {
    let mut candidates: Vec<&str> = fenced_blocks(text, Fence::Json).into_iter().rev().collect();
    candidates.extend(fenced_blocks(text, Fence::Untagged));
    if let Some(span) = json_span(text) {
        candidates.push(span);
    }
    candidates.push(text.trim());

    for candidate in candidates {
        if let Ok(value) = serde_json::from_str::<T>(candidate) {
            return Some(value);
        }
        if candidate.contains('\'') {
            let requoted = candidate.replace('\'', "\"");
            if let Ok(value) = serde_json::from_str::<T>(&requoted) {
                return Some(value);
            }
        }
        if let Some(span) = json_span(candidate) {
            if span != candidate {
                if let Ok(value) = serde_json::from_str::<T>(span) {
                    return Some(value);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Entities {
        entities: Vec<String>,
    }

    #[test]
    fn test_fenced_blocks() {
        let text = "Thoughts...\n```sparql\nSELECT ?a WHERE {}\n```\nmore\n```sparql\nASK {}\n```";
        assert_eq!(fenced_blocks(text, Fence::Sparql), vec!["SELECT ?a WHERE {}", "ASK {}"]);
        assert!(fenced_blocks(text, Fence::Json).is_empty());
    }

    #[test]
    fn test_fenced_block_on_one_line() {
        let text = r#"Entity: ```json{"entities": ["Tablespoon"]}```"#;
        assert_eq!(fenced_blocks(text, Fence::Json), vec![r#"{"entities": ["Tablespoon"]}"#]);
    }

    #[test]
    fn test_unterminated_fence() {
        let text = "```sparql\nSELECT ?item WHERE { ?item wdt:P31 wd:Q5 }";
        assert_eq!(
            fenced_blocks(text, Fence::Sparql),
            vec!["SELECT ?item WHERE { ?item wdt:P31 wd:Q5 }"]
        );
    }

    #[test]
    fn test_empty_fence() {
        assert_eq!(fenced_blocks("```sparql```", Fence::Sparql), vec![""]);
    }

    #[test]
    fn test_untagged_fence_matches_any_block() {
        let text = "```\n[\"a\"]\n```";
        assert_eq!(fenced_blocks(text, Fence::Untagged), vec![r#"["a"]"#]);
        assert!(fenced_blocks(text, Fence::Json).is_empty());
        assert_eq!(fenced_blocks("```json\n{}```", Fence::Untagged), vec!["json\n{}"]);
    }

    #[test]
    fn test_after_marker() {
        assert_eq!(after_marker("a Entity: b Entity: c", "Entity: "), "c");
        assert_eq!(after_marker("no marker", "Entity: "), "no marker");
    }

    #[test]
    fn test_json_span_skips_brackets_in_strings() {
        let text = r#"here: {"a": "}{", "b": [1, 2]} trailing"#;
        assert_eq!(json_span(text), Some(r#"{"a": "}{", "b": [1, 2]}"#));
        assert_eq!(json_span("nothing"), None);
        assert_eq!(json_span("{ unbalanced"), None);
    }

    #[test]
    fn test_parse_fenced_json() {
        let parsed: Entities =
            parse_json_lenient("```json\n{\"entities\": [\"Mosque\", \"Country\"]}\n```").unwrap();
        assert_eq!(parsed.entities, vec!["Mosque", "Country"]);
    }

    #[test]
    fn test_parse_bare_json_with_noise() {
        let parsed: Entities =
            parse_json_lenient("Sure! {\"entities\": [\"Jakarta\"]} Hope this helps.").unwrap();
        assert_eq!(parsed.entities, vec!["Jakarta"]);
    }

    #[test]
    fn test_parse_single_quoted_json() {
        let parsed: Entities = parse_json_lenient("{'entities': ['Auburndale', 'Florida']}").unwrap();
        assert_eq!(parsed.entities, vec!["Auburndale", "Florida"]);
    }

    #[test]
    fn test_parse_prefers_last_json_block() {
        let text = "```json\n{\"entities\": [\"Example\"]}\n```\nAnswer:\n```json\n{\"entities\": [\"Real\"]}\n```";
        let parsed: Entities = parse_json_lenient(text).unwrap();
        assert_eq!(parsed.entities, vec!["Real"]);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_json_lenient::<Entities>("I don't know").is_none());
        assert!(parse_json_lenient::<Entities>("").is_none());
    }
}
