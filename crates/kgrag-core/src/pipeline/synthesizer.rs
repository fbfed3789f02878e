use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use super::disambiguator::ResolvedEntity;
use super::guard::QueryGuard;
use crate::llm::parse::{after_marker, fenced_blocks, Fence};
use crate::llm::prompt::fill;
use crate::llm::{Completion, CompletionError};
use crate::network::truncate;
use crate::properties::PropertyAllowList;

pub(crate) const TASK: &str = "Generate a SPARQL query to answer the given question!";

const PROMPT: &str = r#"## INSTRUCTIONS
- Generate a SPARQL query to answer the given question!
- Use the given entity IDs as the anchors of the query.
- You may ONLY use properties from the list of allowed properties below. If the question needs a property that is not listed, generate an empty query like ```sparql```.
- DO NOT use any entity ID that is not in the list of entity IDs.
- Think step by step and write your thoughts before the query.
- DO NOT include any apologies in your responses.
- ONLY generate the Thoughts and SPARQL query once! DO NOT generate another Question!
- When using a property such as P17 (country), you DO NOT need to check explicitly that the value is a country.
- DO NOT use LIMIT, ORDER BY or FILTER when the question does not ask for it.
- DO NOT use aggregation functions like COUNT or AVG when the question does not ask for it.
- Use the label service with '{language}' as the label language unless the question asks for another language.
- Make the query as simple as possible!

## CONTEXT
- Entity IDs:
```json
{entities}
```
- Allowed properties:
```json
{properties}
```

## EXAMPLES
- Question: Humans born in New York City
Thoughts:
1. Humans are items that are an instance of (P31) human (Q5).
2. The place of birth property is P19 and New York City is Q60.
SPARQL Query: ```sparql
SELECT DISTINCT ?item ?itemLabel WHERE {
  ?item wdt:P31 wd:Q5 ;
        wdt:P19 wd:Q60 .
  SERVICE wikibase:label { bd:serviceParam wikibase:language "[AUTO_LANGUAGE],en". }
}
```

- Question: Number of humans in Wikidata
Thoughts:
1. Humans are items that are an instance of (P31) human (Q5).
2. The question asks for a count, so COUNT(*) is needed.
SPARQL Query: ```sparql
SELECT (COUNT(*) AS ?count) WHERE {
  ?item wdt:P31 wd:Q5 .
}
```

- Question: List of countries ordered by the number of their cities with a female mayor
Thoughts:
1. Cities are instances of subclasses of city (Q515).
2. The head of government (P6) statement gives the mayor, whose sex or gender (P21) is female (Q6581072).
3. Statements with an end time (P582) qualifier are no longer current.
4. The country of each city is P17; group by country and order by the count.
SPARQL Query: ```sparql
SELECT ?country ?countryLabel (COUNT(*) AS ?count) WHERE {
  ?city wdt:P31/wdt:P279* wd:Q515 .
  ?city p:P6 ?statement .
  ?statement ps:P6 ?mayor .
  ?mayor wdt:P21 wd:Q6581072 .
  FILTER NOT EXISTS { ?statement pq:P582 ?x }
  ?city wdt:P17 ?country .
  SERVICE wikibase:label { bd:serviceParam wikibase:language "en". }
}
GROUP BY ?country ?countryLabel
ORDER BY DESC(?count)
LIMIT 100
```

## QUESTION
- Question: {question}
Thoughts:
"#;

static RANDOM_ORDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)ORDER\s+BY\s+(?:(?:ASC|DESC)\s*\(\s*RAND\s*\(\s*\)\s*\)|RAND\s*\(\s*\))")
        .expect("valid random order pattern")
});

static ORDER_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:order|sort|random)").expect("valid order request pattern")
});

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Model produced an empty query")]
    Empty,
    #[error("No query found in the model output")]
    Unparsable,
    #[error("Query references unknown identifiers: {}", .0.join(", "))]
    DisallowedIds(Vec<String>),
    #[error(transparent)]
    Model(#[from] CompletionError),
}

pub type SynthesisResult<T> = Result<T, SynthesisError>;

/// SPARQL text that passed the identifier check
///
/// The only way to build one is through [`StructuredQuery::validated`], so a
/// value of this type never names an id outside the guard's allowed set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StructuredQuery(String);

impl StructuredQuery {
    pub fn validated(text: &str, guard: &QueryGuard) -> SynthesisResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SynthesisError::Empty);
        }
        guard.check(text).map_err(SynthesisError::DisallowedIds)?;
        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for StructuredQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Writes a SPARQL query from the question, the resolved entities and the allow-list
pub struct QuerySynthesizer<'a> {
    completion: &'a dyn Completion,
    properties: &'a PropertyAllowList,
    language: &'a str,
}

impl<'a> QuerySynthesizer<'a> {
    pub fn new(completion: &'a dyn Completion, properties: &'a PropertyAllowList) -> Self {
        Self {
            completion,
            properties,
            language: "en",
        }
    }

    #[must_use]
    pub fn with_language(mut self, language: &'a str) -> Self {
        self.language = language;
        self
    }

    pub fn prompt(&self, question: &str, entities: &[ResolvedEntity]) -> String {
        let entities = entities
            .iter()
            .filter_map(|e| {
                serde_json::to_string(&serde_json::json!({
                    "id": e.id,
                    "label": e.label,
                    "description": e.description,
                }))
                .ok()
            })
            .collect::<Vec<_>>()
            .join("\n");

        fill(
            PROMPT,
            &[
                ("language", self.language),
                ("entities", &entities),
                ("properties", &self.properties.render_for_prompt()),
                ("question", question),
            ],
        )
    }

    pub async fn synthesize(
        &self,
        question: &str,
        entities: &[ResolvedEntity],
    ) -> SynthesisResult<StructuredQuery> {
        let raw = self.completion.complete(&self.prompt(question, entities)).await?;
        tracing::debug!("Synthesis completion: {}", truncate(&raw, 1000));

        let text = extract_query(&raw).ok_or(SynthesisError::Unparsable)?;
        let text = strip_random_order(question, text);

        let guard = QueryGuard::new(entities.iter().map(|e| e.id.as_str()), self.properties);
        let query = StructuredQuery::validated(&text, &guard);
        match &query {
            Ok(q) => tracing::info!("Synthesized query:\n{}", q),
            Err(e) => tracing::warn!("Rejected synthesized query: {}", e),
        }
        query
    }
}

/// The last `sparql` block after the final `SPARQL Query:` marker
fn extract_query(raw: &str) -> Option<&str> {
    let tail = after_marker(raw, "SPARQL Query:");
    fenced_blocks(tail, Fence::Sparql).pop()
}

/// Drop random ordering the question did not ask for
fn strip_random_order(question: &str, query: &str) -> String {
    if ORDER_REQUEST.is_match(question) {
        return query.to_string();
    }
    RANDOM_ORDER.replace_all(query, "").trim().to_string()
}
