use std::collections::HashSet;

use serde::Deserialize;

use crate::llm::parse::{after_marker, parse_json_lenient};
use crate::llm::prompt::fill;
use crate::llm::{Completion, CompletionResult};
use crate::network::truncate;

pub(crate) const TASK: &str = "Extract the entities from the given question!";

const PROMPT: &str = r#"## INSTRUCTIONS
- Extract the entities from the given question!
- The entities are used to find the most appropriate Wikidata entity IDs for a SPARQL query.
- If there is no entity in the question, return an empty list.
- ONLY return the entities. DO NOT return anything else.
- DO NOT include adjectives like 'Highest', 'Lowest', 'Biggest', etc in the entity.
- DO NOT add explanations in brackets like '(population)', '(area)', '(place)', '(artist)', etc.
- DO NOT include any explanations or apologies in your responses.
- Remove all stop words, including conjunctions like 'and' and prepositions like 'in' and 'on'.
- Make the entity singular, not plural. For instance, if the entity is foods, then transform it into food.

## OUTPUT FORMAT
A markdown code block tagged json holding an object with one key "entities", a list of strings.

## EXAMPLES
- Question: how much is 1 tablespoon of water?
Entity: ```json{"entities": ["Tablespoon"]}```

- Question: how are glacier caves formed?
Entity: ```json{"entities": ["Glacier cave"]}```

- Question: how big is auburndale florida?
Entity: ```json{"entities": ["Auburndale", "Florida"]}```

- Question: what country is jakarta in?
Entity: ```json{"entities": ["Jakarta"]}```

- Question: how fast is it?
Entity: ```json{"entities": []}```

- Question: Largest cities of the world
Entity: ```json{"entities": ["city"]}```

- Question: WWII battle durations
Entity: ```json{"entities": ["WWII", "battle"]}```

## QUESTION
- Question: {question}
Entity: "#;

/// Longest mention kept; anything longer is a sentence, not a name
const MAX_MENTION_CHARS: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExtractionOutput {
    Object { entities: Vec<String> },
    List(Vec<String>),
}

impl ExtractionOutput {
    fn into_mentions(self) -> Vec<String> {
        match self {
            Self::Object { entities } | Self::List(entities) => entities,
        }
    }
}

/// Asks the model which things a question is about
pub struct EntityExtractor<'a> {
    completion: &'a dyn Completion,
}

impl<'a> EntityExtractor<'a> {
    pub fn new(completion: &'a dyn Completion) -> Self {
        Self { completion }
    }

    pub fn prompt(question: &str) -> String {
        fill(PROMPT, &[("question", question)])
    }

    /// Mentions in the order the model listed them, trimmed and deduplicated
    ///
    /// An empty list is a valid answer. A completion that cannot be parsed is
    /// treated the same way.
    pub async fn extract(&self, question: &str) -> CompletionResult<Vec<String>> {
        let raw = self.completion.complete(&Self::prompt(question)).await?;
        tracing::debug!("Extraction completion: {}", truncate(&raw, 1000));

        Ok(parse_mentions(&raw))
    }
}

fn parse_mentions(raw: &str) -> Vec<String> {
    let text = after_marker(raw, "Entity:");
    let Some(output) = parse_json_lenient::<ExtractionOutput>(text) else {
        tracing::warn!("Could not parse entities from completion: {}", truncate(raw, 200));
        return Vec::new();
    };

    let mut seen = HashSet::new();
    output
        .into_mentions()
        .into_iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty() && m.chars().count() <= MAX_MENTION_CHARS)
        .filter(|m| seen.insert(m.to_lowercase()))
        .collect()
}
