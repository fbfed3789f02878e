use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::knowledge::EntityCandidate;
use crate::llm::parse::{after_marker, parse_json_lenient};
use crate::llm::prompt::fill;
use crate::llm::{Completion, CompletionResult};
use crate::network::truncate;

pub(crate) const TASK: &str =
    "Pick the Wikidata entity that the mention refers to in the given question!";

const PROMPT: &str = r#"## INSTRUCTIONS
- Pick the Wikidata entity that the mention refers to in the given question!
- ONLY pick an ID from the candidates listed below. DO NOT invent IDs.
- If none of the candidates fits the meaning of the mention in the question, answer with null.
- DO NOT include any explanations or apologies in your responses.

## OUTPUT FORMAT
A markdown code block tagged json holding an object with one key "id", the chosen ID or null.

## EXAMPLES
- Question: Humans born in New York City
Mention: New York City
Candidates: ```json
[{"id": "Q60", "label": "New York City", "description": "most populous city in the United States"},
{"id": "Q99673783", "label": "New York City", "description": "New York City as depicted in Star Trek"},
{"id": "Q7013127", "label": "New York City", "description": "band"}]
```
Entity ID: ```json{"id": "Q60"}```

- Question: WWII battle durations
Mention: battle
Candidates: ```json
[{"id": "Q178561", "label": "battle", "description": "part of a war which is well defined in duration, area and force commitment"},
{"id": "Q737593", "label": "Battle", "description": "town and civil parish in East Sussex, England"},
{"id": "Q16479866", "label": "Battle", "description": "family name"}]
```
Entity ID: ```json{"id": "Q178561"}```

- Question: Songs about the moon
Mention: moon
Candidates: ```json
[{"id": "Q114024051", "label": "Moon", "description": "2022 song by Kanye West"}]
```
Entity ID: ```json{"id": null}```

## QUESTION
- Question: {question}
Mention: {mention}
Candidates: ```json
{candidates}
```
Entity ID: "#;

static ENTITY_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[Qq]\d+\b").expect("valid entity id pattern")
});

/// The candidate chosen for a mention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEntity {
    pub mention: String,
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ResolvedEntity {
    fn from_candidate(mention: &str, candidate: &EntityCandidate) -> Self {
        Self {
            mention: mention.to_string(),
            id: candidate.id.clone(),
            label: candidate.label.clone(),
            description: candidate.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// Search returned nothing
    NoCandidates,
    /// The model said none of the candidates fit
    NoMatch,
    /// The model picked something that was not a candidate
    InvalidSelection,
    /// Search failed after retries
    RetrievalFailed,
}

impl UnresolvedReason {
    pub const fn describe(self) -> &'static str {
        match self {
            Self::NoCandidates => "no candidates found",
            Self::NoMatch => "no candidate fits",
            Self::InvalidSelection => "model picked a non-candidate",
            Self::RetrievalFailed => "search failed",
        }
    }
}

/// Disambiguation outcome for one mention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Resolved(ResolvedEntity),
    Unresolved {
        mention: String,
        reason: UnresolvedReason,
    },
}

impl Resolution {
    pub fn unresolved(mention: &str, reason: UnresolvedReason) -> Self {
        Self::Unresolved {
            mention: mention.to_string(),
            reason,
        }
    }

    pub fn mention(&self) -> &str {
        match self {
            Self::Resolved(entity) => &entity.mention,
            Self::Unresolved { mention, .. } => mention,
        }
    }

    pub fn entity(&self) -> Option<&ResolvedEntity> {
        match self {
            Self::Resolved(entity) => Some(entity),
            Self::Unresolved { .. } => None,
        }
    }
}

/// What the model's completion amounted to, before checking it against the candidates
#[derive(Debug, PartialEq, Eq)]
enum Selection {
    Id(String),
    None,
    Unreadable,
}

/// Chooses one candidate per mention with the model's help
pub struct Disambiguator<'a> {
    completion: &'a dyn Completion,
}

impl<'a> Disambiguator<'a> {
    pub fn new(completion: &'a dyn Completion) -> Self {
        Self { completion }
    }

    pub fn prompt(question: &str, mention: &str, candidates: &[EntityCandidate]) -> String {
        let listing = candidates
            .iter()
            .filter_map(|c| {
                serde_json::to_string(&serde_json::json!({
                    "id": c.id,
                    "label": c.label,
                    "description": c.description,
                }))
                .ok()
            })
            .collect::<Vec<_>>()
            .join(",\n");

        fill(
            PROMPT,
            &[
                ("question", question),
                ("mention", mention),
                ("candidates", &format!("[{listing}]")),
            ],
        )
    }

    /// Never returns an id outside `candidates`
    pub async fn disambiguate(
        &self,
        question: &str,
        mention: &str,
        candidates: &[EntityCandidate],
    ) -> CompletionResult<Resolution> {
        if candidates.is_empty() {
            return Ok(Resolution::unresolved(mention, UnresolvedReason::NoCandidates));
        }

        let raw = self
            .completion
            .complete(&Self::prompt(question, mention, candidates))
            .await?;
        tracing::debug!("Disambiguation completion for '{}': {}", mention, truncate(&raw, 1000));

        Ok(select(mention, candidates, &raw))
    }
}

fn select(mention: &str, candidates: &[EntityCandidate], raw: &str) -> Resolution {
    let resolution = match parse_selection(raw, candidates) {
        Selection::Id(id) => candidates
            .iter()
            .find(|c| c.id.eq_ignore_ascii_case(&id))
            .map_or_else(
                || {
                    tracing::warn!("Model picked {} for '{}', which is not a candidate", id, mention);
                    Resolution::unresolved(mention, UnresolvedReason::InvalidSelection)
                },
                |c| Resolution::Resolved(ResolvedEntity::from_candidate(mention, c)),
            ),
        Selection::None => Resolution::unresolved(mention, UnresolvedReason::NoMatch),
        Selection::Unreadable => {
            tracing::warn!("Could not read a selection for '{}': {}", mention, truncate(raw, 200));
            Resolution::unresolved(mention, UnresolvedReason::NoMatch)
        }
    };

    if let Resolution::Resolved(entity) = &resolution {
        tracing::info!("Resolved '{}' to {} ({})", mention, entity.id, entity.label);
    }
    resolution
}

fn parse_selection(raw: &str, candidates: &[EntityCandidate]) -> Selection {
    let text = after_marker(raw, "Entity ID:");

    if let Some(value) = parse_json_lenient::<serde_json::Value>(text) {
        match value.get("id") {
            Some(serde_json::Value::String(id)) => return Selection::Id(id.trim().to_string()),
            Some(serde_json::Value::Null) => return Selection::None,
            _ => {}
        }
    }

    // No usable JSON: accept the answer only if it names exactly one candidate
    let named: BTreeSet<String> = ENTITY_ID
        .find_iter(text)
        .map(|m| m.as_str().to_uppercase())
        .filter(|id| candidates.iter().any(|c| c.id == *id))
        .collect();

    let mut named = named.into_iter();
    match (named.next(), named.next()) {
        (Some(id), None) => Selection::Id(id),
        _ => Selection::Unreadable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCompletion;

    fn candidates() -> Vec<EntityCandidate> {
        vec![
            EntityCandidate::new("Q32815", "mosque", "place of worship for Muslims"),
            EntityCandidate::new("Q1454820", "Mosque", "album"),
            EntityCandidate::new("Q6901", "Mosque", "village in Iran"),
        ]
    }

    #[test]
    fn test_prompt_lists_candidates() {
        let prompt = Disambiguator::prompt("Mosques, with countries", "Mosque", &candidates());
        assert!(prompt.contains(TASK));
        assert!(prompt.contains("Mention: Mosque"));
        assert!(prompt.contains(r#""id":"Q1454820""#));
    }

    #[test]
    fn test_prompt_leaves_placeholders_in_question() {
        let prompt = Disambiguator::prompt("Who built {candidates}?", "{mention}", &candidates());
        assert!(prompt.contains("- Question: Who built {candidates}?\nMention: {mention}\n"));
        assert_eq!(prompt.matches(r#""id":"Q1454820""#).count(), 1);
    }

    #[test]
    fn test_select_valid_json() {
        let resolution = select("Mosque", &candidates(), r#"```json{"id": "Q32815"}```"#);
        let entity = resolution.entity().unwrap();
        assert_eq!(entity.id, "Q32815");
        assert_eq!(entity.label, "mosque");
        assert_eq!(entity.mention, "Mosque");
    }

    #[test]
    fn test_select_rejects_id_outside_candidates() {
        let resolution = select("Mosque", &candidates(), r#"{"id": "Q42"}"#);
        assert_eq!(
            resolution,
            Resolution::unresolved("Mosque", UnresolvedReason::InvalidSelection)
        );
    }

    #[test]
    fn test_select_null_is_no_match() {
        let resolution = select("Mosque", &candidates(), r#"{"id": null}"#);
        assert_eq!(resolution, Resolution::unresolved("Mosque", UnresolvedReason::NoMatch));
    }

    #[test]
    fn test_select_falls_back_to_single_named_candidate() {
        let resolution = select("Mosque", &candidates(), "The best match is q32815, the building.");
        assert_eq!(resolution.entity().unwrap().id, "Q32815");
    }

    #[test]
    fn test_select_ambiguous_text_is_unresolved() {
        let resolution = select("Mosque", &candidates(), "Either Q32815 or Q6901.");
        assert!(resolution.entity().is_none());

        let resolution = select("Mosque", &candidates(), "Q999 is the answer");
        assert!(resolution.entity().is_none());
    }

    #[test]
    fn test_select_uses_text_after_last_marker() {
        let raw = "Entity ID: ```json{\"id\": \"Q60\"}```\n\nEntity ID: ```json{\"id\": \"Q6901\"}```";
        assert_eq!(select("Mosque", &candidates(), raw).entity().unwrap().id, "Q6901");
    }

    #[test]
    fn test_resolution_serializes_with_status() {
        let json = serde_json::to_value(Resolution::unresolved("x", UnresolvedReason::NoCandidates))
            .unwrap();
        assert_eq!(json["status"], "unresolved");
        assert_eq!(json["reason"], "no_candidates");
    }

    #[tokio::test]
    async fn test_empty_candidates_skip_model() {
        let model = ScriptedCompletion::new();
        let resolution = Disambiguator::new(&model)
            .disambiguate("Who is Zorblax?", "Zorblax", &[])
            .await
            .unwrap();

        assert_eq!(resolution, Resolution::unresolved("Zorblax", UnresolvedReason::NoCandidates));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_disambiguate_with_model() {
        let model = ScriptedCompletion::new().on(TASK, r#"{"id": "Q32815"}"#);
        let resolution = Disambiguator::new(&model)
            .disambiguate("Mosques, with countries", "Mosque", &candidates())
            .await
            .unwrap();

        assert_eq!(resolution.entity().unwrap().id, "Q32815");
        assert_eq!(model.calls(), 1);
    }
}
