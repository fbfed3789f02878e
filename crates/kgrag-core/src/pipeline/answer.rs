use crate::knowledge::QueryResult;
use crate::llm::parse::after_marker;
use crate::llm::prompt::fill;
use crate::llm::{Completion, CompletionError, CompletionResult};
use crate::network::truncate;

pub(crate) const TASK: &str = "Answer the question using only the given Wikidata results!";

const PROMPT: &str = r#"## INSTRUCTIONS
- Answer the question using only the given Wikidata results!
- DO NOT make up an answer and DO NOT use knowledge that is not in the results.
- If the results do not answer the question, say that you don't know.
- Answer in a natural way, as someone who knows the facts. DO NOT say "according to the context" or similar.
- Answer in complete sentences.

## CONTEXT
{count_note}
```json
{rows}
```

## QUESTION
{question}

## ANSWER
"#;

const EMPTY_PROMPT: &str = r#"## INSTRUCTIONS
- Answer the question using only the given Wikidata results!
- The Wikidata query for this question returned no results.
- Tell the user plainly that no data was found in Wikidata for this question.
- DO NOT guess and DO NOT answer from your own knowledge.
- Answer in one or two complete sentences.

## QUESTION
{question}

## ANSWER
"#;

/// Turns result rows into a natural-language answer
pub struct AnswerGenerator<'a> {
    completion: &'a dyn Completion,
    max_rows: usize,
}

impl<'a> AnswerGenerator<'a> {
    pub fn new(completion: &'a dyn Completion, max_rows: usize) -> Self {
        Self {
            completion,
            max_rows: max_rows.max(1),
        }
    }

    pub fn prompt(&self, question: &str, result: &QueryResult) -> String {
        if result.is_empty() {
            return fill(EMPTY_PROMPT, &[("question", question)]);
        }

        let shown = &result.rows[..result.len().min(self.max_rows)];
        let count_note = if shown.len() < result.len() {
            format!(
                "The query returned {} rows; the first {} are shown.",
                result.len(),
                shown.len()
            )
        } else {
            format!("The query returned {} rows.", result.len())
        };
        let rows = serde_json::to_string_pretty(shown).unwrap_or_else(|_| "[]".to_string());

        fill(
            PROMPT,
            &[("count_note", &count_note), ("rows", &rows), ("question", question)],
        )
    }

    pub async fn answer(&self, question: &str, result: &QueryResult) -> CompletionResult<String> {
        let raw = self.completion.complete(&self.prompt(question, result)).await?;
        tracing::debug!("Answer completion: {}", truncate(&raw, 1000));

        let answer = after_marker(&raw, "## ANSWER").trim();
        if answer.is_empty() {
            return Err(CompletionError::EmptyResponse);
        }
        Ok(answer.to_string())
    }
}
